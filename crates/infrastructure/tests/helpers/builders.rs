#![allow(dead_code)]
use bytes::Bytes;
use ferrous_dot_infrastructure::ConnectionObserver;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use std::str::FromStr;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Response(Bytes),
    Closed,
}

/// Observer that records every callback and lets tests block on them.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn responses(&self) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Response(response) => Some(response),
                Event::Closed => None,
            })
            .collect()
    }

    pub fn closed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == Event::Closed)
            .count()
    }

    /// Blocks until `done` holds for the recorded events or `timeout` passes.
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap();
        while !done(&events) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            events = self.changed.wait_timeout(events, remaining).unwrap().0;
        }
        true
    }

    pub fn wait_for_responses(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| {
            events
                .iter()
                .filter(|event| matches!(event, Event::Response(_)))
                .count()
                >= count
        })
    }

    pub fn wait_for_close(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| events.contains(&Event::Closed))
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_all();
    }
}

impl ConnectionObserver for RecordingObserver {
    fn on_response(&self, response: Bytes) {
        self.record(Event::Response(response));
    }

    fn on_closed(&self) {
        self.record(Event::Closed);
    }
}

/// A recursive A query, split into its id and the message after the id.
pub fn a_query(domain: &str) -> (u16, Vec<u8>) {
    let mut query = Query::new();
    query.set_name(Name::from_str(domain).unwrap());
    query.set_query_type(RecordType::A);
    query.set_query_class(DNSClass::IN);

    let id = fastrand::u16(..);
    let mut message = Message::new(id, MessageType::Query, OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(query);

    let mut buf = Vec::new();
    message.emit(&mut BinEncoder::new(&mut buf)).unwrap();
    (id, buf.split_off(2))
}
