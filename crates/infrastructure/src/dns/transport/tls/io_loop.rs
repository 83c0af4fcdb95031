//! The worker side of a DoT connection.
//!
//! One task owns the stream. Each iteration waits on, in priority order: the
//! wake signal, writability for the next pending query, an inbound response,
//! and the idle timer. At most one query is written per iteration.

use bytes::Bytes;
use futures::{Sink, StreamExt};
use std::collections::VecDeque;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::time::Instant;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use super::connection::ConnectionObserver;
use super::framer::ResponseDecoder;
use super::outbox::Outbox;

/// Upper bound on waiting for the peer to take our `close_notify`.
pub(crate) const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

/// Why the loop stopped.
#[derive(Debug)]
pub(crate) enum CloseReason {
    Shutdown,
    Idle,
    PeerClosed,
    Error(io::Error),
}

impl CloseReason {
    fn is_graceful(&self) -> bool {
        matches!(self, CloseReason::Shutdown | CloseReason::Idle)
    }
}

type QuerySink<S> = FramedWrite<WriteHalf<S>, BytesCodec>;

/// Queries taken from the outbox but not yet on the wire.
struct Pending {
    queue: VecDeque<Bytes>,
    /// A frame was handed to the sink and still needs flushing.
    unflushed: bool,
}

impl Pending {
    fn has_work(&self) -> bool {
        self.unflushed || !self.queue.is_empty()
    }

    /// Moves one frame into the sink and flushes it. The state lives in
    /// `self` and the sink, so dropping the future mid-way loses nothing and
    /// never sends a frame twice.
    fn poll_send_one<S>(
        &mut self,
        sink: &mut QuerySink<S>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>>
    where
        S: AsyncWrite,
    {
        let mut sink = Pin::new(sink);
        if !self.unflushed {
            ready!(Sink::<Bytes>::poll_ready(sink.as_mut(), cx))?;
            let Some(frame) = self.queue.pop_front() else {
                return Poll::Ready(Ok(()));
            };
            sink.as_mut().start_send(frame)?;
            self.unflushed = true;
        }
        ready!(Sink::<Bytes>::poll_flush(sink, cx))?;
        self.unflushed = false;
        Poll::Ready(Ok(()))
    }
}

/// Runs the connection until shutdown, idle timeout, peer close or error,
/// then closes the stream and notifies the observer exactly once.
pub(crate) async fn run<S>(
    stream: S,
    outbox: Arc<Outbox>,
    observer: Arc<dyn ConnectionObserver>,
    idle_timeout: Duration,
    server: &str,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut responses = FramedRead::new(reader, ResponseDecoder::new());
    let mut sink = FramedWrite::new(writer, BytesCodec::new());
    let mut pending = Pending {
        queue: VecDeque::new(),
        unflushed: false,
    };

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    debug!(server, "DoT I/O loop started");

    let reason = loop {
        tokio::select! {
            biased;

            wake = outbox.wake().wait() => {
                // Drained on shutdown too: these frames are dropped unsent.
                let frames = outbox.take_all();
                if wake < 0 {
                    debug!(server, dropped = frames.len() + pending.queue.len(), "DoT shutdown requested");
                    break CloseReason::Shutdown;
                }
                pending.queue.extend(frames);
                trace!(server, wake, pending = pending.queue.len(), "DoT loop woken");
            }

            sent = poll_fn(|cx| pending.poll_send_one(&mut sink, cx)), if pending.has_work() => {
                if let Err(e) = sent {
                    break CloseReason::Error(e);
                }
                trace!(server, pending = pending.queue.len(), "DoT query sent");
            }

            response = responses.next() => match response {
                Some(Ok(response)) => {
                    trace!(server, len = response.len(), "DoT response received");
                    observer.on_response(response);
                }
                Some(Err(e)) => break CloseReason::Error(e),
                None => break CloseReason::PeerClosed,
            },

            () = &mut idle => break CloseReason::Idle,
        }

        idle.as_mut().reset(Instant::now() + idle_timeout);
    };

    outbox.wake().close();

    match &reason {
        CloseReason::Error(e) => warn!(server, error = %e, "DoT connection failed"),
        reason => debug!(server, ?reason, "DoT connection closing"),
    }

    if reason.is_graceful() {
        let mut stream = responses.into_inner().unsplit(sink.into_inner());
        match tokio::time::timeout(CLOSE_NOTIFY_TIMEOUT, stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(server, error = %e, "DoT close_notify failed"),
            Err(_) => debug!(server, "DoT close_notify timed out"),
        }
    }

    observer.on_closed();
    reason
}
