//! DNS-over-TLS message framing (RFC 7858 §3.3).
//!
//! Queries go out as `[len:u16][id:u16][body]` where `len` covers the id and
//! the body. Responses come back as `[len:u16][message]`. Responses longer
//! than [`MAX_RESPONSE_SIZE`] are cut to that size and the rest of the frame
//! is skipped, so the next frame boundary is preserved.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ferrous_dot_domain::DotError;
use std::io;
use tokio_util::codec::Decoder;

/// Largest response surfaced to the observer.
pub const MAX_RESPONSE_SIZE: usize = 8192;

/// Largest query body that still fits the 16-bit length with its id.
pub const MAX_QUERY_BODY: usize = u16::MAX as usize - 2;

const LENGTH_PREFIX: usize = 2;
const DISCARD_CHUNK: usize = 4096;

/// Encodes one query frame ready for the wire. `body` is the DNS message
/// following its 2-byte id.
pub fn encode_query(id: u16, body: &[u8]) -> Result<Bytes, DotError> {
    if body.len() > MAX_QUERY_BODY {
        return Err(DotError::QueryTooLarge(body.len()));
    }

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + 2 + body.len());
    frame.put_u16((body.len() + 2) as u16);
    frame.put_u16(id);
    frame.put_slice(body);
    Ok(frame.freeze())
}

/// Splits a complete query frame back into its id and body.
pub fn decode_query(frame: &[u8]) -> Option<(u16, &[u8])> {
    let (header, rest) = frame.split_first_chunk::<LENGTH_PREFIX>()?;
    let declared = decode_length(*header);
    if declared < 2 || rest.len() != declared {
        return None;
    }
    let (id, body) = rest.split_first_chunk::<2>()?;
    Some((u16::from_be_bytes(*id), body))
}

/// Reads the big-endian length prefix of a frame.
pub fn decode_length(header: [u8; LENGTH_PREFIX]) -> usize {
    u16::from_be_bytes(header) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    Header,
    Body {
        declared: usize,
    },
    Discard {
        remaining: usize,
    },
}

/// Response side of the framing, for use with `FramedRead`.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    state: DecodeState,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ResponseDecoder {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < LENGTH_PREFIX {
                        src.reserve(LENGTH_PREFIX - src.len());
                        return Ok(None);
                    }
                    let declared = src.get_u16() as usize;
                    self.state = DecodeState::Body { declared };
                }
                DecodeState::Body { declared } => {
                    let deliver = declared.min(MAX_RESPONSE_SIZE);
                    if src.len() < deliver {
                        src.reserve(deliver - src.len());
                        return Ok(None);
                    }
                    let response = src.split_to(deliver).freeze();
                    self.state = if declared > deliver {
                        tracing::debug!(
                            declared,
                            delivered = deliver,
                            "Truncating oversized DoT response"
                        );
                        DecodeState::Discard {
                            remaining: declared - deliver,
                        }
                    } else {
                        DecodeState::Header
                    };
                    return Ok(Some(response));
                }
                DecodeState::Discard { remaining } => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let skip = remaining.min(src.len()).min(DISCARD_CHUNK);
                    src.advance(skip);
                    self.state = match remaining - skip {
                        0 => DecodeState::Header,
                        remaining => DecodeState::Discard { remaining },
                    };
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if let Some(response) = self.decode(src)? {
            return Ok(Some(response));
        }
        if self.state == DecodeState::Header && src.is_empty() {
            return Ok(None);
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream closed in the middle of a DoT frame",
        ))
    }
}
