//! Line framing for the heartbeat port.
//!
//! The heartbeat protocol has exactly one request and one response. Each line
//! the peer sends is classified as [`HeartbeatLine::Ping`] when it is the
//! literal `ping`, and [`HeartbeatLine::Other`] otherwise. Only the line
//! terminator (`\n`, optionally preceded by `\r`) is removed before comparing,
//! so `" ping"` or `"PING"` are not pings.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Request literal, without terminator.
pub const PING: &str = "ping";

/// Response literal, without terminator.
pub const PONG: &str = "pong";

/// Longest heartbeat line accepted before the connection is treated as faulty.
pub const MAX_HEARTBEAT_LINE: usize = 8 * 1024;

/// A decoded heartbeat line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeartbeatLine {
    /// The peer asked for a liveness reply.
    Ping,
    /// Anything else. Accepted and ignored.
    Other,
}

impl HeartbeatLine {
    /// Classifies a line with its terminator already removed.
    #[must_use]
    pub fn classify(line: &[u8]) -> Self {
        if line == PING.as_bytes() {
            Self::Ping
        } else {
            Self::Other
        }
    }
}

/// The single response the heartbeat port ever sends.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Pong;

/// [`Decoder`]/[`Encoder`] pair for the heartbeat line protocol.
///
/// Bytes are never interpreted as text, so invalid UTF-8 from the peer is just
/// another ignored line. A partial line left in the buffer at end of stream is
/// classified like a terminated one.
#[derive(Clone, Debug, Default)]
pub struct HeartbeatCodec {
    /// Index into the buffer up to which no newline has been found.
    next_index: usize,
}

impl HeartbeatCodec {
    /// Creates a codec with an empty scan position.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for HeartbeatCodec {
    type Item = HeartbeatLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let scan_from = self.next_index.min(src.len());
        if let Some(position) = memchr::memchr(b'\n', &src[scan_from..]) {
            let newline = scan_from + position;
            let frame = src.split_to(newline + 1);
            self.next_index = 0;

            return Ok(Some(HeartbeatLine::classify(strip_carriage_return(&frame[..newline]))));
        }

        if src.len() > MAX_HEARTBEAT_LINE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("heartbeat line exceeds {MAX_HEARTBEAT_LINE} bytes"),
            ));
        }

        self.next_index = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(HeartbeatLine::classify(strip_carriage_return(&rest))))
    }
}

fn strip_carriage_return(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

impl Encoder<Pong> for HeartbeatCodec {
    type Error = io::Error;

    fn encode(&mut self, _item: Pong, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(PONG.len() + 1);
        dst.put_slice(PONG.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
