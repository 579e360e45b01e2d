//! crates/daemon/src/heartbeat.rs
//!
//! Ping/pong liveness handler for the heartbeat port.

use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use protocol::{HeartbeatCodec, HeartbeatLine, Pong};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::connection_pool::ConnectionKind;
use crate::listener::ConnectionHandler;

const HEARTBEAT_TARGET: &str = "upload::heartbeat";

const READ_BUFFER_CAPACITY: usize = 256;

/// Counts collected over one heartbeat connection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct HeartbeatReport {
    /// Pings answered.
    pub pings: u64,
    /// Lines that were not `ping` and got no reply.
    pub ignored: u64,
}

/// Answers every `ping` line with `pong` until the peer disconnects.
///
/// There is no idle timeout. A peer that stays connected without sending
/// anything keeps its handler alive.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    /// Creates a handler.
    pub const fn new() -> Self {
        Self
    }

    /// Runs the ping/pong loop on `stream` until end-of-stream or an I/O fault.
    pub async fn handle<S>(&self, mut stream: S, peer: SocketAddr) -> io::Result<HeartbeatReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut codec = HeartbeatCodec::new();
        let mut input = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
        let mut output = BytesMut::new();
        let mut report = HeartbeatReport::default();

        let mut at_eof = false;
        loop {
            loop {
                let line = if at_eof {
                    codec.decode_eof(&mut input)?
                } else {
                    codec.decode(&mut input)?
                };
                let Some(line) = line else { break };
                match line {
                    HeartbeatLine::Ping => {
                        debug!(target: HEARTBEAT_TARGET, %peer, "ping received");
                        codec.encode(Pong, &mut output)?;
                        stream.write_all(&output).await?;
                        output.clear();
                        report.pings += 1;
                    }
                    HeartbeatLine::Other => report.ignored += 1,
                }
            }

            if at_eof {
                stream.flush().await?;
                return Ok(report);
            }
            at_eof = stream.read_buf(&mut input).await? == 0;
        }
    }
}

impl ConnectionHandler for HeartbeatHandler {
    const KIND: ConnectionKind = ConnectionKind::Heartbeat;

    async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        match self.handle(stream, peer).await {
            Ok(report) => debug!(
                target: HEARTBEAT_TARGET,
                %peer,
                pings = report.pings,
                ignored = report.ignored,
                "heartbeat connection closed"
            ),
            Err(error) => warn!(target: HEARTBEAT_TARGET, %peer, %error, "heartbeat connection failed"),
        }
    }
}
