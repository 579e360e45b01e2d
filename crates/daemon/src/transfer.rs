//! crates/daemon/src/transfer.rs
//!
//! Per-connection upload handling.
//!
//! A session runs strictly in order: read one metadata line, parse it, look up
//! the stored length for the requested name, send that length back as an
//! 8-byte little-endian offset, then either append everything the client sends
//! until it closes its write half or, when the stored file already reaches the
//! declared size, stop without reading further.
//!
//! The number of bytes received is not compared with the declared size. A
//! session is complete when the peer closes the stream.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use protocol::{FileRequest, MAX_METADATA_LINE, MetadataError, ResumeOffset};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::connection_pool::ConnectionKind;
use crate::error::SessionError;
use crate::listener::ConnectionHandler;
use crate::storage::{NameLocks, SaveDirectory};

const TRANSFER_TARGET: &str = "upload::transfer";

/// How a well-formed session ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferOutcome {
    /// Bytes were appended until the client closed its stream.
    Received,
    /// The stored file already held at least the declared size.
    AlreadyComplete,
}

/// Summary of one finished upload session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferReport {
    /// The request as parsed from the metadata line.
    pub request: FileRequest,
    /// Offset reported to the client.
    pub offset: ResumeOffset,
    /// Bytes appended during this session.
    pub bytes_received: u64,
    /// Which branch the session took.
    pub outcome: TransferOutcome,
}

/// Runs the upload protocol on accepted connections.
#[derive(Clone, Debug)]
pub struct TransferHandler {
    storage: SaveDirectory,
    buffer_size: NonZeroUsize,
    locks: Option<Arc<NameLocks>>,
}

impl TransferHandler {
    /// Creates a handler that stores uploads in `storage` and receives in
    /// chunks of `buffer_size` bytes.
    pub fn new(storage: SaveDirectory, buffer_size: NonZeroUsize) -> Self {
        Self {
            storage,
            buffer_size,
            locks: None,
        }
    }

    /// Serialises sessions that target the same file name through `locks`.
    pub fn with_name_locks(mut self, locks: Arc<NameLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Runs one session to completion on `stream`.
    ///
    /// Protocol violations and I/O faults are returned as errors; nothing is
    /// ever written back to the peer except the resume offset.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr) -> Result<TransferReport, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);

        let line = read_metadata_line(&mut stream).await?;
        let request = FileRequest::parse(&line)?;
        info!(
            target: TRANSFER_TARGET,
            %peer,
            file = request.file_name(),
            declared_size = request.declared_size(),
            "metadata received"
        );

        let _name_guard = match &self.locks {
            Some(locks) => Some(locks.lock(request.file_name()).await),
            None => None,
        };

        let stored = self.storage.stored_file(request.file_name()).await?;
        let offset = stored.resume_offset();
        info!(
            target: TRANSFER_TARGET,
            %peer,
            file = request.file_name(),
            exists = stored.exists(),
            existing_size = stored.len(),
            "reporting existing size"
        );

        stream.write_all(&offset.to_le_bytes()).await?;
        stream.flush().await?;

        if offset.remaining(request.declared_size()).is_none() {
            info!(
                target: TRANSFER_TARGET,
                %peer,
                file = request.file_name(),
                "file already complete"
            );
            return Ok(TransferReport {
                request,
                offset,
                bytes_received: 0,
                outcome: TransferOutcome::AlreadyComplete,
            });
        }

        info!(target: TRANSFER_TARGET, %peer, file = request.file_name(), %offset, "receiving file");
        let bytes_received = self.receive(&mut stream, request.file_name()).await?;
        info!(
            target: TRANSFER_TARGET,
            %peer,
            path = %stored.path().display(),
            bytes_received,
            total = offset.get().saturating_add(bytes_received),
            "file transfer complete"
        );

        Ok(TransferReport {
            request,
            offset,
            bytes_received,
            outcome: TransferOutcome::Received,
        })
    }

    /// Appends everything readable from `stream` to `name` until end-of-stream.
    async fn receive<R>(&self, stream: &mut R, name: &str) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.storage.resolve(name);
        let mut file = self.storage.open_for_append(name).await?;
        let mut chunk = vec![0_u8; self.buffer_size.get()];
        let mut total: u64 = 0;

        loop {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            file.write_all(&chunk[..read])
                .await
                .map_err(|source| SessionError::storage(&path, source))?;
            total = total.saturating_add(read as u64);
        }

        file.flush()
            .await
            .map_err(|source| SessionError::storage(&path, source))?;
        Ok(total)
    }
}

/// Reads the metadata line, tolerating a missing terminator at end-of-stream.
async fn read_metadata_line<R>(reader: &mut R) -> Result<String, SessionError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = (MAX_METADATA_LINE as u64).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(SessionError::ClosedBeforeMetadata);
    }
    if line.last() != Some(&b'\n') && line.len() > MAX_METADATA_LINE {
        return Err(MetadataError::TooLong.into());
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

impl ConnectionHandler for TransferHandler {
    const KIND: ConnectionKind = ConnectionKind::Transfer;

    async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        match self.handle(stream, peer).await {
            Ok(report) => debug!(
                target: TRANSFER_TARGET,
                %peer,
                file = report.request.file_name(),
                offset = %report.offset,
                bytes_received = report.bytes_received,
                outcome = ?report.outcome,
                "transfer session finished"
            ),
            Err(error) if error.is_protocol_violation() => {
                warn!(target: TRANSFER_TARGET, %peer, %error, "closing connection after protocol violation");
            }
            Err(error) => {
                error!(target: TRANSFER_TARGET, %peer, %error, "transfer failed");
            }
        }
    }
}
