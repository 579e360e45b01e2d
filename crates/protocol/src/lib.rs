#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

//! Wire types shared by the upload server and its clients.
//!
//! The upload protocol is deliberately small. A client opens a connection to
//! the transfer port, sends a single metadata line naming the file and its total
//! size, and receives the number of bytes the server already holds for that
//! name as an 8-byte little-endian integer. When the server holds fewer bytes
//! than declared, the client streams the remainder and closes its send
//! direction. A second, unrelated port answers `ping` lines with `pong`.
//!
//! This crate owns the pieces of that exchange that do not touch sockets:
//!
//! - [`FileRequest`] parses and renders the metadata line.
//! - [`ResumeOffset`] encodes the server's reply.
//! - [`HeartbeatCodec`] frames the heartbeat line protocol for
//!   [`tokio_util::codec`].
//!
//! # Examples
//!
//! ```
//! use protocol::{FileRequest, ResumeOffset};
//!
//! let request = FileRequest::parse("FileName:backup.tar;Size:4096\n")?;
//! assert_eq!(request.file_name(), "backup.tar");
//! assert_eq!(request.declared_size(), 4096);
//!
//! let offset = ResumeOffset::new(1024);
//! assert_eq!(offset.remaining(request.declared_size()), Some(3072));
//! assert_eq!(ResumeOffset::from_le_bytes(offset.to_le_bytes()), offset);
//! # Ok::<(), protocol::MetadataError>(())
//! ```

mod heartbeat;
mod metadata;
mod offset;

pub use heartbeat::{HeartbeatCodec, HeartbeatLine, MAX_HEARTBEAT_LINE, PING, PONG, Pong};
pub use metadata::{
    FILE_NAME_PREFIX, FileRequest, MAX_METADATA_LINE, MetadataError, SIZE_PREFIX,
};
pub use offset::{OFFSET_LEN, ResumeOffset};
