//! crates/daemon/src/server.rs
//!
//! Composition of the transfer and heartbeat listeners into one server.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerSettings;
use crate::connection_pool::ConnectionPool;
use crate::error::DaemonError;
use crate::heartbeat::HeartbeatHandler;
use crate::listener::{Listener, ListenerConfig};
use crate::storage::{NameLocks, SaveDirectory};
use crate::transfer::TransferHandler;

const LISTENER_TARGET: &str = "upload::listener";

/// Requests a graceful stop of both listeners.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    sender: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Stops accepting on both ports and lets in-flight connections drain.
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        // No receivers means the listeners are already gone.
        let _ = self.sender.send(());
    }
}

/// The upload port and the heartbeat port, bound and ready to serve.
#[derive(Debug)]
pub struct UploadServer {
    settings: ServerSettings,
    transfer: Listener<TransferHandler>,
    heartbeat: Listener<HeartbeatHandler>,
    shutdown: broadcast::Sender<()>,
}

impl UploadServer {
    /// Creates the save directory if needed and binds both listeners.
    ///
    /// Nothing is accepted until [`UploadServer::run`] is awaited.
    pub async fn bind(settings: ServerSettings) -> Result<Self, DaemonError> {
        let storage = SaveDirectory::new(settings.save_dir());
        storage
            .ensure_exists()
            .await
            .map_err(|source| DaemonError::CreateSaveDir {
                path: settings.save_dir().to_path_buf(),
                source,
            })?;

        let mut transfer_handler = TransferHandler::new(storage, settings.buffer_size());
        if settings.exclusive_uploads() {
            transfer_handler = transfer_handler.with_name_locks(Arc::new(NameLocks::new()));
        }

        let (shutdown, _) = broadcast::channel(1);
        let transfer = Listener::bind(
            listener_config(&settings, settings.transfer_addr()),
            transfer_handler,
            shutdown.subscribe(),
        )
        .await?;
        let heartbeat = Listener::bind(
            listener_config(&settings, settings.heartbeat_addr()),
            HeartbeatHandler::new(),
            shutdown.subscribe(),
        )
        .await?;

        Ok(Self {
            settings,
            transfer,
            heartbeat,
            shutdown,
        })
    }

    /// Settings the server was built from.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Bound address of the upload port.
    pub fn transfer_addr(&self) -> SocketAddr {
        self.transfer.local_addr()
    }

    /// Bound address of the heartbeat port.
    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.heartbeat.local_addr()
    }

    /// Live connections on the upload port.
    pub fn transfer_connections(&self) -> Arc<ConnectionPool> {
        self.transfer.connections()
    }

    /// Live connections on the heartbeat port.
    pub fn heartbeat_connections(&self) -> Arc<ConnectionPool> {
        self.heartbeat.connections()
    }

    /// Handle that stops the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown.clone(),
        }
    }

    /// Serves both ports until shutdown.
    ///
    /// The listeners fail independently: if one stops on an accept error the
    /// other keeps serving, and the first error is returned once both are done.
    pub async fn run(self) -> Result<(), DaemonError> {
        let Self {
            settings,
            transfer,
            heartbeat,
            shutdown,
        } = self;
        info!(
            target: LISTENER_TARGET,
            save_dir = %settings.save_dir().display(),
            buffer_size = settings.buffer_size().get(),
            exclusive_uploads = settings.exclusive_uploads(),
            "upload server starting"
        );

        let (transfer_result, heartbeat_result) = tokio::join!(transfer.serve(), heartbeat.serve());
        drop(shutdown);

        info!(target: LISTENER_TARGET, "upload server stopped");
        transfer_result.and(heartbeat_result)
    }
}

fn listener_config(settings: &ServerSettings, addr: SocketAddr) -> ListenerConfig {
    ListenerConfig::new(addr)
        .max_connections(settings.max_connections())
        .drain_timeout(settings.drain_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn loopback_settings(dir: &std::path::Path) -> ServerSettings {
        let loopback: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        ServerSettings::new(dir)
            .with_transfer_addr(loopback)
            .with_heartbeat_addr(loopback)
            .with_drain_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn bind_creates_missing_save_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let save_dir = dir.path().join("uploads").join("nested");
        let server = UploadServer::bind(loopback_settings(&save_dir))
            .await
            .expect("bind");
        assert!(save_dir.is_dir());
        assert_ne!(server.transfer_addr(), server.heartbeat_addr());
    }

    #[tokio::test]
    async fn shutdown_handle_stops_both_listeners() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = UploadServer::bind(loopback_settings(dir.path()))
            .await
            .expect("bind");
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.run());

        handle.shutdown();
        handle.shutdown();
        timeout(Duration::from_secs(5), running)
            .await
            .expect("stopped in time")
            .expect("join")
            .expect("clean exit");
    }

    #[tokio::test]
    async fn shutdown_before_run_is_not_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = UploadServer::bind(loopback_settings(dir.path()))
            .await
            .expect("bind");
        server.shutdown_handle().shutdown();
        timeout(Duration::from_secs(5), server.run())
            .await
            .expect("stopped in time")
            .expect("clean exit");
    }

    #[tokio::test]
    async fn unusable_save_directory_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").expect("seed");
        let error = UploadServer::bind(loopback_settings(&blocker.join("sub")))
            .await
            .expect_err("parent is a file");
        assert!(matches!(error, DaemonError::CreateSaveDir { .. }));
    }
}
