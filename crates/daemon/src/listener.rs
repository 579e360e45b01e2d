//! crates/daemon/src/listener.rs
//!
//! TCP accept loop shared by the transfer and heartbeat ports.
//!
//! Every accepted connection runs in its own task inside a [`JoinSet`] owned
//! by the listener, and is recorded in a [`ConnectionPool`] for as long as the
//! task lives. A handler that fails or panics only ends its own task. When the
//! shutdown signal arrives the listening socket is closed first, then the
//! outstanding tasks are awaited up to the configured drain timeout.
//!
//! An accept error also closes the listening socket, but the connections
//! already running are left to finish on their own. They are only cut short
//! if a shutdown is requested while they are still running.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_DRAIN_TIMEOUT;
use crate::connection_pool::{ConnectionKind, ConnectionPool, normalize_peer_address};
use crate::error::DaemonError;

const LISTENER_TARGET: &str = "upload::listener";

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Default idle time before TCP keepalive probes start.
pub const DEFAULT_KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Protocol logic run on each accepted connection.
///
/// Implementations own all error reporting for their connection; the accept
/// loop never sees a handler's failure.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Which port this handler serves, used in logs and the connection table.
    const KIND: ConnectionKind;

    /// Runs one connection to completion.
    fn serve(&self, stream: TcpStream, peer: SocketAddr) -> impl Future<Output = ()> + Send;
}

/// Source of accepted connections for the accept loop.
pub(crate) trait AcceptSource: Send + Sync {
    fn accept_connection(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl AcceptSource for TcpListener {
    async fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept().await
    }
}

/// Configuration for one listener.
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_address: SocketAddr,
    /// Upper bound on live connections. `None` means unbounded.
    pub max_connections: Option<NonZeroUsize>,
    /// Whether to enable TCP keepalive on accepted sockets.
    pub tcp_keepalive: bool,
    /// Idle time before keepalive probes are sent.
    pub keepalive_time: Duration,
    /// How long shutdown waits for outstanding connections.
    pub drain_timeout: Duration,
    /// Listen backlog.
    pub backlog: i32,
}

impl ListenerConfig {
    /// Creates a configuration for `bind_address` with default settings.
    #[must_use]
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            max_connections: None,
            tcp_keepalive: true,
            keepalive_time: DEFAULT_KEEPALIVE_TIME,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Sets the live connection bound.
    #[must_use]
    pub fn max_connections(mut self, max: Option<NonZeroUsize>) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the shutdown drain timeout.
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// A bound listening socket paired with the handler for its connections.
#[derive(Debug)]
pub struct Listener<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<H>,
    config: ListenerConfig,
    connections: Arc<ConnectionPool>,
    shutdown: broadcast::Receiver<()>,
}

impl<H: ConnectionHandler> Listener<H> {
    /// Binds the configured address.
    ///
    /// `shutdown` should be subscribed before any shutdown can be requested so
    /// that no signal is missed.
    pub async fn bind(
        config: ListenerConfig,
        handler: H,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, DaemonError> {
        let addr = config.bind_address;
        let listener = bind_socket(addr, config.backlog).map_err(|source| DaemonError::Bind {
            kind: H::KIND,
            addr,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| DaemonError::Bind {
            kind: H::KIND,
            addr,
            source,
        })?;

        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(handler),
            config,
            connections: Arc::new(ConnectionPool::new()),
            shutdown,
        })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Table of live connections, usable after [`Listener::serve`] takes ownership.
    pub fn connections(&self) -> Arc<ConnectionPool> {
        Arc::clone(&self.connections)
    }

    /// Accepts connections until shutdown is requested or accepting fails.
    ///
    /// After a shutdown request outstanding connections are drained up to the
    /// drain timeout. After an accept error they are awaited without a limit.
    pub async fn serve(self) -> Result<(), DaemonError> {
        let Self {
            listener,
            local_addr,
            handler,
            config,
            connections,
            shutdown,
        } = self;
        accept_loop(listener, local_addr, handler, &config, &connections, shutdown).await
    }
}

async fn accept_loop<A, H>(
    acceptor: A,
    local_addr: SocketAddr,
    handler: Arc<H>,
    config: &ListenerConfig,
    connections: &Arc<ConnectionPool>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    A: AcceptSource,
    H: ConnectionHandler,
{
    let kind = H::KIND;
    let limit = config
        .max_connections
        .map(|max| Arc::new(Semaphore::new(max.get())));
    let mut tasks = JoinSet::new();

    info!(target: LISTENER_TARGET, %kind, addr = %local_addr, port = local_addr.port(), "listener started");

    let result = loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!(target: LISTENER_TARGET, %kind, "shutdown requested; no longer accepting");
                break Ok(());
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                log_task_exit(kind, joined);
            }
            accepted = acceptor.accept_connection() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(source) => {
                        error!(target: LISTENER_TARGET, %kind, error = %source, "accept failed");
                        break Err(DaemonError::Accept { kind, source });
                    }
                };
                let peer = normalize_peer_address(peer);

                let permit = match &limit {
                    Some(semaphore) => {
                        if let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() {
                            Some(permit)
                        } else {
                            warn!(
                                target: LISTENER_TARGET,
                                %kind,
                                %peer,
                                active = connections.active_count(),
                                "connection limit reached; closing connection"
                            );
                            drop(stream);
                            continue;
                        }
                    }
                    None => None,
                };

                info!(target: LISTENER_TARGET, %kind, %peer, "client connected");
                if config.tcp_keepalive
                    && let Err(error) = enable_keepalive(&stream, config.keepalive_time)
                {
                    debug!(target: LISTENER_TARGET, %kind, %peer, %error, "failed to enable TCP keepalive");
                }

                let tracked = connections.track(peer, kind);
                let handler = Arc::clone(&handler);
                tasks.spawn(async move {
                    let _permit = permit;
                    let _tracked = tracked;
                    handler.serve(stream, peer).await;
                });
            }
        }
    };

    drop(acceptor);
    if result.is_ok() {
        drain(kind, &mut tasks, config.drain_timeout).await;
    } else {
        settle(kind, &mut tasks, &mut shutdown, config.drain_timeout).await;
    }
    result
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(not(windows))]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

fn enable_keepalive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))
}

fn log_task_exit(kind: ConnectionKind, joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(error) if error.is_panic() => {
            error!(target: LISTENER_TARGET, %kind, %error, "connection handler panicked");
        }
        Err(error) => {
            debug!(target: LISTENER_TARGET, %kind, %error, "connection handler cancelled");
        }
    }
}

async fn join_all(kind: ConnectionKind, tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        log_task_exit(kind, joined);
    }
}

/// Lets outstanding connections finish after the accept loop failed.
async fn settle(
    kind: ConnectionKind,
    tasks: &mut JoinSet<()>,
    shutdown: &mut broadcast::Receiver<()>,
    limit: Duration,
) {
    if tasks.is_empty() {
        return;
    }
    info!(target: LISTENER_TARGET, %kind, outstanding = tasks.len(), "letting open connections finish");

    tokio::select! {
        () = join_all(kind, tasks) => {}
        signal = shutdown.recv() => match signal {
            Err(RecvError::Closed) => join_all(kind, tasks).await,
            Ok(()) | Err(RecvError::Lagged(_)) => drain(kind, tasks, limit).await,
        },
    }
}

async fn drain(kind: ConnectionKind, tasks: &mut JoinSet<()>, limit: Duration) {
    if tasks.is_empty() {
        return;
    }
    info!(target: LISTENER_TARGET, %kind, outstanding = tasks.len(), "waiting for connections to finish");

    let drained = timeout(limit, join_all(kind, tasks)).await;

    if drained.is_err() {
        warn!(
            target: LISTENER_TARGET,
            %kind,
            remaining = tasks.len(),
            "drain timeout elapsed; aborting remaining connections"
        );
        tasks.shutdown().await;
    }
}
