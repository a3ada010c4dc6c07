use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handler::{DefaultHandler, Handler};
use crate::server::connection::Connection;
use crate::server::handshake::{Handshake, HandshakeResult};
use crate::server::registry::Registry;

/// TCP server implementing the PostgreSQL wire protocol.
///
/// Accepts connections, runs each through the startup handshake on its own
/// task, and drives authenticated sessions with the installed [`Handler`].
pub struct Server {
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    registry: Arc<Registry>,
    next_pid: Arc<AtomicI32>,
    shutdown: CancellationToken,
}

impl Server {
    /// Creates a server that answers everything with the conformant
    /// defaults.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_handler(config, Arc::new(DefaultHandler))
    }

    /// Creates a server with custom application logic.
    pub fn with_handler(config: ServerConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            config: Arc::new(config),
            handler,
            registry: Arc::new(Registry::new()),
            next_pid: Arc::new(AtomicI32::new(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the accept loop when cancelled. In-flight sessions
    /// run to their natural end; only the listener winds down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The live-session table, for tests and embedding code.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Binds to the configured address and serves until shutdown.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        info!(addr = %self.config.addr(), "listening");
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let permits = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (socket, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // EMFILE and friends are transient; keep the listener
                    // alive and retry after a pause.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                warn!(peer = %peer_addr, "connection cap reached, dropping connection");
                continue;
            };

            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            debug!(pid, peer = %peer_addr, "accepted connection");

            let config = Arc::clone(&self.config);
            let handler = Arc::clone(&self.handler);
            let registry = Arc::clone(&self.registry);
            tokio::spawn(serve_connection(
                socket, pid, config, handler, registry, permit,
            ));
        }
    }
}

/// One connection's life: handshake, registration, query loop, teardown.
async fn serve_connection(
    socket: TcpStream,
    pid: i32,
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    registry: Arc<Registry>,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;

    let handshake = Handshake::new(
        socket,
        pid,
        Arc::clone(&config),
        Arc::clone(&handler),
        Arc::clone(&registry),
    );

    let (framed, session) = match handshake.run().await {
        Ok(HandshakeResult::Success { framed, session }) => (framed, session),
        Ok(HandshakeResult::Finished) => {
            debug!(pid, "connection finished during startup");
            return;
        }
        Err(e) => {
            debug!(pid, error = %e, "handshake failed");
            return;
        }
    };

    registry.register(pid, session.secret_key(), session.cancel_flag());
    info!(
        pid,
        user = %session.user(),
        database = %session.database(),
        "session ready"
    );

    let result = Connection::new(framed, session, handler, &config).run().await;
    registry.unregister(pid);

    match result {
        Ok(()) => info!(pid, "session closed"),
        Err(e) => warn!(pid, error = %e, "session aborted"),
    }
}
