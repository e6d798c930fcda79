//! TCP listener hosting server-side sessions.
//!
//! Every accepted connection becomes its own [`Session`] bound to the shared
//! [`ActionRegistry`]. Accepted sessions know each other through a
//! [`SessionGroup`], so an action can reach the other peers of its server.
//! They cannot reconnect; a dropped client has to dial in again.

use crate::action::ActionRegistry;
use crate::config::{SessionOptions, TransportConfig};
use crate::error::Result;
use crate::session::{Session, SessionGroup};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Options for every accepted session.
    pub session: SessionOptions,
    /// Connections beyond this many live sessions are dropped on accept.
    pub max_connections: usize,
    pub nodelay: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            max_connections: TransportConfig::MAX_SERVER_CONNECTIONS,
            nodelay: true,
        }
    }
}

/// Handle to a running server. Dropping shuts it down.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    group: SessionGroup,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Live accepted sessions.
    pub fn sessions(&self) -> Vec<Session> {
        self.group.sessions()
    }

    /// Stop accepting and close every live session.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            let closed = self.group.close_all();
            info!("Server on {} closed {} sessions", self.addr, closed);
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Accepts connections and serves the registry's actions on each.
pub struct Server;

impl Server {
    /// Bind `bind_addr` (`host:port`, port 0 for any) and start accepting.
    pub async fn start(
        registry: Arc<ActionRegistry>,
        bind_addr: &str,
        options: ServerOptions,
    ) -> Result<ServerHandle> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("Server listening on {} ({} actions)", addr, registry.len());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let group = SessionGroup::new();

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            options,
            group.clone(),
            shutdown_rx,
        ));

        Ok(ServerHandle {
            addr,
            port,
            group,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Arc<ActionRegistry>,
        options: ServerOptions,
        group: SessionGroup,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            if group.len() >= options.max_connections {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr, options.max_connections
                                );
                                continue;
                            }
                            if let Err(e) = stream.set_nodelay(options.nodelay) {
                                debug!("Could not set nodelay for {}: {}", peer_addr, e);
                            }

                            let session = Session::builder()
                                .without_connector()
                                .options(options.session.clone())
                                .registry(registry.clone())
                                .group(group.clone())
                                .build();
                            match session.attach(Box::new(stream), peer_addr.to_string()) {
                                Ok(_) => debug!("Accepted session {} from {}", session.id(), peer_addr),
                                Err(e) => warn!("Could not attach {}: {}", peer_addr, e),
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }
}
