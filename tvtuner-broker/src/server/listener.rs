//! TCP listener for accepting client connections.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::server::session::Session;
use crate::service::TunerService;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

/// The main server that listens for connections and spawns sessions.
pub struct Server {
    config: ServerConfig,
    service: Arc<TunerService>,
    connection_slots: Arc<Semaphore>,
}

impl Server {
    pub fn new(config: ServerConfig, service: Arc<TunerService>) -> Self {
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            service,
            connection_slots,
        }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Run the server, accepting connections until shutdown.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let mut connection_count = 0u64;

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    connection_count += 1;
                    let session_id = connection_count;

                    let permit = match Arc::clone(&self.connection_slots).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(
                                "[Session {}] Rejecting {}: {} connections already open",
                                session_id, addr, self.config.max_connections
                            );
                            continue;
                        }
                    };

                    info!("[Session {}] New connection from {}", session_id, addr);

                    let service = Arc::clone(&self.service);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, addr, session_id, service, permit).await {
                            error!("[Session {}] Connection error: {}", session_id, e);
                        }
                        info!("[Session {}] Connection closed", session_id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    pub fn service(&self) -> &Arc<TunerService> {
        &self.service
    }
}

/// Handle a single client connection.
async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    session_id: u64,
    service: Arc<TunerService>,
    _permit: OwnedSemaphorePermit,
) -> std::io::Result<()> {
    // Disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    let mut session = Session::new(session_id, addr, socket, service);
    session.run().await
}
