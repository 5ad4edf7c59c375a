//! Client session handling.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tvtuner_protocol::{
    decode_client_message, decode_header, encode_server_message, ClientMessage, ErrorCode,
    ProtocolError, ResourceHandle, ResourceId, ServerMessage, ServiceError, HEADER_SIZE,
    PROTOCOL_VERSION,
};

use crate::service::{FrontendSession, LnbSession, QueueBridge, TunerService};

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Initial state, waiting for hello.
    Initial,
    /// Handshake complete, ready to accept commands.
    Ready,
}

/// A client connection.
///
/// Everything opened through the connection is tracked here and released
/// when the connection ends.
pub struct Session {
    /// Unique session ID.
    id: u64,
    /// Client address.
    addr: SocketAddr,
    /// TCP socket.
    socket: TcpStream,
    /// Read buffer.
    read_buf: BytesMut,
    /// Current session state.
    state: SessionState,
    service: Arc<TunerService>,
    /// Frontends opened by this client, keyed by resource id.
    frontends: HashMap<u32, Arc<FrontendSession>>,
    /// LNBs opened by this client, keyed by resource id.
    lnbs: HashMap<u32, Arc<LnbSession>>,
    /// Filter queue handed to this client.
    queue: Option<QueueBridge>,
}

impl Session {
    pub fn new(id: u64, addr: SocketAddr, socket: TcpStream, service: Arc<TunerService>) -> Self {
        Self {
            id,
            addr,
            socket,
            read_buf: BytesMut::with_capacity(4096),
            state: SessionState::Initial,
            service,
            frontends: HashMap::new(),
            lnbs: HashMap::new(),
            queue: None,
        }
    }

    /// Serve requests until the client disconnects.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let result = self.serve().await;
        self.cleanup().await;
        result
    }

    async fn serve(&mut self) -> std::io::Result<()> {
        loop {
            let socket = &mut self.socket;
            let read_buf = &mut self.read_buf;
            match Self::read_message_with(socket, read_buf, self.id).await? {
                Some(Ok(msg)) => {
                    if !self.handle_message(msg).await? {
                        return Ok(());
                    }
                }
                Some(Err(e)) => {
                    self.send_error(ErrorCode::ProtocolError, &e.to_string())
                        .await?;
                }
                None => {
                    debug!("[Session {}] Client {} disconnected", self.id, self.addr);
                    return Ok(());
                }
            }
        }
    }

    /// Read and decode a client message (borrowed socket/buffer).
    ///
    /// A frame whose payload does not decode is reported as `Some(Err(..))`.
    /// A bad header cannot be resynchronized and ends the stream.
    async fn read_message_with(
        socket: &mut TcpStream,
        read_buf: &mut BytesMut,
        session_id: u64,
    ) -> std::io::Result<Option<Result<ClientMessage, ProtocolError>>> {
        loop {
            if read_buf.len() >= HEADER_SIZE {
                match decode_header(read_buf) {
                    Ok(Some(header)) => {
                        let total_len = HEADER_SIZE + header.payload_len as usize;
                        if read_buf.len() >= total_len {
                            let _ = read_buf.split_to(HEADER_SIZE);
                            let payload = read_buf.split_to(header.payload_len as usize);

                            return match decode_client_message(
                                header.message_type,
                                payload.freeze(),
                            ) {
                                Ok(msg) => {
                                    trace!("[Session {}] Received: {:?}", session_id, msg);
                                    Ok(Some(Ok(msg)))
                                }
                                Err(e) => {
                                    error!("[Session {}] Failed to decode message: {}", session_id, e);
                                    Ok(Some(Err(e)))
                                }
                            };
                        }
                    }
                    Ok(None) => {
                        // Need more data
                    }
                    Err(e) => {
                        error!("[Session {}] Protocol error: {}", session_id, e);
                        return Ok(None);
                    }
                }
            }

            let n = socket.read_buf(read_buf).await?;
            if n == 0 {
                return Ok(None); // Connection closed
            }
        }
    }

    /// Handle a client message. Returns false to close the session.
    async fn handle_message(&mut self, msg: ClientMessage) -> std::io::Result<bool> {
        if self.state == SessionState::Initial
            && !matches!(msg, ClientMessage::Hello { .. } | ClientMessage::Ping)
        {
            warn!(
                "[Session {}] {:?} received before hello",
                self.id,
                msg.message_type()
            );
            self.send_error(ErrorCode::InvalidState, "Hello required")
                .await?;
            return Ok(true);
        }

        match msg {
            ClientMessage::Hello { version } => {
                self.handle_hello(version).await?;
            }
            ClientMessage::Ping => {
                self.send_message(ServerMessage::Pong).await?;
            }
            ClientMessage::GetFrontendIds => {
                self.handle_get_frontend_ids().await?;
            }
            ClientMessage::GetFrontendInfo { handle } => {
                self.handle_get_frontend_info(handle).await?;
            }
            ClientMessage::OpenFrontend { handle } => {
                self.handle_open_frontend(handle).await?;
            }
            ClientMessage::CloseFrontend { frontend_id } => {
                self.handle_close_frontend(frontend_id).await?;
            }
            ClientMessage::GetFmqSyncReadWrite => {
                self.handle_get_fmq_sync_read_write().await?;
            }
            ClientMessage::OpenLnb { handle } => {
                self.handle_open_lnb(move |service| {
                    service.open_lnb(ResourceHandle::from_raw(handle))
                })
                .await?;
            }
            ClientMessage::OpenLnbByName { name } => {
                self.handle_open_lnb(move |service| service.open_lnb_by_name(&name))
                    .await?;
            }
            ClientMessage::CloseLnb { lnb_id } => {
                self.handle_close_lnb(lnb_id).await?;
            }
        }
        Ok(true)
    }

    /// Run a service call on the blocking pool.
    async fn call<T, F>(&self, f: F) -> std::io::Result<T>
    where
        F: FnOnce(&TunerService) -> T + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn log_failure(&self, what: &str, e: &ServiceError) {
        warn!("[Session {}] {} failed: {}", self.id, what, e);
    }

    /// Handle Hello message.
    async fn handle_hello(&mut self, version: u16) -> std::io::Result<()> {
        info!("[Session {}] Client hello, version {}", self.id, version);

        let success = version == PROTOCOL_VERSION;
        if success {
            self.state = SessionState::Ready;
        } else {
            let mismatch = ProtocolError::VersionMismatch {
                client: version,
                server: PROTOCOL_VERSION,
            };
            warn!("[Session {}] {}", self.id, mismatch);
        }

        self.send_message(ServerMessage::HelloAck {
            version: PROTOCOL_VERSION,
            success,
        })
        .await
    }

    async fn handle_get_frontend_ids(&mut self) -> std::io::Result<()> {
        let msg = match self.call(|service| service.list_frontend_ids()).await? {
            Ok(ids) => ServerMessage::GetFrontendIdsAck {
                success: true,
                error_code: ErrorCode::Success.into(),
                ids,
            },
            Err(e) => {
                self.log_failure("GetFrontendIds", &e);
                ServerMessage::GetFrontendIdsAck {
                    success: false,
                    error_code: e.code().into(),
                    ids: Vec::new(),
                }
            }
        };
        self.send_message(msg).await
    }

    async fn handle_get_frontend_info(&mut self, handle: u32) -> std::io::Result<()> {
        let result = self
            .call(move |service| service.get_frontend_info(ResourceHandle::from_raw(handle)))
            .await?;
        let msg = match result {
            Ok(info) => ServerMessage::GetFrontendInfoAck {
                success: true,
                error_code: ErrorCode::Success.into(),
                info: Some(info),
            },
            Err(e) => {
                self.log_failure("GetFrontendInfo", &e);
                ServerMessage::GetFrontendInfoAck {
                    success: false,
                    error_code: e.code().into(),
                    info: None,
                }
            }
        };
        self.send_message(msg).await
    }

    async fn handle_open_frontend(&mut self, handle: u32) -> std::io::Result<()> {
        let result = self
            .call(move |service| service.open_frontend(ResourceHandle::from_raw(handle)))
            .await?;
        let msg = match result {
            Ok(session) => {
                let id = session.id().get();
                info!("[Session {}] Opened frontend {}", self.id, id);
                // The service already closed whatever this replaces.
                self.frontends.insert(id, session);
                ServerMessage::OpenFrontendAck {
                    success: true,
                    error_code: ErrorCode::Success.into(),
                    frontend_id: Some(id),
                }
            }
            Err(e) => {
                self.log_failure("OpenFrontend", &e);
                ServerMessage::OpenFrontendAck {
                    success: false,
                    error_code: e.code().into(),
                    frontend_id: None,
                }
            }
        };
        self.send_message(msg).await
    }

    async fn handle_close_frontend(&mut self, frontend_id: u32) -> std::io::Result<()> {
        let success = match self.frontends.remove(&frontend_id) {
            Some(session) => {
                // Another client may have reopened the frontend since.
                let was_open = !session.is_closed();
                self.call(move |service| service.release_frontend(&session))
                    .await?;
                if was_open {
                    info!("[Session {}] Closed frontend {}", self.id, frontend_id);
                } else {
                    debug!(
                        "[Session {}] Frontend {} was already closed",
                        self.id, frontend_id
                    );
                }
                was_open
            }
            None => {
                debug!(
                    "[Session {}] Frontend {} is not open on this connection",
                    self.id,
                    ResourceId(frontend_id)
                );
                false
            }
        };
        self.send_message(ServerMessage::CloseFrontendAck { success })
            .await
    }

    async fn handle_get_fmq_sync_read_write(&mut self) -> std::io::Result<()> {
        let result = self.call(|service| service.get_fmq_sync_read_write()).await?;
        let msg = match result {
            Ok(bridge) => {
                let descriptor = bridge.descriptor().to_info();
                info!(
                    "[Session {}] Filter queue opened on demux {}",
                    self.id,
                    bridge.pipeline().demux_id()
                );
                self.queue = Some(bridge);
                ServerMessage::GetFmqSyncReadWriteAck {
                    success: true,
                    error_code: ErrorCode::Success.into(),
                    descriptor: Some(descriptor),
                }
            }
            Err(e) => {
                self.log_failure("GetFmqSyncReadWrite", &e);
                ServerMessage::GetFmqSyncReadWriteAck {
                    success: false,
                    error_code: e.code().into(),
                    descriptor: None,
                }
            }
        };
        self.send_message(msg).await
    }

    async fn handle_open_lnb<F>(&mut self, open: F) -> std::io::Result<()>
    where
        F: FnOnce(&TunerService) -> Result<Arc<LnbSession>, ServiceError> + Send + 'static,
    {
        let msg = match self.call(open).await? {
            Ok(session) => {
                let id = session.id().get();
                info!("[Session {}] Opened LNB {}", self.id, id);
                self.lnbs.insert(id, session);
                ServerMessage::OpenLnbAck {
                    success: true,
                    error_code: ErrorCode::Success.into(),
                    lnb_id: Some(id),
                }
            }
            Err(e) => {
                self.log_failure("OpenLnb", &e);
                ServerMessage::OpenLnbAck {
                    success: false,
                    error_code: e.code().into(),
                    lnb_id: None,
                }
            }
        };
        self.send_message(msg).await
    }

    async fn handle_close_lnb(&mut self, lnb_id: u32) -> std::io::Result<()> {
        let success = match self.lnbs.remove(&lnb_id) {
            Some(session) => {
                let was_open = !session.is_closed();
                self.call(move |service| service.release_lnb(&session))
                    .await?;
                if was_open {
                    info!("[Session {}] Closed LNB {}", self.id, lnb_id);
                }
                was_open
            }
            None => false,
        };
        self.send_message(ServerMessage::CloseLnbAck { success })
            .await
    }

    /// Send a server message to the client.
    async fn send_message(&mut self, msg: ServerMessage) -> std::io::Result<()> {
        trace!("[Session {}] Sending: {:?}", self.id, msg);

        let encoded: Bytes = encode_server_message(&msg).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        self.socket.write_all(&encoded).await
    }

    /// Send an error message to the client.
    async fn send_error(&mut self, code: ErrorCode, message: &str) -> std::io::Result<()> {
        self.send_message(ServerMessage::Error {
            error_code: code.into(),
            message: message.to_string(),
        })
        .await
    }

    /// Release everything this connection opened.
    async fn cleanup(&mut self) {
        let frontends: Vec<_> = self.frontends.drain().map(|(_, s)| s).collect();
        let lnbs: Vec<_> = self.lnbs.drain().map(|(_, s)| s).collect();
        let queue = self.queue.take();
        if frontends.is_empty() && lnbs.is_empty() && queue.is_none() {
            return;
        }

        info!(
            "[Session {}] Releasing {} frontends, {} lnbs, {} queues",
            self.id,
            frontends.len(),
            lnbs.len(),
            usize::from(queue.is_some())
        );
        let released = self
            .call(move |service| {
                if let Some(bridge) = queue {
                    service.release_filter_pipeline(bridge.pipeline());
                }
                for frontend in &frontends {
                    service.release_frontend(frontend);
                }
                for lnb in &lnbs {
                    service.release_lnb(lnb);
                }
            })
            .await;
        if let Err(e) = released {
            warn!("[Session {}] Cleanup failed: {}", self.id, e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("[Session {}] Session dropped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tvtuner_protocol::{
        decode_header, decode_server_message, encode_client_message, ClientMessage, ErrorCode,
        ServerMessage, HEADER_SIZE, PROTOCOL_VERSION,
    };

    use crate::hal::simulated::{SimulatedConnector, SimulatedDriverConfig};
    use crate::server::{Server, ServerConfig};
    use crate::service::{SessionCounts, TunerService, DEFAULT_DRIVER_TIMEOUT};
    use std::sync::Arc;

    async fn start_server(max_connections: usize) -> (std::net::SocketAddr, Arc<TunerService>) {
        let connector = Arc::new(SimulatedConnector::new(SimulatedDriverConfig::default()));
        let service = Arc::new(TunerService::new(connector, DEFAULT_DRIVER_TIMEOUT));
        let server = Server::new(
            ServerConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                max_connections,
            },
            Arc::clone(&service),
        );
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        (addr, service)
    }

    async fn read_response(stream: &mut TcpStream) -> ServerMessage {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).await.unwrap();
        let header = decode_header(&header).unwrap().unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        stream.read_exact(&mut payload).await.unwrap();
        decode_server_message(header.message_type, payload.into()).unwrap()
    }

    async fn request(stream: &mut TcpStream, msg: ClientMessage) -> ServerMessage {
        let encoded = encode_client_message(&msg).unwrap();
        stream.write_all(&encoded).await.unwrap();
        read_response(stream).await
    }

    async fn hello(stream: &mut TcpStream) {
        let ack = request(
            stream,
            ClientMessage::Hello {
                version: PROTOCOL_VERSION,
            },
        )
        .await;
        assert_eq!(
            ack,
            ServerMessage::HelloAck {
                version: PROTOCOL_VERSION,
                success: true
            }
        );
    }

    async fn wait_for_counts(service: &TunerService, expected: SessionCounts) {
        for _ in 0..100 {
            if service.session_counts() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.session_counts(), expected);
    }

    #[tokio::test]
    async fn test_requires_hello() {
        let (addr, _) = start_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = request(&mut stream, ClientMessage::GetFrontendIds).await;
        assert!(matches!(
            reply,
            ServerMessage::Error { error_code, .. } if error_code == u16::from(ErrorCode::InvalidState)
        ));

        assert_eq!(request(&mut stream, ClientMessage::Ping).await, ServerMessage::Pong);
        hello(&mut stream).await;
        assert_eq!(
            request(&mut stream, ClientMessage::GetFrontendIds).await,
            ServerMessage::GetFrontendIdsAck {
                success: true,
                error_code: 0,
                ids: vec![0, 1]
            }
        );
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (addr, _) = start_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let ack = request(
            &mut stream,
            ClientMessage::Hello {
                version: PROTOCOL_VERSION + 1,
            },
        )
        .await;
        assert_eq!(
            ack,
            ServerMessage::HelloAck {
                version: PROTOCOL_VERSION,
                success: false
            }
        );
    }

    #[tokio::test]
    async fn test_frontend_and_queue_over_tcp() {
        let (addr, service) = start_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        hello(&mut stream).await;

        match request(&mut stream, ClientMessage::GetFrontendInfo { handle: 0x0001_0000 }).await {
            ServerMessage::GetFrontendInfoAck {
                success: true,
                info: Some(info),
                ..
            } => assert_eq!(info.id, 1),
            other => panic!("unexpected reply: {:?}", other),
        }

        assert_eq!(
            request(&mut stream, ClientMessage::OpenFrontend { handle: 0x7701_0042 }).await,
            ServerMessage::OpenFrontendAck {
                success: true,
                error_code: 0,
                frontend_id: Some(1)
            }
        );

        match request(&mut stream, ClientMessage::GetFmqSyncReadWrite).await {
            ServerMessage::GetFmqSyncReadWriteAck {
                success: true,
                descriptor: Some(desc),
                ..
            } => {
                assert_eq!(desc.grantors.len(), 4);
                assert_eq!(desc.fd_ids.len(), 1);
                assert_eq!(desc.quantum, 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        assert_eq!(
            service.session_counts(),
            SessionCounts {
                frontends: 1,
                lnbs: 0,
                pipelines: 1
            }
        );

        drop(stream);
        wait_for_counts(&service, SessionCounts::default()).await;
    }

    #[tokio::test]
    async fn test_lnb_and_errors_over_tcp() {
        let (addr, service) = start_server(4).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        hello(&mut stream).await;

        assert_eq!(
            request(
                &mut stream,
                ClientMessage::OpenLnbByName {
                    name: "lnb_b".to_string()
                }
            )
            .await,
            ServerMessage::OpenLnbAck {
                success: true,
                error_code: 0,
                lnb_id: Some(1)
            }
        );
        assert_eq!(
            request(
                &mut stream,
                ClientMessage::OpenLnbByName {
                    name: "missing".to_string()
                }
            )
            .await,
            ServerMessage::OpenLnbAck {
                success: false,
                error_code: ErrorCode::ResourceNotFound.into(),
                lnb_id: None
            }
        );
        assert_eq!(
            request(&mut stream, ClientMessage::OpenFrontend { handle: 0x0009_0000 }).await,
            ServerMessage::OpenFrontendAck {
                success: false,
                error_code: ErrorCode::ResourceNotFound.into(),
                frontend_id: None
            }
        );

        assert_eq!(
            request(&mut stream, ClientMessage::CloseLnb { lnb_id: 1 }).await,
            ServerMessage::CloseLnbAck { success: true }
        );
        assert_eq!(
            request(&mut stream, ClientMessage::CloseLnb { lnb_id: 1 }).await,
            ServerMessage::CloseLnbAck { success: false }
        );
        assert_eq!(
            request(&mut stream, ClientMessage::CloseFrontend { frontend_id: 0 }).await,
            ServerMessage::CloseFrontendAck { success: false }
        );
        assert_eq!(service.session_counts(), SessionCounts::default());
    }

    #[tokio::test]
    async fn test_disconnect_keeps_other_clients_sessions() {
        let (addr, service) = start_server(4).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        hello(&mut first).await;
        hello(&mut second).await;

        request(&mut first, ClientMessage::OpenFrontend { handle: 0 }).await;
        // Reopening from another client replaces the first client's session.
        request(&mut second, ClientMessage::OpenFrontend { handle: 0 }).await;

        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.session_counts().frontends, 1);

        drop(second);
        wait_for_counts(&service, SessionCounts::default()).await;
    }

    #[tokio::test]
    async fn test_close_after_reopen_elsewhere_reports_failure() {
        let (addr, service) = start_server(4).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        hello(&mut first).await;
        hello(&mut second).await;

        let open_lnb = || ClientMessage::OpenLnbByName {
            name: "lnb_b".to_string(),
        };
        request(&mut first, ClientMessage::OpenFrontend { handle: 0 }).await;
        request(&mut first, open_lnb()).await;
        request(&mut second, ClientMessage::OpenFrontend { handle: 0 }).await;
        request(&mut second, open_lnb()).await;

        assert_eq!(
            request(&mut first, ClientMessage::CloseFrontend { frontend_id: 0 }).await,
            ServerMessage::CloseFrontendAck { success: false }
        );
        assert_eq!(
            request(&mut first, ClientMessage::CloseLnb { lnb_id: 1 }).await,
            ServerMessage::CloseLnbAck { success: false }
        );
        assert_eq!(
            service.session_counts(),
            SessionCounts {
                frontends: 1,
                lnbs: 1,
                pipelines: 0
            }
        );

        assert_eq!(
            request(&mut second, ClientMessage::CloseFrontend { frontend_id: 0 }).await,
            ServerMessage::CloseFrontendAck { success: true }
        );
        assert_eq!(
            request(&mut second, ClientMessage::CloseLnb { lnb_id: 1 }).await,
            ServerMessage::CloseLnbAck { success: true }
        );
        assert_eq!(service.session_counts(), SessionCounts::default());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (addr, _) = start_server(1).await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        hello(&mut first).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
