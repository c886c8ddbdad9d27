//! The connection server: deferred-startup lifecycle over a raw
//! [`TcpListener`], replacing the HTTP/WebSocket router this module used to
//! build. `new()` allocates shared state, `start()` binds the listener, and
//! `serve()` accepts connections until told to shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::{Layer, Service};
use tracing::{debug, info, warn};
use whiplru_core::{AuthResponseDecoder, AuthStatus, ClientRequestDecoder, ServerResponse};

use super::auth::{generate_challenge, verify_response};
use super::connection::{ConnectionRegistry, Phase};
use super::dispatch::RequestHandler;
use super::middleware::{LoadShedLayer, LoadShedService, TimeoutLayer, TimeoutService};
use super::shutdown::ShutdownController;
use crate::config::ServerConfig;
use crate::storage::StorageManager;

type Handler = LoadShedService<TimeoutService<RequestHandler>>;

const READ_CHUNK: usize = 8192;

/// Owns the listener and every piece of shared state a connection task needs.
pub struct NetworkModule {
    config: Arc<ServerConfig>,
    listener: Option<TcpListener>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
    handler: Handler,
}

impl NetworkModule {
    /// Allocates shared state without binding any port.
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, storage: Arc<StorageManager>) -> Self {
        let handler = LoadShedLayer::new(config.max_connections)
            .layer(TimeoutLayer::new(config.request_timeout()).layer(RequestHandler::new(storage)));
        Self {
            config,
            listener: None,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
            handler,
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(address = %self.config.listen_address, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Accepts connections until `shutdown` resolves, then drains in-flight
    /// connections before returning.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self.listener.expect("start() must be called before serve()");
        let registry = self.registry;
        let shutdown_ctrl = self.shutdown;
        let password = self.config.password.clone();
        let handler = self.handler;

        shutdown_ctrl.set_ready();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    debug!(%peer, "accepted connection");
                    let registry = Arc::clone(&registry);
                    let shutdown_ctrl = Arc::clone(&shutdown_ctrl);
                    let password = password.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let guard = shutdown_ctrl.in_flight_guard();
                        if let Err(err) = handle_connection(socket, &registry, &password, handler).await {
                            debug!(%peer, %err, "connection ended");
                        }
                        drop(guard);
                    });
                }
                () = &mut shutdown => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        drain_connections(registry, shutdown_ctrl).await;
        Ok(())
    }
}

async fn drain_connections(registry: Arc<ConnectionRegistry>, shutdown_ctrl: Arc<ShutdownController>) {
    shutdown_ctrl.trigger_shutdown();
    let pending = registry.count();
    if pending > 0 {
        info!(pending, "draining connections");
    }
    if !shutdown_ctrl.wait_for_drain(Duration::from_secs(30)).await {
        warn!("drain timeout expired with connections still in flight");
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    registry: &ConnectionRegistry,
    password: &str,
    mut handler: Handler,
) -> anyhow::Result<()> {
    let conn = registry.register();

    let challenge = generate_challenge();
    socket.write_all(&challenge.encode()).await?;
    conn.set_phase(Phase::Challenged).await;

    let mut decoder = AuthResponseDecoder::new();
    let mut buf = [0u8; READ_CHUNK];
    while !decoder.is_complete() {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            registry.remove(conn.id);
            anyhow::bail!("connection closed during authentication");
        }
        let mut offset = 0;
        while offset < n && !decoder.is_complete() {
            offset += decoder.feed(&buf[offset..n])?;
        }
    }
    let response = decoder.finish()?;

    if !verify_response(password, &challenge.challenge, &response.hash_hex) {
        socket.write_all(&AuthStatus::Failure.encode()).await?;
        registry.remove(conn.id);
        anyhow::bail!("authentication failed");
    }
    socket.write_all(&AuthStatus::Success.encode()).await?;
    conn.set_phase(Phase::Ready).await;

    let result = request_loop(&mut socket, &mut handler).await;
    conn.set_phase(Phase::Disconnected).await;
    registry.remove(conn.id);
    result
}

async fn request_loop(socket: &mut TcpStream, handler: &mut Handler) -> anyhow::Result<()> {
    loop {
        let mut decoder = ClientRequestDecoder::new();
        let mut buf = [0u8; READ_CHUNK];
        let decoded = 'frame: loop {
            if decoder.is_complete() {
                break 'frame decoder.finish().map_err(|err| (err.to_string(), decoder.partial_id()));
            }
            let n = socket.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let mut offset = 0;
            while offset < n {
                match decoder.feed(&buf[offset..n]) {
                    Ok(consumed) => offset += consumed,
                    Err(err) => {
                        let id = decoder.partial_id();
                        break 'frame Err((err.to_string(), id));
                    }
                }
                if decoder.is_complete() {
                    break;
                }
            }
        };

        let request = match decoded {
            Ok(request) => request,
            Err((diagnostic, id)) => {
                warn!(%diagnostic, "request decode failed, closing connection");
                let response = ServerResponse::error(id, diagnostic);
                socket.write_all(&response.encode()).await?;
                return Ok(());
            }
        };

        let response = match handler.call(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "request handler returned an error");
                continue;
            }
        };
        socket.write_all(&response.encode()).await?;
    }
}
