//! Gateway - WebSocket listener that accepts incoming connections.
//!
//! The Gateway binds the listen socket (optionally TLS), performs the
//! WebSocket upgrade with origin and credential checks, and spawns one
//! [`Connection`] task per client.

use super::connection::{Connection, ConnectionSettings};
use crate::auth::{self, IdentityVerifier};
use crate::config::{ListenConfig, TlsConfig};
use crate::fanout::FanoutEngine;
use crate::metrics;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::io::{BufReader, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{error, info, instrument, warn};

/// State every connection task needs.
struct Shared {
    engine: FanoutEngine,
    verifier: Arc<dyn IdentityVerifier>,
    settings: ConnectionSettings,
    allow_origins: Vec<String>,
}

/// The Gateway accepts incoming WebSocket connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    shared: Arc<Shared>,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(
        listen: &ListenConfig,
        settings: ConnectionSettings,
        engine: FanoutEngine,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen.address).await?;
        let tls = match &listen.tls {
            Some(tls_cfg) => Some(Self::load_tls(tls_cfg)?),
            None => None,
        };
        info!(
            address = %listener.local_addr()?,
            tls = tls.is_some(),
            "WebSocket listener bound"
        );

        Ok(Self {
            listener,
            tls,
            shared: Arc::new(Shared {
                engine,
                verifier,
                settings,
                allow_origins: listen.allow_origins.clone(),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Load TLS certificates and create TlsAcceptor.
    fn load_tls(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
        let cert_file = std::fs::read(&config.cert_path)?;
        let cert_reader = &mut BufReader::new(Cursor::new(cert_file));
        let certs: Vec<CertificateDer> = certs(cert_reader).collect::<Result<Vec<_>, _>>()?;

        if certs.is_empty() {
            anyhow::bail!("No certificates found in {}", config.cert_path);
        }

        let key_file = std::fs::read(&config.key_path)?;
        let key_reader = &mut BufReader::new(Cursor::new(key_file));
        let mut keys: Vec<PrivateKeyDer> = pkcs8_private_keys(key_reader)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(PrivateKeyDer::from)
            .collect();

        if keys.is_empty() {
            anyhow::bail!("No private keys found in {}", config.key_path);
        }

        let key = keys.remove(0);

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Run the gateway until the server shuts down.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shared.engine.switchboard().lifecycle.subscribe_shutdown();

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown_rx.recv() => {
                    info!("Gateway shutting down");
                    return Ok(());
                }
            };

            let (stream, addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let shared = Arc::clone(&self.shared);
            match self.tls.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => serve(tls_stream, addr, shared).await,
                            Err(e) => warn!(%addr, error = %e, "TLS handshake failed"),
                        }
                    });
                }
                None => {
                    tokio::spawn(serve(stream, addr, shared));
                }
            }
        }
    }
}

fn reject(status: http::StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Upgrade one stream and drive it as a [`Connection`].
async fn serve<S>(stream: S, addr: SocketAddr, shared: Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut token: Option<String> = None;
    let allowed = &shared.allow_origins;

    let callback = |req: &Request, response: Response| {
        if !allowed.is_empty() {
            let origin = req.headers().get("Origin").and_then(|o| o.to_str().ok());
            match origin {
                Some(origin) if allowed.iter().any(|a| a == origin || a == "*") => {}
                Some(origin) => {
                    warn!(%addr, %origin, "WebSocket origin rejected");
                    return Err(reject(http::StatusCode::FORBIDDEN, "CORS origin not allowed"));
                }
                None => {
                    warn!(%addr, "WebSocket handshake without origin rejected");
                    return Err(reject(http::StatusCode::FORBIDDEN, "CORS origin not allowed"));
                }
            }
        }

        let header = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        let found = auth::bearer_token(header).or_else(|| auth::query_token(req.uri().query()));
        match found {
            Some(t) => {
                token = Some(t.to_string());
                Ok(response)
            }
            None => {
                metrics::auth_failed();
                Err(reject(http::StatusCode::UNAUTHORIZED, "Authentication error"))
            }
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(shared.settings.max_frame_bytes);
    ws_config.max_frame_size = Some(shared.settings.max_frame_bytes);

    let ws = match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let Some(token) = token else {
        return;
    };

    let connection = Connection::new(
        addr,
        ws,
        token,
        shared.engine.clone(),
        Arc::clone(&shared.verifier),
        shared.settings.clone(),
    );
    if let Err(e) = connection.run().await {
        error!(%addr, error = %e, "WebSocket connection error");
    }
}
