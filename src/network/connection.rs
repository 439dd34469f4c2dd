//! Connection - drives one authenticated WebSocket client.
//!
//! ```text
//! Connecting ──verify──▶ Authenticated ──activate──▶ Active ──▶ Disconnected
//!      └──────────────── auth failure ──────────────────────────────▲
//! ```
//!
//! While active, a single `tokio::select!` loop multiplexes inbound frames,
//! the outbound queue, the close signal, server shutdown and the keepalive
//! timer. Inbound events are decoded into [`Command`]s and executed in
//! arrival order.

use crate::auth::IdentityVerifier;
use crate::config::Config;
use crate::fanout::{Command, FanoutEngine, Origin};
use crate::metrics;
use crate::state::{ConnId, ConnectionHandle, ConnectionPhase, Outbound};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use huddle_proto::{ClientEvent, ServerEvent};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, instrument, warn};

const PING_CHECK_INTERVAL_SECS: u64 = 15;

/// Per-connection tunables, resolved once from the config.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Idle time before the server pings.
    pub ping_interval: Duration,
    /// Idle time before the connection is dropped.
    pub ping_timeout: Duration,
    pub send_queue: usize,
    pub max_frame_bytes: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.server.idle_timeouts.ping.max(1)),
            ping_timeout: Duration::from_secs(config.server.idle_timeouts.timeout.max(1)),
            send_queue: config.limits.send_queue.max(1),
            max_frame_bytes: config.limits.max_frame_bytes,
        }
    }

    fn check_interval(&self) -> Duration {
        self.ping_interval
            .min(Duration::from_secs(PING_CHECK_INTERVAL_SECS))
            .max(Duration::from_millis(100))
    }
}

/// Result of flood rate check.
enum FloodCheckResult {
    Ok,
    RateLimited,
    Disconnect,
}

/// What the event loop should do after one `select!` round.
enum Step {
    Continue,
    Close(String),
}

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

pub struct Connection<S> {
    addr: SocketAddr,
    ws: WebSocketStream<S>,
    token: String,
    engine: FanoutEngine,
    verifier: Arc<dyn IdentityVerifier>,
    settings: ConnectionSettings,
    phase: ConnectionPhase,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        addr: SocketAddr,
        ws: WebSocketStream<S>,
        token: String,
        engine: FanoutEngine,
        verifier: Arc<dyn IdentityVerifier>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            addr,
            ws,
            token,
            engine,
            verifier,
            settings,
            phase: ConnectionPhase::Connecting,
        }
    }

    /// Run the connection until it closes.
    #[instrument(skip(self), fields(addr = %self.addr), name = "connection")]
    pub async fn run(mut self) -> anyhow::Result<()> {
        let switchboard = Arc::clone(self.engine.switchboard());

        let user = match self.verifier.verify(&self.token).await {
            Ok(user) => user,
            Err(e) => {
                metrics::auth_failed();
                warn!(error = %e, "Authentication failed");
                self.phase.advance(ConnectionPhase::Disconnected);
                let mut sink = self.ws;
                send_event(&mut sink, &ServerEvent::error("Authentication error")).await?;
                sink.send(close_frame(CloseCode::Policy, "Authentication error"))
                    .await
                    .ok();
                return Ok(());
            }
        };
        self.phase.advance(ConnectionPhase::Authenticated);

        let conn = switchboard.conn_ids.next();
        let (tx, rx) = mpsc::channel(self.settings.send_queue);
        let (close_tx, close_rx) = oneshot::channel();
        let handle = Arc::new(ConnectionHandle::new(conn, &user.id, &user.name, tx, close_tx));

        if let Err(e) = switchboard.activate(handle, &user).await {
            warn!(%conn, user = %user.id, error = %e, "Activation failed");
            switchboard.deactivate(conn).await;
            self.phase.advance(ConnectionPhase::Disconnected);
            let mut sink = self.ws;
            send_event(&mut sink, &e.to_event()).await.ok();
            sink.send(close_frame(CloseCode::Error, "Internal server error"))
                .await
                .ok();
            return Ok(());
        }
        self.phase.advance(ConnectionPhase::Active);
        info!(%conn, user = %user.id, "Client connected");

        let origin = Origin::connection(&user.id, &user.name, conn);
        let (mut sink, stream) = self.ws.split();
        let outcome = event_loop(
            &self.engine,
            &self.settings,
            conn,
            &origin,
            &mut sink,
            stream,
            rx,
            close_rx,
        )
        .await;

        switchboard.deactivate(conn).await;
        self.phase.advance(ConnectionPhase::Disconnected);

        match outcome {
            Ok(reason) => {
                info!(%conn, user = %user.id, %reason, "Client disconnected");
                sink.send(close_frame(CloseCode::Normal, &reason)).await.ok();
                Ok(())
            }
            Err(e) => {
                debug!(%conn, user = %user.id, error = %e, "Connection ended with transport error");
                Ok(())
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn event_loop<S>(
    engine: &FanoutEngine,
    settings: &ConnectionSettings,
    conn: ConnId,
    origin: &Origin,
    sink: &mut WsSink<S>,
    mut stream: SplitStream<WebSocketStream<S>>,
    mut rx: mpsc::Receiver<Outbound>,
    mut close_rx: oneshot::Receiver<String>,
) -> anyhow::Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let switchboard = engine.switchboard();
    let mut shutdown_rx = switchboard.lifecycle.subscribe_shutdown();
    let max_violations = switchboard.rate_limiter.max_violations();
    let mut flood_violations: u8 = 0;
    let mut last_activity = Instant::now();
    let mut ping_pending = false;

    let mut ping_check_timer = tokio::time::interval(settings.check_interval());
    // First tick fires immediately, we don't want that
    ping_check_timer.tick().await;

    loop {
        let step = tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        ping_pending = false;

                        let flood = if switchboard.rate_limiter.check_message_rate(conn) {
                            flood_violations = 0;
                            FloodCheckResult::Ok
                        } else {
                            flood_violations += 1;
                            metrics::rate_limited();
                            warn!(%conn, violations = flood_violations, "Rate limit exceeded");
                            if flood_violations >= max_violations {
                                FloodCheckResult::Disconnect
                            } else {
                                FloodCheckResult::RateLimited
                            }
                        };

                        match flood {
                            FloodCheckResult::Ok => {
                                handle_text(engine, origin, sink, &text).await?;
                                Step::Continue
                            }
                            FloodCheckResult::RateLimited => {
                                send_event(sink, &ServerEvent::error("Rate limit exceeded, slow down")).await?;
                                Step::Continue
                            }
                            FloodCheckResult::Disconnect => {
                                send_event(sink, &ServerEvent::error("Excess flood")).await?;
                                Step::Close("Excess flood".to_string())
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_activity = Instant::now();
                        debug!(%conn, "Ignoring binary frame");
                        Step::Continue
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                        last_activity = Instant::now();
                        ping_pending = false;
                        Step::Continue
                    }
                    Some(Ok(Message::Close(_))) | None => Step::Close("Client closed".to_string()),
                    Some(Err(e)) => {
                        debug!(%conn, error = %e, "Read error");
                        Step::Close("Connection error".to_string())
                    }
                }
            }

            event = rx.recv() => {
                match event {
                    Some(event) => {
                        send_event(sink, &event).await?;
                        Step::Continue
                    }
                    // The queue and the close signal drop together on eviction.
                    None => match close_rx.try_recv() {
                        Ok(reason) => {
                            send_event(sink, &ServerEvent::error(reason.clone())).await.ok();
                            Step::Close(reason)
                        }
                        Err(_) => Step::Close("Connection replaced".to_string()),
                    },
                }
            }

            reason = &mut close_rx => {
                let reason = reason.unwrap_or_else(|_| "Connection closed".to_string());
                send_event(sink, &ServerEvent::error(reason.clone())).await.ok();
                Step::Close(reason)
            }

            _ = shutdown_rx.recv() => {
                info!(%conn, "Shutdown signal received - disconnecting client");
                Step::Close("Server shutting down".to_string())
            }

            _ = ping_check_timer.tick() => {
                let idle = last_activity.elapsed();
                if idle >= settings.ping_timeout {
                    warn!(%conn, idle_secs = idle.as_secs(), "Ping timeout");
                    Step::Close("Ping timeout".to_string())
                } else if idle >= settings.ping_interval && !ping_pending {
                    ping_pending = true;
                    sink.send(Message::Ping(Vec::new())).await?;
                    Step::Continue
                } else {
                    Step::Continue
                }
            }
        };

        if let Step::Close(reason) = step {
            return Ok(reason);
        }
    }
}

/// Decode one text frame and run it through the engine. Failures go back to
/// this connection only.
async fn handle_text<S>(
    engine: &FanoutEngine,
    origin: &Origin,
    sink: &mut WsSink<S>,
    text: &str,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let event = match ClientEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Undecodable client event");
            send_event(sink, &ServerEvent::error(format!("Invalid event: {e}"))).await?;
            return Ok(());
        }
    };

    if let Err(e) = engine.execute(origin.clone(), Command::from(event)).await {
        send_event(sink, &e.to_event()).await?;
    }
    Ok(())
}

async fn send_event<T>(sink: &mut T, event: &ServerEvent) -> anyhow::Result<()>
where
    T: futures_util::Sink<Message> + Unpin,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let json = event.to_json()?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

fn close_frame(code: CloseCode, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Owned(reason.to_string()),
    }))
}
