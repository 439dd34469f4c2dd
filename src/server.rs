//! Process bootstrap: storage, shared state, background workers and both
//! listeners.

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::config::Config;
use crate::db::Database;
use crate::fanout::FanoutEngine;
use crate::http::{self, AppState};
use crate::network::{ConnectionSettings, Gateway};
use crate::security::UploadPolicy;
use crate::state::{ConnId, Switchboard};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Bounded so a disconnect storm applies backpressure instead of growing
/// without limit.
const DISCONNECT_CHANNEL_SIZE: usize = 1024;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running server.
pub struct Server {
    switchboard: Arc<Switchboard>,
    ws_addr: SocketAddr,
    http_addr: Option<SocketAddr>,
    listeners: Vec<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Open storage and bring every listener and worker up.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let verifier: Arc<dyn IdentityVerifier> =
            Arc::new(JwtVerifier::new(&config.security, db.clone()));
        Self::start_with(config, db, verifier).await
    }

    /// Start against an already opened database and a chosen verifier.
    pub async fn start_with(
        config: Config,
        db: Database,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> anyhow::Result<Self> {
        let (disconnect_tx, disconnect_rx) =
            mpsc::channel::<(ConnId, String)>(DISCONNECT_CHANNEL_SIZE);
        let switchboard = Arc::new(Switchboard::new(&config, db, disconnect_tx));
        let engine = FanoutEngine::new(Arc::clone(&switchboard));

        // Flags left behind by a previous process are cleared before anyone
        // can connect.
        match switchboard.reconcile().await {
            Ok(report) if report.cleared > 0 => {
                info!(cleared = report.cleared, "Startup: stale online flags cleared");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Startup: presence reconciliation failed"),
        }

        let workers = vec![
            spawn_disconnect_worker(Arc::clone(&switchboard), disconnect_rx),
            spawn_reconciler(
                Arc::clone(&switchboard),
                Duration::from_secs(config.presence.reconcile_interval_secs.max(1)),
            ),
        ];

        let gateway = Gateway::bind(
            &config.listen,
            ConnectionSettings::from_config(&config),
            engine.clone(),
            Arc::clone(&verifier),
        )
        .await?;
        let ws_addr = gateway.local_addr()?;
        let mut listeners = vec![tokio::spawn(async move {
            if let Err(e) = gateway.run().await {
                error!(error = %e, "Gateway stopped");
            }
        })];

        let http_addr = match &config.http {
            Some(http_cfg) => {
                let state = AppState {
                    engine: engine.clone(),
                    verifier,
                    uploads: Arc::new(UploadPolicy::from_config(&config.uploads)?),
                    upload_dir: Arc::new(PathBuf::from(&config.uploads.dir)),
                    limits: config.limits.clone(),
                };
                let listener = TcpListener::bind(http_cfg.address).await?;
                let addr = listener.local_addr()?;
                info!(address = %addr, "HTTP API listening");

                let router = http::build_router(state);
                let shutdown = switchboard.lifecycle.subscribe_shutdown();
                listeners.push(tokio::spawn(async move {
                    if let Err(e) = http::serve_api(listener, router, shutdown).await {
                        error!(error = %e, "HTTP API stopped");
                    }
                }));
                Some(addr)
            }
            None => {
                info!("HTTP API disabled");
                None
            }
        };

        info!(server = %config.server.name, ws = %ws_addr, "Server started");

        Ok(Self {
            switchboard,
            ws_addr,
            http_addr,
            listeners,
            workers,
        })
    }

    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn switchboard(&self) -> &Arc<Switchboard> {
        &self.switchboard
    }

    /// Stop accepting, tell every connection to close and wait for the
    /// listeners to wind down.
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.switchboard.lifecycle.shutdown();
        for mut task in self.listeners {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        for task in self.workers {
            task.abort();
        }
    }
}

/// Close requests are served off the fan-out path so a full queue never
/// blocks a broadcast.
fn spawn_disconnect_worker(
    switchboard: Arc<Switchboard>,
    mut rx: mpsc::Receiver<(ConnId, String)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((conn, reason)) = rx.recv().await {
            if !switchboard.close_connection(conn, &reason) {
                tracing::debug!(%conn, reason = %reason, "Disconnect for a connection already closing");
            }
        }
    })
}

fn spawn_reconciler(switchboard: Arc<Switchboard>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick fires immediately; startup already ran a pass.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = switchboard.reconcile().await {
                warn!(error = %e, "Presence reconciliation failed");
            }
        }
    })
}
