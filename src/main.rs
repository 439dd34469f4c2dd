//! huddled - the huddle chat server.

use huddle::config::{self, Config, is_default_secret};
use huddle::{Server, http, metrics};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const ALLOW_INSECURE_SECRET_ENV: &str = "HUDDLE_ALLOW_INSECURE_SECRET";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(server = %config.server.name, "Starting huddled");

    // SECURITY: a guessable signing secret lets anyone mint tokens.
    if is_default_secret(&config.security.jwt_secret) {
        if std::env::var(ALLOW_INSECURE_SECRET_ENV).is_ok() {
            warn!("INSECURE: running with the default jwt_secret (allowed via {ALLOW_INSECURE_SECRET_ENV})");
        } else {
            error!("FATAL: insecure jwt_secret detected!");
            error!("  Set a strong secret in config.toml:");
            error!("    [security]");
            error!("    jwt_secret = \"<random-64-char-string>\"");
            error!("  or export HUDDLE_JWT_SECRET.");
            error!("  Generate one with: openssl rand -hex 32");
            error!("  For testing only, set {ALLOW_INSECURE_SECRET_ENV}=1 to bypass this check.");
            anyhow::bail!("Refusing to start with insecure jwt_secret. See error messages above.");
        }
    }

    metrics::init();

    // Convention: metrics_port = 0 disables the standalone exporter.
    let metrics_port = config.server.metrics_port.unwrap_or(9090);
    if metrics_port == 0 {
        info!("Metrics exporter disabled");
    } else {
        tokio::spawn(http::run_metrics_server(metrics_port));
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    let server = Server::start(config).await?;

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
