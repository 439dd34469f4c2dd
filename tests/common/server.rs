//! Test server management.
//!
//! Starts a huddle instance inside the test process, on `127.0.0.1:0`, with
//! an in-memory database and a throwaway upload directory.

use huddle::Server;
use huddle::auth::TokenIssuer;
use huddle::config::Config;
use huddle::db::{Database, UserRecord};
use huddle::state::Switchboard;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

use super::TestClient;

/// A test server instance.
pub struct TestServer {
    server: Server,
    issuer: TokenIssuer,
    http: reqwest::Client,
    upload_dir: TempDir,
}

impl TestServer {
    /// Spawn a server with the default test configuration.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn a server after adjusting the test configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let upload_dir = tempfile::tempdir()?;
        let mut config = Config::parse(&format!(
            r#"
[server]
name = "test.huddle"
metrics_port = 0

[listen]
address = "127.0.0.1:0"

[http]
address = "127.0.0.1:0"

[database]
path = ":memory:"

[security]
jwt_secret = "test-secret-4f6c1e0b9a7d2c85"
token_issuer = "huddle-test"

[security.rate_limits]
message_rate_per_second = 1000
message_burst = 1000

[presence]
reconcile_interval_secs = 3600

[uploads]
dir = "{}"
max_bytes = 1048576
"#,
            upload_dir.path().display()
        ))?;
        configure(&mut config);

        let issuer = TokenIssuer::new(&config.security);
        let server = Server::start(config).await?;

        Ok(Self {
            server,
            issuer,
            http: reqwest::Client::new(),
            upload_dir,
        })
    }

    pub fn ws_addr(&self) -> SocketAddr {
        self.server.ws_addr()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.ws_addr())
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        let addr = self.server.http_addr().expect("http listener enabled");
        format!("http://{addr}{path}")
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn switchboard(&self) -> &Arc<Switchboard> {
        self.server.switchboard()
    }

    pub fn db(&self) -> &Database {
        &self.switchboard().db
    }

    pub fn upload_dir(&self) -> &std::path::Path {
        self.upload_dir.path()
    }

    /// Provision a user the way the OAuth callback would.
    pub async fn user(&self, name: &str) -> UserRecord {
        self.db()
            .users()
            .upsert_oauth(
                &format!("google-{name}"),
                &format!("{}@example.com", name.to_lowercase()),
                name,
                "",
            )
            .await
            .expect("provision user")
    }

    pub fn token(&self, user: &UserRecord) -> String {
        self.issuer.issue(&user.id).expect("issue token")
    }

    /// Connect a user and consume the initial `online_users` snapshot.
    pub async fn connect(&self, user: &UserRecord) -> anyhow::Result<TestClient> {
        let mut client = TestClient::connect(&self.ws_url(), &self.token(user)).await?;
        client.expect_event("online_users").await?;
        Ok(client)
    }

    /// Find or create the private chat between two users.
    pub async fn private_chat(&self, a: &UserRecord, b: &UserRecord) -> String {
        self.db()
            .chats()
            .find_or_create_private(&a.id, &b.id)
            .await
            .expect("private chat")
            .id
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}
