#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use docstore_console::{
    app,
    auth::{generate_jwt, Claims},
    config::AppConfig,
    query::Namespace,
    store::MemoryStore,
    AppState,
};
use reqwest::StatusCode;
use serde_json::Value;

pub const USER_AGENT: &str = "console-tests/1.0";

/// In-process console bound to a free port, backed by in-memory stores
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.query.debug_logging = false;
    config
}

impl TestServer {
    pub async fn spawn(config: AppConfig) -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let store = Arc::new(MemoryStore::new());
        let state = AppState::in_memory(config, store.clone());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;
        let router = app(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await;
        });

        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let server = Self { port, base_url, state, store, client };
        server.wait_ready(Duration::from_secs(5)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn token(&self, user: &str, role: &str) -> Result<String> {
        let claims = Claims::new(user, role, 1, Utc::now());
        Ok(generate_jwt(&claims, &self.state.config.security.jwt_secret)?)
    }

    pub fn seed(&self, database: &str, collection: &str, documents: Vec<Value>) -> Result<()> {
        let namespace = Namespace::new(database, collection)?;
        self.store.insert_many(&namespace, documents);
        Ok(())
    }

    /// Fetch the session's CSRF token
    pub async fn csrf(&self, token: &str) -> Result<String> {
        let body: Value = self
            .client
            .get(self.url("/api/session/csrf"))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body["data"]["csrf_token"]
            .as_str()
            .map(str::to_string)
            .context("csrf_token missing from response")
    }
}
