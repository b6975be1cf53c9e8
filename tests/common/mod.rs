//! Common test utilities for E2E tests

#![allow(dead_code)]

use fedsig::{AppState, config};
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance with default federation settings
    pub async fn new() -> Self {
        Self::with_federation(Self::federation_config()).await
    }

    /// Federation settings used by tests: defaults, but key documents may be
    /// fetched from the loopback test server.
    pub fn federation_config() -> config::FederationConfig {
        config::FederationConfig {
            allow_private_hosts: true,
            ..Default::default()
        }
    }

    /// Create a test server with custom federation settings
    pub async fn with_federation(federation: config::FederationConfig) -> Self {
        // Bind first so actor URLs carry the real port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                domain: addr.to_string(),
                protocol: "http".to_string(),
            },
            federation,
            actors: config::ActorsConfig {
                usernames: vec!["user1".to_string(), "user2".to_string()],
                key_bits: 1024,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .no_proxy()
            .build()
            .unwrap();

        // Build router
        let app = fedsig::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Actor document URL for a local user
    pub fn actor_url(&self, username: &str) -> String {
        self.url(&format!("/api/v1/activitypub/user/{}", username))
    }

    /// Inbox URL for a local user
    pub fn inbox_url(&self, username: &str) -> String {
        format!("{}/inbox", self.actor_url(username))
    }
}
