//! fedsig - HTTP Signatures for ActivityPub delivery
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   signed POST    ┌───────────────────────┐
//! │  SigningClient   │ ───────────────▶ │   VerificationGate    │
//! │  (per actor)     │                  │  headers → key →      │
//! │                  │                  │  digest → freshness → │
//! │                  │                  │  signature            │
//! └──────────────────┘                  └───────────┬───────────┘
//!          │                                        │
//!          └──────────── FederationSettings ────────┤
//!                        (validated once)           │
//!                                          PublicKeyCache
//!                                          (TTL, single-flight)
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for ActivityPub and metrics
//! - `federation`: Signing, verification, key resolution
//! - `data`: Local actors and their key material
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request; everything inside is either immutable or
/// internally synchronized.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Validated federation settings
    pub settings: Arc<config::FederationSettings>,

    /// Local actors
    pub actors: Arc<data::ActorDirectory>,

    /// Inbound signature verification
    pub gate: Arc<federation::VerificationGate>,

    /// Connection pool for outbound deliveries
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Validate federation settings
    /// 2. Build HTTP clients and the public key cache
    /// 3. Seed configured actors
    ///
    /// # Errors
    /// `AppError::Config` for invalid federation settings; this must abort
    /// startup.
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Validate federation settings
        let settings = Arc::new(config::FederationSettings::from_config(&config.federation)?);
        tracing::info!(
            enabled = settings.enabled(),
            digest = %settings.digest_algorithm(),
            max_size = settings.max_size(),
            "Federation settings validated"
        );

        // 2. Initialize HTTP clients and key cache
        let http_client = federation::build_http_client(&settings, settings.delivery_timeout())?;
        let keys = Arc::new(federation::PublicKeyCache::from_settings(&settings)?);
        let gate = Arc::new(federation::VerificationGate::new(settings.clone(), keys));

        // 3. Seed actors
        let actors = Arc::new(data::ActorDirectory::new());
        for username in &config.actors.usernames {
            actors
                .get_or_create(username, config.actors.key_bits)
                .await?;
        }

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            settings,
            actors,
            gate,
            http_client,
        })
    }

    /// Signing client for a local actor, sharing the delivery connection pool
    pub async fn signing_client(
        &self,
        username: &str,
    ) -> Result<federation::SigningClient, error::AppError> {
        let actor = self.actors.get(username).await.ok_or_else(|| {
            error::AppError::NotFound(format!("user {} does not exist", username))
        })?;
        let key_id = actor.urls(&self.config.server.base_url()).key_id;

        federation::SigningClient::with_http_client(
            &actor.keys,
            key_id,
            self.settings.clone(),
            self.http_client.clone(),
        )
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use axum::extract::DefaultBodyLimit;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    let mut router = Router::new().route("/health", axum::routing::get(health_check));

    if state.settings.enabled() {
        router = router.merge(
            api::activitypub_router()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(state.settings.max_size())),
        );
    } else {
        tracing::info!("Federation disabled; ActivityPub routes are not mounted");
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
