//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (signed delivery receiving)

use axum::body::Bytes;
use axum::{
    Router,
    extract::{OriginalUri, Path, State},
    http::{Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use http::HeaderMap;

use crate::AppState;
use crate::data::{ACTOR_PATH_PREFIX, Actor};
use crate::error::AppError;
use crate::federation::{ACTIVITY_STREAMS_CONTENT_TYPE, InboundRequest};
use crate::metrics::{FEDERATION_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

/// Create ActivityPub router
///
/// Routes:
/// - GET /api/v1/activitypub/user/:username - Actor profile
/// - POST /api/v1/activitypub/user/:username/inbox - Personal inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route(&format!("{}/:username", ACTOR_PATH_PREFIX), get(person))
        .route(&format!("{}/:username/inbox", ACTOR_PATH_PREFIX), post(inbox))
}

async fn find_actor(state: &AppState, username: &str) -> Result<std::sync::Arc<Actor>, AppError> {
    state
        .actors
        .get(username)
        .await
        .ok_or_else(|| AppError::NotFound(format!("user {} does not exist", username)))
}

/// GET /api/v1/activitypub/user/:username
///
/// Returns the JSON-LD Person document, including the actor's public key.
async fn person(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let actor = find_actor(&state, &username).await?;
    let urls = actor.urls(&state.config.server.base_url());

    let document = serde_json::json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Person",
        "id": urls.id,
        "preferredUsername": actor.username,
        "name": actor.username,
        "inbox": urls.inbox,
        "outbox": urls.outbox,
        "url": urls.id,
        "publicKey": {
            "id": urls.key_id,
            "owner": urls.id,
            "publicKeyPem": actor.keys.public_key_pem()
        }
    });

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/v1/activitypub/user/:username", "200"])
        .inc();

    Ok((
        [(CONTENT_TYPE, ACTIVITY_STREAMS_CONTENT_TYPE)],
        Json(document),
    )
        .into_response())
}

/// POST /api/v1/activitypub/user/:username/inbox
///
/// Accepts a delivery only if its HTTP signature verifies.
/// Activity processing happens downstream of this handler.
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let _timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    find_actor(&state, &username).await?;

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let request = InboundRequest {
        method: &method,
        path_and_query,
        headers: &headers,
        body: Some(&body[..]),
    };

    let signer = state.gate.verify(&request).await?;

    tracing::info!(
        recipient = %username,
        actor = %signer.actor_id,
        bytes = body.len(),
        "Accepted signed delivery"
    );
    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/v1/activitypub/user/:username/inbox", "204"])
        .inc();

    Ok(StatusCode::NO_CONTENT)
}
