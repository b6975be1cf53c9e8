//! Prometheus metrics endpoint

use axum::{
    Router,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TEXT_FORMAT, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

/// Returns all registered metrics in Prometheus text format.
async fn metrics_handler() -> Result<Response, AppError> {
    let metrics_text = TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to encode metrics");
            AppError::Internal(e.into())
        })?;

    Ok(([(CONTENT_TYPE, TEXT_FORMAT)], metrics_text).into_response())
}

/// Create metrics router
///
/// Exposes the `/metrics` endpoint.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}
