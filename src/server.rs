//! HTTP Trigger
//!
//! Accepts bucket change events from the routing substrate (an API
//! destination or a forwarding function) and runs one invocation per
//! request. Status codes drive the caller's retry policy: 4xx for input
//! that will never succeed, 5xx for failures worth retrying.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::agent::BucketGuardAgent;
use crate::error::RemediationError;

pub fn router(agent: Arc<BucketGuardAgent>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(handle_event))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn handle_event(State(agent): State<Arc<BucketGuardAgent>>, body: Bytes) -> Response {
    match agent.handle_bytes(&body).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            let status = status_for(&e);
            (
                status,
                Json(json!({ "error": e.to_string(), "kind": e.kind() })),
            )
                .into_response()
        }
    }
}

fn status_for(err: &RemediationError) -> StatusCode {
    match err {
        RemediationError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        RemediationError::NotificationDelivery(_) | RemediationError::Api { .. } => {
            StatusCode::BAD_GATEWAY
        }
        RemediationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        RemediationError::TransientApi { .. } | RemediationError::Guard(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        // The pipeline reports a missing bucket as `ResourceGone`; a retry
        // could never succeed, so this stays out of the 5xx range.
        RemediationError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&RemediationError::MalformedEvent("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&RemediationError::NotificationDelivery("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&RemediationError::Timeout(30)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&RemediationError::ResourceNotFound("bucket-x".into())),
            StatusCode::NOT_FOUND
        );
        assert!(status_for(&RemediationError::Guard(GuardError::Unavailable("x".into())))
            .is_server_error());
        assert!(status_for(&RemediationError::TransientApi {
            operation: "get_public_access".into(),
            attempts: 3,
            message: "x".into(),
        })
        .is_server_error());
    }
}
