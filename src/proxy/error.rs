//! Dispatch error types and response handling

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::apply_cors;

/// The only failures that ever reach the caller. Per-candidate failures are
/// absorbed inside the loop and surface only as the aggregate `Exhausted`.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// No usable credentials at all - deployment misconfiguration, not transient
    NoKeys,
    /// Unparseable inbound body, or body missing the `contents` field
    InvalidBody,
    /// Every candidate was tried and none succeeded
    Exhausted { attempts: usize },
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response<Body> {
        let (status, body) = match self {
            DispatchError::NoKeys => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Server configuration error: No API Keys provided." }),
            ),
            DispatchError::InvalidBody => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid JSON in request body." }),
            ),
            DispatchError::Exhausted { attempts } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "Service Unavailable",
                    "message": format!(
                        "All {} supplied API keys failed to return a valid response.",
                        attempts
                    ),
                }),
            ),
        };

        tracing::error!("Dispatch error: {} - {}", status, body);

        let mut response = (status, Json(body)).into_response();
        apply_cors(response.headers_mut());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_cites_attempt_count() {
        let response = DispatchError::Exhausted { attempts: 2 }.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[test]
    fn no_keys_maps_to_500() {
        let response = DispatchError::NoKeys.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_body_maps_to_400() {
        let response = DispatchError::InvalidBody.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
