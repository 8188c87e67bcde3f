// Unified error response formatting.
// All error responses follow: {"error": {"message": "<msg>", "type": "<type>"}}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error types exposed in the client-facing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    InvalidRequestError,
    ApiError,
    InternalError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequestError => "invalid_request_error",
            Self::ApiError => "api_error",
            Self::InternalError => "internal_error",
        }
    }
}

/// Build an error response with the given HTTP status, error type, and message.
pub fn error_response(status: StatusCode, error_type: ErrorType, message: &str) -> Response {
    let body = json!({
        "error": {
            "message": message,
            "type": error_type.as_str()
        }
    });
    (status, Json(body)).into_response()
}

/// Error body as a JSON string, for in-band SSE error frames.
pub fn error_json(error_type: ErrorType, message: &str) -> String {
    json!({
        "error": {
            "message": message,
            "type": error_type.as_str()
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_strings() {
        assert_eq!(ErrorType::InvalidRequestError.as_str(), "invalid_request_error");
        assert_eq!(ErrorType::ApiError.as_str(), "api_error");
        assert_eq!(ErrorType::InternalError.as_str(), "internal_error");
    }

    #[test]
    fn test_error_json_shape() {
        let body = error_json(ErrorType::ApiError, "upstream exploded");
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["error"]["type"], "api_error");
        assert_eq!(parsed["error"]["message"], "upstream exploded");
    }

    #[tokio::test]
    async fn test_error_response_format() {
        let resp = error_response(
            StatusCode::BAD_REQUEST,
            ErrorType::InvalidRequestError,
            "missing field",
        );
        let (parts, body) = resp.into_parts();
        assert_eq!(parts.status, StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(body, 1_000_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["error"]["type"], "invalid_request_error");
        assert_eq!(parsed["error"]["message"], "missing field");
    }
}
