//! Canonical error envelope for the platform API.
//!
//! Every domain failure is a `PlatformApiError` carrying a stable code, an
//! HTTP status, and the request id it belongs to. A single renderer turns it
//! into the `{requestId, error: {code, message, details?}}` wire shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Failure raised by a provider adapter, before domain translation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AdapterError {
    pub code: String,
    pub status_code: u16,
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>, code: impl Into<String>, status_code: u16) -> Self {
        Self {
            code: code.into(),
            status_code,
            message: message.into(),
        }
    }
}

/// Domain error mapped to the canonical error envelope.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct PlatformApiError {
    pub status_code: u16,
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub details: Option<Value>,
}

impl PlatformApiError {
    pub fn new(
        status_code: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            status_code,
            code: code.into(),
            message: message.into(),
            request_id: request_id.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Preserve an adapter failure's code and status across the boundary.
    pub fn from_adapter(err: AdapterError, request_id: impl Into<String>) -> Self {
        Self::new(err.status_code, err.code, err.message, request_id)
    }

    pub fn internal(request_id: impl Into<String>) -> Self {
        Self::new(500, "INTERNAL_ERROR", "Internal server error", request_id)
    }
}

pub type PlatformResult<T> = Result<T, PlatformApiError>;

/// Build the canonical error payload.
pub fn error_envelope(
    code: &str,
    message: &str,
    request_id: &str,
    details: Option<&Value>,
) -> Value {
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let Some(details) = details {
        error["details"] = details.clone();
    }
    json!({
        "requestId": request_id,
        "error": error,
    })
}

impl IntoResponse for PlatformApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(
                code = %self.code,
                status = self.status_code,
                request_id = %self.request_id,
                "request failed: {}",
                self.message
            );
        } else {
            tracing::warn!(
                code = %self.code,
                status = self.status_code,
                request_id = %self.request_id,
                "request rejected: {}",
                self.message
            );
        }
        let body = error_envelope(
            &self.code,
            &self.message,
            &self.request_id,
            self.details.as_ref(),
        );
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let body = error_envelope("RISK_LIMIT_BREACH", "too big", "req-1", None);
        assert_eq!(body["requestId"], "req-1");
        assert_eq!(body["error"]["code"], "RISK_LIMIT_BREACH");
        assert_eq!(body["error"]["message"], "too big");
        assert!(body["error"].get("details").is_none());
    }

    #[test]
    fn test_envelope_includes_details_when_present() {
        let details = json!({"header": "X-Tenant-Id"});
        let body = error_envelope("AUTH_IDENTITY_MISMATCH", "mismatch", "req-2", Some(&details));
        assert_eq!(body["error"]["details"]["header"], "X-Tenant-Id");
    }

    #[test]
    fn test_adapter_error_translation_preserves_code_and_status() {
        let adapter = AdapterError::new("bad upstream JSON", "LIVE_ENGINE_BAD_RESPONSE_JSON", 502);
        let platform = PlatformApiError::from_adapter(adapter, "req-3");
        assert_eq!(platform.status_code, 502);
        assert_eq!(platform.code, "LIVE_ENGINE_BAD_RESPONSE_JSON");
        assert_eq!(platform.request_id, "req-3");
    }

    #[test]
    fn test_into_response_uses_status_code() {
        let err = PlatformApiError::new(423, "RISK_KILL_SWITCH_ACTIVE", "blocked", "req-4");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);
    }
}
