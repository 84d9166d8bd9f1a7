//! Wire types for the Freebox login protocol
//!
//! Every API response except `GET /api_version` is wrapped in a
//! `{success, result}` envelope; failures carry `error_code` and `msg`
//! instead of `result`. Discovery is the one bare endpoint.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FreeboxError;

/// Discovery response from `GET /api_version` (not enveloped)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiVersion {
    pub api_version: String,
    pub api_base_url: String,
    pub device_name: String,
    #[serde(default)]
    pub device_type: String,
    pub uid: String,
}

/// Pairing request body for `POST login/authorize`
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRequest<'a> {
    pub app_id: &'a str,
    pub app_name: &'a str,
    pub app_version: &'a str,
    pub device_name: &'a str,
}

/// Result of `POST login/authorize`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeResult {
    pub app_token: String,
    pub track_id: u64,
}

/// Pairing approval status reported by `GET login/authorize/{track_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Waiting for the user to accept on the box's front panel
    Pending,
    Granted,
    Denied,
    Timeout,
    #[serde(other)]
    Unknown,
}

/// Result of `GET login/authorize/{track_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeTrackResult {
    pub status: TrackStatus,
    #[serde(default)]
    pub challenge: Option<String>,
}

/// Result of `GET login`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
    pub logged_in: bool,
    pub challenge: String,
}

/// Session open request body for `POST login/session/`
#[derive(Debug, Clone, Serialize)]
pub struct SessionOpenRequest<'a> {
    pub app_id: &'a str,
    pub app_version: &'a str,
    pub password: &'a str,
}

/// Result of `POST login/session/`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResult {
    pub session_token: String,
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub permissions: HashMap<String, bool>,
}

/// Unwrap a `{success, result}` envelope.
///
/// `success == true` yields the `result` field (null when the endpoint
/// returns none, e.g. `login/logout`). `success == false` yields the
/// whole envelope as an [`FreeboxError::Api`]. A body without a
/// `success` field at all is malformed and returned as-is inside the
/// error so callers can inspect the shape.
pub fn unwrap_envelope(body: Value) -> Result<Value, FreeboxError> {
    match body.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(body.get("result").cloned().unwrap_or(Value::Null)),
        Some(false) => {
            let code = body
                .get("error_code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let message = body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Err(FreeboxError::Api {
                code,
                message,
                envelope: body,
            })
        }
        None => {
            tracing::error!("response body has no success field");
            Err(FreeboxError::MalformedResponse(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_success() {
        let body = json!({ "success": true, "result": { "logged_in": false } });
        let result = unwrap_envelope(body).unwrap();
        assert_eq!(result, json!({ "logged_in": false }));
    }

    #[test]
    fn test_unwrap_success_without_result() {
        let body = json!({ "success": true });
        assert_eq!(unwrap_envelope(body).unwrap(), Value::Null);
    }

    #[test]
    fn test_unwrap_failure_keeps_envelope() {
        let body = json!({ "success": false, "error_code": "auth_required", "msg": "session expired" });
        match unwrap_envelope(body) {
            Err(FreeboxError::Api { code, message, envelope }) => {
                assert_eq!(code, "auth_required");
                assert_eq!(message, "session expired");
                assert_eq!(envelope["error_code"], "auth_required");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_unwrap_missing_success_is_malformed() {
        let body = json!({ "result": 42 });
        assert!(matches!(
            unwrap_envelope(body),
            Err(FreeboxError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_track_status_parsing() {
        let status: TrackStatus = serde_json::from_value(json!("pending")).unwrap();
        assert_eq!(status, TrackStatus::Pending);

        let status: TrackStatus = serde_json::from_value(json!("granted")).unwrap();
        assert_eq!(status, TrackStatus::Granted);

        // Anything the device invents later falls back to Unknown
        let status: TrackStatus = serde_json::from_value(json!("on_fire")).unwrap();
        assert_eq!(status, TrackStatus::Unknown);
    }

    #[test]
    fn test_authorize_request_serialization() {
        let req = AuthorizeRequest {
            app_id: "fbx",
            app_name: "fbx client",
            app_version: "0.1.0",
            device_name: "workstation",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["app_id"], "fbx");
        assert_eq!(json["device_name"], "workstation");
    }
}
