//! Generic API gateway
//!
//! Issues arbitrary calls against the discovered base URL with the
//! session token attached. Envelope unwrapping and the ten-second
//! timeout come from the shared request plumbing in [`crate::session`].

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;

use crate::error::FreeboxError;
use crate::session::{self, SessionManager};

/// Error codes the box answers with when the session token is stale
const SESSION_ERROR_CODES: &[&str] = &["auth_required", "invalid_token", "invalid_session"];

/// Gateway for authenticated calls against the box
pub struct ApiGateway {
    session: Arc<SessionManager>,
}

impl ApiGateway {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Call `base + path`: GET without a payload, POST with one.
    ///
    /// Queues behind any in-flight authentication. A stale-session
    /// answer triggers exactly one re-authentication before the call is
    /// retried; transport failures invalidate the session and surface
    /// as [`FreeboxError::Network`] with no retry at this layer.
    pub async fn call(&self, path: &str, payload: Option<Value>) -> Result<Value, FreeboxError> {
        self.session.ensure_authenticated().await?;

        match self.raw_call(path, payload.as_ref()).await {
            Ok(value) => Ok(value),
            Err(e) if is_session_failure(&e) => {
                tracing::debug!(path, "session rejected, re-authenticating");
                self.session.invalidate().await;
                self.session.ensure_authenticated().await?;
                self.raw_call(path, payload.as_ref()).await
            }
            Err(e) => {
                if matches!(e, FreeboxError::Network(_)) {
                    self.session.invalidate().await;
                }
                Err(e)
            }
        }
    }

    async fn raw_call(&self, path: &str, payload: Option<&Value>) -> Result<Value, FreeboxError> {
        let (base, token) = self.session.call_context().await?;
        // The discovered base already ends with a slash
        let path = path.trim_start_matches('/');

        let method = if payload.is_some() {
            Method::POST
        } else {
            Method::GET
        };
        let mut req = self.session.request(&base, token.as_deref(), method, path);
        if let Some(payload) = payload {
            req = req.json(payload);
        }
        session::send(req).await
    }
}

fn is_session_failure(e: &FreeboxError) -> bool {
    matches!(e, FreeboxError::Api { code, .. } if SESSION_ERROR_CODES.contains(&code.as_str()))
}
