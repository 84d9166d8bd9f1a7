//! Pairing and session lifecycle for the Freebox local API
//!
//! The box authenticates applications in two stages. Pairing runs once:
//! the app submits its identity, the user approves it on the box's
//! front panel, and the box hands back a long-lived `app_token`. Login
//! runs per session: the box rotates a challenge, the app answers with
//! `hex(HMAC-SHA1(app_token, challenge))`, and receives a short-lived
//! session token to attach to subsequent calls.
//!
//! All mutable session state sits behind one async mutex. The lock is
//! held for the whole handshake, so concurrent callers queue behind an
//! in-flight authentication instead of racing a second pairing.

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use sha1::Sha1;
use tokio::sync::Mutex;

use crate::config::{Config, CredentialStore, Credentials};
use crate::error::FreeboxError;
use crate::protocol::{
    self, ApiVersion, AuthorizeRequest, AuthorizeResult, AuthorizeTrackResult, LoginResult,
    SessionOpenRequest, SessionResult, TrackStatus,
};

/// Fixed timeout for every request to the box
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the session token
pub const AUTH_HEADER: &str = "X-Fbx-App-Auth";

/// Observable phase of the authentication state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No app_token known; pairing required
    Unpaired,
    /// Pairing request submitted
    Pairing,
    /// Waiting for the user to approve on the box
    AwaitingApproval,
    /// Challenge/response login in progress
    LoggingIn,
    /// Session open, token usable
    Active,
    /// Last handshake failed
    Failed,
}

/// Endpoint resolved by discovery
#[derive(Debug, Clone)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    /// Fully qualified versioned base, e.g. `http://host:port/api/v8/`
    pub base_url: String,
    pub api_version: String,
    pub device_name: String,
    pub device_type: String,
    pub uid: String,
}

/// Short-lived session material, cleared on logout or call failure
#[derive(Debug, Clone, Default)]
struct SessionState {
    challenge: Option<String>,
    session_token: Option<String>,
    permissions: HashMap<String, bool>,
    logged_in: bool,
}

struct Inner {
    endpoint: Option<DeviceEndpoint>,
    credentials: Option<Credentials>,
    session: SessionState,
    phase: AuthState,
}

/// Owns the device endpoint, the pairing credential, and the
/// authentication lifecycle: discovery, pairing, login, logout.
pub struct SessionManager {
    http: Client,
    config: Config,
    store: Option<CredentialStore>,
    inner: Mutex<Inner>,
}

impl SessionManager {
    /// Create a session manager, loading any persisted credentials
    pub fn new(config: Config, store: Option<CredentialStore>) -> Result<Self, FreeboxError> {
        let credentials = match &store {
            Some(store) => store.load()?,
            None => None,
        };
        let phase = if credentials.is_some() {
            AuthState::LoggingIn
        } else {
            AuthState::Unpaired
        };

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            http,
            config,
            store,
            inner: Mutex::new(Inner {
                endpoint: None,
                credentials,
                session: SessionState::default(),
                phase,
            }),
        })
    }

    /// Resolve the versioned API base URL, then authenticate.
    ///
    /// Discovery reruns on every call, so a changed host or port in the
    /// config takes effect here.
    pub async fn connect(&self) -> Result<(), FreeboxError> {
        let mut inner = self.inner.lock().await;

        let endpoint = self.discover().await?;
        tracing::info!(
            base_url = %endpoint.base_url,
            device = %endpoint.device_name,
            "discovered Freebox endpoint"
        );
        inner.endpoint = Some(endpoint);
        inner.session = SessionState::default();

        self.authenticate_locked(&mut inner).await
    }

    /// Run the pairing/login state machine until a session is open.
    ///
    /// No-op when already logged in. Holds the session lock for the
    /// whole handshake; at most one is ever in flight.
    pub async fn ensure_authenticated(&self) -> Result<(), FreeboxError> {
        let mut inner = self.inner.lock().await;
        self.authenticate_locked(&mut inner).await
    }

    /// Close the session on the box. Local state is cleared whether or
    /// not the server accepted the request.
    pub async fn logout(&self) -> Result<(), FreeboxError> {
        let mut inner = self.inner.lock().await;

        let result = match (&inner.endpoint, inner.session.session_token.as_deref()) {
            (Some(endpoint), Some(token)) => {
                let req = self
                    .request(&endpoint.base_url, Some(token), Method::POST, "login/logout")
                    .json(&serde_json::json!({}));
                send(req).await.map(|_| ())
            }
            _ => Ok(()),
        };

        inner.session = SessionState::default();
        inner.phase = if inner.credentials.is_some() {
            AuthState::LoggingIn
        } else {
            AuthState::Unpaired
        };

        if let Err(e) = &result {
            tracing::warn!("logout request failed: {e}");
        } else {
            tracing::info!("session closed");
        }
        result
    }

    /// Force re-authentication before the next call
    pub async fn invalidate(&self) {
        let mut inner = self.inner.lock().await;
        inner.session.logged_in = false;
    }

    /// Current phase of the state machine
    pub async fn state(&self) -> AuthState {
        self.inner.lock().await.phase
    }

    /// Capability map granted at session open
    pub async fn permissions(&self) -> HashMap<String, bool> {
        self.inner.lock().await.session.permissions.clone()
    }

    /// Last challenge seen from the box (rotates on every login)
    pub async fn challenge(&self) -> Option<String> {
        self.inner.lock().await.session.challenge.clone()
    }

    /// Session token of the open session, if any
    pub async fn session_token(&self) -> Option<String> {
        self.inner.lock().await.session.session_token.clone()
    }

    /// Discovered endpoint, if `connect` succeeded
    pub async fn endpoint(&self) -> Option<DeviceEndpoint> {
        self.inner.lock().await.endpoint.clone()
    }

    // State machine internals. All of these run under the session lock.

    async fn authenticate_locked(&self, inner: &mut Inner) -> Result<(), FreeboxError> {
        if inner.session.logged_in && inner.session.session_token.is_some() {
            return Ok(());
        }

        let base = inner
            .endpoint
            .as_ref()
            .ok_or(FreeboxError::NotConnected)?
            .base_url
            .clone();

        if inner.credentials.is_none() {
            if let Err(e) = self.pair(inner, &base).await {
                inner.phase = AuthState::Failed;
                return Err(e);
            }
        }

        match self.open_session(inner, &base).await {
            Ok(()) => {
                inner.phase = AuthState::Active;
                Ok(())
            }
            Err(e) => {
                inner.phase = AuthState::Failed;
                Err(e)
            }
        }
    }

    /// Submit the app identity and wait for the user to approve it
    async fn pair(&self, inner: &mut Inner, base: &str) -> Result<(), FreeboxError> {
        inner.phase = AuthState::Pairing;

        let request = AuthorizeRequest {
            app_id: &self.config.app.app_id,
            app_name: &self.config.app.app_name,
            app_version: &self.config.app.app_version,
            device_name: &self.config.app.device_name,
        };
        let result = send(
            self.request(base, None, Method::POST, "login/authorize")
                .json(&request),
        )
        .await?;
        let authorized: AuthorizeResult = decode(result)?;

        let credentials = Credentials {
            app_token: authorized.app_token,
            track_id: authorized.track_id,
        };
        // Persist before first use: an unstored token is lost on crash
        // and the user would have to approve the app all over again.
        if let Some(store) = &self.store {
            store.save(&credentials)?;
        }
        let track_id = credentials.track_id;
        inner.credentials = Some(credentials);

        tracing::info!("pairing requested, waiting for approval on the box's front panel");
        inner.phase = AuthState::AwaitingApproval;
        self.await_approval(inner, base, track_id).await
    }

    /// Poll the pairing status with bounded exponential backoff
    async fn await_approval(
        &self,
        inner: &mut Inner,
        base: &str,
        track_id: u64,
    ) -> Result<(), FreeboxError> {
        let mut delay = Duration::from_millis(self.config.pairing.poll_initial_delay_ms);
        let max_delay = Duration::from_millis(self.config.pairing.poll_max_delay_ms);
        let path = format!("login/authorize/{track_id}");

        for attempt in 1..=self.config.pairing.poll_max_attempts {
            let result = match send(self.request(base, None, Method::GET, &path)).await {
                Ok(value) => value,
                // Transient transport failures count against the budget
                Err(FreeboxError::Network(e)) => {
                    tracing::debug!(attempt, "approval poll failed: {e}");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let track: AuthorizeTrackResult = decode(result)?;

            if let Some(challenge) = track.challenge {
                inner.session.challenge = Some(challenge);
            }

            match track.status {
                TrackStatus::Granted => {
                    tracing::info!("pairing approved");
                    return Ok(());
                }
                TrackStatus::Pending => {
                    tracing::debug!(attempt, "approval still pending");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
                status => {
                    tracing::warn!(?status, "pairing refused");
                    return Err(FreeboxError::PairingDenied(status));
                }
            }
        }

        Err(FreeboxError::PairingTimeout {
            attempts: self.config.pairing.poll_max_attempts,
        })
    }

    /// Fetch the current challenge and open a session if needed
    async fn open_session(&self, inner: &mut Inner, base: &str) -> Result<(), FreeboxError> {
        inner.phase = AuthState::LoggingIn;

        let result = send(self.request(base, None, Method::GET, "login")).await?;
        let login: LoginResult = decode(result)?;
        inner.session.challenge = Some(login.challenge.clone());

        // An earlier session may still be valid server-side
        if login.logged_in && inner.session.session_token.is_some() {
            inner.session.logged_in = true;
            return Ok(());
        }

        let app_token = inner
            .credentials
            .as_ref()
            .map(|c| c.app_token.clone())
            .ok_or_else(|| FreeboxError::Auth("no app token available".to_string()))?;
        let password = derive_password(&app_token, &login.challenge)?;

        let request = SessionOpenRequest {
            app_id: &self.config.app.app_id,
            app_version: &self.config.app.app_version,
            password: &password,
        };
        let result = match send(
            self.request(base, None, Method::POST, "login/session/")
                .json(&request),
        )
        .await
        {
            Ok(value) => value,
            // The box does not say whether the password was wrong or the
            // app_token was revoked; credentials are kept either way and
            // the caller decides whether to re-pair.
            Err(FreeboxError::Api { code, message, .. }) => {
                return Err(FreeboxError::Auth(format!("{code}: {message}")));
            }
            Err(e) => return Err(e),
        };
        let session: SessionResult = decode(result)?;

        if let Some(challenge) = session.challenge {
            inner.session.challenge = Some(challenge);
        }
        inner.session.session_token = Some(session.session_token);
        inner.session.permissions = session.permissions;
        inner.session.logged_in = true;

        tracing::info!(permissions = ?inner.session.permissions, "session opened");
        Ok(())
    }

    /// Resolve the versioned base URL from the bare host and port
    async fn discover(&self) -> Result<DeviceEndpoint, FreeboxError> {
        let host = &self.config.endpoint.host;
        let port = self.config.endpoint.port;
        let url = format!("http://{host}:{port}/api_version");

        let body: Value = self.http.get(&url).send().await?.json().await?;
        let version: ApiVersion = serde_json::from_value(body)
            .map_err(|e| FreeboxError::Discovery(format!("missing identity fields: {e}")))?;

        let base_url = resolve_base_url(host, port, &version.api_version, &version.api_base_url)?;

        Ok(DeviceEndpoint {
            host: host.clone(),
            port,
            base_url,
            api_version: version.api_version,
            device_name: version.device_name,
            device_type: version.device_type,
            uid: version.uid,
        })
    }

    pub(crate) fn request(
        &self,
        base: &str,
        token: Option<&str>,
        method: Method,
        path: &str,
    ) -> RequestBuilder {
        let url = format!("{base}{path}");
        let mut req = self.http.request(method, url);
        if let Some(token) = token {
            req = req.header(AUTH_HEADER, token);
        }
        req
    }

    /// Base URL and session token for an outgoing call
    pub(crate) async fn call_context(&self) -> Result<(String, Option<String>), FreeboxError> {
        let inner = self.inner.lock().await;
        let base = inner
            .endpoint
            .as_ref()
            .ok_or(FreeboxError::NotConnected)?
            .base_url
            .clone();
        Ok((base, inner.session.session_token.clone()))
    }
}

/// Send a request and unwrap the device's response envelope
pub(crate) async fn send(builder: RequestBuilder) -> Result<Value, FreeboxError> {
    let resp = builder.send().await?;
    let body: Value = resp.json().await?;
    protocol::unwrap_envelope(body)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, FreeboxError> {
    serde_json::from_value(value.clone()).map_err(|e| {
        tracing::error!("unexpected result shape: {e}");
        FreeboxError::MalformedResponse(value)
    })
}

/// Derive the one-time session password from the rolling challenge:
/// `hex(HMAC-SHA1(key = app_token, msg = challenge))`
pub fn derive_password(app_token: &str, challenge: &str) -> Result<String, FreeboxError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(app_token.as_bytes())
        .map_err(|_| FreeboxError::Auth("HMAC key setup failed".to_string()))?;
    mac.update(challenge.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn resolve_base_url(
    host: &str,
    port: u16,
    api_version: &str,
    api_base_url: &str,
) -> Result<String, FreeboxError> {
    let major = api_version
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            FreeboxError::Discovery(format!("unparseable api_version {api_version:?}"))
        })?;
    Ok(format!("http://{host}:{port}{api_base_url}v{major}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_password_rfc2202_vector() {
        // HMAC-SHA1 test case 2 from RFC 2202
        let password = derive_password("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(password, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn test_derive_password_deterministic() {
        let a = derive_password("T", "abc123").unwrap();
        let b = derive_password("T", "abc123").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40); // SHA-1 digest, hex-encoded

        let other = derive_password("T", "abc124").unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_resolve_base_url() {
        let url = resolve_base_url("192.0.2.1", 80, "8.0", "/api/").unwrap();
        assert_eq!(url, "http://192.0.2.1:80/api/v8/");

        let url = resolve_base_url("mafreebox.freebox.fr", 8080, "11.1", "/api/").unwrap();
        assert_eq!(url, "http://mafreebox.freebox.fr:8080/api/v11/");
    }

    #[test]
    fn test_resolve_base_url_rejects_empty_version() {
        assert!(matches!(
            resolve_base_url("h", 80, "", "/api/"),
            Err(FreeboxError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_new_without_store_starts_unpaired() {
        let manager = SessionManager::new(Config::default(), None).unwrap();
        assert_eq!(manager.state().await, AuthState::Unpaired);
    }
}
