//! Error taxonomy for the Freebox client
//!
//! Every fallible operation returns one of these tagged values; nothing
//! panics across the crate boundary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::TrackStatus;

#[derive(Debug, Error)]
pub enum FreeboxError {
    /// An operation needs a discovered endpoint but `connect` never ran
    #[error("not connected: run discovery before issuing calls")]
    NotConnected,

    /// Discovery response unreachable or missing identity fields
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Terminal pairing refusal (user denied, approval timed out on the
    /// box, or the box reported a status we do not recognize)
    #[error("pairing refused by device (status {0:?})")]
    PairingDenied(TrackStatus),

    /// Approval never granted within the polling budget
    #[error("pairing not approved after {attempts} polls")]
    PairingTimeout { attempts: u32 },

    /// Session open rejected. The device does not distinguish a bad
    /// password from a revoked app_token; credentials are kept and the
    /// caller decides whether to wipe them and re-pair.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Transport-level failure (timeout, refused connection, unparseable body)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Well-formed failure envelope from the device
    #[error("device reported failure {code}: {message}")]
    Api {
        code: String,
        message: String,
        envelope: serde_json::Value,
    },

    /// Response body without a `success` field
    #[error("malformed response from device")]
    MalformedResponse(serde_json::Value),

    /// Credential persistence failed right after pairing
    #[error("credential storage error: {0}")]
    Credentials(#[from] ConfigError),
}
