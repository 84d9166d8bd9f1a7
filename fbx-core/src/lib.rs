//! fbx-core: Client library for the Freebox local REST API
//!
//! This crate provides:
//! - Wire types for the Freebox login protocol
//! - Device pairing and session management (challenge/response auth)
//! - A generic API gateway attaching the session token to calls
//! - Config and credential persistence

pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;

pub use config::{AppIdentity, Config, CredentialStore, Credentials};
pub use error::FreeboxError;
pub use gateway::ApiGateway;
pub use session::{AuthState, DeviceEndpoint, SessionManager};

/// Well-known LAN name of the Freebox
pub const DEFAULT_HOST: &str = "mafreebox.freebox.fr";

/// Default HTTP port of the local API
pub const DEFAULT_PORT: u16 = 80;
