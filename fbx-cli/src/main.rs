//! fbx-cli: one-shot command-line adapter for the Freebox local API
//!
//! Usage:
//!   fbx-cli <path> [json-payload]
//!
//! Connects to the box (pairing on first run, challenge/response login
//! afterwards), issues a single call, prints the unwrapped JSON result,
//! and closes the session on the way out.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fbx_core::{ApiGateway, Config, CredentialStore, FreeboxError, SessionManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fbx_cli=info,fbx_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: fbx-cli <path> [json-payload]");
        std::process::exit(2);
    };
    let payload = match args.next() {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        Config::default()
    });

    let store = CredentialStore::new()?;
    let session = Arc::new(SessionManager::new(config, Some(store))?);

    session.connect().await?;

    let gateway = ApiGateway::new(Arc::clone(&session));
    let result = gateway.call(&path, payload).await;

    // Best-effort logout; the session expires server-side anyway
    if let Err(e) = session.logout().await {
        tracing::warn!("logout failed: {e}");
    }

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(FreeboxError::Api {
            code,
            message,
            envelope,
        }) => {
            eprintln!("{}", serde_json::to_string_pretty(&envelope)?);
            anyhow::bail!("device reported failure {code}: {message}");
        }
        Err(e) => Err(e.into()),
    }
}
