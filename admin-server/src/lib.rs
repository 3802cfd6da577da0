//! Admin server for the NSM static site.
//!
//! Manages the JSON collections the site is rendered from, stores uploaded
//! images and documents, and exposes the build and CDN purge steps used to
//! publish changes.
pub mod config;
pub mod error;
pub mod ident;
pub mod maintenance;
pub mod models;
pub mod publish;
pub mod routes;
pub mod server;
pub mod state;
pub mod store;
pub mod uploads;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::Config;
use state::AppState;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Loading configuration...");
    let config = Config::from_env()?;
    info!(
        public_dir = %config.public_dir.display(),
        admin_ui = %config.admin_ui_dir.display(),
        purge_base = %config.cdn_purge_base,
        "Configuration loaded"
    );

    let state = AppState::new(config)?;
    server::start_server(state).await?;
    Ok(())
}
