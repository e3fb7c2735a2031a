// src/main.rs
// Ledgerbook host: loads configuration, brings storage up, reports status.

use ledgerbook::config_mod::AppConfig;
use ledgerbook::state_mod::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1);
    let config = AppConfig::load(config_path.as_deref())?;
    tracing::info!(app = %config.app_name, backend = ?config.storage.backend, "starting");

    let mut state = AppState::from_config(config).await?;
    let status = state.system_status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    state.shutdown().await?;
    Ok(())
}
