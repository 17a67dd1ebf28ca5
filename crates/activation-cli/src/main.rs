//! Subscription activation CLI
//!
//! Usage:
//!   activate activate starter --profile profile.json
//!   activate --api-key <KEY> activate professional --profile profile.json
//!   activate analytics --top 10
//!
//! Settings come from the environment (or a `.env` file):
//! `ACTIVATION_API_KEY`, `ACTIVATION_API_BASE_URL`, `ACTIVATION_POLL_*`,
//! `ACTIVATION_FEATURE_KEY_SCOPES`.

mod cli;
mod commands;
mod console;

use activation_client::{BackendConfig, HttpBackend};
use activation_core::ApiKey;
use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = BackendConfig::from_env()?;
    if let Some(base) = cli.api_base {
        config.admin_base_url.clone_from(&base);
        config.base_url = base;
    }
    let backend = HttpBackend::new(&config)?;
    tracing::debug!(base_url = %config.base_url, "Backend configured");

    let key = ApiKey::new(
        cli.api_key
            .or_else(|| std::env::var("ACTIVATION_API_KEY").ok())
            .unwrap_or_default(),
    );
    if key.is_empty() {
        bail!("no API key: pass --api-key or set ACTIVATION_API_KEY");
    }

    match cli.command {
        Commands::Activate(args) => commands::activate::run(args, backend, key).await?,
        Commands::Analytics(args) => commands::analytics::run(args, &backend, &key).await?,
        Commands::Subscription => commands::analytics::subscription(&backend, &key).await?,
    }

    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("✓ {}", message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("→ {}", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("! {}", message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("✗ {}", message);
}
