//! # policyd
//!
//! Policy service binary. Loads settings, opens the policy database and
//! serves the HTTP API and the `/ws` change feed until interrupted.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use policy_store::{Database, PolicyRepo, Storage};

use crate::settings::Settings;

/// Policy CRUD service with live change notifications.
#[derive(Parser, Debug, Default)]
#[command(name = "policyd", about = "Policy CRUD service with live change notifications")]
struct Cli {
    /// JSON settings file, deep-merged over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the policy database, or `:memory:`.
    #[arg(long)]
    database: Option<PathBuf>,

    /// Default log level (`RUST_LOG` takes precedence).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(database) = &self.database {
            settings.database_path.clone_from(database);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut settings, ignored) =
        settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    let telemetry = policy_telemetry::init_telemetry(settings.telemetry_config()?);
    if let Some(path) = telemetry.log_db_path() {
        tracing::info!(path = %path.display(), "persisting warnings to log database");
    }
    for var in &ignored {
        tracing::warn!(key = var.key, value = %var.value, "invalid env var, ignoring");
    }

    let db = Database::open_path(&settings.database_path).with_context(|| {
        format!("Failed to open database: {}", settings.database_path.display())
    })?;
    let store: Arc<dyn Storage> = Arc::new(PolicyRepo::new(db));

    let handle = policy_server::start(settings.server.clone(), store)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind_addr()))?;
    tracing::info!(addr = %handle.addr, "policyd ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
