// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firebase bridge - verifies the bot's Firestore connection at startup.

use anyhow::Context;
use clap::{Parser, Subcommand};
use firebase_bridge::config::REQUIRED_KEYS;
use firebase_bridge::logging::init_logging;
use firebase_bridge::{ConfigSource, FirebaseManager, Settings};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "firebase-bridge", version, about = "Firebase connection bootstrap")]
struct Cli {
    /// Override FIREBASE_CONNECT_TIMEOUT_SECS
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize the connection and report the result (default)
    Check,
    /// Show which required configuration keys are set
    Env,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let source = ConfigSource::env();
    let mut settings = Settings::load(&source);
    if let Some(secs) = cli.timeout {
        settings.set_connect_timeout_secs(secs);
    }

    init_logging(settings.log_level).context("failed to install log subscriber")?;

    match cli.command.unwrap_or(Command::Check) {
        Command::Env => {
            for key in REQUIRED_KEYS {
                let state = source.non_empty(key).map(|_| "SET").unwrap_or("NONE");
                info!("{:<32} {}", key, state);
            }
            Ok(())
        }
        Command::Check => check(source, settings).await,
    }
}

async fn check(source: ConfigSource, settings: Settings) -> anyhow::Result<()> {
    info!("🚀 Checking Firebase connection...");
    info!("⏱️  Timeout: {:?}", settings.connect_timeout);

    let manager = FirebaseManager::with_settings(source, settings)?;

    if let Err(e) = manager.initialize().await {
        error!("Startup aborted: {}", e);
        return Err(e.into());
    }

    let client = manager.active_connection().await?;
    info!("📡 Firestore: {}", client.base_url());
    if let Some(config) = manager.config() {
        info!("🆔 Project: {} (client {})", config.project_id, config.client_id);
    }
    info!("🕒 Token expires: {}", client.session().await?.expires_at);

    Ok(())
}
