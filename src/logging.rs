// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Logging setup.

use crate::config::LogLevel;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global subscriber. `RUST_LOG`, when set, takes precedence over `level`.
pub fn init_logging(level: LogLevel) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level.as_tracing()).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
