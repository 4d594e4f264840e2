// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firebase bootstrap for the trading bot.
//!
//! Loads service account configuration, authenticates once, and shares a
//! single Firestore client through [`ConnectionManager`].

pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod manager;
pub mod store;

pub use auth::{AuthProvider, GoogleAuthProvider, Session, TokenSource};
pub use config::{ConfigSource, ConnectionConfig, LogLevel, Settings};
pub use credential::ServiceAccountCredential;
pub use error::{InitError, Phase, ProviderError};
pub use manager::ConnectionManager;
pub use store::{DocumentStore, FirestoreClient, FirestoreStore};

use manager::ProcessClaim;

/// Manager wired to the real Google and Firestore endpoints.
pub type FirebaseManager = ConnectionManager<GoogleAuthProvider, FirestoreStore>;

impl FirebaseManager {
    /// Build the process-wide manager.
    ///
    /// Fails while another `FirebaseManager` built this way is still alive.
    pub fn with_settings(source: ConfigSource, settings: Settings) -> Result<Self, InitError> {
        let claim = ProcessClaim::acquire().ok_or_else(|| {
            InitError::new(
                Phase::Configuration,
                "a Firebase connection manager already exists in this process",
            )
        })?;

        let http = reqwest::Client::new();
        let store = FirestoreStore::new(http.clone(), settings.database_id.clone());
        Ok(ConnectionManager::new(source, settings, GoogleAuthProvider::new(http), store)
            .with_claim(claim))
    }
}
