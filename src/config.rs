// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration module - loads Firebase settings from environment variables.

use crate::error::{InitError, Phase};
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;

pub const PROJECT_ID: &str = "FIREBASE_PROJECT_ID";
pub const PRIVATE_KEY_ID: &str = "FIREBASE_PRIVATE_KEY_ID";
pub const PRIVATE_KEY: &str = "FIREBASE_PRIVATE_KEY";
pub const CLIENT_EMAIL: &str = "FIREBASE_CLIENT_EMAIL";
pub const CLIENT_ID: &str = "FIREBASE_CLIENT_ID";
pub const CLIENT_X509_CERT_URL: &str = "FIREBASE_CLIENT_X509_CERT_URL";

/// Keys that must be present (and non-empty) before a connection is attempted.
pub const REQUIRED_KEYS: [&str; 6] = [
    PROJECT_ID,
    PRIVATE_KEY_ID,
    PRIVATE_KEY,
    CLIENT_EMAIL,
    CLIENT_ID,
    CLIENT_X509_CERT_URL,
];

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DATABASE_ID: &str = "(default)";

/// Where configuration values are read from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// The process environment (plus `.env`, loaded by [`ConfigSource::env`]).
    Environment,
    /// A fixed set of key/value pairs.
    Static(HashMap<String, String>),
}

impl ConfigSource {
    /// Environment source with `.env` loaded first, if one exists.
    pub fn env() -> Self {
        dotenvy::dotenv().ok();
        Self::Environment
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Static(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Raw value for `key`, if set.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match self {
            Self::Environment => std::env::var(key).ok(),
            Self::Static(values) => values.get(key).cloned(),
        }
    }

    /// Value for `key`, treating empty or whitespace-only values as unset.
    pub fn non_empty(&self, key: &str) -> Option<String> {
        self.lookup(key).filter(|v| !v.trim().is_empty())
    }
}

/// Service account fields needed to authenticate against Firebase.
///
/// Built once per manager from a [`ConfigSource`] and never mutated.
#[derive(Debug)]
pub struct ConnectionConfig {
    pub project_id: String,
    pub private_key_id: String,
    private_key: SecretString,
    pub client_email: String,
    pub client_id: String,
    pub client_x509_cert_url: String,
}

impl ConnectionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, InitError> {
        Self::load(&ConfigSource::env())
    }

    /// Read every required key, reporting all missing ones in a single error.
    pub fn load(source: &ConfigSource) -> Result<Self, InitError> {
        let mut values = HashMap::with_capacity(REQUIRED_KEYS.len());
        let mut missing = Vec::new();

        for key in REQUIRED_KEYS {
            match source.non_empty(key) {
                Some(value) => {
                    values.insert(key, value);
                }
                None => missing.push(key),
            }
        }

        if !missing.is_empty() {
            return Err(InitError::new(
                Phase::Configuration,
                format!("missing required configuration: {}", missing.join(", ")),
            ));
        }

        let mut take = |key: &str| values.remove(key).unwrap_or_default();

        Ok(Self {
            project_id: take(PROJECT_ID).trim().to_string(),
            private_key_id: take(PRIVATE_KEY_ID).trim().to_string(),
            private_key: SecretString::from(take(PRIVATE_KEY)),
            client_email: take(CLIENT_EMAIL).trim().to_string(),
            client_id: take(CLIENT_ID).trim().to_string(),
            client_x509_cert_url: take(CLIENT_X509_CERT_URL).trim().to_string(),
        })
    }

    /// Private key exactly as configured (newlines still escaped).
    pub fn private_key(&self) -> &SecretString {
        &self.private_key
    }
}

/// Log verbosity accepted in `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a level name; unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// Optional runtime settings. Every field has a default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: LogLevel,
    /// Upper bound on each network step of initialization.
    pub connect_timeout: Duration,
    pub database_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            database_id: DEFAULT_DATABASE_ID.to_string(),
        }
    }
}

impl Settings {
    pub fn load(source: &ConfigSource) -> Self {
        let log_level = source
            .non_empty("LOG_LEVEL")
            .and_then(|v| LogLevel::parse(&v))
            .unwrap_or_default();

        let timeout_secs = env_var_or(source, "FIREBASE_CONNECT_TIMEOUT_SECS", "30")
            .trim()
            .parse()
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut settings = Self {
            log_level,
            database_id: env_var_or(source, "FIREBASE_DATABASE_ID", DEFAULT_DATABASE_ID),
            ..Self::default()
        };
        settings.set_connect_timeout_secs(timeout_secs);
        settings
    }

    /// Set the per-step network timeout; zero is raised to one second.
    pub fn set_connect_timeout_secs(&mut self, secs: u64) {
        self.connect_timeout = Duration::from_secs(secs.max(1));
    }
}

fn env_var_or(source: &ConfigSource, name: &str, default: &str) -> String {
    source
        .non_empty(name)
        .unwrap_or_else(|| default.to_string())
}
