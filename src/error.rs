// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types for connection initialization.

use std::fmt;

/// Step of the initialization sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading and validating configuration keys.
    Configuration,
    /// Normalizing key material and assembling the credential.
    Credential,
    /// Exchanging the credential for a session.
    Authentication,
    /// Opening a document store client on the session.
    Connection,
    /// Handing out the cached client after initialization.
    Handle,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Credential => "credential",
            Self::Authentication => "authentication",
            Self::Connection => "connection",
            Self::Handle => "handle",
        };
        f.write_str(name)
    }
}

/// The only error callers of the connection manager ever see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("initialization failed during {phase}: {cause}")]
    InitializationFailed { phase: Phase, cause: String },
}

impl InitError {
    pub fn new(phase: Phase, cause: impl Into<String>) -> Self {
        Self::InitializationFailed {
            phase,
            cause: cause.into(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::InitializationFailed { phase, .. } => *phase,
        }
    }

    pub fn cause(&self) -> &str {
        match self {
            Self::InitializationFailed { cause, .. } => cause,
        }
    }
}

/// Failure reported by an authentication provider or document store.
///
/// These never cross the manager boundary; they are folded into
/// [`InitError`] together with the phase they occurred in.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("malformed secret: {0}")]
    MalformedSecret(String),

    #[error("credential rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub(crate) fn into_init(self, phase: Phase) -> InitError {
        InitError::new(phase, self.to_string())
    }
}
