// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Service account credential assembled from configuration.

use crate::config::ConnectionConfig;
use crate::error::{InitError, Phase};
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const AUTH_PROVIDER_X509_CERT_URL: &str = "https://www.googleapis.com/oauth2/v1/certs";

const CREDENTIAL_TYPE: &str = "service_account";
const PEM_BEGIN: &str = "-----BEGIN";
const PEM_END: &str = "-----END";

/// Replace literal `\n` escape sequences with real line breaks.
///
/// Environment variables cannot carry raw newlines, so PEM keys arrive with
/// each break written as a backslash followed by `n`. Nothing else is touched.
pub fn normalize_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

/// Credential in the standard service-account JSON layout.
#[derive(Debug, Serialize)]
pub struct ServiceAccountCredential {
    #[serde(rename = "type")]
    pub credential_type: &'static str,
    pub project_id: String,
    pub private_key_id: String,
    #[serde(serialize_with = "expose")]
    private_key: SecretString,
    pub client_email: String,
    pub client_id: String,
    pub auth_uri: &'static str,
    pub token_uri: &'static str,
    pub auth_provider_x509_cert_url: &'static str,
    pub client_x509_cert_url: String,
}

impl ServiceAccountCredential {
    /// Build the credential, normalizing the key and checking its shape.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, InitError> {
        let private_key = normalize_private_key(config.private_key().expose_secret());

        if !private_key.contains(PEM_BEGIN) || !private_key.contains(PEM_END) {
            return Err(InitError::new(
                Phase::Credential,
                "private key is not PEM encoded (missing BEGIN/END markers)",
            ));
        }
        if !config.client_email.contains('@') {
            return Err(InitError::new(
                Phase::Credential,
                format!("client email {:?} is not an email address", config.client_email),
            ));
        }

        Ok(Self {
            credential_type: CREDENTIAL_TYPE,
            project_id: config.project_id.clone(),
            private_key_id: config.private_key_id.clone(),
            private_key: SecretString::from(private_key),
            client_email: config.client_email.clone(),
            client_id: config.client_id.clone(),
            auth_uri: AUTH_URI,
            token_uri: TOKEN_URI,
            auth_provider_x509_cert_url: AUTH_PROVIDER_X509_CERT_URL,
            client_x509_cert_url: config.client_x509_cert_url.clone(),
        })
    }

    /// PEM key material with real line breaks.
    pub fn private_key(&self) -> &SecretString {
        &self.private_key
    }

    /// Full service-account JSON, secret included.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}
