// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Authentication against Google OAuth2 with a service account.
//!
//! The service account signs a short-lived JWT with its private key and
//! exchanges it at the token endpoint for a bearer access token. That token,
//! together with the project it belongs to, is a [`Session`]. Tokens live
//! about an hour, so clients hold a [`TokenSource`] that re-authenticates
//! when the current session is about to expire.

use crate::credential::ServiceAccountCredential;
use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Exchanges a credential for an authorized session.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(
        &self,
        credential: &ServiceAccountCredential,
    ) -> Result<Session, ProviderError>;
}

/// One authorized application identity.
#[derive(Debug)]
pub struct Session {
    pub project_id: String,
    pub client_email: String,
    access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            client_email: client_email.into(),
            access_token: SecretString::from(access_token.into()),
            expires_at,
        }
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// True if the token expires within `margin` from now.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

/// Current session for one credential, re-authenticated on expiry.
///
/// Concurrent callers share one refresh: the lock is held while the
/// provider runs, so only the first caller to see a stale token fetches
/// a new one.
pub struct TokenSource {
    auth: Arc<dyn AuthProvider>,
    credential: Arc<ServiceAccountCredential>,
    refresh_timeout: std::time::Duration,
    current: Mutex<Arc<Session>>,
}

impl TokenSource {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        credential: Arc<ServiceAccountCredential>,
        session: Arc<Session>,
        refresh_timeout: std::time::Duration,
    ) -> Self {
        Self {
            auth,
            credential,
            refresh_timeout,
            current: Mutex::new(session),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.credential.project_id
    }

    pub fn client_email(&self) -> &str {
        &self.credential.client_email
    }

    /// A session whose token is good for at least another minute.
    pub async fn session(&self) -> Result<Arc<Session>, ProviderError> {
        let mut current = self.current.lock().await;
        if current.expires_within(Duration::seconds(REFRESH_MARGIN_SECS)) {
            info!("🔄 Access token for {} expiring, refreshing", self.credential.client_email);
            let fresh = tokio::time::timeout(
                self.refresh_timeout,
                self.auth.authenticate(&self.credential),
            )
            .await
            .map_err(|_| {
                ProviderError::Transport(format!(
                    "token refresh timed out after {:?}",
                    self.refresh_timeout
                ))
            })??;
            debug!("Refreshed session valid until {}", fresh.expires_at);
            *current = Arc::new(fresh);
        }
        Ok(Arc::clone(&current))
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("client_email", &self.credential.client_email)
            .field("project_id", &self.credential.project_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// [`AuthProvider`] using the OAuth2 JWT-bearer grant.
#[derive(Debug, Clone)]
pub struct GoogleAuthProvider {
    http: reqwest::Client,
    token_uri: Option<String>,
}

impl Default for GoogleAuthProvider {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl GoogleAuthProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            token_uri: None,
        }
    }

    /// Send token requests somewhere other than the credential's token URI.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = Some(token_uri.into());
        self
    }

    /// Sign the assertion JWT for `credential`.
    pub fn sign_assertion(
        &self,
        credential: &ServiceAccountCredential,
        now: DateTime<Utc>,
    ) -> Result<String, ProviderError> {
        let key = EncodingKey::from_rsa_pem(credential.private_key().expose_secret().as_bytes())
            .map_err(|e| ProviderError::MalformedSecret(format!("cannot parse private key: {e}")))?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(credential.private_key_id.clone());

        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &credential.client_email,
            scope: DATASTORE_SCOPE,
            aud: self.token_uri(credential),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };

        encode(&header, &claims, &key)
            .map_err(|e| ProviderError::MalformedSecret(format!("cannot sign assertion: {e}")))
    }

    fn token_uri<'a>(&'a self, credential: &'a ServiceAccountCredential) -> &'a str {
        self.token_uri.as_deref().unwrap_or(credential.token_uri)
    }
}

#[async_trait]
impl AuthProvider for GoogleAuthProvider {
    async fn authenticate(
        &self,
        credential: &ServiceAccountCredential,
    ) -> Result<Session, ProviderError> {
        let now = Utc::now();
        let assertion = self.sign_assertion(credential, now)?;
        let token_uri = self.token_uri(credential);

        debug!("Requesting access token from {}", token_uri);

        let response = self
            .http
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("token request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let reason = match response.json::<TokenErrorResponse>().await {
                Ok(body) => body.error_description.unwrap_or(body.error),
                Err(_) => status.to_string(),
            };
            return Err(ProviderError::Rejected(reason));
        }
        if !status.is_success() {
            return Err(ProviderError::Transport(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("unexpected token response: {e}")))?;

        Ok(Session::new(
            credential.project_id.clone(),
            credential.client_email.clone(),
            token.access_token,
            now + Duration::seconds(token.expires_in.clamp(0, 86_400)),
        ))
    }
}
