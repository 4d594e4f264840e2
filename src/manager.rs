// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared Firebase connection.
//!
//! [`ConnectionManager`] turns configuration into exactly one authenticated
//! document store client and hands clones of the same `Arc` to every caller.
//! Construct one at startup and pass it (usually behind an `Arc`) to whatever
//! needs the store.
//!
//! Concurrent first callers share a single attempt: one of them runs the
//! sequence and the rest wait on a watch channel for its outcome, success or
//! error. A failed attempt is cleared once published, so a later call starts
//! a fresh one.

use crate::auth::{AuthProvider, TokenSource};
use crate::config::{ConfigSource, ConnectionConfig, Settings};
use crate::credential::ServiceAccountCredential;
use crate::error::{InitError, Phase};
use crate::store::DocumentStore;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, error, info, warn};

/// Published result of an in-flight attempt. `None` while it is running.
type Outcome = Option<Result<(), InitError>>;

static PROCESS_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Marks the one Firebase-wired manager allowed per process.
///
/// Released on drop, so a manager can be rebuilt after the previous one is gone.
#[derive(Debug)]
pub(crate) struct ProcessClaim(());

impl ProcessClaim {
    pub(crate) fn acquire() -> Option<Self> {
        PROCESS_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(()))
    }
}

impl Drop for ProcessClaim {
    fn drop(&mut self) {
        PROCESS_CLAIMED.store(false, Ordering::Release);
    }
}

struct Connected<C> {
    config: Arc<ConnectionConfig>,
    tokens: Arc<TokenSource>,
    client: Arc<C>,
}

enum Role {
    Leader(watch::Sender<Outcome>),
    Follower(watch::Receiver<Outcome>),
}

/// Clears the in-flight slot when the leading attempt finishes or is dropped.
struct ClearAttempt<'a>(&'a Mutex<Option<watch::Receiver<Outcome>>>);

impl Drop for ClearAttempt<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the one shared document store client.
///
/// `new` is the injection seam for custom providers and places no limit on
/// how many managers exist. The Firebase-wired constructor
/// (`FirebaseManager::with_settings`) holds a process-wide claim and refuses
/// to build a second live manager.
pub struct ConnectionManager<A, D: DocumentStore> {
    source: ConfigSource,
    settings: Settings,
    auth: Arc<A>,
    store: D,
    state: OnceCell<Connected<D::Client>>,
    attempt: Mutex<Option<watch::Receiver<Outcome>>>,
    _claim: Option<ProcessClaim>,
}

impl<A, D> ConnectionManager<A, D>
where
    A: AuthProvider + 'static,
    D: DocumentStore,
{
    pub fn new(source: ConfigSource, settings: Settings, auth: A, store: D) -> Self {
        Self {
            source,
            settings,
            auth: Arc::new(auth),
            store,
            state: OnceCell::new(),
            attempt: Mutex::new(None),
            _claim: None,
        }
    }

    pub(crate) fn with_claim(mut self, claim: ProcessClaim) -> Self {
        self._claim = Some(claim);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Run the initialization sequence if it has not completed yet.
    ///
    /// Calling this again after success only logs a warning.
    pub async fn initialize(&self) -> Result<(), InitError> {
        if self.is_initialized() {
            warn!("Firebase connection already initialized, ignoring repeated initialize");
            return Ok(());
        }
        self.connected().await?;
        Ok(())
    }

    /// The shared client, initializing on first use.
    pub async fn connection(&self) -> Result<Arc<D::Client>, InitError> {
        let connected = self.connected().await?;
        Ok(Arc::clone(&connected.client))
    }

    /// Like [`connection`](Self::connection), but goes through
    /// [`initialize`](Self::initialize) and checks the cached state afterwards.
    pub async fn active_connection(&self) -> Result<Arc<D::Client>, InitError> {
        if !self.is_initialized() {
            self.initialize().await?;
        }
        self.state
            .get()
            .map(|connected| Arc::clone(&connected.client))
            .ok_or_else(unavailable)
    }

    /// Configuration the live connection was built from.
    pub fn config(&self) -> Option<Arc<ConnectionConfig>> {
        self.state.get().map(|c| Arc::clone(&c.config))
    }

    /// Token source shared with the live client.
    pub fn tokens(&self) -> Option<Arc<TokenSource>> {
        self.state.get().map(|c| Arc::clone(&c.tokens))
    }

    /// Drop the cached connection so the next call initializes again.
    ///
    /// Handles already given out stay valid until their holders drop them.
    pub fn reset(&mut self) {
        *self
            .attempt
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if self.state.take().is_some() {
            info!("Firebase connection reset");
        }
    }

    async fn connected(&self) -> Result<&Connected<D::Client>, InitError> {
        loop {
            if let Some(connected) = self.state.get() {
                return Ok(connected);
            }

            let role = {
                let mut slot = lock(&self.attempt);
                if let Some(connected) = self.state.get() {
                    return Ok(connected);
                }
                match slot.as_ref() {
                    Some(rx) => Role::Follower(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Some(rx);
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => return self.lead(tx).await,
                Role::Follower(mut rx) => {
                    let published = rx.wait_for(Option::is_some).await.map(|o| o.clone());
                    let outcome = match published {
                        Ok(outcome) => outcome,
                        // leader was dropped mid-attempt; start over
                        Err(_) => continue,
                    };
                    if let Some(Err(e)) = outcome {
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn lead(&self, tx: watch::Sender<Outcome>) -> Result<&Connected<D::Client>, InitError> {
        let _clear = ClearAttempt(&self.attempt);

        let result = match self.open().await {
            Ok(connected) => self
                .state
                .set(connected)
                .map_err(|_| InitError::new(Phase::Handle, "connection state already set")),
            Err(e) => Err(e),
        };
        tx.send_replace(Some(result.clone()));
        result?;

        self.state.get().ok_or_else(unavailable)
    }

    async fn open(&self) -> Result<Connected<D::Client>, InitError> {
        info!("🔐 Initializing Firebase connection...");

        let result = self.open_inner().await;
        match &result {
            Ok(connected) => info!(
                "✅ Connected to Firebase project {} as {}",
                connected.config.project_id,
                connected.tokens.client_email()
            ),
            Err(e) => error!("❌ Firebase initialization failed: {}", e),
        }
        result
    }

    async fn open_inner(&self) -> Result<Connected<D::Client>, InitError> {
        let config = ConnectionConfig::load(&self.source)?;
        debug!("Loaded configuration for project {}", config.project_id);

        let credential = Arc::new(ServiceAccountCredential::from_config(&config)?);
        debug!("Built credential for {}", credential.client_email);

        let timeout = self.settings.connect_timeout;

        let session = bounded(Phase::Authentication, timeout, self.auth.authenticate(&credential))
            .await?
            .map_err(|e| e.into_init(Phase::Authentication))?;
        debug!("Session valid until {}", session.expires_at);

        let auth: Arc<dyn AuthProvider> = self.auth.clone();
        let tokens = Arc::new(TokenSource::new(
            auth,
            credential,
            Arc::new(session),
            timeout,
        ));

        let client = bounded(Phase::Connection, timeout, self.store.connect(Arc::clone(&tokens)))
            .await?
            .map_err(|e| e.into_init(Phase::Connection))?;

        Ok(Connected {
            config: Arc::new(config),
            tokens,
            client: Arc::new(client),
        })
    }
}

fn unavailable() -> InitError {
    InitError::new(
        Phase::Handle,
        "connection handle unavailable after initialization",
    )
}

async fn bounded<F: Future>(phase: Phase, limit: Duration, fut: F) -> Result<F::Output, InitError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| InitError::new(phase, format!("timed out after {:?}", limit)))
}
