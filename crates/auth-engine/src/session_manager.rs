//! Cached session ownership, persistence and single-flight refresh.
//!
//! One `tokio::sync::Mutex` serializes the cached record and the in-flight
//! refresh handle. A refresh runs on its own spawned task and is shared by
//! every caller that asks for a session while it is running, so the remote
//! authority sees one refresh request no matter how many callers wait, and a
//! caller that gives up never cancels it.
//!
//! Every `update` and `remove` advances a generation counter. A refresh
//! carries the generation it started under and its write is dropped once
//! that generation is gone, so a late refresh cannot resurrect a session
//! that was signed out or replaced meanwhile.

use crate::session::{Session, StoredSession};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use auth_storage::SecureStorage;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Performs the actual token refresh for the manager.
///
/// Implementations persist the new session through
/// [`SessionManager::update_if_current`] (or clear it through
/// [`SessionManager::remove_if_current`]) before returning.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh_session(
        &self,
        refresh_token: &str,
        generation: SessionGeneration,
    ) -> AuthResult<Session>;
}

/// Version of the held session a refresh started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionGeneration(u64);

type RefreshFlight = Shared<BoxFuture<'static, AuthResult<Session>>>;

/// Observable state of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing cached or stored.
    NoSession,
    /// A session is held. It may be past its expiry until the next
    /// validated read refreshes it.
    ValidSession,
    /// A refresh is running; validated reads join it.
    RefreshInFlight,
}

#[derive(Default)]
struct ManagerState {
    cached: Option<StoredSession>,
    in_flight: Option<(u64, RefreshFlight)>,
    generation: u64,
    flights: u64,
}

impl ManagerState {
    /// The held session changed: later reads must not join the old flight.
    fn advance(&mut self) {
        self.generation += 1;
        self.in_flight = None;
    }
}

struct Inner {
    storage: Arc<dyn SecureStorage>,
    storage_key: String,
    refresher: Weak<dyn SessionRefresher>,
    state: Mutex<ManagerState>,
}

/// Owner of the in-memory session and its persisted mirror.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("storage_key", &self.inner.storage_key)
            .finish_non_exhaustive()
    }
}

/// Run a storage call on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> AuthResult<T>
where
    F: FnOnce() -> AuthResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(format!("storage task failed: {}", e)))?
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn SecureStorage>,
        storage_key: impl Into<String>,
        refresher: Weak<dyn SessionRefresher>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                storage_key: storage_key.into(),
                refresher,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    /// The current session.
    ///
    /// With `validate_expiration`, a session inside the expiry margin is
    /// refreshed first (joining a refresh that is already running).
    /// Without it, the stored session is returned as is.
    pub async fn session(&self, validate_expiration: bool) -> AuthResult<Session> {
        let flight = {
            let mut state = self.inner.state.lock().await;
            let stored = self
                .load_locked(&mut state)
                .await?
                .ok_or(AuthError::SessionNotFound)?;

            if !validate_expiration || stored.is_valid() {
                return Ok(stored.session);
            }

            debug!(
                expiration_date = stored.expiration_date,
                "Stored session expired, refreshing"
            );
            self.flight_locked(&mut state, stored.session.refresh_token)
        };

        flight.await
    }

    /// Refresh with `refresh_token`, or join the refresh already running.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<Session> {
        let flight = {
            let mut state = self.inner.state.lock().await;
            self.flight_locked(&mut state, refresh_token.to_string())
        };
        flight.await
    }

    /// Replace the session, persisting it before the cache changes.
    pub async fn update(&self, session: Session) -> AuthResult<()> {
        let mut state = self.inner.state.lock().await;
        self.store_locked(&mut state, session).await?;
        state.advance();
        Ok(())
    }

    /// Store a refreshed session unless the held session changed since
    /// `generation`. Returns whether it was stored.
    pub async fn update_if_current(
        &self,
        generation: SessionGeneration,
        session: Session,
    ) -> AuthResult<bool> {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation.0 {
            debug!(
                started = generation.0,
                current = state.generation,
                "Dropping refresh result for a replaced session"
            );
            return Ok(false);
        }
        self.store_locked(&mut state, session).await?;
        state.generation += 1;
        Ok(true)
    }

    /// Clear the cached and persisted session. Idempotent.
    pub async fn remove(&self) -> AuthResult<()> {
        let mut state = self.inner.state.lock().await;
        self.remove_locked(&mut state).await?;
        state.advance();
        Ok(())
    }

    /// Clear the session unless it changed since `generation`. Returns
    /// whether it was cleared.
    pub async fn remove_if_current(&self, generation: SessionGeneration) -> AuthResult<bool> {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation.0 {
            debug!(
                started = generation.0,
                current = state.generation,
                "Keeping session replaced during refresh"
            );
            return Ok(false);
        }
        self.remove_locked(&mut state).await?;
        state.generation += 1;
        Ok(true)
    }

    async fn store_locked(&self, state: &mut ManagerState, session: Session) -> AuthResult<()> {
        let stored = StoredSession::new(session);
        let bytes = serde_json::to_vec(&stored)?;

        let storage = self.inner.storage.clone();
        let key = self.inner.storage_key.clone();
        blocking(move || Ok(storage.set(&key, &bytes)?)).await?;

        debug!(
            user_id = %stored.session.user.id,
            expiration_date = stored.expiration_date,
            "Session stored"
        );
        state.cached = Some(stored);
        Ok(())
    }

    async fn remove_locked(&self, state: &mut ManagerState) -> AuthResult<()> {
        state.cached = None;

        let storage = self.inner.storage.clone();
        let key = self.inner.storage_key.clone();
        let removed = blocking(move || Ok(storage.remove(&key)?)).await?;
        if removed {
            info!("Session removed");
        }
        Ok(())
    }

    pub async fn state(&self) -> SessionState {
        let mut state = self.inner.state.lock().await;
        if state.in_flight.is_some() {
            return SessionState::RefreshInFlight;
        }
        match self.load_locked(&mut state).await {
            Ok(Some(_)) => SessionState::ValidSession,
            Ok(None) => SessionState::NoSession,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                SessionState::NoSession
            }
        }
    }

    /// Cached record, loading the persisted one when the cache is empty.
    async fn load_locked(&self, state: &mut ManagerState) -> AuthResult<Option<StoredSession>> {
        if let Some(stored) = &state.cached {
            return Ok(Some(stored.clone()));
        }

        let storage = self.inner.storage.clone();
        let key = self.inner.storage_key.clone();
        let loaded = blocking(move || {
            let Some(bytes) = storage.get(&key)? else {
                return Ok(None);
            };
            match serde_json::from_slice::<StoredSession>(&bytes) {
                Ok(stored) => Ok(Some(stored)),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable session record");
                    storage.remove(&key)?;
                    Ok(None)
                }
            }
        })
        .await?;

        if loaded.is_some() {
            debug!("Loaded session from storage");
        }
        state.cached = loaded.clone();
        Ok(loaded)
    }

    /// The running refresh, or a new one for `refresh_token`.
    fn flight_locked(&self, state: &mut ManagerState, refresh_token: String) -> RefreshFlight {
        if let Some((_, flight)) = &state.in_flight {
            debug!("Joining in-flight session refresh");
            return flight.clone();
        }

        state.flights += 1;
        let flight_id = state.flights;
        let generation = SessionGeneration(state.generation);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = match inner.refresher.upgrade() {
                Some(refresher) => refresher.refresh_session(&refresh_token, generation).await,
                None => Err(AuthError::ClientDropped),
            };
            let mut state = inner.state.lock().await;
            if matches!(&state.in_flight, Some((id, _)) if *id == flight_id) {
                state.in_flight = None;
            }
            result
        });

        let flight = async move {
            task.await
                .unwrap_or_else(|e| Err(AuthError::Internal(format!("refresh task failed: {}", e))))
        }
        .boxed()
        .shared();

        debug!(generation = generation.0, "Started session refresh");
        state.in_flight = Some((flight_id, flight.clone()));
        flight
    }
}
