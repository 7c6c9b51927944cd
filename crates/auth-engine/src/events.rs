//! Auth state change notifications.
//!
//! Every listener gets its own unbounded queue and delivery task. The task
//! first resolves the listener's initial-session future and delivers
//! `INITIAL_SESSION`, then drains whatever was emitted meanwhile, in order.

use crate::session::Session;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Kind of session change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthChangeEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthChangeEvent::InitialSession => "INITIAL_SESSION",
            AuthChangeEvent::SignedIn => "SIGNED_IN",
            AuthChangeEvent::SignedOut => "SIGNED_OUT",
            AuthChangeEvent::TokenRefreshed => "TOKEN_REFRESHED",
            AuthChangeEvent::UserUpdated => "USER_UPDATED",
            AuthChangeEvent::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

impl fmt::Display for AuthChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Delivery = (AuthChangeEvent, Option<Session>);

struct Registration {
    sender: mpsc::UnboundedSender<Delivery>,
    active: Arc<AtomicBool>,
}

type Registry = Mutex<HashMap<u64, Registration>>;

/// Fan-out of auth events to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` and start its delivery task.
    ///
    /// The listener is registered before this returns, so no event emitted
    /// afterwards is missed. `initial` produces the session reported with
    /// `INITIAL_SESSION`. Must be called from within a Tokio runtime.
    pub fn subscribe<L, F>(&self, listener: L, initial: F) -> ListenerHandle
    where
        L: Fn(AuthChangeEvent, Option<Session>) + Send + Sync + 'static,
        F: Future<Output = Option<Session>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Delivery>();
        let active = Arc::new(AtomicBool::new(true));

        self.listeners.lock().insert(
            id,
            Registration {
                sender,
                active: active.clone(),
            },
        );
        debug!(listener_id = id, "Auth listener registered");

        let task_active = active.clone();
        tokio::spawn(async move {
            let session = initial.await;
            if !task_active.load(Ordering::Acquire) {
                return;
            }
            listener(AuthChangeEvent::InitialSession, session);

            while let Some((event, session)) = receiver.recv().await {
                if !task_active.load(Ordering::Acquire) {
                    break;
                }
                listener(event, session);
            }
            trace!(listener_id = id, "Auth listener delivery finished");
        });

        ListenerHandle {
            id,
            active,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Queue `event` for every registered listener. Never waits for delivery.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|_, registration| {
            registration.sender.send((event, session.clone())).is_ok()
        });
        debug!(event = %event, listeners = listeners.len(), "Auth event emitted");
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Subscription handle returned by [`EventEmitter::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`ListenerHandle::remove`] to stop delivery.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister the listener. Safe to call from inside the listener and
    /// more than once. Events already handed to the delivery task are dropped.
    pub fn remove(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            if registry.lock().remove(&self.id).is_some() {
                debug!(listener_id = self.id, "Auth listener removed");
            }
        }
    }
}
