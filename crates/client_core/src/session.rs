//! Session Store: the single owner of the current identity.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::Identity;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    services::AuthProvider,
    view::{AuthState, SharedView},
    DashboardEvent,
};

/// What a published identity means relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(Identity),
    SignedOut,
    /// Same subject, new token or profile data.
    Refreshed(Identity),
}

/// Registered once at startup and kept for the life of the process.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_session_change(&self, change: &SessionChange, epoch: u64);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    /// Bumped on every sign-in and sign-out.
    pub epoch: u64,
}

pub struct SessionStore {
    auth: Option<Arc<dyn AuthProvider>>,
    view: SharedView,
    events: broadcast::Sender<DashboardEvent>,
    current: RwLock<SessionSnapshot>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
    publish_lock: Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStore {
    pub fn new(
        auth: Option<Arc<dyn AuthProvider>>,
        view: SharedView,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth,
            view,
            events,
            current: RwLock::new(SessionSnapshot::default()),
            observers: RwLock::new(Vec::new()),
            publish_lock: Mutex::new(()),
            listener: Mutex::new(None),
        })
    }

    pub async fn register(&self, observer: Arc<dyn SessionObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.current.read().await.identity.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.current.read().await.clone()
    }

    pub async fn is_current(&self, epoch: u64) -> bool {
        self.current.read().await.epoch == epoch
    }

    /// Recovers any existing session, then follows the provider's change
    /// notifications. A failed recovery leaves the user signed out.
    pub async fn initialize(self: &Arc<Self>) {
        let Some(auth) = self.auth.clone() else {
            warn!("session: service configuration is missing; staying signed out");
            self.publish(None).await;
            return;
        };

        let mut changes = auth.subscribe();
        let recovered = match auth.current_session().await {
            Ok(identity) => identity,
            Err(err) => {
                error!("session: failed to fetch session: {err}");
                None
            }
        };
        self.publish(recovered).await;

        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(kind = ?change.kind, "session: auth change received");
                        store.publish(change.identity).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: missed auth changes; re-reading session");
                        let identity = match auth.current_session().await {
                            Ok(identity) => identity,
                            Err(err) => {
                                error!("session: failed to fetch session: {err}");
                                None
                            }
                        };
                        store.publish(identity).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let previous = self.listener.lock().await.replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Replaces the current identity, renders the auth attribute and notifies
    /// observers of any transition.
    pub async fn publish(&self, identity: Option<Identity>) {
        let _serialized = self.publish_lock.lock().await;

        let (change, epoch) = {
            let mut current = self.current.write().await;
            let change = match (&current.identity, &identity) {
                (None, None) => None,
                (Some(_), None) => Some(SessionChange::SignedOut),
                (Some(previous), Some(next)) if previous.user_id == next.user_id => {
                    Some(SessionChange::Refreshed(next.clone()))
                }
                (_, Some(next)) => Some(SessionChange::SignedIn(next.clone())),
            };
            if matches!(
                change,
                Some(SessionChange::SignedIn(_)) | Some(SessionChange::SignedOut)
            ) {
                current.epoch += 1;
            }
            current.identity = identity.clone();
            (change, current.epoch)
        };

        let state = if identity.is_some() {
            AuthState::SignedIn
        } else {
            AuthState::SignedOut
        };
        let email = identity.as_ref().and_then(|identity| identity.email.clone());
        {
            let mut view = self.view.write().await;
            view.auth_state = state;
            view.email = email.clone();
        }
        let _ = self
            .events
            .send(DashboardEvent::AuthStateChanged { state, email });

        let Some(change) = change else {
            return;
        };
        match &change {
            SessionChange::SignedIn(identity) => {
                info!(user_id = %identity.user_id, epoch, "session: signed in");
            }
            SessionChange::SignedOut => info!(epoch, "session: signed out"),
            SessionChange::Refreshed(identity) => {
                debug!(user_id = %identity.user_id, "session: refreshed");
            }
        }

        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_session_change(&change, epoch).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
