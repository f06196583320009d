//! Dashboard Synchronizer: the three collection loaders and the sign-out reset.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::Identity,
    error::{ErrorCode, RemoteError},
    protocol::{ASSIGNMENTS_TABLE, FEEDBACK_TABLE, SUBMISSIONS_TABLE},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::{
    error::{ClientError, ClientResult},
    services::{RecordQuery, RecordStore, RemoteResult, SortDirection},
    session::{SessionChange, SessionObserver, SessionStore},
    view::{Collection, DashboardView, SelectOption, SharedView, SyncStatus},
    DashboardEvent,
};

/// Row cap for the submissions and feedback lists.
pub const RECENT_LIMIT: usize = 10;

const OWNER_COLUMN: &str = "student_id";

pub struct DashboardSynchronizer {
    session: Arc<SessionStore>,
    records: Option<Arc<dyn RecordStore>>,
    view: SharedView,
    events: broadcast::Sender<DashboardEvent>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DashboardSynchronizer {
    pub fn new(
        session: Arc<SessionStore>,
        records: Option<Arc<dyn RecordStore>>,
        view: SharedView,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            records,
            view,
            events,
            pending: Mutex::new(None),
        })
    }

    pub fn query_for(collection: Collection, identity: &Identity) -> RecordQuery {
        match collection {
            Collection::Assignments => RecordQuery::table(ASSIGNMENTS_TABLE)
                .order("due_date", SortDirection::Ascending),
            Collection::Submissions => RecordQuery::table(SUBMISSIONS_TABLE)
                .eq(OWNER_COLUMN, identity.user_id)
                .order("submitted_at", SortDirection::Descending)
                .limit(RECENT_LIMIT),
            Collection::Feedback => RecordQuery::table(FEEDBACK_TABLE)
                .eq(OWNER_COLUMN, identity.user_id)
                .order("created_at", SortDirection::Descending)
                .limit(RECENT_LIMIT),
        }
    }

    /// Runs all three loaders concurrently; each settles on its own.
    pub async fn load_all(&self) {
        let _ = tokio::join!(
            self.load_assignments(),
            self.load_submissions(),
            self.load_feedback()
        );
    }

    /// Re-fetches the collections a new submission can change.
    pub async fn refresh_after_submission(&self) {
        let _ = tokio::join!(self.load_submissions(), self.load_feedback());
    }

    pub async fn load_assignments(&self) -> ClientResult<()> {
        self.load(Collection::Assignments, |view, assignments| {
            let mut options = vec![SelectOption::placeholder()];
            options.extend(assignments.iter().map(SelectOption::for_assignment));
            view.submission_form.assignment_options = options;
            view.assignments.apply_loaded(Collection::Assignments, assignments);
        })
        .await
    }

    pub async fn load_submissions(&self) -> ClientResult<()> {
        self.load(Collection::Submissions, |view, submissions| {
            view.submissions.apply_loaded(Collection::Submissions, submissions);
        })
        .await
    }

    pub async fn load_feedback(&self) -> ClientResult<()> {
        self.load(Collection::Feedback, |view, feedback| {
            view.feedback.apply_loaded(Collection::Feedback, feedback);
        })
        .await
    }

    async fn load<T, F>(&self, collection: Collection, render: F) -> ClientResult<()>
    where
        T: DeserializeOwned,
        F: FnOnce(&mut DashboardView, Vec<T>),
    {
        let snapshot = self.session.snapshot().await;
        let Some(identity) = snapshot.identity else {
            debug!(collection = collection.name(), "sync: skipping load without identity");
            return Err(ClientError::NotConnected);
        };
        let Some(records) = self.records.clone() else {
            return Err(ClientError::not_configured());
        };

        self.view.write().await.set_loading(collection);

        let query = Self::query_for(collection, &identity);
        let result = records.select(&query).await.and_then(decode_rows::<T>);

        if !self.session.is_current(snapshot.epoch).await {
            debug!(
                collection = collection.name(),
                epoch = snapshot.epoch,
                "sync: dropping response from a previous session"
            );
            return Ok(());
        }

        let outcome = {
            let mut view = self.view.write().await;
            match result {
                Ok(rows) => {
                    debug!(collection = collection.name(), rows = rows.len(), "sync: loaded");
                    render(&mut view, rows);
                    Ok(())
                }
                Err(err) => {
                    error!(collection = collection.name(), "sync: failed to load: {err}");
                    view.apply_failure(collection);
                    Err(ClientError::Remote(err))
                }
            }
        };

        let status = if outcome.is_ok() {
            SyncStatus::Synced
        } else {
            SyncStatus::Error
        };
        let _ = self
            .events
            .send(DashboardEvent::CollectionSettled { collection, status });
        outcome
    }

    /// Back to the signed-out configuration.
    pub async fn reset(&self) {
        self.view.write().await.reset_for_sign_out();
        info!("sync: dashboard reset");
        let _ = self.events.send(DashboardEvent::Reset);
    }

    /// Waits for the most recent session-triggered load to finish.
    pub async fn settled(&self) {
        let handle = self.pending.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> RemoteResult<Vec<T>> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|err| RemoteError::new(ErrorCode::Decode, format!("unexpected row shape: {err}")))
}

#[async_trait]
impl SessionObserver for Arc<DashboardSynchronizer> {
    async fn on_session_change(&self, change: &SessionChange, _epoch: u64) {
        match change {
            SessionChange::SignedIn(_) => {
                let sync = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    sync.load_all().await;
                });
                *self.pending.lock().await = Some(handle);
            }
            SessionChange::SignedOut => self.reset().await,
            SessionChange::Refreshed(_) => {}
        }
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
