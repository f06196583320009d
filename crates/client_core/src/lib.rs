use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast;
use tracing::{info, warn};

pub mod auth_flow;
pub mod config;
pub mod digest;
pub mod error;
pub mod http_backend;
pub mod services;
pub mod session;
mod session_file;
pub mod submission;
pub mod sync;
pub mod view;

#[cfg(test)]
mod test_support;

pub use auth_flow::{AuthFlowController, Key};
pub use digest::{CopyOutcome, DigestRequester};
pub use error::{ClientError, ClientResult};
pub use http_backend::HttpBackend;
pub use services::{
    AuthChange, AuthChangeKind, AuthProvider, BlobStore, Clipboard, FileUpload, FunctionInvoker,
    MissingClipboard, RecordQuery, RecordStore, Services, SortDirection, UploadOptions,
};
pub use session::{SessionChange, SessionObserver, SessionSnapshot, SessionStore};
pub use session_file::StoredSession;
pub use submission::SubmissionOrchestrator;
pub use sync::DashboardSynchronizer;
pub use view::{
    AuthModalState, AuthState, Collection, DashboardView, DigestStatus, FormStatus, SharedView,
    SubmissionForm, SyncStatus,
};

use config::DEFAULT_DIGEST_FUNCTION;

#[derive(Debug, Clone)]
pub enum DashboardEvent {
    AuthStateChanged {
        state: AuthState,
        email: Option<String>,
    },
    AuthModalChanged(AuthModalState),
    CollectionSettled {
        collection: Collection,
        status: SyncStatus,
    },
    SubmissionStatusChanged(FormStatus),
    DigestStatusChanged(DigestStatus),
    Reset,
}

/// The student dashboard: one session store driving the synchronizer, plus
/// the user-invoked auth, submission and digest actions.
pub struct StudentDashboard {
    configured: bool,
    view: SharedView,
    events: broadcast::Sender<DashboardEvent>,
    session: Arc<SessionStore>,
    auth_flow: Arc<AuthFlowController>,
    sync: Arc<DashboardSynchronizer>,
    submissions: SubmissionOrchestrator,
    digest: DigestRequester,
    started: AtomicBool,
}

impl StudentDashboard {
    pub fn new(services: Option<Services>) -> Arc<Self> {
        Self::with_clipboard(services, Arc::new(MissingClipboard))
    }

    pub fn with_clipboard(services: Option<Services>, clipboard: Arc<dyn Clipboard>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let view = DashboardView::shared();
        let configured = services.is_some();

        let auth = services.as_ref().map(|s| Arc::clone(&s.auth));
        let records = services.as_ref().map(|s| Arc::clone(&s.records));
        let blobs = services.as_ref().map(|s| Arc::clone(&s.blobs));
        let functions = services.as_ref().map(|s| Arc::clone(&s.functions));
        let digest_function = services
            .as_ref()
            .map(|s| s.digest_function.clone())
            .unwrap_or_else(|| DEFAULT_DIGEST_FUNCTION.to_string());

        let session = SessionStore::new(auth.clone(), Arc::clone(&view), events.clone());
        let auth_flow = AuthFlowController::new(auth, Arc::clone(&view), events.clone());
        let sync = DashboardSynchronizer::new(
            Arc::clone(&session),
            records.clone(),
            Arc::clone(&view),
            events.clone(),
        );
        let submissions = SubmissionOrchestrator::new(
            Arc::clone(&session),
            blobs,
            records,
            Arc::clone(&sync),
            Arc::clone(&view),
            events.clone(),
        );
        let digest = DigestRequester::new(
            Arc::clone(&session),
            functions,
            digest_function,
            clipboard,
            Arc::clone(&view),
            events.clone(),
        );

        Arc::new(Self {
            configured,
            view,
            events,
            session,
            auth_flow,
            sync,
            submissions,
            digest,
            started: AtomicBool::new(false),
        })
    }

    /// Registers the synchronizer with the session store and recovers any
    /// existing session. Later calls are no-ops.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.configured {
            warn!(
                "service configuration is missing; set WRITERCOACH_SERVICE_URL and \
                 WRITERCOACH_SERVICE_ANON_KEY or create writercoach.toml"
            );
        }
        self.session.register(Arc::new(Arc::clone(&self.sync))).await;
        self.session.initialize().await;
        info!(configured = self.configured, "dashboard: started");
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub async fn view_snapshot(&self) -> DashboardView {
        self.view.read().await.clone()
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn auth_flow(&self) -> &Arc<AuthFlowController> {
        &self.auth_flow
    }

    pub fn sync(&self) -> &Arc<DashboardSynchronizer> {
        &self.sync
    }

    pub fn submissions(&self) -> &SubmissionOrchestrator {
        &self.submissions
    }

    pub fn digest(&self) -> &DigestRequester {
        &self.digest
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
