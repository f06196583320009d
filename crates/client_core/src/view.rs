//! Owned render state for the dashboard.
//!
//! Every component mutates this through the shared [`SharedView`] handle;
//! front ends read it with [`crate::StudentDashboard::view_snapshot`] and
//! re-render from scratch, so each update must leave a complete picture.

use std::{fmt, sync::Arc};

use shared::{
    domain::AssignmentId,
    protocol::{Assignment, Feedback, Submission},
};
use tokio::sync::RwLock;

use crate::services::FileUpload;

pub type SharedView = Arc<RwLock<DashboardView>>;

pub const ASSIGNMENT_PLACEHOLDER: &str = "Select an assignment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    SignedOut,
    SignedIn,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignedOut => "signed-out",
            Self::SignedIn => "signed-in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Assignments,
    Submissions,
    Feedback,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Assignments, Self::Submissions, Self::Feedback];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Assignments => "assignments",
            Self::Submissions => "submissions",
            Self::Feedback => "feedback",
        }
    }

    pub fn empty_message(&self) -> &'static str {
        match self {
            Self::Assignments => "No assignments yet.",
            Self::Submissions => "No submissions yet.",
            Self::Feedback => "No feedback yet.",
        }
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            Self::Assignments => "Could not load assignments.",
            Self::Submissions => "Could not load submissions.",
            Self::Feedback => "Could not load feedback.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Loading,
    Synced,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Loading => "loading…",
            Self::Synced => "synced",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionView<T> {
    pub status: SyncStatus,
    pub items: Vec<T>,
    /// Visible empty-state marker and its text; `None` when hidden.
    pub empty_state: Option<String>,
}

impl<T> Default for CollectionView<T> {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            items: Vec::new(),
            empty_state: None,
        }
    }
}

impl<T> CollectionView<T> {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn apply_loaded(&mut self, collection: Collection, items: Vec<T>) {
        self.empty_state = items
            .is_empty()
            .then(|| collection.empty_message().to_string());
        self.items = items;
        self.status = SyncStatus::Synced;
    }

    /// The last good render survives a failed refresh.
    pub(crate) fn apply_failure(&mut self, collection: Collection) {
        self.status = SyncStatus::Error;
        self.empty_state = Some(collection.failure_message().to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: Option<AssignmentId>,
    pub label: String,
}

impl SelectOption {
    pub fn placeholder() -> Self {
        Self {
            value: None,
            label: ASSIGNMENT_PLACEHOLDER.to_string(),
        }
    }

    pub fn for_assignment(assignment: &Assignment) -> Self {
        let label = match assignment.due_date {
            Some(due) => format!("{} (due {})", assignment.title, due.format("%Y-%m-%d")),
            None => assignment.title.clone(),
        };
        Self {
            value: Some(assignment.id),
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub tone: Tone,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Info,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Success,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthModalState {
    #[default]
    Closed,
    OpenIdle,
    Submitting,
    OpenResult(ResultKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Success,
    Error,
}

impl AuthModalState {
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthModalView {
    pub state: AuthModalState,
    pub email_input: String,
    pub submit_enabled: bool,
    pub message: Option<StatusMessage>,
}

impl Default for AuthModalView {
    fn default() -> Self {
        Self {
            state: AuthModalState::Closed,
            email_input: String::new(),
            submit_enabled: true,
            message: None,
        }
    }
}

/// Current contents of the submission form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmissionForm {
    pub assignment_id: Option<AssignmentId>,
    pub draft: Option<FileUpload>,
    pub transcript: Option<FileUpload>,
    pub reflection: Option<String>,
    pub time_spent_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormStatus {
    MissingFields,
    NotConnected,
    Uploading,
    Saved,
    Error(String),
}

impl fmt::Display for FormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFields => f.write_str("Please choose an assignment and attach a draft."),
            Self::NotConnected => f.write_str("Not connected."),
            Self::Uploading => f.write_str("Uploading…"),
            Self::Saved => f.write_str("Saved!"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionFormView {
    pub fields: SubmissionForm,
    pub assignment_options: Vec<SelectOption>,
    pub submit_enabled: bool,
    pub status: Option<FormStatus>,
}

impl Default for SubmissionFormView {
    fn default() -> Self {
        Self {
            fields: SubmissionForm::default(),
            assignment_options: vec![SelectOption::placeholder()],
            submit_enabled: true,
            status: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestStatus {
    NotConnected,
    Requesting,
    DigestReady,
    SignedUrlReady,
    Error,
    Copied,
    CopyFailed,
}

impl fmt::Display for DigestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotConnected => "Not connected.",
            Self::Requesting => "Requesting…",
            Self::DigestReady => "Digest ready",
            Self::SignedUrlReady => "Signed URL ready",
            Self::Error => "Error",
            Self::Copied => "Copied",
            Self::CopyFailed => "Copy failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DigestPanel {
    pub output: String,
    pub status: Option<DigestStatus>,
    pub copy_enabled: bool,
    last_signed_url: Option<String>,
}

impl DigestPanel {
    pub fn last_signed_url(&self) -> Option<&str> {
        self.last_signed_url.as_deref()
    }

    /// The link a copy should write, present only while copy is enabled.
    pub fn copyable_url(&self) -> Option<&str> {
        self.last_signed_url().filter(|_| self.copy_enabled)
    }

    pub(crate) fn begin_request(&mut self) {
        self.output.clear();
        self.copy_enabled = false;
        self.last_signed_url = None;
        self.status = Some(DigestStatus::Requesting);
    }

    pub(crate) fn retain_signed_url(&mut self, url: Option<String>) {
        self.copy_enabled = url.is_some();
        self.last_signed_url = url;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub auth_state: AuthState,
    pub email: Option<String>,
    pub auth_modal: AuthModalView,
    pub sign_out_enabled: bool,
    pub assignments: CollectionView<Assignment>,
    pub submissions: CollectionView<Submission>,
    pub feedback: CollectionView<Feedback>,
    pub submission_form: SubmissionFormView,
    pub digest: DigestPanel,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            auth_state: AuthState::SignedOut,
            email: None,
            auth_modal: AuthModalView::default(),
            sign_out_enabled: true,
            assignments: CollectionView::default(),
            submissions: CollectionView::default(),
            feedback: CollectionView::default(),
            submission_form: SubmissionFormView::default(),
            digest: DigestPanel::default(),
        }
    }
}

impl DashboardView {
    pub fn shared() -> SharedView {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn status_of(&self, collection: Collection) -> SyncStatus {
        match collection {
            Collection::Assignments => self.assignments.status,
            Collection::Submissions => self.submissions.status,
            Collection::Feedback => self.feedback.status,
        }
    }

    pub(crate) fn set_loading(&mut self, collection: Collection) {
        match collection {
            Collection::Assignments => self.assignments.status = SyncStatus::Loading,
            Collection::Submissions => self.submissions.status = SyncStatus::Loading,
            Collection::Feedback => self.feedback.status = SyncStatus::Loading,
        }
    }

    pub(crate) fn apply_failure(&mut self, collection: Collection) {
        match collection {
            Collection::Assignments => self.assignments.apply_failure(collection),
            Collection::Submissions => self.submissions.apply_failure(collection),
            Collection::Feedback => self.feedback.apply_failure(collection),
        }
    }

    /// Signed-out configuration: empty lists, hidden markers, idle statuses,
    /// placeholder-only options and no digest.
    pub fn reset_for_sign_out(&mut self) {
        self.assignments.reset();
        self.submissions.reset();
        self.feedback.reset();
        self.submission_form.assignment_options = vec![SelectOption::placeholder()];
        self.digest.reset();
    }
}
