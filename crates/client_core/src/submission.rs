//! Submission Orchestrator: uploads the draft and optional transcript, then
//! records one submission row pointing at them.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{AssignmentId, Identity, UserId, SUBMITTED_STATUS},
    error::{ErrorCode, RemoteError},
    protocol::{NewSubmission, SUBMISSIONS_TABLE},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ClientError, ClientResult, NOT_CONFIGURED_MESSAGE},
    services::{BlobStore, FileUpload, RecordStore, RemoteResult, UploadOptions},
    session::SessionStore,
    sync::DashboardSynchronizer,
    view::{FormStatus, SharedView, SubmissionForm},
    DashboardEvent,
};

pub const SAVE_FAILED_FALLBACK: &str = "Could not save your submission.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRole {
    Draft,
    Transcript,
}

impl UploadRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Transcript => "transcript",
        }
    }
}

/// `{user}/{role}-{millis}-{file}`; the timestamp keeps repeated uploads of
/// the same file name apart.
pub fn upload_path(user_id: UserId, role: UploadRole, millis: i64, file_name: &str) -> String {
    format!(
        "{user_id}/{}-{millis}-{}",
        role.prefix(),
        sanitize_file_name(file_name)
    )
}

fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

struct Storage {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

pub struct SubmissionOrchestrator {
    session: Arc<SessionStore>,
    storage: Option<Storage>,
    sync: Arc<DashboardSynchronizer>,
    view: SharedView,
    events: broadcast::Sender<DashboardEvent>,
}

impl SubmissionOrchestrator {
    pub fn new(
        session: Arc<SessionStore>,
        blobs: Option<Arc<dyn BlobStore>>,
        records: Option<Arc<dyn RecordStore>>,
        sync: Arc<DashboardSynchronizer>,
        view: SharedView,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Self {
        let storage = match (blobs, records) {
            (Some(blobs), Some(records)) => Some(Storage { blobs, records }),
            _ => None,
        };
        Self {
            session,
            storage,
            sync,
            view,
            events,
        }
    }

    pub async fn set_form(&self, form: SubmissionForm) {
        self.view.write().await.submission_form.fields = form;
    }

    /// Fills the form and submits it.
    pub async fn submit_form(&self, form: SubmissionForm) -> ClientResult<()> {
        self.set_form(form).await;
        self.submit().await
    }

    pub async fn submit(&self) -> ClientResult<()> {
        let form = self.view.read().await.submission_form.fields.clone();

        let Some(storage) = self.storage.as_ref() else {
            warn!("submission: {NOT_CONFIGURED_MESSAGE}");
            self.set_status(FormStatus::NotConnected).await;
            return Err(ClientError::not_configured());
        };

        let identity = self.session.identity().await;
        let (Some(identity), Some(assignment_id), Some(draft)) =
            (identity, form.assignment_id, form.draft.clone())
        else {
            debug!("submission: missing identity, assignment or draft");
            self.set_status(FormStatus::MissingFields).await;
            return Err(ClientError::Validation(FormStatus::MissingFields.to_string()));
        };

        self.view.write().await.submission_form.submit_enabled = false;
        self.set_status(FormStatus::Uploading).await;

        let outcome = self
            .upload_and_record(storage, &identity, assignment_id, draft, &form)
            .await;

        let outcome = match outcome {
            Ok(()) => {
                info!(assignment_id = %assignment_id, "submission: saved");
                self.set_status(FormStatus::Saved).await;
                self.view.write().await.submission_form.fields = SubmissionForm::default();
                self.sync.refresh_after_submission().await;
                Ok(())
            }
            Err(err) => {
                error!(assignment_id = %assignment_id, "submission: failed: {err}");
                self.set_status(FormStatus::Error(err.display_message(SAVE_FAILED_FALLBACK)))
                    .await;
                Err(ClientError::Remote(err))
            }
        };

        self.view.write().await.submission_form.submit_enabled = true;
        outcome
    }

    async fn upload_and_record(
        &self,
        storage: &Storage,
        identity: &Identity,
        assignment_id: AssignmentId,
        draft: FileUpload,
        form: &SubmissionForm,
    ) -> RemoteResult<()> {
        let millis = Utc::now().timestamp_millis();
        let draft_path = upload_path(identity.user_id, UploadRole::Draft, millis, &draft.file_name);

        let draft_upload = Self::upload(storage, &draft_path, &draft);
        let transcript_upload = async {
            match form.transcript.as_ref() {
                Some(transcript) => {
                    let path = upload_path(
                        identity.user_id,
                        UploadRole::Transcript,
                        millis,
                        &transcript.file_name,
                    );
                    Self::upload(storage, &path, transcript).await.map(Some)
                }
                None => Ok(None),
            }
        };

        // Both uploads settle before either result is inspected.
        let (draft_url, transcript_url) = tokio::join!(draft_upload, transcript_upload);
        let draft_url = draft_url?;
        let transcript_url = transcript_url?;

        let row = NewSubmission {
            assignment_id,
            student_id: identity.user_id,
            reflection: form
                .reflection
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string),
            time_spent_minutes: form.time_spent_minutes,
            draft_url,
            transcript_url,
            status: SUBMITTED_STATUS.to_string(),
            submitted_at: Utc::now(),
        };
        let row = serde_json::to_value(&row).map_err(|err| {
            RemoteError::new(ErrorCode::Internal, format!("failed to encode submission: {err}"))
        })?;

        storage.records.insert(SUBMISSIONS_TABLE, row).await
    }

    async fn upload(storage: &Storage, path: &str, file: &FileUpload) -> RemoteResult<String> {
        let stored = storage
            .blobs
            .upload(path, file, UploadOptions { upsert: true })
            .await?;
        debug!(path = %stored, bytes = file.bytes.len(), "submission: uploaded");
        Ok(storage.blobs.public_url(&stored))
    }

    async fn set_status(&self, status: FormStatus) {
        self.view.write().await.submission_form.status = Some(status.clone());
        let _ = self
            .events
            .send(DashboardEvent::SubmissionStatusChanged(status));
    }
}

#[cfg(test)]
#[path = "tests/submission_tests.rs"]
mod tests;
