//! Digest Requester: invokes the progress digest function and keeps the
//! signed download link for the copy action.

use std::sync::Arc;

use serde_json::Value;
use shared::{
    error::{ErrorCode, RemoteError},
    protocol::{DigestRequest, DigestResponse},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ClientError, ClientResult, NOT_CONFIGURED_MESSAGE},
    services::{Clipboard, FunctionInvoker},
    session::SessionStore,
    view::{DigestStatus, SharedView},
    DashboardEvent,
};

pub const DIGEST_FAILED_FALLBACK: &str = "Could not generate a digest.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    NothingToCopy,
    Copied,
    Failed,
}

pub fn render_digest(response: &DigestResponse) -> String {
    let mut output = match &response.digest {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    if let Some(url) = response.signed_url() {
        output.push_str("\n\nSigned URL (time-limited):\n");
        output.push_str(url);
    }
    output
}

struct DigestFunction {
    invoker: Arc<dyn FunctionInvoker>,
    name: String,
}

pub struct DigestRequester {
    session: Arc<SessionStore>,
    function: Option<DigestFunction>,
    clipboard: Arc<dyn Clipboard>,
    view: SharedView,
    events: broadcast::Sender<DashboardEvent>,
}

impl DigestRequester {
    pub fn new(
        session: Arc<SessionStore>,
        invoker: Option<Arc<dyn FunctionInvoker>>,
        function_name: impl Into<String>,
        clipboard: Arc<dyn Clipboard>,
        view: SharedView,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Self {
        let name = function_name.into();
        Self {
            session,
            function: invoker.map(|invoker| DigestFunction { invoker, name }),
            clipboard,
            view,
            events,
        }
    }

    /// Concurrent requests are not deduplicated; the last to resolve wins.
    pub async fn request(&self) -> ClientResult<DigestResponse> {
        let Some(function) = self.function.as_ref() else {
            {
                let mut view = self.view.write().await;
                view.digest.output = NOT_CONFIGURED_MESSAGE.to_string();
                view.digest.status = Some(DigestStatus::Error);
            }
            self.announce(DigestStatus::Error);
            return Err(ClientError::not_configured());
        };

        let snapshot = self.session.snapshot().await;
        let Some(identity) = snapshot.identity else {
            self.view.write().await.digest.status = Some(DigestStatus::NotConnected);
            self.announce(DigestStatus::NotConnected);
            return Err(ClientError::NotConnected);
        };

        self.view.write().await.digest.begin_request();
        self.announce(DigestStatus::Requesting);

        let body = serde_json::to_value(DigestRequest {
            student_id: identity.user_id,
        })
        .map_err(|err| {
            RemoteError::new(ErrorCode::Internal, format!("failed to encode request: {err}"))
        });
        let result = match body {
            Ok(body) => function.invoker.invoke(&function.name, body).await,
            Err(err) => Err(err),
        }
        .and_then(|value| {
            serde_json::from_value::<DigestResponse>(value).map_err(|err| {
                RemoteError::new(ErrorCode::Decode, format!("unexpected digest shape: {err}"))
            })
        });

        if !self.session.is_current(snapshot.epoch).await {
            debug!("digest: dropping response from a previous session");
            return result.map_err(ClientError::Remote);
        }

        let status = {
            let mut view = self.view.write().await;
            match &result {
                Ok(response) => {
                    view.digest.output = render_digest(response);
                    let url = response.signed_url().map(str::to_string);
                    let status = if url.is_some() {
                        DigestStatus::SignedUrlReady
                    } else {
                        DigestStatus::DigestReady
                    };
                    view.digest.retain_signed_url(url);
                    view.digest.status = Some(status);
                    info!(user_id = %identity.user_id, status = %status, "digest: ready");
                    status
                }
                Err(err) => {
                    error!(user_id = %identity.user_id, "digest: request failed: {err}");
                    view.digest.output = err.display_message(DIGEST_FAILED_FALLBACK);
                    view.digest.retain_signed_url(None);
                    view.digest.status = Some(DigestStatus::Error);
                    DigestStatus::Error
                }
            }
        };
        self.announce(status);

        result.map_err(ClientError::Remote)
    }

    /// Writes the retained link to the clipboard; never fails past this call.
    pub async fn copy_link(&self) -> CopyOutcome {
        let url = self
            .view
            .read()
            .await
            .digest
            .copyable_url()
            .map(str::to_string);
        let Some(url) = url else {
            debug!("digest: nothing to copy");
            return CopyOutcome::NothingToCopy;
        };

        let (status, outcome) = match self.clipboard.write_text(&url).await {
            Ok(()) => (DigestStatus::Copied, CopyOutcome::Copied),
            Err(err) => {
                warn!("digest: failed to copy signed URL: {err:#}");
                (DigestStatus::CopyFailed, CopyOutcome::Failed)
            }
        };
        self.view.write().await.digest.status = Some(status);
        self.announce(status);
        outcome
    }

    fn announce(&self, status: DigestStatus) {
        let _ = self.events.send(DashboardEvent::DigestStatusChanged(status));
    }
}

#[cfg(test)]
#[path = "tests/digest_tests.rs"]
mod tests;
