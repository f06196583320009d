//! Auth Flow Controller: the magic-link modal and the sign-out action.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::{
    error::{ClientError, ClientResult, NOT_CONFIGURED_MESSAGE},
    services::AuthProvider,
    view::{AuthModalState, ResultKind, SharedView, StatusMessage},
    DashboardEvent,
};

/// How long the success message stays up before the modal closes itself.
pub const AUTO_CLOSE_DELAY: Duration = Duration::from_millis(1600);

pub const EMPTY_EMAIL_MESSAGE: &str = "Please enter your email address.";
pub const SENDING_MESSAGE: &str = "Sending magic link...";
pub const SENT_MESSAGE: &str = "Check your email for the sign-in link.";
pub const SEND_FAILED_FALLBACK: &str = "We could not send the magic link. Please try again.";
pub const SIGNED_OUT_MESSAGE: &str = "You have been signed out.";
pub const SIGN_OUT_FAILED_FALLBACK: &str = "Unable to sign out.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other,
}

pub struct AuthFlowController {
    auth: Option<Arc<dyn AuthProvider>>,
    view: SharedView,
    events: broadcast::Sender<DashboardEvent>,
    /// Bumped on every open and close so a pending auto-close only acts on
    /// the modal instance it was scheduled for.
    generation: AtomicU64,
}

impl AuthFlowController {
    pub fn new(
        auth: Option<Arc<dyn AuthProvider>>,
        view: SharedView,
        events: broadcast::Sender<DashboardEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            auth,
            view,
            events,
            generation: AtomicU64::new(0),
        })
    }

    pub async fn state(&self) -> AuthModalState {
        self.view.read().await.auth_modal.state
    }

    pub async fn open(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut view = self.view.write().await;
            view.auth_modal.state = AuthModalState::OpenIdle;
            view.auth_modal.message = None;
        }
        self.announce(AuthModalState::OpenIdle);
    }

    /// Closes from any state and resets the form.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut view = self.view.write().await;
            view.auth_modal.state = AuthModalState::Closed;
            view.auth_modal.email_input.clear();
            view.auth_modal.message = None;
        }
        self.announce(AuthModalState::Closed);
    }

    pub async fn handle_key(&self, key: Key) {
        if key == Key::Escape && self.state().await.is_open() {
            self.close().await;
        }
    }

    pub async fn set_email(&self, email: &str) {
        self.view.write().await.auth_modal.email_input = email.to_string();
    }

    /// Opens the modal if needed, fills the email field and submits it.
    pub async fn submit_email(self: &Arc<Self>, email: &str) -> ClientResult<()> {
        if !self.state().await.is_open() {
            self.open().await;
        }
        self.set_email(email).await;
        self.submit().await
    }

    pub async fn submit(self: &Arc<Self>) -> ClientResult<()> {
        let email = {
            let view = self.view.read().await;
            match view.auth_modal.state {
                AuthModalState::Closed => {
                    debug!("auth: ignoring submit while the modal is closed");
                    return Ok(());
                }
                AuthModalState::Submitting => {
                    debug!("auth: ignoring submit while a request is in flight");
                    return Ok(());
                }
                AuthModalState::OpenIdle | AuthModalState::OpenResult(_) => {}
            }
            view.auth_modal.email_input.trim().to_string()
        };

        if email.is_empty() {
            self.set_message(StatusMessage::error(EMPTY_EMAIL_MESSAGE)).await;
            return Err(ClientError::Validation(EMPTY_EMAIL_MESSAGE.to_string()));
        }

        let Some(auth) = self.auth.clone() else {
            self.set_message(StatusMessage::error(NOT_CONFIGURED_MESSAGE)).await;
            return Err(ClientError::not_configured());
        };

        {
            let mut view = self.view.write().await;
            view.auth_modal.state = AuthModalState::Submitting;
            view.auth_modal.submit_enabled = false;
            view.auth_modal.message = Some(StatusMessage::info(SENDING_MESSAGE));
        }
        self.announce(AuthModalState::Submitting);

        let result = auth.send_magic_link(&email).await;

        let (state, outcome) = {
            let mut view = self.view.write().await;
            view.auth_modal.submit_enabled = true;
            match result {
                Ok(()) => {
                    info!("auth: magic link sent");
                    view.auth_modal.state = AuthModalState::OpenResult(ResultKind::Success);
                    view.auth_modal.email_input.clear();
                    view.auth_modal.message = Some(StatusMessage::success(SENT_MESSAGE));
                    (view.auth_modal.state, Ok(()))
                }
                Err(err) => {
                    error!("auth: failed to send magic link: {err}");
                    view.auth_modal.state = AuthModalState::OpenResult(ResultKind::Error);
                    view.auth_modal.message = Some(StatusMessage::error(
                        err.display_message(SEND_FAILED_FALLBACK),
                    ));
                    (view.auth_modal.state, Err(ClientError::Remote(err)))
                }
            }
        };
        self.announce(state);

        match outcome {
            Ok(()) => self.schedule_auto_close(),
            Err(_) => {
                // The error message stays visible after returning to idle.
                self.view.write().await.auth_modal.state = AuthModalState::OpenIdle;
                self.announce(AuthModalState::OpenIdle);
            }
        }
        outcome
    }

    fn schedule_auto_close(self: &Arc<Self>) {
        let generation = self.generation.load(Ordering::SeqCst);
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(AUTO_CLOSE_DELAY).await;
            if controller.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if controller.state().await == AuthModalState::OpenResult(ResultKind::Success) {
                controller.close().await;
            }
        });
    }

    /// One-shot sign-out; the trigger is re-enabled whatever the outcome.
    pub async fn sign_out(&self) -> ClientResult<()> {
        let Some(auth) = self.auth.clone() else {
            self.set_message(StatusMessage::error(NOT_CONFIGURED_MESSAGE)).await;
            return Err(ClientError::not_configured());
        };

        self.view.write().await.sign_out_enabled = false;

        let result = auth.sign_out().await;

        let outcome = match result {
            Ok(()) => {
                info!("auth: signed out");
                self.set_message(StatusMessage::success(SIGNED_OUT_MESSAGE)).await;
                Ok(())
            }
            Err(err) => {
                error!("auth: failed to sign out: {err}");
                self.set_message(StatusMessage::error(
                    err.display_message(SIGN_OUT_FAILED_FALLBACK),
                ))
                .await;
                Err(ClientError::Remote(err))
            }
        };

        self.view.write().await.sign_out_enabled = true;
        outcome
    }

    async fn set_message(&self, message: StatusMessage) {
        let state = {
            let mut view = self.view.write().await;
            view.auth_modal.message = Some(message);
            view.auth_modal.state
        };
        self.announce(state);
    }

    fn announce(&self, state: AuthModalState) {
        let _ = self.events.send(DashboardEvent::AuthModalChanged(state));
    }
}

#[cfg(test)]
#[path = "tests/auth_flow_tests.rs"]
mod tests;
