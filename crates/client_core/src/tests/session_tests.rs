use super::*;
use crate::{
    services::AuthChangeKind,
    test_support::{eventually, identity, remote_error, FakeAuth},
    view::DashboardView,
};

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<(SessionChange, u64)>>,
}

#[async_trait]
impl SessionObserver for RecordingObserver {
    async fn on_session_change(&self, change: &SessionChange, epoch: u64) {
        self.seen.lock().await.push((change.clone(), epoch));
    }
}

fn store_with(
    auth: Option<Arc<FakeAuth>>,
) -> (Arc<SessionStore>, SharedView, broadcast::Receiver<DashboardEvent>) {
    let view = DashboardView::shared();
    let (events, rx) = broadcast::channel(32);
    let auth = auth.map(|auth| auth as Arc<dyn AuthProvider>);
    (SessionStore::new(auth, Arc::clone(&view), events), view, rx)
}

#[tokio::test]
async fn initialize_recovers_existing_session() {
    let student = identity(1);
    let auth = FakeAuth::with_session(Some(student.clone()));
    let (store, view, mut rx) = store_with(Some(auth));
    let observer = Arc::new(RecordingObserver::default());
    store.register(observer.clone()).await;

    store.initialize().await;

    assert_eq!(store.identity().await, Some(student.clone()));
    {
        let view = view.read().await;
        assert_eq!(view.auth_state, AuthState::SignedIn);
        assert_eq!(view.email.as_deref(), Some("student1@example.com"));
    }
    match rx.recv().await.expect("event") {
        DashboardEvent::AuthStateChanged { state, email } => {
            assert_eq!(state, AuthState::SignedIn);
            assert_eq!(email.as_deref(), Some("student1@example.com"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        *observer.seen.lock().await,
        vec![(SessionChange::SignedIn(student), 1)]
    );
}

#[tokio::test]
async fn failed_recovery_leaves_user_signed_out() {
    let auth = FakeAuth::new();
    *auth.session.lock().await = Err(remote_error("session lookup failed"));
    let (store, view, _rx) = store_with(Some(auth));
    let observer = Arc::new(RecordingObserver::default());
    store.register(observer.clone()).await;

    store.initialize().await;

    assert_eq!(store.identity().await, None);
    assert_eq!(view.read().await.auth_state, AuthState::SignedOut);
    assert!(observer.seen.lock().await.is_empty());
}

#[tokio::test]
async fn unconfigured_store_renders_signed_out() {
    let (store, view, mut rx) = store_with(None);

    store.initialize().await;

    assert_eq!(view.read().await.auth_state, AuthState::SignedOut);
    assert!(matches!(
        rx.recv().await.expect("event"),
        DashboardEvent::AuthStateChanged {
            state: AuthState::SignedOut,
            email: None
        }
    ));
}

#[tokio::test]
async fn follows_provider_changes_and_bumps_epoch_on_transitions() {
    let auth = FakeAuth::new();
    let (store, view, _rx) = store_with(Some(Arc::clone(&auth)));
    let observer = Arc::new(RecordingObserver::default());
    store.register(observer.clone()).await;
    store.initialize().await;
    assert_eq!(store.snapshot().await.epoch, 0);

    let student = identity(7);
    auth.emit(AuthChangeKind::SignedIn, Some(student.clone())).await;
    eventually(|| async { store.identity().await.is_some() }).await;
    let signed_in_epoch = store.snapshot().await.epoch;
    assert_eq!(signed_in_epoch, 1);

    auth.emit(AuthChangeKind::TokenRefreshed, Some(student.clone()))
        .await;
    eventually(|| async { observer.seen.lock().await.len() == 2 }).await;
    assert!(store.is_current(signed_in_epoch).await);

    auth.emit(AuthChangeKind::SignedOut, None).await;
    eventually(|| async { store.identity().await.is_none() }).await;
    assert!(!store.is_current(signed_in_epoch).await);
    assert_eq!(view.read().await.auth_state, AuthState::SignedOut);

    assert_eq!(
        *observer.seen.lock().await,
        vec![
            (SessionChange::SignedIn(student.clone()), 1),
            (SessionChange::Refreshed(student), 1),
            (SessionChange::SignedOut, 2),
        ]
    );
}

#[tokio::test]
async fn user_update_rerenders_email_within_the_same_session() {
    let auth = FakeAuth::new();
    let (store, view, _rx) = store_with(Some(Arc::clone(&auth)));
    let observer = Arc::new(RecordingObserver::default());
    store.register(observer.clone()).await;
    store.initialize().await;
    let student = identity(3);
    auth.emit(AuthChangeKind::SignedIn, Some(student.clone())).await;
    eventually(|| async { store.identity().await.is_some() }).await;

    let renamed = Identity::new(student.user_id, "renamed@example.com");
    auth.emit(AuthChangeKind::UserUpdated, Some(renamed.clone()))
        .await;
    eventually(|| async { observer.seen.lock().await.len() == 2 }).await;

    assert_eq!(
        view.read().await.email.as_deref(),
        Some("renamed@example.com")
    );
    assert_eq!(
        observer.seen.lock().await[1],
        (SessionChange::Refreshed(renamed), 1)
    );
}

#[tokio::test]
async fn switching_users_counts_as_a_new_sign_in() {
    let (store, _view, _rx) = store_with(None);
    let observer = Arc::new(RecordingObserver::default());
    store.register(observer.clone()).await;

    store.publish(Some(identity(1))).await;
    store.publish(Some(identity(2))).await;

    assert_eq!(
        *observer.seen.lock().await,
        vec![
            (SessionChange::SignedIn(identity(1)), 1),
            (SessionChange::SignedIn(identity(2)), 2),
        ]
    );
}

#[tokio::test]
async fn publishing_signed_out_twice_notifies_once() {
    let (store, _view, _rx) = store_with(None);
    let observer = Arc::new(RecordingObserver::default());
    store.register(observer.clone()).await;

    store.publish(Some(identity(3))).await;
    store.publish(None).await;
    store.publish(None).await;

    assert_eq!(observer.seen.lock().await.len(), 2);
    assert_eq!(store.snapshot().await.epoch, 2);
}
