use serde_json::json;

use super::*;
use crate::{
    test_support::{eventually, identity, FakeClipboard, FakeFunctions, Gate},
    view::DashboardView,
};

struct Harness {
    digest: DigestRequester,
    session: Arc<SessionStore>,
    functions: Arc<FakeFunctions>,
    clipboard: Arc<FakeClipboard>,
    view: SharedView,
}

fn harness_with(functions: Arc<FakeFunctions>, clipboard: FakeClipboard) -> Harness {
    let view = DashboardView::shared();
    let (events, _) = broadcast::channel(32);
    let session = SessionStore::new(None, Arc::clone(&view), events.clone());
    let clipboard = Arc::new(clipboard);
    let digest = DigestRequester::new(
        Arc::clone(&session),
        Some(Arc::clone(&functions) as Arc<dyn FunctionInvoker>),
        "progress_digest",
        Arc::clone(&clipboard) as Arc<dyn Clipboard>,
        Arc::clone(&view),
        events,
    );
    Harness {
        digest,
        session,
        functions,
        clipboard,
        view,
    }
}

fn harness(response: Value) -> Harness {
    harness_with(FakeFunctions::responding(response), FakeClipboard::default())
}

#[tokio::test]
async fn digest_without_link_disables_copy() {
    let h = harness(json!({ "digest": "Three drafts this week." }));
    let student = identity(1);
    h.session.publish(Some(student.clone())).await;

    h.digest.request().await.expect("digest");

    let calls = h.functions.calls.lock().await.clone();
    assert_eq!(
        calls,
        vec![(
            "progress_digest".to_string(),
            json!({ "student_id": student.user_id })
        )]
    );
    {
        let view = h.view.read().await;
        assert_eq!(view.digest.output, "Three drafts this week.");
        assert_eq!(view.digest.status, Some(DigestStatus::DigestReady));
        assert_eq!(
            view.digest.status.map(|status| status.to_string()).as_deref(),
            Some("Digest ready")
        );
        assert!(!view.digest.copy_enabled);
    }

    assert_eq!(h.digest.copy_link().await, CopyOutcome::NothingToCopy);
    assert!(h.clipboard.written.lock().await.is_empty());
    assert_eq!(
        h.view.read().await.digest.status,
        Some(DigestStatus::DigestReady)
    );
}

#[tokio::test]
async fn newest_signed_link_is_the_one_copied() {
    let h = harness(json!({
        "digest": "Week one",
        "signed_url": "https://signed.test/one",
    }));
    h.session.publish(Some(identity(2))).await;

    h.digest.request().await.expect("first digest");
    {
        let view = h.view.read().await;
        assert!(view.digest.copy_enabled);
        assert_eq!(view.digest.status, Some(DigestStatus::SignedUrlReady));
        assert_eq!(
            view.digest.output,
            "Week one\n\nSigned URL (time-limited):\nhttps://signed.test/one"
        );
    }
    assert_eq!(h.digest.copy_link().await, CopyOutcome::Copied);

    *h.functions.response.lock().await = Ok(json!({
        "digest": "Week two",
        "signed_url": "https://signed.test/two",
    }));
    h.digest.request().await.expect("second digest");
    assert_eq!(h.digest.copy_link().await, CopyOutcome::Copied);

    assert_eq!(
        *h.clipboard.written.lock().await,
        vec!["https://signed.test/one", "https://signed.test/two"]
    );
    assert_eq!(h.view.read().await.digest.status, Some(DigestStatus::Copied));
}

#[tokio::test]
async fn structured_digest_is_pretty_printed() {
    let h = harness(json!({
        "digest": { "submissions": 3, "feedback": 1 },
        "signed_url": "   ",
    }));
    h.session.publish(Some(identity(3))).await;

    h.digest.request().await.expect("digest");

    let view = h.view.read().await;
    let expected =
        serde_json::to_string_pretty(&json!({ "submissions": 3, "feedback": 1 })).expect("json");
    assert_eq!(view.digest.output, expected);
    assert_eq!(view.digest.status, Some(DigestStatus::DigestReady));
    assert!(!view.digest.copy_enabled);
}

#[tokio::test]
async fn request_without_identity_makes_no_call() {
    let h = harness(json!({ "digest": "unused" }));

    let result = h.digest.request().await;

    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert!(h.functions.calls.lock().await.is_empty());
    assert_eq!(
        h.view.read().await.digest.status,
        Some(DigestStatus::NotConnected)
    );
}

#[tokio::test]
async fn failure_clears_previous_link() {
    let h = harness(json!({ "digest": "ok", "signed_url": "https://signed.test/old" }));
    h.session.publish(Some(identity(4))).await;
    h.digest.request().await.expect("digest");

    *h.functions.response.lock().await = Err(RemoteError::new(
        ErrorCode::Internal,
        "digest function crashed",
    ));
    let result = h.digest.request().await;

    assert!(matches!(result, Err(ClientError::Remote(_))));
    {
        let view = h.view.read().await;
        assert_eq!(view.digest.output, "digest function crashed");
        assert_eq!(view.digest.status, Some(DigestStatus::Error));
        assert!(!view.digest.copy_enabled);
    }
    assert_eq!(h.digest.copy_link().await, CopyOutcome::NothingToCopy);
}

#[tokio::test]
async fn failure_without_message_uses_fallback() {
    let h = harness(json!({}));
    *h.functions.response.lock().await = Err(RemoteError::without_message(ErrorCode::Transport));
    h.session.publish(Some(identity(5))).await;

    let _ = h.digest.request().await;

    assert_eq!(h.view.read().await.digest.output, DIGEST_FAILED_FALLBACK);
}

#[tokio::test]
async fn clipboard_failure_is_reported() {
    let h = harness_with(
        FakeFunctions::responding(json!({ "digest": "ok", "signed_url": "https://signed.test/x" })),
        FakeClipboard {
            fail: true,
            ..FakeClipboard::default()
        },
    );
    h.session.publish(Some(identity(6))).await;
    h.digest.request().await.expect("digest");

    assert_eq!(h.digest.copy_link().await, CopyOutcome::Failed);
    assert_eq!(
        h.view.read().await.digest.status,
        Some(DigestStatus::CopyFailed)
    );
}

#[tokio::test]
async fn unconfigured_request_shows_configuration_message() {
    let view = DashboardView::shared();
    let (events, _) = broadcast::channel(8);
    let session = SessionStore::new(None, Arc::clone(&view), events.clone());
    let digest = DigestRequester::new(
        session,
        None,
        "progress_digest",
        Arc::new(FakeClipboard::default()),
        Arc::clone(&view),
        events,
    );

    let result = digest.request().await;

    assert!(matches!(result, Err(ClientError::Configuration(_))));
    let view = view.read().await;
    assert_eq!(view.digest.output, NOT_CONFIGURED_MESSAGE);
    assert_eq!(view.digest.status, Some(DigestStatus::Error));
}

#[tokio::test]
async fn response_after_sign_out_is_dropped() {
    let h = harness(json!({ "digest": "late", "signed_url": "https://signed.test/late" }));
    let gate = Gate::closed();
    *h.functions.gate.lock().await = Some(gate.clone());
    h.session.publish(Some(identity(7))).await;

    let pending = h.digest.request();
    let sign_out = async {
        eventually(|| async { !h.functions.calls.lock().await.is_empty() }).await;
        h.session.publish(None).await;
        h.view.write().await.digest.reset();
        gate.release();
    };
    let (result, ()) = tokio::join!(pending, sign_out);

    assert!(result.is_ok());
    let view = h.view.read().await;
    assert_eq!(view.digest.output, "");
    assert_eq!(view.digest.last_signed_url(), None);
    assert!(!view.digest.copy_enabled);
}

#[tokio::test]
async fn copy_while_refreshing_writes_nothing() {
    let h = harness(json!({ "digest": "ok", "signed_url": "https://signed.test/first" }));
    h.session.publish(Some(identity(8))).await;
    h.digest.request().await.expect("digest");
    let gate = Gate::closed();
    *h.functions.gate.lock().await = Some(gate.clone());

    let pending = h.digest.request();
    let copy = async {
        eventually(|| async { h.functions.calls.lock().await.len() == 2 }).await;
        let outcome = h.digest.copy_link().await;
        gate.release();
        outcome
    };
    let (result, outcome) = tokio::join!(pending, copy);

    assert!(result.is_ok());
    assert_eq!(outcome, CopyOutcome::NothingToCopy);
    assert!(h.clipboard.written.lock().await.is_empty());
    assert_eq!(
        h.view.read().await.digest.last_signed_url(),
        Some("https://signed.test/first")
    );
}
