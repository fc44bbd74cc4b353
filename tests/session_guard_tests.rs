mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use avilingo::audio::{AudioArtifact, EncodingFormat, PlaybackRef};
use avilingo::config::ApiSettings;
use avilingo::grading::{GradingApi, JobStatus};
use avilingo::session::{SessionGuard, TokenStore, TransportError};
use avilingo::SpeakingError;

use common::stub::{self, StubState, PASSWORD};

async fn signed_in(state: &Arc<StubState>) -> Arc<SessionGuard> {
    let base_url = stub::serve(state.clone()).await;
    let guard = SessionGuard::new(
        &ApiSettings {
            base_url,
            timeout_secs: 5,
        },
        TokenStore::in_memory(),
    )
    .expect("build session guard");
    guard
        .login("pilot@example.com", PASSWORD)
        .await
        .expect("login against stub");
    Arc::new(guard)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_password_reports_server_detail() {
    let state = StubState::new();
    let base_url = stub::serve(state.clone()).await;
    let guard = SessionGuard::new(
        &ApiSettings {
            base_url,
            timeout_secs: 5,
        },
        TokenStore::in_memory(),
    )
    .unwrap();

    let err = guard.login("pilot@example.com", "wrong").await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Status {
            status: 401,
            message: "Incorrect email or password".into()
        }
    );
    assert!(!guard.is_signed_in().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_access_is_refreshed_once_and_request_replayed() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard.clone());

    state.expire_access();
    let status = api.status("sub-1").await.expect("replayed after refresh");

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(guard.is_signed_in().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rejections_share_one_refresh() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard.clone());

    state.expire_access();
    let mut tasks = Vec::new();
    for n in 0..8 {
        let api = api.clone();
        tasks.push(tokio::spawn(async move {
            api.status(&format!("sub-{}", n)).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_refresh_expires_the_session() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard.clone());

    state.expire_access();
    state.revoke_refresh();

    assert_eq!(
        api.status("sub-1").await.unwrap_err(),
        TransportError::SessionExpired
    );
    assert!(!guard.is_signed_in().await);

    // Nothing is sent once the session is gone
    assert_eq!(
        api.status("sub-1").await.unwrap_err(),
        TransportError::SessionExpired
    );
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_token_endpoint_keeps_the_session() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard.clone());

    state.expire_access();
    state.take_refresh_offline(true);

    assert_eq!(
        api.status("sub-1").await.unwrap_err(),
        TransportError::Status {
            status: 503,
            message: "Service unavailable".into()
        }
    );
    assert!(guard.is_signed_in().await);

    state.take_refresh_offline(false);
    let status = api.status("sub-1").await.expect("refreshed once back online");
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_rejection_after_refresh_is_not_retried_again() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard.clone());

    state.reject_everything();

    assert_eq!(
        api.result("sub-1").await.unwrap_err(),
        TransportError::SessionExpired
    );
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!guard.is_signed_in().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_sends_recording_and_duration() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard);

    let artifact = AudioArtifact::new(
        vec![7u8; 4096],
        EncodingFormat::OggOpus,
        41.6,
        PlaybackRef::detached(),
    );
    let response = api.submit("42", &artifact).await.expect("upload accepted");
    assert_eq!(response.submission_id, "sub-1");
    assert_eq!(response.status, JobStatus::Pending);

    let uploads = state.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].scenario_id, "42");
    assert_eq!(uploads[0].file_name.as_deref(), Some("recording.ogg"));
    assert_eq!(uploads[0].content_type.as_deref(), Some("audio/ogg"));
    assert_eq!(uploads[0].size, 4096);
    assert_eq!(uploads[0].duration_seconds.as_deref(), Some("42"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_with_expired_session_is_reported_as_such() {
    let state = StubState::new();
    let guard = signed_in(&state).await;
    let api = GradingApi::new(guard);

    state.expire_access();
    state.revoke_refresh();

    let artifact = AudioArtifact::new(
        vec![1u8; 128],
        EncodingFormat::Wav,
        3.0,
        PlaybackRef::detached(),
    );
    let err = api.submit("42", &artifact).await.unwrap_err();
    assert_eq!(err, SpeakingError::SessionExpired);
    assert!(state.uploads.lock().unwrap().is_empty());
}
