//! Session stop semantics: idempotence, graceful shutdown, and
//! cancellation-bounded waiting.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use cldpd::{DispatchError, Session};

use super::test_helpers::{blocking_run_fn, lines_run_fn, MockRunner};

const BOUND: Duration = Duration::from_secs(5);

fn spawn_with(runner: Arc<MockRunner>, run_fn: cldpd::session::RunFn) -> Session {
    Session::spawn("pod-deadbeef".into(), "pod-deadbeef".into(), runner, run_fn, vec![])
}

#[tokio::test]
async fn stop_after_termination_is_a_no_op() {
    let runner = Arc::new(MockRunner::default());
    let session = spawn_with(Arc::clone(&runner), lines_run_fn(vec![], Ok(0)));

    timeout(BOUND, session.wait())
        .await
        .expect("wait returns")
        .expect("clean exit");

    let cancel = CancellationToken::new();
    session.stop(&cancel).await.expect("stop on a done session is Ok");
    assert_eq!(
        runner.stop_calls.load(Ordering::SeqCst),
        0,
        "the runner must not be invoked for an already-terminated session"
    );
}

#[tokio::test]
async fn graceful_stop_unblocks_wait() {
    let runner = Arc::new(MockRunner::default());
    let run_fn = blocking_run_fn(runner.release.clone(), Ok(0));
    let session = spawn_with(Arc::clone(&runner), run_fn);

    let cancel = CancellationToken::new();
    timeout(BOUND, session.stop(&cancel))
        .await
        .expect("stop returns")
        .expect("stop succeeds");

    let code = timeout(BOUND, session.wait())
        .await
        .expect("wait returns after stop");
    assert_eq!(code.expect("clean exit"), 0);
    assert_eq!(runner.stop_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_stop_returns_without_reinvoking_the_runner() {
    let runner = Arc::new(MockRunner::default());
    let run_fn = blocking_run_fn(runner.release.clone(), Ok(0));
    let session = spawn_with(Arc::clone(&runner), run_fn);

    let cancel = CancellationToken::new();
    session.stop(&cancel).await.expect("first stop succeeds");
    session.stop(&cancel).await.expect("second stop succeeds");
    assert_eq!(
        runner.stop_calls.load(Ordering::SeqCst),
        1,
        "stop is idempotent after termination"
    );
}

#[tokio::test]
async fn stop_with_expired_token_returns_cancelled() {
    let mut runner = MockRunner::default();
    // The stop command "succeeds" but the container never actually exits.
    runner.stop_releases = false;
    let runner = Arc::new(runner);
    let run_fn = blocking_run_fn(runner.release.clone(), Ok(0));
    let session = spawn_with(Arc::clone(&runner), run_fn);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }

    let err = timeout(BOUND, session.stop(&cancel))
        .await
        .expect("stop returns promptly on cancellation")
        .expect_err("expired token yields an error");
    assert!(matches!(err, DispatchError::Cancelled(_)), "got {err:?}");
}

#[tokio::test]
async fn stop_error_is_wrapped_with_the_session_id_and_keeps_its_kind() {
    let mut runner = MockRunner::default();
    runner.stop_error = Some(DispatchError::StopFailed("exit code 1: daemon error".into()));
    let runner = Arc::new(runner);
    let run_fn = blocking_run_fn(runner.release.clone(), Ok(0));
    let session = spawn_with(Arc::clone(&runner), run_fn);

    let cancel = CancellationToken::new();
    let err = session.stop(&cancel).await.expect_err("runner stop failure propagates");
    assert!(matches!(err, DispatchError::StopFailed(_)), "kind survives wrapping");
    let text = err.to_string();
    assert!(text.contains("pod-deadbeef"), "wrapped with the session id: {text}");
    assert!(text.contains("daemon error"), "original message preserved: {text}");
}
