//! Dispatcher integration tests against a recording mock runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use cldpd::{DispatchError, Dispatcher, EventKind, Runner};

use super::test_helpers::{write_pod, MockRunner};

const BOUND: Duration = Duration::from_secs(5);

const POD_JSON: &str = r#"{
  "image": "custom:latest",
  "env": { "FOO": "bar" },
  "buildArgs": { "ARG1": "v1" },
  "workdir": "/work",
  "inheritEnv": ["CLDPD_TEST_INHERIT_SET", "CLDPD_TEST_INHERIT_UNSET"],
  "mounts": [{ "source": "/host/data", "target": "/data", "readOnly": true }]
}"#;

#[tokio::test]
async fn start_builds_then_runs_with_composed_options() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", Some(POD_JSON), None);
    std::env::set_var("CLDPD_TEST_INHERIT_SET", "present");
    std::env::remove_var("CLDPD_TEST_INHERIT_UNSET");

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .start(&cancel, "mypod", "https://github.com/acme/repo/issues/7")
        .await
        .expect("start succeeds");
    timeout(BOUND, session.wait())
        .await
        .expect("session terminates")
        .expect("clean exit");

    let log = runner.log.lock().expect("runner log");
    assert_eq!(log.builds, ["custom:latest"], "image override is honored");
    assert_eq!(log.build_args[0].get("ARG1").map(String::as_str), Some("v1"));

    let opts = &log.runs[0];
    assert_eq!(opts.image, "custom:latest");
    assert!(opts.remove, "start containers are removed on exit");
    assert_eq!(opts.workdir.as_deref(), Some("/work"));
    assert_eq!(
        opts.cmd,
        [
            "claude",
            "-p",
            "Work on this GitHub issue: https://github.com/acme/repo/issues/7"
        ]
    );
    assert_eq!(opts.env.get("FOO").map(String::as_str), Some("bar"));
    assert_eq!(
        opts.env.get("CLDPD_TEST_INHERIT_SET").map(String::as_str),
        Some("present"),
        "set host values are resolved eagerly"
    );
    assert_eq!(
        opts.inherit_env,
        ["CLDPD_TEST_INHERIT_UNSET"],
        "unset names stay on the inherit list"
    );
    assert_eq!(opts.mounts.len(), 1);
    assert_eq!(opts.mounts[0].source, "/host/data");
    assert_eq!(opts.mounts[0].target, "/data");
    assert!(opts.mounts[0].read_only);
}

#[tokio::test]
async fn start_names_the_container_after_the_session_id() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", None, None);

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .start(&cancel, "mypod", "https://example.com/1")
        .await
        .expect("start succeeds");
    timeout(BOUND, session.wait())
        .await
        .expect("session terminates")
        .expect("clean exit");

    let id = session.id();
    let suffix = id.strip_prefix("mypod-").expect("id has the pod-name prefix");
    assert_eq!(suffix.len(), 8, "hex8 suffix: {id}");
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()), "hex suffix: {id}");

    let log = runner.log.lock().expect("runner log");
    assert_eq!(
        log.runs[0].name, id,
        "per-invocation container name matches the session id"
    );
}

#[tokio::test]
async fn concurrent_starts_get_distinct_container_names() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", None, None);

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let a = dispatcher
        .start(&cancel, "mypod", "https://example.com/1")
        .await
        .expect("first start");
    let b = dispatcher
        .start(&cancel, "mypod", "https://example.com/2")
        .await
        .expect("second start");
    assert_ne!(a.id(), b.id(), "session ids are unique per invocation");
}

#[tokio::test]
async fn start_defaults_the_image_tag() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", None, None);

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .start(&cancel, "mypod", "https://example.com/1")
        .await
        .expect("start succeeds");
    timeout(BOUND, session.wait())
        .await
        .expect("session terminates")
        .expect("clean exit");

    let log = runner.log.lock().expect("runner log");
    assert_eq!(log.builds, ["cldpd-mypod"]);
}

#[tokio::test]
async fn start_prepends_the_template_to_the_prompt() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", None, Some("Follow the team playbook."));

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .start(&cancel, "mypod", "https://example.com/9")
        .await
        .expect("start succeeds");
    timeout(BOUND, session.wait())
        .await
        .expect("session terminates")
        .expect("clean exit");

    let log = runner.log.lock().expect("runner log");
    assert_eq!(
        log.runs[0].cmd[2],
        "Follow the team playbook.\n\nWork on this GitHub issue: https://example.com/9"
    );
}

#[tokio::test]
async fn start_surfaces_build_failure_without_a_session() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", None, None);

    let mut mock = MockRunner::default();
    mock.build_error = Some(DispatchError::BuildFailed("exit code 1: boom".into()));
    let runner = Arc::new(mock);
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let err = dispatcher
        .start(&cancel, "mypod", "https://example.com/1")
        .await
        .expect_err("build failure fails start");
    assert!(matches!(err, DispatchError::BuildFailed(_)));

    let log = runner.log.lock().expect("runner log");
    assert!(log.runs.is_empty(), "no container is run after a failed build");
}

#[tokio::test]
async fn start_propagates_pod_discovery_errors() {
    let root = tempfile::tempdir().expect("tempdir");

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let err = dispatcher
        .start(&cancel, "ghost", "https://example.com/1")
        .await
        .expect_err("missing pod fails start");
    assert!(matches!(err, DispatchError::PodNotFound(_)));
}

#[tokio::test]
async fn start_emits_the_full_lifecycle_preamble() {
    let root = tempfile::tempdir().expect("tempdir");
    write_pod(root.path(), "mypod", None, None);

    let mut mock = MockRunner::default();
    mock.output = vec!["working".to_owned()];
    let runner = Arc::new(mock);
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .start(&cancel, "mypod", "https://example.com/1")
        .await
        .expect("start succeeds");

    let mut stream = session.events().expect("events stream");
    let mut events = Vec::new();
    while let Some(event) = timeout(BOUND, stream.recv()).await.expect("stream makes progress") {
        events.push(event);
    }

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            EventKind::BuildStarted,
            EventKind::BuildComplete,
            EventKind::ContainerStarted,
            EventKind::Output,
            EventKind::ContainerExited
        ]
    );
    assert_eq!(events[0].data, "cldpd-mypod");
    assert_eq!(events[2].data, session.id());
}

#[tokio::test]
async fn resume_execs_into_the_deterministic_container() {
    let root = tempfile::tempdir().expect("tempdir");

    let runner = Arc::new(MockRunner::default());
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .resume(&cancel, "mypod", "keep going")
        .await
        .expect("resume succeeds");
    timeout(BOUND, session.wait())
        .await
        .expect("session terminates")
        .expect("clean exit");

    let log = runner.log.lock().expect("runner log");
    assert!(log.builds.is_empty(), "resume never builds");
    let (container, cmd) = &log.execs[0];
    assert_eq!(container, "cldpd-mypod", "deterministic resume target");
    assert_eq!(cmd, &["claude", "--resume", "-p", "keep going"]);
}

#[tokio::test]
async fn resume_missing_container_flows_through_the_session() {
    let root = tempfile::tempdir().expect("tempdir");

    let mut mock = MockRunner::default();
    mock.exec_result = Err(DispatchError::SessionNotFound("cldpd-mypod".into()));
    let runner = Arc::new(mock);
    let dispatcher = Dispatcher::new(root.path(), Arc::clone(&runner) as Arc<dyn Runner>);
    let cancel = CancellationToken::new();

    let session = dispatcher
        .resume(&cancel, "mypod", "keep going")
        .await
        .expect("resume itself does not probe up-front");

    let mut stream = session.events().expect("events stream");
    let mut events = Vec::new();
    while let Some(event) = timeout(BOUND, stream.recv()).await.expect("stream makes progress") {
        events.push(event);
    }

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [EventKind::ContainerStarted, EventKind::Error]);
    assert!(events[1].data.contains("no running session"));

    let err = session.wait().await.expect_err("wait reports the exec failure");
    assert!(matches!(err, DispatchError::SessionNotFound(_)));
}
