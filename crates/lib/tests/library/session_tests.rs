use upkeep_lib::apply::VersionRecord;
use upkeep_lib::session::{OutcomeKind, ProgressEvent, SessionState, UpdateAvailability};

use super::common::{Release, host, install_tree};

#[tokio::test]
async fn applies_release_over_http() {
  let mut release = Release::start().await;
  release
    .publish_manifest("1.1.0", &[("a.py", b"new-a"), ("lib/b.py", b"new-b")])
    .await;
  release.serve_raw("a.py", b"new-a").await;
  release.serve_raw("lib/b.py", b"new-b").await;

  let root = install_tree(&[("a.py", b"old-a"), ("gone.py", b"x")]);
  let host = host("1.0.0");
  let session = release.session(root.path(), host.clone());

  let outcome = session.apply_update(true).await.unwrap();

  assert_eq!(outcome.kind, OutcomeKind::Applied);
  assert_eq!((outcome.succeeded, outcome.failed), (3, 0));
  assert_eq!(std::fs::read(root.path().join("lib/b.py")).unwrap(), b"new-b");
  assert!(!root.path().join("gone.py").exists());
  assert_eq!(VersionRecord::load(root.path()).unwrap().unwrap().version, "1.1.0");

  let downloads = host
    .events
    .lock()
    .unwrap()
    .iter()
    .filter(|e| matches!(e, ProgressEvent::Download { ok: true, .. }))
    .count();
  assert_eq!(downloads, 2);
  assert_eq!(host.messages.lock().unwrap().as_slice(), [outcome.message.clone()]);
}

#[tokio::test]
async fn scenario_d_tampered_file_fails_every_strategy() {
  let mut release = Release::start().await;
  release
    .publish_manifest(
      "1.1.0",
      &[("a.py", b"new-a"), ("b.py", b"new-b"), ("c.py", b"new-c")],
    )
    .await;
  release.serve_raw("a.py", b"new-a").await;
  release.serve_raw("b.py", b"new-b").await;
  release.serve_raw("c.py", b"tampered").await;
  release.serve_mirror("c.py", b"tampered").await;
  release.serve_content_api("c.py", b"tampered").await;

  let root = install_tree(&[("a.py", b"old"), ("b.py", b"old"), ("c.py", b"old-c")]);
  let session = release.session(root.path(), host("1.0.0"));

  let outcome = session.apply_update(true).await.unwrap();

  assert_eq!(outcome.kind, OutcomeKind::PartiallyApplied);
  assert_eq!((outcome.succeeded, outcome.failed), (2, 1));
  assert!(outcome.message.starts_with("update applied with 1 failures, see log"));
  assert_eq!(session.state(), SessionState::PartialFailure);
  assert_eq!(std::fs::read(root.path().join("c.py")).unwrap(), b"old-c");
  assert_eq!(std::fs::read(root.path().join("a.py")).unwrap(), b"new-a");
}

#[tokio::test]
async fn mirror_serves_when_direct_is_down() {
  let mut release = Release::start().await;
  release.publish_manifest("1.1.0", &[("a.py", b"new-a")]).await;
  release.serve_mirror("a.py", b"new-a").await;

  let root = install_tree(&[("a.py", b"old")]);
  let session = release.session(root.path(), host("1.0.0"));

  let outcome = session.apply_update(true).await.unwrap();

  assert_eq!(outcome.kind, OutcomeKind::Applied);
  assert_eq!(std::fs::read(root.path().join("a.py")).unwrap(), b"new-a");
}

#[tokio::test]
async fn server_error_means_no_update_information() {
  let mut release = Release::start().await;
  let _down = release
    .server
    .mock("GET", "/acme/app/main/update_system/manifest.json")
    .with_status(503)
    .create_async()
    .await;

  let root = install_tree(&[("a.py", b"a")]);
  let session = release.session(root.path(), host("1.0.0"));

  assert!(matches!(
    session.check_for_update().await.unwrap(),
    UpdateAvailability::Unavailable { .. }
  ));
  let outcome = session.apply_update(true).await.unwrap();
  assert_eq!(outcome.kind, OutcomeKind::CheckFailed);
  assert_eq!(std::fs::read(root.path().join("a.py")).unwrap(), b"a");
}

#[tokio::test]
async fn manifest_missing_required_field_is_rejected() {
  let mut release = Release::start().await;
  let _partial = release
    .server
    .mock("GET", "/acme/app/main/update_system/manifest.json")
    .with_status(200)
    .with_body(r#"{"version": "9.0.0", "structure": {}}"#)
    .create_async()
    .await;

  let root = install_tree(&[("a.py", b"a")]);
  let session = release.session(root.path(), host("1.0.0"));

  match session.check_for_update().await.unwrap() {
    UpdateAvailability::Unavailable { reason } => assert!(reason.contains("update_strategy")),
    other => panic!("expected unavailable, got {other:?}"),
  }
}
