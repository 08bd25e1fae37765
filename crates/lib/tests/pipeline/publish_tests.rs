//! Deferred publish, grader sync and rollback.

use coursepress_lib::grader::EndpointStatus;
use coursepress_lib::orchestrator::{BuildError, BuildOptions};
use coursepress_lib::record::BuildState;
use coursepress_lib::settings::PublishMode;
use coursepress_lib::types::VersionId;

use super::common::{FakeRunner, GRADER_URL, INDEX, INDEX_WITH_GRADER, TestEnv, read};

#[tokio::test]
async fn deferred_build_waits_for_publish() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);

  let built = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  assert_eq!(built.state, BuildState::Built);
  assert!(!orchestrator.store().publish_path(&env.key).exists());
  assert_eq!(
    orchestrator.store().stored_version(&env.key).unwrap().unwrap().version_id,
    VersionId(1)
  );

  let published = orchestrator.publish(&env.key, None).await.unwrap();
  assert_eq!(published.state, BuildState::Published);
  assert_eq!(published.version_id, VersionId(1));
  assert!(orchestrator.store().publish_path(&env.key).join("index.yaml").exists());
}

#[tokio::test]
async fn republishing_live_version_succeeds() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  let again = orchestrator.publish(&env.key, Some(VersionId(1))).await.unwrap();
  assert_eq!(again.state, BuildState::Published);
}

#[tokio::test]
async fn republishing_live_version_with_newer_stored_succeeds() {
  let env = TestEnv::new(INDEX_WITH_GRADER);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  let deferred = BuildOptions {
    publish_mode: Some(PublishMode::Deferred),
    ..BuildOptions::default()
  };
  let v2 = orchestrator.run_build(&env.key, deferred).await.unwrap();
  assert_eq!(v2.state, BuildState::Built);

  let again = orchestrator.publish(&env.key, Some(VersionId(1))).await.unwrap();

  assert_eq!(again.state, BuildState::Published, "error: {:?}", again.error);
  assert_eq!(again.error, None);
  let report = again.publish_report.unwrap();
  assert_eq!(report.endpoints[0].status, EndpointStatus::Published);
  let store = orchestrator.store();
  assert_eq!(store.published_version(&env.key).unwrap().unwrap().version_id, VersionId(1));
  assert_eq!(store.stored_version(&env.key).unwrap().unwrap().version_id, VersionId(2));
  assert_eq!(read(&store.publish_path(&env.key).join("_build/html/index.html")), "built 0000000001");
}

#[tokio::test]
async fn publishing_a_superseded_version_fails_locally() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  let record = orchestrator.publish(&env.key, Some(VersionId(1))).await.unwrap();

  assert_eq!(record.state, BuildState::PublishFailed);
  assert!(!orchestrator.store().publish_path(&env.key).exists());
  assert_eq!(
    orchestrator.store().stored_version(&env.key).unwrap().unwrap().version_id,
    VersionId(2)
  );
}

#[tokio::test]
async fn failed_build_is_not_publishable() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::failing(1), PublishMode::Deferred);
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  let result = orchestrator.publish(&env.key, Some(VersionId(1))).await;
  assert!(matches!(
    result,
    Err(BuildError::NotPublishable {
      state: BuildState::Failed,
      ..
    })
  ));
}

#[tokio::test]
async fn nothing_to_publish_without_builds() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);
  assert!(matches!(
    orchestrator.publish(&env.key, None).await,
    Err(BuildError::NothingToPublish(_))
  ));
}

#[tokio::test]
async fn graders_follow_the_live_version() {
  let env = TestEnv::new(INDEX_WITH_GRADER);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);

  let record = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  assert_eq!(record.state, BuildState::Published, "log:\n{}", record.log);
  let report = record.publish_report.unwrap();
  assert_eq!(report.endpoints.len(), 1);
  assert_eq!(report.endpoints[0].url, GRADER_URL);
  assert_eq!(report.endpoints[0].status, EndpointStatus::Published);

  let state = env.grader.state(GRADER_URL, "c1");
  assert_eq!(state.published, Some(VersionId(1)));
  assert_eq!(state.stored.unwrap().files, vec!["q1"]);
}

#[tokio::test]
async fn stale_publish_leaves_graders_alone() {
  let env = TestEnv::new(INDEX_WITH_GRADER);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  // The grader now holds v2; publishing v2 locally and remotely works.
  let record = orchestrator.publish(&env.key, None).await.unwrap();
  assert_eq!(record.version_id, VersionId(2));
  assert_eq!(record.state, BuildState::Published);

  // Re-publishing v1 is refused by the local store before any grader call.
  let stale = orchestrator.publish(&env.key, Some(VersionId(1))).await.unwrap();
  assert_eq!(stale.state, BuildState::PublishFailed);
  assert_eq!(env.grader.state(GRADER_URL, "c1").published, Some(VersionId(2)));
}

#[tokio::test]
async fn rollback_restores_previous_tree() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  let live = orchestrator.store().publish_path(&env.key);
  assert_eq!(read(&live.join("_build/html/index.html")), "built 0000000002");

  let restored = orchestrator.rollback(&env.key).unwrap();

  assert_eq!(restored, VersionId(1));
  assert_eq!(read(&live.join("_build/html/index.html")), "built 0000000001");
}
