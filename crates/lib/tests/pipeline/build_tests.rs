//! Submitting builds: locking, version allocation and failure isolation.

use std::sync::Arc;

use coursepress_lib::lock::LockError;
use coursepress_lib::orchestrator::{BuildError, BuildOptions, Orchestrator};
use coursepress_lib::record::BuildState;
use coursepress_lib::settings::PublishMode;
use coursepress_lib::types::VersionId;
use tokio::sync::Semaphore;

use super::common::{FakeRunner, INDEX, TestEnv, read};

#[tokio::test]
async fn build_publishes_built_tree() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);

  let record = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  assert_eq!(record.state, BuildState::Published, "log:\n{}", record.log);
  assert_eq!(record.version_id, VersionId(1));
  let live = orchestrator.store().publish_path(&env.key);
  assert_eq!(read(&live.join("_build/html/index.html")), "built 0000000001");
  assert_eq!(read(&live.join("m1/ch1.html")), "<p>chapter</p>");
  assert_eq!(
    orchestrator.store().published_version(&env.key).unwrap().unwrap().version_id,
    VersionId(1)
  );
  assert!(!orchestrator.store().staging_path(&env.key, VersionId(1)).exists());
  assert!(record.log.contains("building c1"));
}

#[tokio::test]
async fn concurrent_submit_is_rejected() {
  let env = TestEnv::new(INDEX);
  let gate = Arc::new(Semaphore::new(0));
  let orchestrator = env.orchestrator(FakeRunner::gated(gate.clone()), PublishMode::Immediate);

  let first = orchestrator.submit_build(&env.key, BuildOptions::default()).unwrap();
  let second = orchestrator.submit_build(&env.key, BuildOptions::default());

  match second {
    Err(BuildError::Lock(LockError::BuildInProgress { version_id, .. })) => {
      assert_eq!(version_id, Some(first.version_id));
    }
    other => panic!("expected BuildInProgress, got {:?}", other.map(|t| t.version_id)),
  }

  gate.add_permits(1);
  let record = first.wait().await.unwrap();
  assert_eq!(record.state, BuildState::Published);

  // The lock is free again once the first build is done.
  gate.add_permits(1);
  let next = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  assert_eq!(next.version_id, VersionId(2));
}

#[tokio::test]
async fn versions_strictly_increase() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);

  let mut versions = Vec::new();
  for _ in 0..3 {
    versions.push(orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap().version_id);
  }
  assert_eq!(versions, vec![VersionId(1), VersionId(2), VersionId(3)]);
}

#[tokio::test]
async fn failed_build_leaves_live_tree_alone() {
  let env = TestEnv::new(INDEX);
  let ok = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);
  ok.run_build(&env.key, BuildOptions::default()).await.unwrap();
  let live_hash = ok.store().published_hash(&env.key).unwrap();

  let failing = env.orchestrator(FakeRunner::failing(2), PublishMode::Immediate);
  let record = failing.run_build(&env.key, BuildOptions::default()).await.unwrap();

  assert_eq!(record.state, BuildState::Failed);
  assert_eq!(record.version_id, VersionId(2));
  assert!(record.error.as_deref().unwrap().contains("exit code 2"));
  assert!(failing.store().stored_version(&env.key).unwrap().is_none());
  assert_eq!(failing.store().published_hash(&env.key).unwrap(), live_hash);
  assert_eq!(
    failing.store().published_version(&env.key).unwrap().unwrap().version_id,
    VersionId(1)
  );
}

#[tokio::test]
async fn invalid_configuration_fails_before_store() {
  let env = TestEnv::new("name: Broken\nmodules:\n  - key: m1\n    name: Round\n");
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);

  let record = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  assert_eq!(record.state, BuildState::Failed);
  assert!(record.error.as_deref().unwrap().contains("invalid course configuration"));
  assert!(orchestrator.store().stored_version(&env.key).unwrap().is_none());
  assert!(!orchestrator.store().publish_path(&env.key).exists());
}

#[tokio::test]
async fn skip_build_takes_source_as_built() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::failing(1), PublishMode::Immediate);

  let options = BuildOptions {
    skip_build: true,
    ..Default::default()
  };
  let record = orchestrator.run_build(&env.key, options).await.unwrap();

  assert_eq!(record.state, BuildState::Published);
  let live = orchestrator.store().publish_path(&env.key);
  assert!(live.join("index.yaml").exists());
  assert!(!live.join("_build").exists());
}

#[tokio::test]
async fn source_override_replaces_configured_source() {
  let env = TestEnv::new(INDEX);
  let other = env.temp.path().join("other");
  std::fs::create_dir_all(other.join("m1")).unwrap();
  std::fs::write(other.join("index.yaml"), INDEX).unwrap();
  std::fs::write(other.join("m1/ch1.html"), "<p>other</p>").unwrap();
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);

  let options = BuildOptions {
    source: Some(other),
    ..Default::default()
  };
  orchestrator.run_build(&env.key, options).await.unwrap();

  let live = orchestrator.store().publish_path(&env.key);
  assert_eq!(read(&live.join("m1/ch1.html")), "<p>other</p>");
}

#[tokio::test]
async fn unconfigured_course_builds_from_deposit() {
  let env = TestEnv::new(INDEX);
  let mut settings = env.settings(PublishMode::Immediate);
  settings.courses[0].source = None;
  let deposit = env.root().join("deposit").join("c1");
  std::fs::create_dir_all(deposit.join("m1")).unwrap();
  std::fs::write(deposit.join("index.yaml"), INDEX).unwrap();
  std::fs::write(deposit.join("m1/ch1.html"), "<p>deposited</p>").unwrap();
  let orchestrator = Orchestrator::new(settings)
    .with_runner(Arc::new(FakeRunner::ok()))
    .with_grader_transport(env.grader.clone());

  let record = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();

  assert_eq!(record.state, BuildState::Published, "log:\n{}", record.log);
  let live = orchestrator.store().publish_path(&env.key);
  assert_eq!(read(&live.join("m1/ch1.html")), "<p>deposited</p>");
  assert!(deposit.join("index.yaml").exists());

  let again = orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  assert_eq!(again.state, BuildState::Published, "log:\n{}", again.log);
}
