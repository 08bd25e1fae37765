//! Course status and interrupted-worker detection.

use std::sync::Arc;

use coursepress_lib::orchestrator::{BuildOptions, CourseState};
use coursepress_lib::record::{BuildRecord, BuildState};
use coursepress_lib::settings::PublishMode;
use coursepress_lib::types::VersionId;
use tokio::sync::Semaphore;

use super::common::{FakeRunner, INDEX, TestEnv};

#[tokio::test]
async fn status_reports_running_build() {
  let env = TestEnv::new(INDEX);
  let gate = Arc::new(Semaphore::new(0));
  let orchestrator = env.orchestrator(FakeRunner::gated(gate.clone()), PublishMode::Immediate);

  let ticket = orchestrator.submit_build(&env.key, BuildOptions::default()).unwrap();
  let status = orchestrator.status(&env.key).unwrap();
  assert_eq!(
    status.state,
    CourseState::Running {
      version_id: ticket.version_id
    }
  );

  gate.add_permits(1);
  ticket.wait().await.unwrap();

  let status = orchestrator.status(&env.key).unwrap();
  assert_eq!(status.state, CourseState::Idle);
  assert_eq!(status.latest.unwrap().state, BuildState::Published);
  assert_eq!(status.published.unwrap().version_id, VersionId(1));
  assert!(status.stored.is_none());
}

#[tokio::test]
async fn running_record_without_lock_is_interrupted() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Immediate);
  orchestrator
    .records()
    .save(&BuildRecord::running(env.key.clone(), VersionId(4)))
    .unwrap();

  let status = orchestrator.status(&env.key).unwrap();

  assert_eq!(status.state, CourseState::Idle);
  let latest = status.latest.unwrap();
  assert_eq!(latest.state, BuildState::Failed);
  assert_eq!(latest.error.as_deref(), Some("interrupted"));
  assert_eq!(
    orchestrator.records().load(&env.key, VersionId(4)).unwrap().state,
    BuildState::Failed
  );
}

#[tokio::test]
async fn history_lists_newest_first() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);
  for _ in 0..2 {
    orchestrator.run_build(&env.key, BuildOptions::default()).await.unwrap();
  }

  let history = orchestrator.history(&env.key).unwrap();
  let versions: Vec<_> = history.iter().map(|r| r.version_id).collect();
  assert_eq!(versions, vec![VersionId(2), VersionId(1)]);
  assert!(history.iter().all(|r| r.state == BuildState::Built));
}

#[tokio::test]
async fn unknown_course_is_idle() {
  let env = TestEnv::new(INDEX);
  let orchestrator = env.orchestrator(FakeRunner::ok(), PublishMode::Deferred);
  let status = orchestrator.status(&"other".parse().unwrap()).unwrap();
  assert_eq!(status.state, CourseState::Idle);
  assert!(status.latest.is_none());
}
