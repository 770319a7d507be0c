//! 会话生命周期集成测试：重连阶梯、取消优先级、拆除顺序

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mfa_pilot::config::{keys, MemorySettings, SettingsExt};
use mfa_pilot::core::maintenance::LadderStep;
use mfa_pilot::core::notify::RecordingNotifier;
use mfa_pilot::core::{
    Backoff, ErrorClass, OnceNotifier, OrchestratorError, Processor, RetryPolicy, RetryTable, RunStatus,
    SessionManager, SessionPhase, SessionSettings, StopOutcome,
};
use mfa_pilot::engine::mock::{CallLog, MockEngine, MockLauncher, MockMaintenance};
use mfa_pilot::engine::DeviceTarget;
use mfa_pilot::interface::{AgentConfig, OptionCatalog, TaskInstance, TaskSpec};
use tokio_util::sync::CancellationToken;

struct Rig {
    engine: MockEngine,
    log: CallLog,
    maintenance: Arc<MockMaintenance>,
    session: Arc<SessionManager>,
    notifier: Arc<OnceNotifier>,
}

fn rig(with_agent: bool, store: MemorySettings) -> Rig {
    let log = CallLog::default();
    let engine = MockEngine::with_log(log.clone());
    let maintenance = Arc::new(MockMaintenance::new(log.clone()));
    let notifier = Arc::new(OnceNotifier::new(Arc::new(RecordingNotifier::default())));
    let agent = with_agent.then(|| AgentConfig {
        child_exec: Some("python".into()),
        identifier: Some("link0001".into()),
        ..Default::default()
    });
    let settings = SessionSettings::new(vec![PathBuf::from("resource")], DeviceTarget::adb("127.0.0.1:16384"))
        .with_agent(agent);

    let (session, _events) = SessionManager::new(Arc::new(engine.clone()), settings, Arc::new(store), Arc::clone(&notifier));
    let session = session
        .with_maintenance(maintenance.clone())
        .with_launcher(Arc::new(MockLauncher::new(log.clone())))
        .with_retry_table(
            RetryTable::empty()
                .with(ErrorClass::Bridge, RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(1))))
                .with(ErrorClass::AbortPending, RetryPolicy::new(5, Backoff::Fixed(Duration::from_millis(1)))),
        );

    Rig {
        engine,
        log,
        maintenance,
        session: Arc::new(session),
        notifier,
    }
}

fn full_ladder() -> MemorySettings {
    let store = MemorySettings::default();
    store.set(keys::RETRY_ON_DISCONNECTED, true);
    store
}

fn ladder_steps(log: &CallLog) -> Vec<String> {
    log.entries().into_iter().filter(|e| e.starts_with("ladder:")).collect()
}

fn fight_task() -> TaskInstance {
    TaskInstance::new(Arc::new(TaskSpec {
        name: "Fight".into(),
        entry: Some("FightEntry".into()),
        ..Default::default()
    }))
}

async fn wait_for(log: &CallLog, prefix: &str) {
    for _ in 0..200 {
        if log.count(prefix) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("'{}' never recorded", prefix);
}

#[tokio::test]
async fn test_ladder_steps_run_in_order_until_connected() {
    let r = rig(false, full_ladder());
    r.engine.script_connects([false, false, false, false, true]);

    let tasker = r.session.ensure_connected(&CancellationToken::new()).await;
    assert!(tasker.is_ok());
    assert_eq!(
        ladder_steps(&r.log),
        vec![
            "ladder:start_launcher",
            "ladder:soft_reconnect",
            "ladder:restart_daemon",
            "ladder:hard_restart_daemon",
        ]
    );
    assert_eq!(r.session.phase(), SessionPhase::Ready);
}

#[tokio::test]
async fn test_ladder_stops_at_first_successful_step() {
    let r = rig(false, full_ladder());
    r.engine.script_connects([false, false, true]);

    assert!(r.session.ensure_connected(&CancellationToken::new()).await.is_ok());
    assert_eq!(ladder_steps(&r.log), vec!["ladder:start_launcher", "ladder:soft_reconnect"]);

    // 成功之后不再有阶梯步骤
    let last_step = *r.log.positions_with_prefix("ladder:").last().unwrap();
    let connected = *r.log.positions_with_prefix("create_tasker:").last().unwrap();
    assert!(last_step < connected);
}

#[tokio::test]
async fn test_disabled_steps_are_skipped() {
    let store = MemorySettings::default();
    store.set(keys::ALLOW_ADB_RESTART, false);
    let r = rig(false, store);
    r.engine.script_connects([false, false, false]);

    let result = r.session.ensure_connected(&CancellationToken::new()).await;
    assert!(matches!(result, Err(OrchestratorError::ConnectionFailed(_))));
    assert_eq!(ladder_steps(&r.log), vec!["ladder:soft_reconnect", "ladder:hard_restart_daemon"]);
}

#[tokio::test]
async fn test_cancel_during_step_wins_over_retry() {
    let r = rig(false, full_ladder());
    r.engine.script_connects([false; 5]);
    let cancel = CancellationToken::new();
    r.maintenance.cancel_during(LadderStep::SoftReconnect, cancel.clone());

    let result = r.session.ensure_connected(&cancel).await;
    assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    assert_eq!(ladder_steps(&r.log), vec!["ladder:start_launcher", "ladder:soft_reconnect"]);
}

#[tokio::test]
async fn test_cancelled_connect_ends_run_as_stopped() {
    let r = rig(false, full_ladder());
    r.engine.script_connects([false; 5]);
    let processor = processor(&r);

    let run = processor.start(vec![fight_task()], false, false);
    r.maintenance.cancel_during(LadderStep::StartLauncher, processor.cancel_token());

    assert_eq!(run.await.unwrap(), RunStatus::Stopped);
    assert_eq!(ladder_steps(&r.log), vec!["ladder:start_launcher"]);
    assert_eq!(r.log.count("append_task:"), 0);
}

#[tokio::test]
async fn test_disconnect_releases_in_order() {
    let r = rig(true, MemorySettings::default());
    assert!(r.session.connect(&CancellationToken::new()).await.connected);
    assert!(r.session.agent_started());

    r.session.disconnect().await;
    let link_stop = r.log.position("link_stop").unwrap();
    let kill = r.log.position("process_kill").unwrap();
    let dispose = r.log.position("dispose:127.0.0.1:16384").unwrap();
    assert!(link_stop < kill && kill < dispose);
    assert_eq!(r.session.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn test_forced_kill_releases_in_order() {
    let r = rig(true, MemorySettings::default());
    assert!(r.session.connect(&CancellationToken::new()).await.connected);

    r.session.force_kill().await;
    let link_stop = r.log.position("link_stop").unwrap();
    let kill = r.log.position("process_kill").unwrap();
    let dispose = r.log.position("dispose:127.0.0.1:16384").unwrap();
    assert!(link_stop < kill && kill < dispose);
    assert!(r.session.tasker().is_none());

    r.session.force_kill().await;
    assert_eq!(r.log.count("dispose:"), 1);
}

fn processor(r: &Rig) -> Arc<Processor> {
    Arc::new(Processor::new(
        Arc::clone(&r.session),
        Arc::new(OptionCatalog::new()),
        Arc::clone(&r.notifier),
    ))
}

#[tokio::test]
async fn test_user_stop_aborts_job_and_keeps_session() {
    let r = rig(true, MemorySettings::default());
    r.engine.set_job_delay(Duration::from_millis(300));
    let processor = processor(&r);

    let run = processor.start(vec![fight_task()], false, false);
    wait_for(&r.log, "append_task:").await;

    assert_eq!(
        processor.stop(RunStatus::Stopped, false).await,
        StopOutcome::Stopped(RunStatus::Stopped)
    );
    assert_eq!(run.await.unwrap(), RunStatus::Stopped);

    // 已链接的 Agent 与会话都保留
    assert_eq!(r.log.count("tasker_stop:127.0.0.1:16384"), 1);
    assert_eq!(r.log.count("link_stop"), 0);
    assert_eq!(r.log.count("process_kill"), 0);
    assert_eq!(r.log.count("dispose:"), 0);
    assert!(r.session.tasker().is_some());
    assert!(r.session.agent_started());

    assert_eq!(processor.stop(RunStatus::Stopped, false).await, StopOutcome::NothingToStop);
}

#[tokio::test]
async fn test_user_stop_without_agent_keeps_session() {
    let r = rig(false, MemorySettings::default());
    r.engine.set_job_delay(Duration::from_millis(300));
    let processor = processor(&r);

    let run = processor.start(vec![fight_task()], false, false);
    wait_for(&r.log, "append_task:").await;
    processor.stop(RunStatus::Stopped, false).await;

    assert_eq!(run.await.unwrap(), RunStatus::Stopped);
    assert_eq!(r.log.count("dispose:"), 0);
    assert!(r.session.tasker().is_some());
}

#[tokio::test]
async fn test_user_stop_kills_agent_still_starting() {
    let r = rig(true, MemorySettings::default());
    r.engine.set_link_delay(Duration::from_millis(300));
    let processor = processor(&r);

    let run = processor.start(vec![fight_task()], false, false);
    wait_for(&r.log, "agent_spawn:").await;
    assert!(r.session.agent_starting());

    processor.stop(RunStatus::Stopped, false).await;
    let link_stop = r.log.position("link_stop").unwrap();
    let kill = r.log.position("process_kill").unwrap();
    assert!(link_stop < kill);

    assert_eq!(run.await.unwrap(), RunStatus::Stopped);
    // 被取消的连接尝试释放它自己建出的会话，Agent 不会被再次结束
    let dispose = r.log.position("dispose:127.0.0.1:16384").unwrap();
    assert!(kill < dispose);
    assert_eq!(r.log.count("link_stop"), 1);
    assert_eq!(r.log.count("process_kill"), 1);
    assert_eq!(r.log.count("append_task:"), 0);
    assert!(!r.session.agent_started());
}

#[tokio::test]
async fn test_cancel_while_creating_tasker_disposes_it() {
    let r = rig(false, MemorySettings::default());
    r.engine.set_build_delay(Duration::from_millis(200));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = r.session.connect(&cancel).await;
    assert!(!outcome.connected);
    assert!(!outcome.should_retry);
    assert_eq!(r.log.count("create_tasker:"), 1);
    assert_eq!(r.log.count("dispose:"), 1);
    assert!(r.session.tasker().is_none());
    assert_eq!(r.session.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn test_completed_run_keeps_session_alive() {
    let r = rig(true, MemorySettings::default());
    let processor = processor(&r);

    assert_eq!(processor.start(vec![fight_task()], false, false).await.unwrap(), RunStatus::Succeeded);
    assert_eq!(r.log.count("append_task:127.0.0.1:16384:FightEntry"), 1);
    assert_eq!(r.log.count("dispose:"), 0);
    assert_eq!(r.session.phase(), SessionPhase::Ready);
}
