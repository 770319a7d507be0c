//! MFA Pilot 命令行入口
//!
//! 加载配置与界面描述，按 default_check 选出任务，然后以单会话队列或多开模式执行。
//! 原生引擎未随本 crate 链接，执行使用 MockEngine（dry-run）。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mfa_pilot::config::{load_config, AppConfig, MemorySettings};
use mfa_pilot::core::maintenance::AdbMaintenance;
use mfa_pilot::core::notify::{Notifier, OnceNotifier, TracingNotifier};
use mfa_pilot::core::scripts::CommandScriptRunner;
use mfa_pilot::core::shutdown::{run_with_graceful_shutdown, SessionCleanup, ShutdownCoordinator, ShutdownManager};
use mfa_pilot::core::{Processor, ProcessorSettings, SessionManager, SessionSettings};
use mfa_pilot::engine::{pump_events, Engine};
use mfa_pilot::engine::mock::MockEngine;
use mfa_pilot::interface::{load_interface, InterfaceDocument, TaskInstance};
use mfa_pilot::multi::{Account, MultiInstanceRunner, TaskClassifier, WorkerSettings};
use mfa_pilot::observability;

/// 自动化任务编排：单会话队列或多开调度
#[derive(Parser, Debug)]
#[command(name = "mfa-pilot", version, about)]
struct Args {
    /// 配置文件路径（默认 config/default.toml）
    config: Option<PathBuf>,

    /// 多开模式：按 [[multi.accounts]] 调度
    #[arg(long)]
    multi: bool,

    /// 只做连接检查，不执行任务
    #[arg(long)]
    check_only: bool,

    /// 任务结束后检查更新
    #[arg(long)]
    check_update: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    let cfg = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}); using defaults", e);
        AppConfig::default()
    });

    let interface_path = cfg.app.interface_path.clone();
    let interface = load_interface(&interface_path)
        .with_context(|| format!("Failed to load interface document {}", interface_path.display()))?;
    let base_dir = interface_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let resource = cfg
        .app
        .resource
        .clone()
        .or_else(|| interface.default_resource().map(str::to_string))
        .context("Interface document declares no resource")?;
    let resource_paths = interface
        .resource_paths(&resource, &base_dir)
        .with_context(|| format!("Unknown resource '{}'", resource))?;
    let tasks = selected_tasks(&interface, &resource);
    tracing::info!(resource = %resource, tasks = tasks.len(), "Interface loaded");

    let notifier = Arc::new(OnceNotifier::new(Arc::new(TracingNotifier)));
    let mock = MockEngine::new();
    tracing::warn!("Native engine not linked; running against the mock engine");
    let engine: Arc<dyn Engine> = Arc::new(mock);
    let catalog = Arc::new(interface.catalog().clone());
    let shutdown = Arc::new(ShutdownManager::new());

    if args.multi {
        let accounts: Vec<Arc<Account>> = cfg
            .multi
            .accounts
            .iter()
            .map(|a| Arc::new(Account::from_config(a)))
            .collect();
        anyhow::ensure!(!accounts.is_empty(), "Multi mode needs at least one [[multi.accounts]] entry");

        let runner = MultiInstanceRunner::new(
            engine,
            WorkerSettings::from_config(&cfg, resource_paths),
            catalog,
            notifier.clone() as Arc<dyn Notifier>,
        )
        .with_classifier(TaskClassifier::from_config(&cfg.multi))
        .with_max_concurrency(cfg.multi.max_concurrency);

        let cancel = shutdown.token();
        run_with_graceful_shutdown(
            Arc::clone(&shutdown),
            async {
                let report = runner.run(&accounts, tasks, &cancel).await;
                tracing::info!(
                    completed = report.count(mfa_pilot::multi::AccountStatus::Completed),
                    failed = report.count(mfa_pilot::multi::AccountStatus::Failed),
                    "Multi-instance run finished"
                );
            },
            || async {},
        )
        .await;
        return Ok(());
    }

    let controller_kind = interface
        .controller(cfg.app.controller.as_deref())
        .map(|c| c.kind)
        .unwrap_or_default();
    let target = cfg.device.target(controller_kind);
    let settings = SessionSettings::new(resource_paths, target.clone())
        .with_agent(interface.agent.clone())
        .with_connect_timeout(Duration::from_secs(cfg.connect.connect_timeout_secs));
    let store = Arc::new(MemorySettings::from_config(&cfg));

    let (session, events) = SessionManager::new(engine, settings, store, Arc::clone(&notifier));
    let session = session.with_maintenance(Arc::new(
        AdbMaintenance::new(target.adb_path.clone()).with_launcher(
            cfg.connect.launcher_path.clone(),
            cfg.connect.launcher_args.clone(),
            Duration::from_secs(cfg.connect.launcher_wait_secs),
        ),
    ));

    let event_notifier = Arc::clone(&notifier);
    tokio::spawn(async move { pump_events(events, event_notifier.as_ref()).await });

    let processor = Arc::new(
        Processor::new(Arc::new(session), catalog, Arc::clone(&notifier))
            .with_settings(ProcessorSettings::from_config(&cfg))
            .with_scripts(Arc::new(CommandScriptRunner::new(
                cfg.scripts.pre.clone(),
                cfg.scripts.post.clone(),
            ))),
    );

    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(SessionCleanup::new(Arc::clone(&processor)));

    let run = processor.start(tasks, args.check_only, args.check_update);
    run_with_graceful_shutdown(
        Arc::clone(&shutdown),
        async {
            match run.await {
                Ok(status) => tracing::info!("Run finished: {:?}", status),
                Err(e) => tracing::error!("Run task failed: {}", e),
            }
        },
        || async { coordinator.run_cleanup().await },
    )
    .await;

    Ok(())
}

/// default_check 为 true 的任务，带默认选择
fn selected_tasks(interface: &InterfaceDocument, resource: &str) -> Vec<TaskInstance> {
    interface
        .tasks_for_resource(resource)
        .into_iter()
        .filter(|spec| spec.default_check)
        .map(|spec| TaskInstance::with_defaults(spec, interface.catalog()))
        .collect()
}
