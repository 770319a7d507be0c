//! 多开模式：账号、Worker、调度器
//!
//! 两级调度：普通任务在所有启用账号上按并发上限执行；之后仅队长任务在队长账号上以并发 1 执行。

pub mod account;
pub mod scheduler;
pub mod tasks;
pub mod worker;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use account::{Account, AccountConfig, AccountSnapshot, AccountStatus};
pub use scheduler::MultiInstanceScheduler;
pub use tasks::TaskClassifier;
pub use worker::{WorkItem, Worker, WorkerSettings};

use crate::core::notify::{Notifier, Severity};
use crate::engine::Engine;
use crate::interface::{OptionCatalog, TaskInstance};

/// 一次多开运行的结果
#[derive(Debug, Default)]
pub struct MultiRunReport {
    pub regular: Vec<(Arc<Account>, AccountStatus)>,
    pub leader: Option<(Arc<Account>, AccountStatus)>,
}

impl MultiRunReport {
    pub fn count(&self, status: AccountStatus) -> usize {
        self.regular.iter().filter(|(_, s)| *s == status).count()
    }
}

pub struct MultiInstanceRunner {
    engine: Arc<dyn Engine>,
    settings: WorkerSettings,
    catalog: Arc<OptionCatalog>,
    classifier: TaskClassifier,
    max_concurrency: usize,
    notifier: Arc<dyn Notifier>,
}

impl MultiInstanceRunner {
    pub fn new(
        engine: Arc<dyn Engine>,
        settings: WorkerSettings,
        catalog: Arc<OptionCatalog>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            settings,
            catalog,
            classifier: TaskClassifier::default(),
            max_concurrency: 3,
            notifier,
        }
    }

    pub fn with_classifier(mut self, classifier: TaskClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    fn scheduler(&self, cap: usize, cancel: &CancellationToken) -> MultiInstanceScheduler {
        MultiInstanceScheduler::new(
            Arc::clone(&self.engine),
            self.settings.clone(),
            Arc::clone(&self.catalog),
            cap,
            cancel,
        )
    }

    pub async fn run(
        &self,
        accounts: &[Arc<Account>],
        tasks: Vec<TaskInstance>,
        cancel: &CancellationToken,
    ) -> MultiRunReport {
        let (regular, leader_only) = self.classifier.split(tasks);
        let mut report = MultiRunReport::default();

        if !regular.is_empty() {
            let scheduler = self.scheduler(self.max_concurrency, cancel);
            for account in accounts.iter().filter(|a| a.enabled) {
                scheduler.enqueue(WorkItem::new(Arc::clone(account), regular.clone()));
            }
            report.regular = scheduler.process_all().await;
        }

        if !leader_only.is_empty() && !cancel.is_cancelled() {
            match accounts.iter().find(|a| a.leader && a.enabled) {
                Some(leader) => {
                    tracing::info!(account = %leader.display_name(), "Running {} leader-only task(s)", leader_only.len());
                    let scheduler = self.scheduler(1, cancel);
                    scheduler.enqueue(WorkItem::new(Arc::clone(leader), leader_only));
                    report.leader = scheduler.process_all().await.into_iter().next();
                }
                None => tracing::warn!("Leader-only tasks configured but no enabled leader account"),
            }
        }

        for (account, status) in report.regular.iter().chain(report.leader.iter()) {
            let severity = match status {
                AccountStatus::Completed => Severity::Success,
                AccountStatus::Cancelled => Severity::Warning,
                AccountStatus::Failed => Severity::Error,
                _ => Severity::Info,
            };
            self.notifier
                .add_log(&format!("{}: {:?}", account.display_name(), status), severity);
        }
        report
    }
}
