//! 多开调度：串行构建、并行执行
//!
//! 阶段一按顺序为每个启用的账号构建并验证 EngineSession（原生资源在构建期互斥）；
//! 阶段二用 Semaphore 限制并发，JoinSet 收集结果。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::interface::OptionCatalog;
use crate::multi::account::{Account, AccountStatus};
use crate::multi::worker::{WorkItem, Worker, WorkerSettings};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MultiInstanceScheduler {
    engine: Arc<dyn Engine>,
    settings: WorkerSettings,
    catalog: Arc<OptionCatalog>,
    max_concurrency: usize,
    pending: Mutex<Vec<WorkItem>>,
    cancel: CancellationToken,
}

impl MultiInstanceScheduler {
    /// `parent` 取消时本调度器一并取消
    pub fn new(
        engine: Arc<dyn Engine>,
        settings: WorkerSettings,
        catalog: Arc<OptionCatalog>,
        max_concurrency: usize,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            engine,
            settings,
            catalog,
            max_concurrency: max_concurrency.max(1),
            pending: Mutex::new(Vec::new()),
            cancel: parent.child_token(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn enqueue(&self, item: WorkItem) {
        item.account.set_status(AccountStatus::Waiting);
        lock(&self.pending).push(item);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 执行全部已入队的账号，按入队顺序返回各账号终态
    pub async fn process_all(&self) -> Vec<(Arc<Account>, AccountStatus)> {
        let items = std::mem::take(&mut *lock(&self.pending));
        let mut results: Vec<(Arc<Account>, AccountStatus)> = Vec::with_capacity(items.len());
        let mut workers = Vec::new();

        // 阶段一：串行构建
        for item in items {
            let account = Arc::clone(&item.account);
            if !account.enabled {
                account.set_status(AccountStatus::Idle);
                continue;
            }
            if self.cancel.is_cancelled() {
                account.set_status(AccountStatus::Cancelled);
                results.push((account, AccountStatus::Cancelled));
                continue;
            }

            let mut worker = Worker::new(item);
            match worker.initialize(&self.engine, &self.settings, &self.cancel).await {
                Ok(()) => {
                    results.push((Arc::clone(&account), AccountStatus::Waiting));
                    workers.push((results.len() - 1, worker));
                }
                Err(e) if e.is_cancellation() => {
                    account.set_status(AccountStatus::Cancelled);
                    results.push((account, AccountStatus::Cancelled));
                }
                Err(e) => {
                    tracing::error!(account = %account.display_name(), "Worker initialization failed: {}", e);
                    account.set_error(e.to_string());
                    account.set_status(AccountStatus::Failed);
                    results.push((account, AccountStatus::Failed));
                }
            }
        }

        tracing::info!(
            ready = workers.len(),
            cap = self.max_concurrency,
            "All worker sessions constructed; executing"
        );

        // 阶段二：并行执行
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut set = JoinSet::new();
        for (slot, worker) in workers {
            let semaphore = Arc::clone(&semaphore);
            let catalog = Arc::clone(&self.catalog);
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                // 等待并发名额期间被取消：不执行，直接释放会话
                let Some(_permit) = permit else {
                    worker.account().set_status(AccountStatus::Cancelled);
                    worker.dispose().await;
                    return (slot, AccountStatus::Cancelled);
                };
                (slot, worker.execute(catalog, cancel).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, status)) => results[slot].1 = status,
                Err(e) => tracing::error!("Worker task panicked: {}", e),
            }
        }

        // 异常退出的 Worker 没有写回终态
        for (account, status) in results.iter_mut() {
            if *status == AccountStatus::Waiting {
                account.set_status(AccountStatus::Failed);
                *status = AccountStatus::Failed;
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::engine::mock::MockEngine;
    use crate::interface::{TaskInstance, TaskSpec};

    fn settings() -> WorkerSettings {
        let mut s = WorkerSettings::new(vec![PathBuf::from("res")]);
        s.poll_interval = Duration::from_millis(1);
        s
    }

    fn task(name: &str) -> TaskInstance {
        TaskInstance::new(Arc::new(TaskSpec {
            name: name.into(),
            entry: Some(name.into()),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_failed_init_excludes_only_that_account() {
        let mock = MockEngine::new();
        mock.make_unreachable("127.0.0.1:2");
        let scheduler = MultiInstanceScheduler::new(
            Arc::new(mock.clone()),
            settings(),
            Arc::new(OptionCatalog::new()),
            2,
            &CancellationToken::new(),
        );
        for port in 1..=3 {
            let account = Arc::new(Account::new(format!("acc{}", port), format!("127.0.0.1:{}", port)));
            scheduler.enqueue(WorkItem::new(account, vec![task("Daily")]));
        }

        let statuses: Vec<_> = scheduler.process_all().await.into_iter().map(|(_, s)| s).collect();
        assert_eq!(
            statuses,
            vec![AccountStatus::Completed, AccountStatus::Failed, AccountStatus::Completed]
        );
        assert_eq!(mock.log().count("append_task:"), 2);
    }

    #[tokio::test]
    async fn test_disabled_accounts_are_skipped() {
        let mock = MockEngine::new();
        let scheduler = MultiInstanceScheduler::new(
            Arc::new(mock.clone()),
            settings(),
            Arc::new(OptionCatalog::new()),
            1,
            &CancellationToken::new(),
        );
        let off = Arc::new(Account::new("off", "127.0.0.1:9").disabled());
        scheduler.enqueue(WorkItem::new(off.clone(), vec![task("Daily")]));

        assert!(scheduler.process_all().await.is_empty());
        assert_eq!(off.status(), AccountStatus::Idle);
        assert_eq!(mock.log().count("load_resource"), 0);
    }

    #[tokio::test]
    async fn test_stop_before_processing_cancels_everyone() {
        let mock = MockEngine::new();
        let scheduler = MultiInstanceScheduler::new(
            Arc::new(mock.clone()),
            settings(),
            Arc::new(OptionCatalog::new()),
            2,
            &CancellationToken::new(),
        );
        let account = Arc::new(Account::new("a", "127.0.0.1:1"));
        scheduler.enqueue(WorkItem::new(account.clone(), vec![task("Daily")]));
        scheduler.stop();

        let results = scheduler.process_all().await;
        assert_eq!(results[0].1, AccountStatus::Cancelled);
        assert_eq!(mock.log().count("load_resource"), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot_reports_cancelled() {
        let mock = MockEngine::new();
        mock.set_job_delay(Duration::from_millis(200));
        let token = CancellationToken::new();
        let scheduler = MultiInstanceScheduler::new(
            Arc::new(mock.clone()),
            settings(),
            Arc::new(OptionCatalog::new()),
            1,
            &token,
        );
        for port in 1..=2 {
            let account = Arc::new(Account::new(format!("acc{}", port), format!("127.0.0.1:{}", port)));
            scheduler.enqueue(WorkItem::new(account, vec![task("Daily")]));
        }

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let statuses: Vec<_> = scheduler.process_all().await.into_iter().map(|(_, s)| s).collect();
        assert_eq!(statuses, vec![AccountStatus::Cancelled, AccountStatus::Cancelled]);
        let log = mock.log();
        assert_eq!(log.count("append_task:"), 1);
        assert_eq!(log.count("dispose:"), 2);
    }
}
