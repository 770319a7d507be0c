//! 任务分类：普通任务 / 仅队长执行的任务

use crate::config::MultiSection;
use crate::interface::TaskInstance;

#[derive(Debug, Clone, Default)]
pub struct TaskClassifier {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl TaskClassifier {
    pub fn new(names: Vec<String>, prefixes: Vec<String>) -> Self {
        Self { names, prefixes }
    }

    pub fn from_config(multi: &MultiSection) -> Self {
        Self::new(multi.leader_only_tasks.clone(), multi.leader_only_prefixes.clone())
    }

    /// 名称在列表中，或以某个前缀开头，或实例被显式标记
    pub fn is_leader_only(&self, task: &TaskInstance) -> bool {
        let name = task.name();
        task.leader_only
            || self.names.iter().any(|n| n == name)
            || self.prefixes.iter().any(|p| !p.is_empty() && name.starts_with(p.as_str()))
    }

    /// 保持原有顺序拆分为 (普通, 仅队长)
    pub fn split(&self, tasks: Vec<TaskInstance>) -> (Vec<TaskInstance>, Vec<TaskInstance>) {
        tasks.into_iter().partition(|t| !self.is_leader_only(t))
    }
}
