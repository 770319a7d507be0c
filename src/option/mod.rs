//! 选项解析：合并规则、input 模板、解析器

pub mod merge;
pub mod resolver;
pub mod template;

use serde_json::Value;

use crate::interface::{OptionCatalog, TaskInstance};

pub use merge::{merge_document, merge_node};
pub use resolver::{resolve, resolve_traced, Resolution};
pub use template::{render_template, EXPLICIT_NULL};

/// 解析任务实例的参数文档
pub fn build_parameters(task: &TaskInstance, catalog: &OptionCatalog) -> Value {
    let base = task.spec.pipeline_override.clone().unwrap_or(Value::Null);
    resolve(&base, &task.selections, &task.advanced, catalog)
}

/// 序列化为传给 Engine 的 JSON；失败时退回 "{}"
pub fn to_override_json(document: &Value) -> String {
    serde_json::to_string(document).unwrap_or_else(|e| {
        tracing::warn!("Cannot serialize pipeline override: {}", e);
        "{}".to_string()
    })
}
