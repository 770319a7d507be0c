//! 界面描述文档的数据模型
//!
//! TaskSpec / OptionDefinition 在加载后只读；Selection 单独存放，
//! 同一个 TaskSpec 可以在多个账号之间复用。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::engine::ControllerKind;

/// 字符串或字符串数组
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

pub(crate) fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// 可排序的任务单元
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    pub name: String,
    pub label: Option<String>,
    /// 要执行的 pipeline 节点
    pub entry: Option<String>,
    pub default_check: bool,
    pub description: Option<String>,
    /// 适用的资源名；为空表示全部适用
    #[serde(deserialize_with = "one_or_many")]
    pub resource: Vec<String>,
    pub repeatable: bool,
    pub repeat_count: Option<u32>,
    #[serde(deserialize_with = "one_or_many")]
    pub option: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub advanced: Vec<String>,
    /// 基础参数文档
    pub pipeline_override: Option<Value>,
}

impl TaskSpec {
    /// 执行次数：可重复任务取 repeat_count，否则 1
    pub fn runs(&self) -> u32 {
        if self.repeatable {
            self.repeat_count.unwrap_or(1).max(1)
        } else {
            1
        }
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// 资源名大小写不敏感匹配
    pub fn supports_resource(&self, resource: &str) -> bool {
        self.resource.is_empty() || self.resource.iter().any(|r| r.eq_ignore_ascii_case(resource))
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    #[default]
    Select,
    Switch,
    Input,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionCase {
    pub name: String,
    pub label: Option<String>,
    /// 选中此项后展开的子选项
    #[serde(deserialize_with = "one_or_many")]
    pub option: Vec<String>,
    pub pipeline_override: Option<Value>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Bool,
}

/// input 类型选项的字段；`{name}` 即模板中的占位符
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputField {
    pub name: String,
    pub label: Option<String>,
    pub default: Option<String>,
    pub pipeline_type: FieldType,
    /// 校验正则
    pub verify: Option<String>,
    pub pattern_msg: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OptionDefinition {
    /// 由加载器按 catalog 键名填入
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OptionKind,
    pub label: Option<String>,
    pub description: Option<String>,
    pub cases: Vec<OptionCase>,
    pub inputs: Vec<InputField>,
    /// input 类型的模板
    pub pipeline_override: Option<Value>,
    pub default_case: Option<String>,
}

impl OptionDefinition {
    pub fn is_input(&self) -> bool {
        self.kind == OptionKind::Input
    }

    /// default_case 对应的下标，找不到时为 0
    pub fn default_index(&self) -> usize {
        self.default_case
            .as_deref()
            .and_then(|name| self.cases.iter().position(|c| c.name == name))
            .unwrap_or(0)
    }

    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.inputs.iter().find(|f| f.name == name)
    }
}

pub type OptionCatalog = HashMap<String, OptionDefinition>;

/// 用户对一个选项的选择；可以嵌套子选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    pub name: String,
    /// select / switch 的 case 下标
    pub index: Option<usize>,
    /// input 字段值；None 表示未填写
    pub data: BTreeMap<String, Option<String>>,
    pub sub_options: Vec<Selection>,
    /// input 选项已渲染好的覆盖文档
    pub pipeline_override: Option<Value>,
}

impl Selection {
    pub fn select(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
            ..Default::default()
        }
    }

    pub fn input<K, V>(name: impl Into<String>, data: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            data: data
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_sub_options(mut self, subs: Vec<Selection>) -> Self {
        self.sub_options = subs;
        self
    }

    /// 按 catalog 生成默认选择（default_case 或 0；input 取字段默认值），递归展开默认 case 的子选项
    pub fn default_for(name: &str, catalog: &OptionCatalog) -> Option<Selection> {
        let mut seen = HashSet::new();
        Self::materialize(name, catalog, &mut seen)
    }

    fn materialize(name: &str, catalog: &OptionCatalog, seen: &mut HashSet<String>) -> Option<Selection> {
        let def = catalog.get(name)?;
        if !seen.insert(name.to_string()) {
            return None;
        }

        let mut selection = Selection {
            name: name.to_string(),
            ..Default::default()
        };
        if def.is_input() {
            selection.data = def
                .inputs
                .iter()
                .map(|f| (f.name.clone(), f.default.clone()))
                .collect();
        } else {
            let index = def.default_index();
            selection.index = Some(index);
            if let Some(case) = def.cases.get(index) {
                selection.sub_options = case
                    .option
                    .iter()
                    .filter_map(|sub| Self::materialize(sub, catalog, seen))
                    .collect();
            }
        }
        Some(selection)
    }
}

/// 预渲染的高级覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSelection {
    pub name: String,
    pub pipeline_override: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceDecl {
    pub name: String,
    #[serde(deserialize_with = "one_or_many")]
    pub path: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControllerDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ControllerKind,
}

/// 外部 Agent 子进程
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub child_exec: Option<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub child_args: Vec<String>,
    pub identifier: Option<String>,
    /// 秒
    pub timeout: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            child_exec: None,
            child_args: Vec::new(),
            identifier: None,
            timeout: 120,
        }
    }
}

impl AgentConfig {
    pub fn is_configured(&self) -> bool {
        self.child_exec.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

/// 一个 TaskSpec 与它的选择
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub spec: Arc<TaskSpec>,
    pub selections: Vec<Selection>,
    pub advanced: Vec<AdvancedSelection>,
    /// 显式标记为仅队长执行
    pub leader_only: bool,
}

impl TaskInstance {
    pub fn new(spec: Arc<TaskSpec>) -> Self {
        Self {
            spec,
            selections: Vec::new(),
            advanced: Vec::new(),
            leader_only: false,
        }
    }

    /// 为 spec 引用的每个选项生成默认选择
    pub fn with_defaults(spec: Arc<TaskSpec>, catalog: &OptionCatalog) -> Self {
        let selections = spec
            .option
            .iter()
            .filter_map(|name| Selection::default_for(name, catalog))
            .collect();
        Self {
            selections,
            ..Self::new(spec)
        }
    }

    pub fn with_selections(mut self, selections: Vec<Selection>) -> Self {
        self.selections = selections;
        self
    }

    pub fn with_advanced(mut self, advanced: Vec<AdvancedSelection>) -> Self {
        self.advanced = advanced;
        self
    }

    pub fn leader_only(mut self) -> Self {
        self.leader_only = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> OptionCatalog {
        let raw = serde_json::json!({
            "Stage": {
                "cases": [
                    {"name": "1-7", "option": ["Medicine"]},
                    {"name": "CE-6"}
                ],
                "default_case": "CE-6"
            },
            "Medicine": {
                "type": "switch",
                "cases": [{"name": "Yes", "option": "Stage"}, {"name": "No"}]
            },
            "Times": {
                "type": "input",
                "inputs": [{"name": "times", "default": "3", "pipeline_type": "int"}]
            }
        });
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_task_runs() {
        let mut spec = TaskSpec {
            repeat_count: Some(4),
            ..Default::default()
        };
        assert_eq!(spec.runs(), 1);
        spec.repeatable = true;
        assert_eq!(spec.runs(), 4);
        spec.repeat_count = Some(0);
        assert_eq!(spec.runs(), 1);
    }

    #[test]
    fn test_resource_filter_is_case_insensitive() {
        let spec: TaskSpec = serde_json::from_str(r#"{"name": "a", "resource": "Official"}"#).unwrap();
        assert!(spec.supports_resource("official"));
        assert!(!spec.supports_resource("bilibili"));
        let open: TaskSpec = serde_json::from_str(r#"{"name": "b"}"#).unwrap();
        assert!(open.supports_resource("anything"));
    }

    #[test]
    fn test_default_selection_uses_default_case() {
        let catalog = catalog();
        let selection = Selection::default_for("Stage", &catalog).unwrap();
        assert_eq!(selection.index, Some(1));
        assert!(selection.sub_options.is_empty());
    }

    #[test]
    fn test_default_selection_expands_sub_options_without_looping() {
        let mut catalog = catalog();
        if let Some(stage) = catalog.get_mut("Stage") {
            stage.default_case = None;
        }
        let selection = Selection::default_for("Stage", &catalog).unwrap();
        assert_eq!(selection.index, Some(0));
        assert_eq!(selection.sub_options.len(), 1);
        let medicine = &selection.sub_options[0];
        assert_eq!(medicine.name, "Medicine");
        // Medicine 的默认 case 又指回 Stage，不再展开
        assert!(medicine.sub_options.is_empty());
    }

    #[test]
    fn test_default_input_selection_copies_defaults() {
        let selection = Selection::default_for("Times", &catalog()).unwrap();
        assert_eq!(selection.data.get("times"), Some(&Some("3".to_string())));
    }

    #[test]
    fn test_agent_defaults() {
        let agent: AgentConfig = serde_json::from_str(r#"{"child_exec": "python"}"#).unwrap();
        assert_eq!(agent.timeout, 120);
        assert!(agent.is_configured());
        assert!(!AgentConfig::default().is_configured());
    }
}
