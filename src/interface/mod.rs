//! 声明式界面描述：任务、选项、资源、控制器、Agent
//!
//! 启动时加载一次；校验失败属于配置错误，不会触碰任何 Engine 会话。

pub mod model;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

pub use model::{
    AdvancedSelection, AgentConfig, ControllerDecl, FieldType, InputField, OptionCase,
    OptionCatalog, OptionDefinition, OptionKind, ResourceDecl, Selection, TaskInstance, TaskSpec,
};

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed interface document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },
}

/// 界面描述文档
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InterfaceDocument {
    pub name: Option<String>,
    pub version: Option<String>,
    pub task: Vec<TaskSpec>,
    pub option: HashMap<String, OptionDefinition>,
    pub resource: Vec<ResourceDecl>,
    pub controller: Vec<ControllerDecl>,
    pub agent: Option<AgentConfig>,
}

/// 项目目录占位符
const PROJECT_DIR: &str = "{PROJECT_DIR}";

impl InterfaceDocument {
    /// 解析并校验 JSON 文本
    pub fn from_json(text: &str) -> Result<Self, InterfaceError> {
        let mut doc: InterfaceDocument = serde_json::from_str(text)?;
        for (name, def) in doc.option.iter_mut() {
            def.name = name.clone();
        }
        doc.validate()?;
        Ok(doc)
    }

    pub fn catalog(&self) -> &OptionCatalog {
        &self.option
    }

    /// 选项目录的结构性校验；任务引用未知选项只告警（可能来自更新版本的配置）
    pub fn validate(&self) -> Result<(), InterfaceError> {
        for (name, def) in &self.option {
            let invalid = |reason: String| InterfaceError::InvalidOption {
                option: name.clone(),
                reason,
            };
            if def.is_input() {
                if def.inputs.is_empty() {
                    return Err(invalid("input option declares no inputs".into()));
                }
                for field in &def.inputs {
                    if let Some(pattern) = &field.verify {
                        Regex::new(pattern)
                            .map_err(|e| invalid(format!("field '{}' verify: {}", field.name, e)))?;
                    }
                }
            } else {
                if def.cases.is_empty() {
                    return Err(invalid("option declares no cases".into()));
                }
                if let Some(default) = &def.default_case {
                    if !def.cases.iter().any(|c| &c.name == default) {
                        return Err(invalid(format!("default_case '{}' matches no case", default)));
                    }
                }
            }
        }

        for task in &self.task {
            for option in &task.option {
                if !self.option.contains_key(option) {
                    tracing::warn!(task = %task.name, "Task references unknown option '{}'", option);
                }
            }
        }
        Ok(())
    }

    /// 适用于指定资源、且有入口的任务
    pub fn tasks_for_resource(&self, resource: &str) -> Vec<Arc<TaskSpec>> {
        self.task
            .iter()
            .filter(|t| {
                if t.entry().is_none() {
                    tracing::debug!(task = %t.name, "Skipping task without entry");
                    return false;
                }
                t.supports_resource(resource)
            })
            .cloned()
            .map(Arc::new)
            .collect()
    }

    /// 资源路径；`{PROJECT_DIR}` 替换为 base_dir，相对路径基于 base_dir
    pub fn resource_paths(&self, resource: &str, base_dir: &Path) -> Option<Vec<PathBuf>> {
        let decl = self.resource.iter().find(|r| r.name.eq_ignore_ascii_case(resource))?;
        let base = base_dir.to_string_lossy();
        Some(
            decl.path
                .iter()
                .map(|p| {
                    let expanded = PathBuf::from(p.replace(PROJECT_DIR, &base));
                    if expanded.is_absolute() {
                        expanded
                    } else {
                        base_dir.join(expanded)
                    }
                })
                .collect(),
        )
    }

    pub fn default_resource(&self) -> Option<&str> {
        self.resource.first().map(|r| r.name.as_str())
    }

    pub fn controller(&self, name: Option<&str>) -> Option<&ControllerDecl> {
        match name {
            Some(n) => self.controller.iter().find(|c| c.name.eq_ignore_ascii_case(n)),
            None => self.controller.first(),
        }
    }
}

/// 从文件加载
pub fn load_interface(path: &Path) -> Result<InterfaceDocument, InterfaceError> {
    let text = std::fs::read_to_string(path).map_err(|source| InterfaceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    InterfaceDocument::from_json(&text)
}

/// 用字段的 verify 正则校验输入；正则本身无效时视为通过
pub fn validate_input(field: &InputField, value: &str) -> Result<(), String> {
    let Some(pattern) = field.verify.as_deref().filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    match Regex::new(pattern) {
        Ok(re) if re.is_match(value) => Ok(()),
        Ok(_) => Err(field
            .pattern_msg
            .clone()
            .unwrap_or_else(|| format!("'{}' does not match {}", value, pattern))),
        Err(e) => {
            tracing::warn!(field = %field.name, "Ignoring invalid verify pattern: {}", e);
            Ok(())
        }
    }
}
