//! input 选项的模板渲染
//!
//! 模板中每个字符串叶子里的 `{field}` 占位符依次取：用户输入 → 字段默认值 → 保留原文。
//! 值为 `EXPLICIT_NULL` 时整个位置输出 JSON null。
//! int / bool 字段对替换后的字符串做类型转换，失败时记录错误并保留字符串。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::interface::{FieldType, InputField};

/// 「用户明确选择 null」的哨兵值
pub const EXPLICIT_NULL: &str = "\0null";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("valid placeholder regex"))
}

struct Inputs<'a> {
    fields: &'a [InputField],
    data: &'a BTreeMap<String, Option<String>>,
}

impl<'a> Inputs<'a> {
    fn field(&self, name: &str) -> Option<&'a InputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 用户值优先，其次默认值；未填写（None）的条目不参与
    fn value(&self, name: &str) -> Option<&'a str> {
        self.data
            .get(name)
            .and_then(|v| v.as_deref())
            .or_else(|| self.field(name).and_then(|f| f.default.as_deref()))
    }
}

/// 渲染模板，返回新树
pub fn render_template(
    template: &Value,
    fields: &[InputField],
    data: &BTreeMap<String, Option<String>>,
) -> Value {
    render_value(template, &Inputs { fields, data })
}

fn render_value(value: &Value, inputs: &Inputs<'_>) -> Value {
    match value {
        Value::String(s) => render_string(s, inputs),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, inputs)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(text: &str, inputs: &Inputs<'_>) -> Value {
    let mut last_field: Option<&InputField> = None;
    let mut explicit_null = false;

    let replaced = placeholder().replace_all(text, |caps: &Captures| {
        let key = &caps[1];
        if let Some(field) = inputs.field(key) {
            last_field = Some(field);
        }
        match inputs.value(key) {
            Some(EXPLICIT_NULL) => {
                explicit_null = true;
                String::new()
            }
            Some(v) => v.to_string(),
            None => caps[0].to_string(),
        }
    });

    if explicit_null {
        return Value::Null;
    }
    if replaced == text {
        return Value::String(text.to_string());
    }

    let rendered = replaced.into_owned();
    match last_field.map(|f| (f, f.pipeline_type)) {
        Some((field, FieldType::Int)) => match rendered.trim().parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(e) => {
                tracing::error!(field = %field.name, "Cannot convert '{}' to int: {}", rendered, e);
                Value::String(rendered)
            }
        },
        Some((field, FieldType::Bool)) => match rendered.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                tracing::error!(field = %field.name, "Cannot convert '{}' to bool", rendered);
                Value::String(rendered)
            }
        },
        _ => Value::String(rendered),
    }
}
