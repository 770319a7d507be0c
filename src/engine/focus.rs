//! 节点 focus 提示渲染
//!
//! 两种写法：
//! - 新写法：`focus` 以回调消息名为键，值为模板（字符串或数组），`{key}` 由回调 details 填充
//! - 旧写法：`start` / `succeeded` / `failed` / `toast` 列表，按事件阶段选取
//!
//! 文本中的 `[color:NAME]...[/color]` 会被剥离为颜色标记。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::engine::events::EventPhase;

/// 渲染出的一行提示
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FocusLine {
    pub text: String,
    pub color: Option<String>,
    /// 以弹窗而非日志形式展示
    pub toast: bool,
}

fn color_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[color:([^\]]+)\](.*?)\[/color\]").expect("valid color regex"))
}

fn key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid key regex"))
}

/// 按消息与阶段渲染 focus 配置
pub fn render_focus(message: &str, phase: EventPhase, details: &Value, focus: &Value) -> Vec<FocusLine> {
    if let Some(template) = focus.get(message) {
        return texts(template)
            .into_iter()
            .map(|t| parse_color(&fill_details(&t, details), false))
            .collect();
    }

    let key = match phase {
        EventPhase::Starting => "start",
        EventPhase::Succeeded => "succeeded",
        EventPhase::Failed => "failed",
        EventPhase::Other => return Vec::new(),
    };

    let mut lines: Vec<FocusLine> = focus
        .get(key)
        .map(texts)
        .unwrap_or_default()
        .into_iter()
        .map(|t| parse_color(&t, false))
        .collect();

    if phase == EventPhase::Starting {
        if let Some(toast) = focus.get("toast") {
            lines.extend(texts(toast).into_iter().map(|t| parse_color(&t, true)));
        }
    }
    lines
}

/// 字符串或字符串数组
fn texts(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// `{key}` → details 顶层同名字段；未知键保留原文
pub fn fill_details(template: &str, details: &Value) -> String {
    key_pattern()
        .replace_all(template, |caps: &regex::Captures| match details.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => caps[0].to_string(),
            Some(other) => other.to_string(),
        })
        .into_owned()
}

/// 剥离颜色标记，保留第一个颜色
pub fn parse_color(text: &str, toast: bool) -> FocusLine {
    let color = color_pattern()
        .captures(text)
        .map(|caps| caps[1].trim().to_string());
    let stripped = color_pattern().replace_all(text, "$2").into_owned();
    FocusLine {
        text: stripped,
        color,
        toast,
    }
}
