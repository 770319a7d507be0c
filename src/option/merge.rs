//! 参数文档合并（纯函数，返回新树）
//!
//! 文档顶层是「节点名 → 节点体」。节点体按键覆盖，
//! 但 `recognition` / `action` 两个保留键只替换 `type`，`param` 再向下合并一层。

use serde_json::{Map, Value};

pub const RECOGNITION_KEY: &str = "recognition";
pub const ACTION_KEY: &str = "action";
pub const PARAM_KEY: &str = "param";

fn is_reserved(key: &str) -> bool {
    key == RECOGNITION_KEY || key == ACTION_KEY
}

/// 合并单个节点体：source 覆盖 target
pub fn merge_node(target: &Value, source: &Value) -> Value {
    let (Some(base), Some(incoming)) = (target.as_object(), source.as_object()) else {
        return source.clone();
    };

    let mut out = base.clone();
    for (key, value) in incoming {
        let merged = match out.get(key) {
            Some(existing) if is_reserved(key) && existing.is_object() && value.is_object() => {
                merge_reserved(existing, value)
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Value::Object(out)
}

/// recognition / action 块：其它键替换，param 取并集
fn merge_reserved(existing: &Value, incoming: &Value) -> Value {
    let mut out = existing.as_object().cloned().unwrap_or_default();
    let Some(incoming) = incoming.as_object() else {
        return Value::Object(out);
    };

    for (key, value) in incoming {
        let merged = match (key.as_str(), out.get(key)) {
            (PARAM_KEY, Some(Value::Object(base))) if value.is_object() => {
                let mut param = base.clone();
                if let Some(over) = value.as_object() {
                    for (k, v) in over {
                        param.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(param)
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    Value::Object(out)
}

/// 合并整份文档：按节点名调用 merge_node；override 为空或不是对象时原样返回 acc
pub fn merge_document(acc: &Value, overrides: &Value) -> Value {
    let Some(incoming) = overrides.as_object().filter(|m| !m.is_empty()) else {
        return acc.clone();
    };

    let mut out: Map<String, Value> = acc.as_object().cloned().unwrap_or_default();
    for (node, body) in incoming {
        let merged = match out.get(node) {
            Some(existing) => merge_node(existing, body),
            None => body.clone(),
        };
        out.insert(node.clone(), merged);
    }
    Value::Object(out)
}

/// 空对象、null 视为无覆盖
pub fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}
