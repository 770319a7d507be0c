//! 选项解析：基础文档 + 选择树 + 高级覆盖 → 最终参数文档
//!
//! 纯函数，无 I/O；同样的输入得到逐字节相同的输出。

use std::collections::HashSet;

use serde_json::Value;

use crate::interface::{AdvancedSelection, OptionCatalog, OptionKind, Selection};
use crate::option::merge::{is_empty_document, merge_document};
use crate::option::template::render_template;

/// 解析结果与合并轨迹（按合并顺序记录的选项名）
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub document: Value,
    pub merged: Vec<String>,
}

pub fn resolve(
    base: &Value,
    selections: &[Selection],
    advanced: &[AdvancedSelection],
    catalog: &OptionCatalog,
) -> Value {
    resolve_traced(base, selections, advanced, catalog).document
}

pub fn resolve_traced(
    base: &Value,
    selections: &[Selection],
    advanced: &[AdvancedSelection],
    catalog: &OptionCatalog,
) -> Resolution {
    let mut walk = Walk {
        catalog,
        root: selections,
        processed: HashSet::new(),
        merged: Vec::new(),
        acc: if base.is_object() {
            base.clone()
        } else {
            Value::Object(Default::default())
        },
    };

    for selection in selections {
        walk.visit(selection);
    }

    for adv in advanced {
        if !is_empty_document(&adv.pipeline_override) {
            walk.acc = merge_document(&walk.acc, &adv.pipeline_override);
        }
    }

    Resolution {
        document: walk.acc,
        merged: walk.merged,
    }
}

struct Walk<'a> {
    catalog: &'a OptionCatalog,
    root: &'a [Selection],
    processed: HashSet<String>,
    merged: Vec<String>,
    acc: Value,
}

impl Walk<'_> {
    fn visit(&mut self, selection: &Selection) {
        if !self.processed.insert(selection.name.clone()) {
            return;
        }
        let catalog = self.catalog;
        let Some(def) = catalog.get(&selection.name) else {
            tracing::debug!("Skipping selection for unknown option '{}'", selection.name);
            return;
        };

        match def.kind {
            OptionKind::Input => {
                let rendered = match &selection.pipeline_override {
                    Some(explicit) if !is_empty_document(explicit) => explicit.clone(),
                    _ => match &def.pipeline_override {
                        Some(template) => render_template(template, &def.inputs, &selection.data),
                        None => Value::Null,
                    },
                };
                self.merge(&selection.name, &rendered);
            }
            OptionKind::Select | OptionKind::Switch => {
                let index = selection.index.unwrap_or_else(|| def.default_index());
                let Some(case) = def.cases.get(index) else {
                    tracing::debug!(
                        "Option '{}' index {} out of range ({} cases)",
                        selection.name,
                        index,
                        def.cases.len()
                    );
                    return;
                };
                if let Some(over) = &case.pipeline_override {
                    self.merge(&selection.name, over);
                }
                for sub in &case.option {
                    if self.processed.contains(sub) {
                        continue;
                    }
                    if let Some(child) = self.child_selection(selection, sub) {
                        self.visit(&child);
                    }
                }
            }
        }
    }

    /// 子选择：选择树中已有 → 根列表中已有 → 按 catalog 生成默认
    fn child_selection(&self, parent: &Selection, name: &str) -> Option<Selection> {
        parent
            .sub_options
            .iter()
            .chain(self.root.iter())
            .find(|s| s.name == name)
            .cloned()
            .or_else(|| Selection::default_for(name, self.catalog))
    }

    fn merge(&mut self, name: &str, overrides: &Value) {
        if is_empty_document(overrides) {
            return;
        }
        self.acc = merge_document(&self.acc, overrides);
        self.merged.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::template::EXPLICIT_NULL;
    use serde_json::json;

    fn catalog() -> OptionCatalog {
        serde_json::from_value(json!({
            "Mode": {
                "cases": [
                    {"name": "Farm", "option": ["Stage"],
                     "pipeline_override": {"Fight": {"action": {"type": "Click", "param": {"target": "farm"}}}}},
                    {"name": "Idle", "pipeline_override": {"Fight": {"enabled": false}}}
                ]
            },
            "Stage": {
                "type": "input",
                "inputs": [{"name": "stage", "default": "1-7"}],
                "pipeline_override": {"Fight": {"recognition": {"param": {"expected": "{stage}"}}}}
            },
            "Loop": {
                "type": "switch",
                "cases": [{"name": "Yes", "option": ["Loop"], "pipeline_override": {"Fight": {"next": ["Fight"]}}}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_select_then_materialized_sub_input() {
        let base = json!({"Fight": {"recognition": {"type": "OCR", "param": {"roi": [0, 0, 10, 10]}}}});
        let out = resolve(&base, &[Selection::select("Mode", 0)], &[], &catalog());
        assert_eq!(
            out,
            json!({"Fight": {
                "recognition": {"type": "OCR", "param": {"roi": [0, 0, 10, 10], "expected": "1-7"}},
                "action": {"type": "Click", "param": {"target": "farm"}}
            }})
        );
    }

    #[test]
    fn test_sub_selection_from_tree_wins_over_default() {
        let selection = Selection::select("Mode", 0)
            .with_sub_options(vec![Selection::input("Stage", [("stage", "CE-6")])]);
        let out = resolve(&json!({}), &[selection], &[], &catalog());
        assert_eq!(out["Fight"]["recognition"]["param"]["expected"], json!("CE-6"));
    }

    #[test]
    fn test_out_of_range_index_is_noop() {
        let out = resolve(&json!({"X": {"a": 1}}), &[Selection::select("Mode", 9)], &[], &catalog());
        assert_eq!(out, json!({"X": {"a": 1}}));
    }

    #[test]
    fn test_unknown_option_is_skipped() {
        let out = resolve(&json!({}), &[Selection::select("Ghost", 0)], &[], &catalog());
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_self_reference_terminates() {
        let res = resolve_traced(&json!({}), &[Selection::select("Loop", 0)], &[], &catalog());
        assert_eq!(res.merged, vec!["Loop".to_string()]);
        assert_eq!(res.document, json!({"Fight": {"next": ["Fight"]}}));
    }

    #[test]
    fn test_explicit_input_override_is_used_verbatim() {
        let selection = Selection {
            name: "Stage".into(),
            pipeline_override: Some(json!({"Fight": {"timeout": 5}})),
            ..Default::default()
        };
        let out = resolve(&json!({}), &[selection], &[], &catalog());
        assert_eq!(out, json!({"Fight": {"timeout": 5}}));
    }

    #[test]
    fn test_explicit_null_input() {
        let out = resolve(
            &json!({}),
            &[Selection::input("Stage", [("stage", EXPLICIT_NULL)])],
            &[],
            &catalog(),
        );
        assert_eq!(out["Fight"]["recognition"]["param"]["expected"], Value::Null);
    }

    #[test]
    fn test_advanced_merged_last_in_order() {
        let advanced = vec![
            AdvancedSelection {
                name: "first".into(),
                pipeline_override: json!({"Fight": {"action": {"param": {"target": "adv1"}}}}),
            },
            AdvancedSelection {
                name: "second".into(),
                pipeline_override: json!({"Fight": {"action": {"param": {"extra": 1}}}}),
            },
        ];
        let out = resolve(&json!({}), &[Selection::select("Mode", 0)], &advanced, &catalog());
        assert_eq!(
            out["Fight"]["action"],
            json!({"type": "Click", "param": {"target": "adv1", "extra": 1}})
        );
    }

    #[test]
    fn test_non_object_base_is_normalized() {
        let out = resolve(&Value::Null, &[Selection::select("Mode", 1)], &[], &catalog());
        assert_eq!(out, json!({"Fight": {"enabled": false}}));
    }
}
