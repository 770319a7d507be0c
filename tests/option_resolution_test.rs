//! 选项解析集成测试：从界面描述文件出发解析参数文档

use std::io::Write;
use std::sync::Arc;

use mfa_pilot::interface::{load_interface, InterfaceDocument, Selection, TaskInstance};
use mfa_pilot::option::{build_parameters, merge_node, resolve, resolve_traced, to_override_json, EXPLICIT_NULL};
use serde_json::{json, Value};

const INTERFACE: &str = r#"{
    "name": "Demo",
    "resource": [{"name": "Official", "path": "{PROJECT_DIR}/resource"}],
    "controller": [{"name": "Emulator", "type": "Adb"}],
    "task": [
        {
            "name": "Fight",
            "entry": "FightEntry",
            "default_check": true,
            "option": ["Root"],
            "pipeline_override": {
                "FightEntry": {"action": {"type": "Click", "param": {"target": [0, 0, 1, 1], "delay": 100}}}
            }
        },
        {"name": "Notes", "label": "Readme only"}
    ],
    "option": {
        "Root": {
            "cases": [
                {"name": "Both", "option": ["Left", "Right"]},
                {"name": "None"}
            ]
        },
        "Left": {
            "cases": [{"name": "On", "option": "Shared",
                       "pipeline_override": {"FightEntry": {"action": {"param": {"delay": 300}}}}}]
        },
        "Right": {
            "cases": [{"name": "On", "option": ["Shared"],
                       "pipeline_override": {"FightEntry": {"next": ["Done"]}}}]
        },
        "Shared": {
            "cases": [{"name": "Count",
                       "pipeline_override": {"FightEntry": {"times": 1, "action": {"type": "Swipe"}}}}]
        },
        "Stage": {
            "type": "input",
            "inputs": [{"name": "stage", "default": "1-7"}, {"name": "count", "pipeline_type": "int", "default": "3"}],
            "pipeline_override": {"StageNode": {"text": "{stage}", "all": ["{stage}", "x"], "limit": "{count}"}}
        }
    }
}"#;

fn document() -> InterfaceDocument {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(INTERFACE.as_bytes()).unwrap();
    load_interface(file.path()).unwrap()
}

#[test]
fn test_resolution_is_idempotent() {
    let doc = document();
    let spec = doc.tasks_for_resource("official").remove(0);
    let task = TaskInstance::with_defaults(Arc::clone(&spec), doc.catalog());

    let first = to_override_json(&build_parameters(&task, doc.catalog()));
    let second = to_override_json(&build_parameters(&task, doc.catalog()));
    assert_eq!(first, second);
}

#[test]
fn test_diamond_sub_option_merged_once() {
    let doc = document();
    let res = resolve_traced(&json!({}), &[Selection::select("Root", 0)], &[], doc.catalog());

    assert_eq!(res.merged.iter().filter(|n| *n == "Shared").count(), 1);
    assert_eq!(res.merged, vec!["Left", "Shared", "Right"]);
    // Right 的覆盖在 Shared 之后，但不会再次合并 Shared
    assert_eq!(res.document["FightEntry"]["next"], json!(["Done"]));
    assert_eq!(res.document["FightEntry"]["times"], json!(1));
}

#[test]
fn test_type_replaced_and_param_unioned() {
    let acc = json!({"recognition": {"type": "A", "param": {"a": 1}}});
    let over = json!({"recognition": {"type": "B", "param": {"b": 2}}});
    assert_eq!(
        merge_node(&acc, &over),
        json!({"recognition": {"type": "B", "param": {"a": 1, "b": 2}}})
    );
}

#[test]
fn test_default_task_keeps_sibling_params() {
    let doc = document();
    let spec = doc.tasks_for_resource("Official").remove(0);
    let out = build_parameters(&TaskInstance::with_defaults(spec, doc.catalog()), doc.catalog());

    // delay 被 Left 覆盖，target 保留；Shared 只换 type
    assert_eq!(
        out["FightEntry"]["action"],
        json!({"type": "Swipe", "param": {"target": [0, 0, 1, 1], "delay": 300}})
    );
}

#[test]
fn test_explicit_null_renders_null_everywhere() {
    let doc = document();
    let out = resolve(
        &json!({}),
        &[Selection::input("Stage", [("stage", EXPLICIT_NULL)])],
        &[],
        doc.catalog(),
    );
    assert_eq!(out["StageNode"]["text"], Value::Null);
    assert_eq!(out["StageNode"]["all"], json!([null, "x"]));
    assert_eq!(out["StageNode"]["limit"], json!(3));
}

#[test]
fn test_tasks_without_entry_are_not_loaded() {
    let doc = document();
    let names: Vec<_> = doc.tasks_for_resource("Official").iter().map(|t| t.name.clone()).collect();
    assert_eq!(names, vec!["Fight"]);
}
