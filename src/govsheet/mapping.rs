//! Governance-sheet to task-activation mapping.
//!
//! The task mapping is a JSON tree interpreted against the governance sheet.
//! Leaves are arrays of cases:
//!
//! ```json
//! { "dmp": { "storage": [
//!     { "value": "cloud", "display": ["upload"], "hide": ["archive"] },
//!     { "value": "local", "display": ["archive"], "hide": ["upload"] }
//! ] } }
//! ```
//!
//! Object values recurse into the matching sub-object of the sheet; a case
//! matches when its `value` equals the sheet value at the same key.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::status::SubflowStatus;
use crate::task_state;

/// Task id → active flag produced by a mapping run.
pub type Activation = BTreeMap<String, bool>;

/// Interpret `task_mapping` against `govsheet`.
///
/// Within one key `display` wins over `hide`; across keys results are OR-ed.
pub fn mapping(task_mapping: &Value, govsheet: &Value) -> Result<Activation> {
    let mut acc = Activation::new();
    walk(task_mapping, govsheet, "", &mut acc)?;
    Ok(acc)
}

fn walk(rules: &Value, sheet: &Value, path: &str, acc: &mut Activation) -> Result<()> {
    let Some(rules) = rules.as_object() else {
        return Err(FlowError::Consistency(format!(
            "task mapping at '{}' must be an object",
            display_path(path)
        )));
    };

    for (key, rule) in rules {
        let key_path = format!("{}/{}", path, key);
        let sheet_value = sheet.get(key).unwrap_or(&Value::Null);
        match rule {
            Value::Array(cases) => {
                let local = match_cases(cases, sheet_value, &key_path)?;
                or_merge(acc, local);
            }
            Value::Object(_) => {
                let mut nested = Activation::new();
                walk(rule, sheet_value, &key_path, &mut nested)?;
                or_merge(acc, nested);
            }
            _ => {
                return Err(FlowError::Consistency(format!(
                    "task mapping at '{}' must be a list of cases or an object",
                    key_path
                )))
            }
        }
    }
    Ok(())
}

fn match_cases(cases: &[Value], sheet_value: &Value, path: &str) -> Result<Activation> {
    let mut local = Activation::new();
    let Some(case) = cases.iter().find(|c| c.get("value") == Some(sheet_value)) else {
        return Ok(local);
    };

    for id in id_list(case, "display", path)? {
        local.insert(id, true);
    }
    for id in id_list(case, "hide", path)? {
        local.entry(id).or_insert(false);
    }
    Ok(local)
}

fn id_list(case: &Value, field: &str, path: &str) -> Result<Vec<String>> {
    match case.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    FlowError::Consistency(format!(
                        "task mapping at '{}': '{}' entries must be task ids",
                        path, field
                    ))
                })
            })
            .collect(),
        Some(_) => Err(FlowError::Consistency(format!(
            "task mapping at '{}': '{}' must be a list",
            path, field
        ))),
    }
}

fn or_merge(acc: &mut Activation, other: Activation) {
    for (id, active) in other {
        let entry = acc.entry(id).or_insert(false);
        *entry = *entry || active;
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Apply an activation map to a subflow's tasks.
///
/// Tasks absent from the map keep their template default. Any task that some
/// other task depends on is forced active, whatever the map says about it or
/// its dependents. Task state is recomputed afterwards.
pub fn apply_activation(sf: &mut SubflowStatus, activation: &Activation) -> Result<()> {
    let mut desired: HashMap<String, bool> = sf
        .tasks
        .iter()
        .map(|t| {
            let active = activation.get(&t.id).copied().unwrap_or(t.active);
            (t.id.clone(), active)
        })
        .collect();

    for task in &sf.tasks {
        for dep in task.dependent_task_ids.iter().filter(|d| **d != task.id) {
            if let Some(flag) = desired.get_mut(dep) {
                *flag = true;
            }
        }
    }

    let ids: Vec<String> = sf.tasks.iter().map(|t| t.id.clone()).collect();
    for id in ids {
        let active = desired.get(&id).copied().unwrap_or(true);
        task_state::set_active(sf, &id, active)?;
    }
    task_state::recompute(sf);
    Ok(())
}

/// Check that `activation` never deactivates a required task of `sf`.
pub fn check_required(sf: &SubflowStatus, activation: &Activation) -> Result<()> {
    for task in sf.tasks.iter().filter(|t| t.is_required) {
        if activation.get(&task.id) == Some(&false) {
            return Err(FlowError::Consistency(format!(
                "task mapping deactivates required task {}",
                task.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::types::fixtures::{subflow_status, task};
    use serde_json::json;

    fn storage_rules() -> Value {
        json!({
            "storage": [
                { "value": "cloud", "display": ["upload"], "hide": ["archive"] },
                { "value": "local", "display": ["archive"], "hide": ["upload"] }
            ]
        })
    }

    #[test]
    fn primitive_case_matches_by_equality() {
        let result = mapping(&storage_rules(), &json!({ "storage": "cloud" })).unwrap();
        assert_eq!(result.get("upload"), Some(&true));
        assert_eq!(result.get("archive"), Some(&false));
    }

    #[test]
    fn unmatched_key_leaves_no_entries() {
        let result = mapping(&storage_rules(), &json!({ "storage": "tape" })).unwrap();
        assert!(result.is_empty());
        let result = mapping(&storage_rules(), &json!({})).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn display_wins_within_one_key() {
        let rules = json!({
            "mode": [ { "value": 1, "display": ["a"], "hide": ["a", "b"] } ]
        });
        let result = mapping(&rules, &json!({ "mode": 1 })).unwrap();
        assert_eq!(result.get("a"), Some(&true));
        assert_eq!(result.get("b"), Some(&false));
    }

    #[test]
    fn later_keys_or_combine() {
        let rules = json!({
            "first": [ { "value": true, "display": ["a"] } ],
            "second": [ { "value": true, "hide": ["a", "b"] } ]
        });
        let result = mapping(&rules, &json!({ "first": true, "second": true })).unwrap();
        assert_eq!(result.get("a"), Some(&true));
        assert_eq!(result.get("b"), Some(&false));
    }

    #[test]
    fn object_rules_recurse_into_sheet() {
        let rules = json!({ "dmp": storage_rules() });
        let result = mapping(&rules, &json!({ "dmp": { "storage": "local" } })).unwrap();
        assert_eq!(result.get("archive"), Some(&true));
        assert_eq!(result.get("upload"), Some(&false));
    }

    #[test]
    fn object_case_values_compare_structurally() {
        let rules = json!({
            "policy": [ { "value": { "level": 2 }, "display": ["review"] } ]
        });
        let result = mapping(&rules, &json!({ "policy": { "level": 2 } })).unwrap();
        assert_eq!(result.get("review"), Some(&true));
    }

    #[test]
    fn malformed_rules_are_rejected() {
        assert!(mapping(&json!({ "k": 3 }), &json!({})).is_err());
        let rules = json!({ "k": [ { "value": 1, "display": "a" } ] });
        assert!(mapping(&rules, &json!({ "k": 1 })).is_err());
    }

    #[test]
    fn activation_forces_dependencies_active() {
        let mut sf = subflow_status(
            vec![task("a", &[], false), task("b", &["a"], false), task("c", &["b"], false)],
            &[],
        );
        let mut activation = Activation::new();
        activation.insert("a".into(), false);
        activation.insert("b".into(), false);
        activation.insert("c".into(), true);
        apply_activation(&mut sf, &activation).unwrap();
        assert!(sf.tasks.iter().all(|t| t.active));
    }

    #[test]
    fn dependency_stays_active_when_its_dependent_is_hidden_too() {
        let mut sf = subflow_status(vec![task("a", &[], false), task("b", &["a"], false)], &[]);
        let mut activation = Activation::new();
        activation.insert("a".into(), false);
        activation.insert("b".into(), false);
        apply_activation(&mut sf, &activation).unwrap();
        assert!(sf.task("a").unwrap().active);
        assert!(!sf.task("a").unwrap().disabled);
        assert!(!sf.task("b").unwrap().active);
    }

    #[test]
    fn activation_disables_unselected_optional_tasks() {
        let mut sf = subflow_status(vec![task("a", &[], true), task("b", &[], false)], &["b"]);
        let mut activation = Activation::new();
        activation.insert("b".into(), false);
        apply_activation(&mut sf, &activation).unwrap();
        let b = sf.task("b").unwrap();
        assert!(!b.active);
        assert!(b.disabled);
        assert!(sf.task("a").unwrap().active);
    }

    #[test]
    fn deactivating_required_task_is_fatal() {
        let sf = subflow_status(vec![task("a", &[], true)], &[]);
        let mut activation = Activation::new();
        activation.insert("a".into(), false);
        assert!(check_required(&sf, &activation).is_err());
        let mut sf = sf;
        assert!(apply_activation(&mut sf, &activation).is_err());
    }
}
