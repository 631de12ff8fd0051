//! Status document types.
//!
//! Two documents are persisted as JSON:
//! - the research-flow status (phases → subflows), one per workspace
//! - the subflow status (tasks of one subflow), one per subflow
//!
//! # Invariants
//! - Subflow ids are unique across the research flow
//! - Within a phase, subflow names and data directories are unique
//! - Parents of a subflow live in phases with a strictly smaller `seq_number`
//! - Every task id appears in exactly one of `order.sequence` / `order.whenever`
//! - Task dependencies form a DAG

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::layout::PREPARATION_SEQ;

/// Sentinel `create_datetime` of the preparation subflow before first access.
pub const UNMATERIALIZED_DATETIME: i64 = -1;

/// Maximum length of a subflow display name, in characters.
pub const MAX_SUBFLOW_NAME_CHARS: usize = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Research-flow status
// ─────────────────────────────────────────────────────────────────────────────

/// A user-visible unit of work within a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubFlow {
    /// Opaque UUIDv4 string
    pub id: String,
    /// Display name
    pub name: String,
    /// Directory name under `data/<phase>/`
    pub data_dir: String,
    /// Menu notebook path relative to `researchflow/`
    pub link: String,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    /// Unix seconds, or [`UNMATERIALIZED_DATETIME`]
    pub create_datetime: i64,
}

/// A named, numbered stage of the research project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub seq_number: u32,
    pub name: String,
    #[serde(rename = "sub_flow_data", default)]
    pub sub_flows: Vec<SubFlow>,
}

impl Phase {
    pub fn is_preparation(&self) -> bool {
        self.seq_number == PREPARATION_SEQ
    }

    pub fn subflow(&self, id: &str) -> Option<&SubFlow> {
        self.sub_flows.iter().find(|s| s.id == id)
    }

    pub fn subflow_mut(&mut self, id: &str) -> Option<&mut SubFlow> {
        self.sub_flows.iter_mut().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchFlowStatus {
    #[serde(rename = "research_flow_phase_data")]
    pub phases: Vec<Phase>,
}

impl ResearchFlowStatus {
    pub fn phase(&self, seq_number: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.seq_number == seq_number)
    }

    pub fn phase_mut(&mut self, seq_number: u32) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.seq_number == seq_number)
    }

    pub fn phase_by_name(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn preparation(&self) -> Option<&Phase> {
        self.phase(PREPARATION_SEQ)
    }

    /// Locate a subflow across all phases.
    pub fn find_subflow(&self, id: &str) -> Option<(&Phase, &SubFlow)> {
        self.phases
            .iter()
            .find_map(|p| p.subflow(id).map(|s| (p, s)))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.find_subflow(id).is_some()
    }

    /// Validate the structural invariants of the document.
    pub fn validate(&self) -> Result<()> {
        let mut seqs: Vec<u32> = self.phases.iter().map(|p| p.seq_number).collect();
        seqs.sort_unstable();
        for (i, seq) in seqs.iter().enumerate() {
            if *seq as usize != i + 1 {
                return Err(FlowError::Consistency(format!(
                    "phase seq_numbers must be dense from 1, found {:?}",
                    seqs
                )));
            }
        }

        match self.preparation() {
            Some(prep) if prep.sub_flows.len() == 1 => {}
            Some(prep) => {
                return Err(FlowError::Consistency(format!(
                    "preparation phase must hold exactly one subflow, found {}",
                    prep.sub_flows.len()
                )))
            }
            None => {
                return Err(FlowError::Consistency(
                    "preparation phase is missing".to_string(),
                ))
            }
        }

        let mut phase_of: HashMap<&str, u32> = HashMap::new();
        for phase in &self.phases {
            let mut names = HashSet::new();
            let mut dirs = HashSet::new();
            for sub in &phase.sub_flows {
                if phase_of.insert(sub.id.as_str(), phase.seq_number).is_some() {
                    return Err(FlowError::Consistency(format!(
                        "duplicate subflow id {}",
                        sub.id
                    )));
                }
                if !names.insert(sub.name.as_str()) {
                    return Err(FlowError::Consistency(format!(
                        "duplicate subflow name '{}' in phase {}",
                        sub.name, phase.name
                    )));
                }
                if !dirs.insert(sub.data_dir.as_str()) {
                    return Err(FlowError::Consistency(format!(
                        "duplicate data_dir '{}' in phase {}",
                        sub.data_dir, phase.name
                    )));
                }
            }
        }

        for phase in &self.phases {
            for sub in &phase.sub_flows {
                for parent in &sub.parent_ids {
                    match phase_of.get(parent.as_str()) {
                        Some(parent_seq) if *parent_seq < phase.seq_number => {}
                        Some(_) => {
                            return Err(FlowError::Consistency(format!(
                                "parent {} of subflow {} is not in an earlier phase",
                                parent, sub.id
                            )))
                        }
                        None => {
                            return Err(FlowError::Consistency(format!(
                                "parent {} of subflow {} does not exist",
                                parent, sub.id
                            )))
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subflow status
// ─────────────────────────────────────────────────────────────────────────────

/// Status of a task.
///
/// # State Machine
/// ```text
/// Unfeasible -> Unexecuted -> Doing -> Done
///                               ^        |
///                               └────────┘  (re-run)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// A dependency has never completed
    Unfeasible,
    /// Executable, not yet started
    Unexecuted,
    /// At least one environment is running the task
    Doing,
    /// Finished and no environment is running it
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unfeasible => "unfeasible",
            Self::Unexecuted => "unexecuted",
            Self::Doing => "doing",
            Self::Done => "done",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Matches a notebook template name
    pub name: String,
    pub is_multiple: bool,
    pub is_required: bool,
    pub completed_count: u32,
    #[serde(default)]
    pub dependent_task_ids: Vec<String>,
    pub status: TaskStatus,
    /// Environments currently running this task (set semantics)
    #[serde(default)]
    pub execution_environments: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Presentation order of a subflow's tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOrder {
    /// Tasks whose order is prescribed
    #[serde(default)]
    pub sequence: Vec<String>,
    /// Tasks executable in any order
    #[serde(default)]
    pub whenever: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubflowStatus {
    pub is_completed: bool,
    #[serde(default)]
    pub order: TaskOrder,
    pub tasks: Vec<Task>,
}

impl SubflowStatus {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Validate task ids, order membership and dependency acyclicity.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(FlowError::Consistency(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
        }

        let mut ordered = HashSet::new();
        for id in self.order.sequence.iter().chain(self.order.whenever.iter()) {
            if !ids.contains(id.as_str()) {
                return Err(FlowError::Consistency(format!(
                    "order references unknown task {}",
                    id
                )));
            }
            if !ordered.insert(id.as_str()) {
                return Err(FlowError::Consistency(format!(
                    "task {} appears more than once in order",
                    id
                )));
            }
        }
        if let Some(missing) = ids.iter().find(|id| !ordered.contains(*id)) {
            return Err(FlowError::Consistency(format!(
                "task {} is missing from order",
                missing
            )));
        }

        for task in &self.tasks {
            for dep in &task.dependent_task_ids {
                if !ids.contains(dep.as_str()) {
                    return Err(FlowError::Consistency(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }

        if let Some(task_id) = find_dependency_cycle(&self.tasks) {
            return Err(FlowError::Consistency(format!(
                "dependency cycle through task {}",
                task_id
            )));
        }

        Ok(())
    }
}

/// Return a task id on a dependency cycle, if any.
fn find_dependency_cycle(tasks: &[Task]) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let deps: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependent_task_ids.as_slice()))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for task in tasks {
        if marks.contains_key(task.id.as_str()) {
            continue;
        }
        // Iterative DFS: (node, next dependency index)
        let mut stack: Vec<(&str, usize)> = vec![(task.id.as_str(), 0)];
        marks.insert(task.id.as_str(), Mark::Visiting);
        while let Some((node, idx)) = stack.pop() {
            let node_deps = deps.get(node).copied().unwrap_or(&[]);
            if idx < node_deps.len() {
                stack.push((node, idx + 1));
                let next = node_deps[idx].as_str();
                match marks.get(next) {
                    Some(Mark::Visiting) => return Some(next.to_string()),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        stack.push((next, 0));
                    }
                }
            } else {
                marks.insert(node, Mark::Done);
            }
        }
    }
    None
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn task_status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Unfeasible).unwrap();
        assert_eq!(json, "\"unfeasible\"");
    }

    #[test]
    fn subflow_status_field_order_matches_document() {
        let sf = subflow_status(vec![task("a", &[], true)], &[]);
        let json = serde_json::to_string(&sf).unwrap();
        let order_pos = json.find("\"order\"").unwrap();
        let tasks_pos = json.find("\"tasks\"").unwrap();
        assert!(json.starts_with("{\"is_completed\""));
        assert!(order_pos < tasks_pos);
    }

    #[test]
    fn validate_rejects_cycle() {
        let sf = subflow_status(
            vec![task("a", &["c"], true), task("b", &["a"], true), task("c", &["b"], true)],
            &[],
        );
        let err = sf.validate().unwrap_err();
        assert!(matches!(err, FlowError::Consistency(msg) if msg.contains("cycle")));
    }

    #[test]
    fn validate_rejects_task_in_both_groups() {
        let mut sf = subflow_status(vec![task("a", &[], true)], &[]);
        sf.order.whenever.push("a".to_string());
        assert!(sf.validate().is_err());
    }

    #[test]
    fn validate_rejects_task_missing_from_order() {
        let mut sf = subflow_status(vec![task("a", &[], true), task("b", &[], false)], &[]);
        sf.order.sequence.retain(|id| id != "b");
        assert!(sf.validate().is_err());
    }

    #[test]
    fn validate_accepts_diamond() {
        let sf = subflow_status(
            vec![
                task("a", &[], true),
                task("b", &["a"], true),
                task("c", &["a"], false),
                task("d", &["b", "c"], true),
            ],
            &["c"],
        );
        assert!(sf.validate().is_ok());
    }

    #[test]
    fn research_flow_rejects_parent_in_same_phase() {
        let mut rf = research_flow();
        let phase = rf.phase_mut(2).unwrap();
        phase.sub_flows.push(subflow("a", "A", "a", &["prep"]));
        phase.sub_flows.push(subflow("b", "B", "b", &["a"]));
        assert!(rf.validate().is_err());
    }

    #[test]
    fn research_flow_rejects_duplicate_data_dir() {
        let mut rf = research_flow();
        let phase = rf.phase_mut(2).unwrap();
        phase.sub_flows.push(subflow("a", "A", "same", &[]));
        phase.sub_flows.push(subflow("b", "B", "same", &[]));
        assert!(rf.validate().is_err());
    }

    #[test]
    fn research_flow_json_uses_document_keys() {
        let rf = research_flow();
        let value = serde_json::to_value(&rf).unwrap();
        assert!(value["research_flow_phase_data"][0]["sub_flow_data"].is_array());
        assert_eq!(value["research_flow_phase_data"][0]["seq_number"], 1);
    }
}
