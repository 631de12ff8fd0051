//! JSON persistence of status documents.
//!
//! Every operation reads, mutates and writes; nothing is cached across calls.
//! Writes go to a temporary sibling file that is then renamed over the target,
//! so readers observe either the old or the new document, never a partial one.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::types::{Phase, ResearchFlowStatus, SubFlow, SubflowStatus, UNMATERIALIZED_DATETIME};
use crate::error::{read_error, FlowError, Result};
use crate::layout::{Layout, SubflowKey, PREPARATION_SEQ};

/// Phases of a freshly initialised research flow, in order.
pub const DEFAULT_PHASES: [&str; 4] = ["plan", "experiment", "analysis", "report"];

/// Read and decode a JSON document.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| read_error(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| FlowError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically replace `path` with `contents`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    let tmp_path = tmp_sibling(path);
    std::fs::write(&tmp_path, contents)
        .map_err(|e| FlowError::io(format!("Failed to write {}", tmp_path.display()), e))?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(FlowError::io(
            format!("Failed to finalize {}", path.display()),
            e,
        ));
    }
    Ok(())
}

/// Pretty-print `value` and atomically write it to `path`.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| FlowError::Internal(format!("Failed to serialize {}: {}", path.display(), e)))?;
    write_atomic(path, &data)
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Store for the research-flow and subflow status documents.
#[derive(Debug, Clone)]
pub struct StatusStore {
    layout: Layout,
}

impl StatusStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Research-flow status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn read_rf(&self) -> Result<ResearchFlowStatus> {
        let path = self.layout.research_flow_status();
        let rf: ResearchFlowStatus = read_json(&path)?;
        rf.validate()?;
        Ok(rf)
    }

    pub fn write_rf(&self, rf: &ResearchFlowStatus) -> Result<()> {
        rf.validate()?;
        let mut sorted = rf.clone();
        sorted.phases.sort_by_key(|p| p.seq_number);
        write_json(&self.layout.research_flow_status(), &sorted)
    }

    /// Write a fresh research flow unless one already exists.
    ///
    /// The preparation subflow is recorded but left unmaterialised until first
    /// access (see `SubflowManager::materialize_preparation`).
    pub fn init_research_flow(&self, phase_names: &[&str]) -> Result<ResearchFlowStatus> {
        let path = self.layout.research_flow_status();
        if path.exists() {
            return self.read_rf();
        }
        let Some(prep_name) = phase_names.first() else {
            return Err(FlowError::Consistency(
                "a research flow needs at least the preparation phase".to_string(),
            ));
        };

        let prep_id = Uuid::new_v4().to_string();
        let prep_key = SubflowKey::new(PREPARATION_SEQ, prep_name, &prep_id);
        let preparation = SubFlow {
            id: prep_id.clone(),
            name: prep_name.to_string(),
            data_dir: prep_name.to_string(),
            link: self.layout.subflow_link(prep_key),
            parent_ids: Vec::new(),
            create_datetime: UNMATERIALIZED_DATETIME,
        };

        let phases = phase_names
            .iter()
            .enumerate()
            .map(|(i, name)| Phase {
                seq_number: i as u32 + 1,
                name: name.to_string(),
                sub_flows: if i == 0 {
                    vec![preparation.clone()]
                } else {
                    Vec::new()
                },
            })
            .collect();

        let rf = ResearchFlowStatus { phases };
        self.write_rf(&rf)?;
        tracing::info!(path = %path.display(), "Initialised research flow status");
        Ok(rf)
    }

    /// Phase names in `seq_number` order.
    pub fn list_phases(&self) -> Result<Vec<String>> {
        let mut phases = self.read_rf()?.phases;
        phases.sort_by_key(|p| p.seq_number);
        Ok(phases.into_iter().map(|p| p.name).collect())
    }

    pub fn list_subflow_ids(&self, phase_name: &str) -> Result<Vec<String>> {
        let rf = self.read_rf()?;
        let phase = rf
            .phase_by_name(phase_name)
            .ok_or_else(|| FlowError::input("unknown_phase"))?;
        Ok(phase.sub_flows.iter().map(|s| s.id.clone()).collect())
    }

    pub fn data_dir_of(&self, phase_name: &str, id: &str) -> Result<String> {
        let rf = self.read_rf()?;
        rf.phase_by_name(phase_name)
            .and_then(|p| p.subflow(id))
            .map(|s| s.data_dir.clone())
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))
    }

    pub fn name_and_dir_of(&self, phase_seq: u32, id: &str) -> Result<(String, String)> {
        let rf = self.read_rf()?;
        rf.phase(phase_seq)
            .and_then(|p| p.subflow(id))
            .map(|s| (s.name.clone(), s.data_dir.clone()))
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))
    }

    /// `(seq_number, phase name)` of the phase holding subflow `id`.
    pub fn phase_of(&self, id: &str) -> Result<(u32, String)> {
        let rf = self.read_rf()?;
        rf.find_subflow(id)
            .map(|(p, _)| (p.seq_number, p.name.clone()))
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))
    }

    /// Issue a fresh subflow id.
    ///
    /// A collision with an existing id is an invariant violation.
    pub fn issue_subflow_id(&self, rf: &ResearchFlowStatus) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        if rf.contains_id(&id) {
            return Err(FlowError::Internal(format!(
                "issued subflow id {} already exists",
                id
            )));
        }
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subflow status
    // ─────────────────────────────────────────────────────────────────────────

    pub fn read_sf(&self, path: &Path) -> Result<SubflowStatus> {
        let sf: SubflowStatus = read_json(path)?;
        sf.validate()?;
        Ok(sf)
    }

    pub fn write_sf(&self, path: &Path, sf: &SubflowStatus) -> Result<()> {
        sf.validate()?;
        write_json(path, sf)
    }

    pub fn read_subflow_status(&self, key: SubflowKey<'_>) -> Result<SubflowStatus> {
        self.read_sf(&self.layout.subflow_status(key))
    }

    pub fn write_subflow_status(&self, key: SubflowKey<'_>, sf: &SubflowStatus) -> Result<()> {
        self.write_sf(&self.layout.subflow_status(key), sf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::types::fixtures::*;

    fn store() -> (tempfile::TempDir, StatusStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StatusStore::new(Layout::new(temp.path()));
        (temp, store)
    }

    #[test]
    fn missing_research_flow_is_file_not_found() {
        let (_temp, store) = store();
        assert!(matches!(store.read_rf(), Err(FlowError::FileNotFound(_))));
    }

    #[test]
    fn malformed_research_flow_is_decode_error() {
        let (_temp, store) = store();
        let path = store.layout().research_flow_status();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(store.read_rf(), Err(FlowError::Decode { .. })));
    }

    #[test]
    fn write_then_read_is_byte_exact() {
        let (_temp, store) = store();
        let mut rf = research_flow();
        rf.phase_mut(2)
            .unwrap()
            .sub_flows
            .push(subflow("a", "Exp A", "expA", &["prep"]));
        store.write_rf(&rf).unwrap();
        let path = store.layout().research_flow_status();
        let first = std::fs::read(&path).unwrap();

        let loaded = store.read_rf().unwrap();
        assert_eq!(loaded, rf);
        store.write_rf(&loaded).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_write_leaves_previous_contents() {
        let (_temp, store) = store();
        let rf = research_flow();
        store.write_rf(&rf).unwrap();

        let mut broken = rf.clone();
        broken
            .phase_mut(2)
            .unwrap()
            .sub_flows
            .push(subflow("x", "X", "x", &["missing"]));
        assert!(store.write_rf(&broken).is_err());
        assert_eq!(store.read_rf().unwrap(), rf);
        assert!(!tmp_sibling(&store.layout().research_flow_status()).exists());
    }

    #[test]
    fn init_creates_unmaterialized_preparation() {
        let (_temp, store) = store();
        let rf = store.init_research_flow(&DEFAULT_PHASES).unwrap();
        assert_eq!(rf.phases.len(), 4);
        let prep = rf.preparation().unwrap();
        assert_eq!(prep.sub_flows.len(), 1);
        assert_eq!(prep.sub_flows[0].create_datetime, UNMATERIALIZED_DATETIME);
        assert_eq!(store.list_phases().unwrap(), DEFAULT_PHASES.to_vec());

        // A second init returns the existing document.
        let again = store.init_research_flow(&DEFAULT_PHASES).unwrap();
        assert_eq!(again, rf);
    }

    #[test]
    fn lookups_resolve_subflows() {
        let (_temp, store) = store();
        let mut rf = research_flow();
        rf.phase_mut(2)
            .unwrap()
            .sub_flows
            .push(subflow("a", "Exp A", "expA", &["prep"]));
        store.write_rf(&rf).unwrap();

        assert_eq!(store.list_subflow_ids("experiment").unwrap(), vec!["a"]);
        assert_eq!(store.data_dir_of("experiment", "a").unwrap(), "expA");
        assert_eq!(
            store.name_and_dir_of(2, "a").unwrap(),
            ("Exp A".to_string(), "expA".to_string())
        );
        assert!(matches!(
            store.name_and_dir_of(3, "a"),
            Err(FlowError::NotFoundSubflowData(_))
        ));
    }

    #[test]
    fn issued_ids_are_fresh_uuids() {
        let (_temp, store) = store();
        let rf = research_flow();
        let id = store.issue_subflow_id(&rf).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert!(!rf.contains_id(&id));
    }

    #[test]
    fn subflow_status_round_trip() {
        let (temp, store) = store();
        let sf = subflow_status(vec![task("a", &[], true), task("b", &["a"], false)], &[]);
        let path = temp.path().join("status.json");
        store.write_sf(&path, &sf).unwrap();
        assert_eq!(store.read_sf(&path).unwrap(), sf);
    }
}
