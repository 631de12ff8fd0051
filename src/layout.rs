//! Workspace layout.
//!
//! Maps logical identities (phase, subflow id, data directory) to locations
//! under the workspace root. Every function here is pure: no I/O happens.
//!
//! ```text
//! <root>/
//! ├── data_governance/
//! │   ├── base/subflow/<phase>/      # menu, status, property templates
//! │   ├── base/task/                 # task notebook originals
//! │   ├── researchflow/
//! │   │   ├── research_flow_status.json
//! │   │   ├── <phase>/<subflow_id>/  # menu, status, property per subflow
//! │   │   ├── plan/                  # preparation subflow
//! │   │   ├── task_mapping.json
//! │   │   ├── custom_gov_sheet.json
//! │   │   └── .gov-sheet-rf
//! │   ├── working/researchflow/<phase>/<subflow_id>/task/
//! │   ├── working/setup_completed.txt
//! │   └── log/researchflow/<env_id>/
//! ├── data/<phase>/<data_dir>/
//! ├── .log/                          # archives, pending-apply marker
//! └── .vault/                        # credential vault
//! ```

use std::path::{Path, PathBuf};

/// Sequence number of the reserved preparation phase.
pub const PREPARATION_SEQ: u32 = 1;

/// File holding the research-flow status document.
pub const RESEARCH_FLOW_STATUS_FILE: &str = "research_flow_status.json";

/// Directory under `.log/` holding superseded governance sheets.
pub const GOV_SHEET_ARCHIVE_DIR: &str = "gov-sheet-rf";

/// Placeholder in the menu template replaced with the subflow name.
pub const SUBFLOW_NAME_PLACEHOLDER: &str = ":subflow_name";

/// Reserved files of a phase template bundle, copied into every subflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedFile {
    Menu,
    Status,
    Property,
}

impl ReservedFile {
    /// The prepare file list used by subflow creation.
    pub const ALL: [ReservedFile; 3] = [Self::Menu, Self::Status, Self::Property];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Menu => "menu",
            Self::Status => "status",
            Self::Property => "property",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Menu => "menu.ipynb",
            Self::Status => "status.json",
            Self::Property => "property.json",
        }
    }
}

/// Identity of one subflow on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubflowKey<'a> {
    pub phase_seq: u32,
    pub phase_name: &'a str,
    pub id: &'a str,
}

impl<'a> SubflowKey<'a> {
    pub fn new(phase_seq: u32, phase_name: &'a str, id: &'a str) -> Self {
        Self {
            phase_seq,
            phase_name,
            id,
        }
    }

    pub fn is_preparation(&self) -> bool {
        self.phase_seq == PREPARATION_SEQ
    }
}

/// Canonical paths of a research-flow workspace.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_governance(&self) -> PathBuf {
        self.root.join("data_governance")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Templates
    // ─────────────────────────────────────────────────────────────────────────

    pub fn base_subflow_dir(&self, phase_name: &str) -> PathBuf {
        self.data_governance()
            .join("base")
            .join("subflow")
            .join(phase_name)
    }

    pub fn base_template(&self, phase_name: &str, file: ReservedFile) -> PathBuf {
        self.base_subflow_dir(phase_name).join(file.file_name())
    }

    pub fn base_task_dir(&self) -> PathBuf {
        self.data_governance().join("base").join("task")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status documents
    // ─────────────────────────────────────────────────────────────────────────

    pub fn researchflow_dir(&self) -> PathBuf {
        self.data_governance().join("researchflow")
    }

    pub fn research_flow_status(&self) -> PathBuf {
        self.researchflow_dir().join(RESEARCH_FLOW_STATUS_FILE)
    }

    /// Directory holding the subflow's menu, status and property documents.
    ///
    /// The preparation subflow lives directly under its phase directory.
    pub fn subflow_dir(&self, key: SubflowKey<'_>) -> PathBuf {
        let phase_dir = self.researchflow_dir().join(key.phase_name);
        if key.is_preparation() {
            phase_dir
        } else {
            phase_dir.join(key.id)
        }
    }

    pub fn subflow_file(&self, key: SubflowKey<'_>, file: ReservedFile) -> PathBuf {
        self.subflow_dir(key).join(file.file_name())
    }

    pub fn subflow_status(&self, key: SubflowKey<'_>) -> PathBuf {
        self.subflow_file(key, ReservedFile::Status)
    }

    pub fn menu(&self, key: SubflowKey<'_>) -> PathBuf {
        self.subflow_file(key, ReservedFile::Menu)
    }

    /// Link stored in the research-flow document, relative to `researchflow/`.
    pub fn subflow_link(&self, key: SubflowKey<'_>) -> String {
        if key.is_preparation() {
            format!("{}/{}", key.phase_name, ReservedFile::Menu.file_name())
        } else {
            format!(
                "{}/{}/{}",
                key.phase_name,
                key.id,
                ReservedFile::Menu.file_name()
            )
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Governance
    // ─────────────────────────────────────────────────────────────────────────

    pub fn task_mapping(&self) -> PathBuf {
        self.researchflow_dir().join("task_mapping.json")
    }

    pub fn gov_sheet(&self) -> PathBuf {
        self.researchflow_dir().join(".gov-sheet-rf")
    }

    pub fn custom_gov_sheet(&self) -> PathBuf {
        self.researchflow_dir().join("custom_gov_sheet.json")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Working tree
    // ─────────────────────────────────────────────────────────────────────────

    pub fn working_dir(&self) -> PathBuf {
        self.data_governance().join("working")
    }

    pub fn working_subflow_dir(&self, key: SubflowKey<'_>) -> PathBuf {
        let phase_dir = self.working_dir().join("researchflow").join(key.phase_name);
        if key.is_preparation() {
            phase_dir
        } else {
            phase_dir.join(key.id)
        }
    }

    pub fn working_task_dir(&self, key: SubflowKey<'_>) -> PathBuf {
        self.working_subflow_dir(key).join("task")
    }

    pub fn task_notebook(&self, key: SubflowKey<'_>, task_name: &str) -> PathBuf {
        self.working_task_dir(key)
            .join(format!("{}.ipynb", task_name))
    }

    pub fn setup_completed(&self) -> PathBuf {
        self.working_dir().join("setup_completed.txt")
    }

    pub fn activity_log_dir(&self, env_id: &str) -> PathBuf {
        self.data_governance()
            .join("log")
            .join("researchflow")
            .join(env_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User data and archives
    // ─────────────────────────────────────────────────────────────────────────

    pub fn data_dir(&self, phase_name: &str, data_dir: &str) -> PathBuf {
        self.root.join("data").join(phase_name).join(data_dir)
    }

    pub fn archive_root(&self) -> PathBuf {
        self.root.join(".log")
    }

    pub fn subflow_archive_dir(&self, phase_name: &str, id: &str) -> PathBuf {
        self.archive_root().join(phase_name).join(id)
    }

    pub fn subflow_archive(&self, phase_name: &str, id: &str, timestamp: &str) -> PathBuf {
        self.subflow_archive_dir(phase_name, id)
            .join(format!("{}.zip", timestamp))
    }

    pub fn gov_sheet_archive(&self, timestamp: &str) -> PathBuf {
        self.archive_root()
            .join(GOV_SHEET_ARCHIVE_DIR)
            .join(format!("{}.json", timestamp))
    }

    /// Present while a governance apply has written its sheet but not yet
    /// rebuilt every subflow.
    pub fn gov_sheet_pending(&self) -> PathBuf {
        self.archive_root()
            .join(GOV_SHEET_ARCHIVE_DIR)
            .join("pending.json")
    }

    pub fn vault_dir(&self) -> PathBuf {
        self.root.join(".vault")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subflow_paths_nest_phase_and_id() {
        let layout = Layout::new("/ws");
        let key = SubflowKey::new(2, "experiment", "abc");
        assert_eq!(
            layout.subflow_status(key),
            PathBuf::from("/ws/data_governance/researchflow/experiment/abc/status.json")
        );
        assert_eq!(
            layout.task_notebook(key, "collect"),
            PathBuf::from(
                "/ws/data_governance/working/researchflow/experiment/abc/task/collect.ipynb"
            )
        );
        assert_eq!(layout.subflow_link(key), "experiment/abc/menu.ipynb");
    }

    #[test]
    fn preparation_subflow_lives_under_phase_dir() {
        let layout = Layout::new("/ws");
        let key = SubflowKey::new(PREPARATION_SEQ, "plan", "p1");
        assert_eq!(
            layout.subflow_status(key),
            PathBuf::from("/ws/data_governance/researchflow/plan/status.json")
        );
        assert_eq!(layout.subflow_link(key), "plan/menu.ipynb");
    }

    #[test]
    fn archive_paths() {
        let layout = Layout::new("/ws");
        assert_eq!(
            layout.subflow_archive("experiment", "abc", "20240101120000"),
            PathBuf::from("/ws/.log/experiment/abc/20240101120000.zip")
        );
        assert_eq!(
            layout.gov_sheet_archive("20240101120000"),
            PathBuf::from("/ws/.log/gov-sheet-rf/20240101120000.json")
        );
        assert_eq!(
            layout.data_dir("experiment", "expA"),
            PathBuf::from("/ws/data/experiment/expA")
        );
    }

    #[test]
    fn reserved_files_are_the_prepare_list() {
        let names: Vec<&str> = ReservedFile::ALL.iter().map(|f| f.as_str()).collect();
        assert_eq!(names, vec!["menu", "status", "property"]);
    }
}
