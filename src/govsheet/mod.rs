//! Governance-sheet engine.
//!
//! Applying a sheet merges it with the in-repo override, validates it,
//! archives every non-preparation subflow and rebuilds their artifacts so
//! that exactly the tasks selected by the task mapping are active.
//!
//! The recreate pass is not globally atomic. The zip archives are the
//! recovery log. Before the sheet is replaced a pending marker is written,
//! and it is removed only once every subflow has been rebuilt. While the
//! marker exists an apply of the same sheet rebuilds again instead of
//! reporting no change, so an interrupted apply is finished by the next one.

pub mod archive;
pub mod mapping;
pub mod merge;
pub mod schema;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{FlowError, Result};
use crate::layout::{Layout, ReservedFile, SubflowKey};
use crate::remote::{
    CredentialVault, ObjectStore, SchemaProvider, SheetProvider, SyncProgress, SyncReport,
    GOV_SHEET_TOKEN_KEY,
};
use crate::status::{read_json, write_atomic, write_json, StatusStore};
use crate::subflow::{clear_subflow_artifacts, prepare_subflow};
use crate::util::archive_timestamp;

pub use mapping::{apply_activation, check_required, mapping, Activation};
pub use merge::deep_merge;
pub use schema::validate_sheet;

/// Result of [`GovSheetEngine::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The merged sheet equals the persisted one; nothing was touched.
    NoChange,
    /// No subflow needed rebuilding; only the sheet was written.
    Persisted,
    /// Subflows were archived and rebuilt.
    Recreated {
        subflow_ids: Vec<String>,
        archives: Vec<PathBuf>,
    },
}

/// Result of [`GovSheetEngine::fetch_and_apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub outcome: ApplyOutcome,
    pub synced: Option<SyncReport>,
}

/// Remote collaborators used by [`GovSheetEngine::fetch_and_apply`].
pub struct Collaborators<'a> {
    pub schema: &'a dyn SchemaProvider,
    pub sheets: &'a dyn SheetProvider,
    pub vault: &'a dyn CredentialVault,
    pub object_store: Option<&'a dyn ObjectStore>,
}

/// Contents of the pending-apply marker.
#[derive(Debug, Serialize, Deserialize)]
struct PendingApply {
    /// Timestamp of the archives written for the interrupted apply
    timestamp: String,
    subflow_ids: Vec<String>,
}

/// Where the sheet comes from.
#[derive(Debug, Clone)]
pub struct SheetSource {
    pub project: String,
    pub path: String,
}

/// Activation selected by the persisted sheet, if a sheet has been applied.
pub fn current_activation(layout: &Layout) -> Result<Option<Activation>> {
    let sheet_path = layout.gov_sheet();
    let mapping_path = layout.task_mapping();
    if !sheet_path.exists() || !mapping_path.exists() {
        return Ok(None);
    }
    let sheet: Value = read_json(&sheet_path)?;
    let task_mapping: Value = read_json(&mapping_path)?;
    mapping(&task_mapping, &sheet).map(Some)
}

#[derive(Debug, Clone)]
pub struct GovSheetEngine {
    store: StatusStore,
}

impl GovSheetEngine {
    pub fn new(store: StatusStore) -> Self {
        Self { store }
    }

    fn layout(&self) -> &Layout {
        self.store.layout()
    }

    /// The sheet applied last, if any.
    pub fn persisted_sheet(&self) -> Result<Option<Value>> {
        optional_json(&self.layout().gov_sheet())
    }

    /// Merge `remote` with the in-repo override (override wins).
    pub fn merged_sheet(&self, remote: &Value) -> Result<Value> {
        Ok(match optional_json(&self.layout().custom_gov_sheet())? {
            Some(custom) => deep_merge(remote, &custom),
            None => remote.clone(),
        })
    }

    /// Whether an earlier apply was interrupted before every subflow was
    /// rebuilt.
    pub fn has_pending_apply(&self) -> bool {
        self.layout().gov_sheet_pending().exists()
    }

    /// Apply `sheet` to every non-preparation subflow.
    ///
    /// With `schema` the merged sheet is validated first. Cancellation is
    /// checked before each subflow is rebuilt.
    pub fn apply(
        &self,
        sheet: &Value,
        schema: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome> {
        let merged = self.merged_sheet(sheet)?;
        if let Some(schema) = schema {
            validate_sheet(schema, &merged)?;
        }
        let pending = self.pending_apply()?;
        let unchanged = self.persisted_sheet()?.as_ref() == Some(&merged);
        if unchanged && pending.is_none() {
            tracing::info!("Governance sheet unchanged");
            return Ok(ApplyOutcome::NoChange);
        }
        if let Some(p) = &pending {
            tracing::warn!(
                interrupted_at = %p.timestamp,
                subflows = p.subflow_ids.len(),
                "Resuming interrupted governance apply"
            );
        }

        let rf = self.store.read_rf()?;
        let mut phases: Vec<_> = rf.phases.iter().filter(|p| !p.is_preparation()).collect();
        phases.sort_by_key(|p| p.seq_number);
        let current: Vec<(u32, String, String, String)> = phases
            .iter()
            .flat_map(|p| {
                p.sub_flows
                    .iter()
                    .map(move |s| (p.seq_number, p.name.clone(), s.id.clone(), s.name.clone()))
            })
            .collect();

        let sheet_bytes = serde_json::to_vec_pretty(&merged)
            .map_err(|e| FlowError::Internal(format!("Failed to encode sheet: {}", e)))?;
        if current.is_empty() {
            write_atomic(&self.layout().gov_sheet(), &sheet_bytes)?;
            self.clear_pending()?;
            tracing::info!("Persisted governance sheet; no subflows to rebuild");
            return Ok(ApplyOutcome::Persisted);
        }

        let task_mapping = optional_json(&self.layout().task_mapping())?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let activation = mapping(&task_mapping, &merged)?;
        self.check_templates(&current, &activation)?;

        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        let timestamp = archive_timestamp();
        let mut archives = Vec::with_capacity(current.len() + 1);
        for (seq, phase_name, id, _) in &current {
            let key = SubflowKey::new(*seq, phase_name, id);
            archives.push(archive::archive_subflow(self.layout(), key, &timestamp)?);
        }
        if !unchanged {
            if let Some(previous) = archive::archive_previous_sheet(self.layout(), &timestamp)? {
                archives.push(previous);
            }
        }

        let marker = PendingApply {
            timestamp: timestamp.clone(),
            subflow_ids: current.iter().map(|(_, _, id, _)| id.clone()).collect(),
        };
        write_json(&self.layout().gov_sheet_pending(), &marker)?;
        write_atomic(&self.layout().gov_sheet(), &sheet_bytes)?;

        let mut subflow_ids = Vec::with_capacity(current.len());
        for (seq, phase_name, id, name) in &current {
            if cancel.is_cancelled() {
                tracing::warn!(rebuilt = subflow_ids.len(), "Governance apply cancelled");
                return Err(FlowError::Cancelled);
            }
            let key = SubflowKey::new(*seq, phase_name, id);
            clear_subflow_artifacts(self.layout(), key)?;
            prepare_subflow(&self.store, key, name, Some(&activation))?;
            tracing::info!(phase = %phase_name, subflow_id = %id, "Recreated subflow");
            subflow_ids.push(id.clone());
        }
        self.clear_pending()?;

        Ok(ApplyOutcome::Recreated {
            subflow_ids,
            archives,
        })
    }

    /// Download the project's sheet, apply it and sync `researchflow/` to the
    /// object store when one is configured and something changed.
    ///
    /// A rejected token is removed from the vault.
    pub async fn fetch_and_apply(
        &self,
        remote: &Collaborators<'_>,
        source: &SheetSource,
        progress: Option<mpsc::Sender<SyncProgress>>,
        cancel: &CancellationToken,
    ) -> Result<FetchReport> {
        let token = remote
            .vault
            .get(GOV_SHEET_TOKEN_KEY)?
            .ok_or_else(|| FlowError::Unauthorized("no governance-service token".to_string()))?;

        let schema = remote.schema.govsheet_schema().await?;
        let sheet = remote
            .sheets
            .download_sheet(&token, &source.project, &source.path)
            .await;
        let sheet = clear_token_on_unauthorized(remote.vault, sheet)?;

        let engine = self.clone();
        let apply_cancel = cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            engine.apply(&sheet, Some(&schema), &apply_cancel)
        })
        .await
        .map_err(|e| FlowError::Internal(format!("apply task failed: {}", e)))??;

        let synced = match remote.object_store {
            Some(store) if outcome != ApplyOutcome::NoChange => {
                let report = store
                    .sync(
                        &token,
                        &source.project,
                        &self.layout().researchflow_dir(),
                        "researchflow",
                        progress,
                        cancel,
                    )
                    .await;
                Some(clear_token_on_unauthorized(remote.vault, report)?)
            }
            _ => None,
        };

        Ok(FetchReport { outcome, synced })
    }

    fn pending_apply(&self) -> Result<Option<PendingApply>> {
        let path = self.layout().gov_sheet_pending();
        match read_json(&path) {
            Ok(pending) => Ok(Some(pending)),
            Err(FlowError::FileNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn clear_pending(&self) -> Result<()> {
        let path = self.layout().gov_sheet_pending();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlowError::io(format!("Failed to remove {}", path.display()), e)),
        }
    }

    /// Fail before any side effect if the sheet would deactivate a required
    /// task in some phase template.
    fn check_templates(
        &self,
        current: &[(u32, String, String, String)],
        activation: &Activation,
    ) -> Result<()> {
        let mut checked: Vec<&str> = Vec::new();
        for (_, phase_name, _, _) in current {
            if checked.contains(&phase_name.as_str()) {
                continue;
            }
            checked.push(phase_name);
            let template = self.layout().base_template(phase_name, ReservedFile::Status);
            if !template.exists() {
                return Err(FlowError::NotFoundContents(format!(
                    "template {}",
                    template.display()
                )));
            }
            let sf = self.store.read_sf(&template)?;
            check_required(&sf, activation)?;
        }
        Ok(())
    }
}

fn clear_token_on_unauthorized<T>(vault: &dyn CredentialVault, result: Result<T>) -> Result<T> {
    if let Err(FlowError::Unauthorized(reason)) = &result {
        tracing::warn!(reason = %reason, "Governance-service token rejected, clearing it");
        vault.remove(GOV_SHEET_TOKEN_KEY)?;
    }
    result
}

fn optional_json(path: &std::path::Path) -> Result<Option<Value>> {
    match read_json(path) {
        Ok(value) => Ok(Some(value)),
        Err(FlowError::FileNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fakes::{MemoryStore, MemoryVault, StaticSchema, StaticSheet};
    use crate::subflow::SubflowManager;
    use crate::testutil::{sheet, sheet_schema, Workspace};
    use serde_json::json;

    fn engine(ws: &Workspace) -> GovSheetEngine {
        GovSheetEngine::new(ws.store.clone())
    }

    fn two_experiments(ws: &Workspace) -> (String, String) {
        let m = SubflowManager::new(ws.store.clone());
        let a = m.create(2, "Exp A", "expA", &[]).unwrap();
        let b = m.create(2, "Exp B", "expB", &[]).unwrap();
        (a.id, b.id)
    }

    #[test]
    fn first_apply_without_subflows_only_persists() {
        let ws = Workspace::new();
        let outcome = engine(&ws)
            .apply(&sheet("cloud"), Some(&sheet_schema()), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Persisted);
        assert_eq!(engine(&ws).persisted_sheet().unwrap(), Some(sheet("cloud")));
        assert!(!ws.layout().archive_root().exists());
    }

    #[test]
    fn apply_rebuilds_subflows_with_selected_tasks() {
        let ws = Workspace::new();
        let (a, b) = two_experiments(&ws);
        let e = engine(&ws);
        e.apply(&sheet("cloud"), None, &CancellationToken::new()).unwrap();

        let outcome = e
            .apply(&sheet("local"), None, &CancellationToken::new())
            .unwrap();
        let ApplyOutcome::Recreated { subflow_ids, archives } = outcome else {
            panic!("expected recreate");
        };
        assert_eq!(subflow_ids, vec![a.clone(), b.clone()]);
        // One zip per subflow plus the previous sheet.
        assert_eq!(archives.len(), 3);

        for id in [&a, &b] {
            let key = SubflowKey::new(2, "experiment", id);
            let sf = ws.store.read_subflow_status(key).unwrap();
            assert!(!sf.task("upload").unwrap().active);
            assert!(sf.task("archive").unwrap().active);
            assert!(!ws.layout().task_notebook(key, "upload_data").exists());
            assert!(ws.layout().task_notebook(key, "archive_data").exists());
        }
    }

    #[test]
    fn reapplying_same_sheet_is_a_no_op() {
        let ws = Workspace::new();
        let (a, _) = two_experiments(&ws);
        let e = engine(&ws);
        e.apply(&sheet("cloud"), None, &CancellationToken::new()).unwrap();
        let key = SubflowKey::new(2, "experiment", &a);
        let before = std::fs::metadata(ws.layout().subflow_status(key))
            .unwrap()
            .modified()
            .unwrap();

        let outcome = e.apply(&sheet("cloud"), None, &CancellationToken::new()).unwrap();
        assert_eq!(outcome, ApplyOutcome::NoChange);
        let after = std::fs::metadata(ws.layout().subflow_status(key))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn custom_sheet_overrides_remote_values() {
        let ws = Workspace::new();
        std::fs::write(
            ws.layout().custom_gov_sheet(),
            json!({ "dmp": { "storage": "local" } }).to_string(),
        )
        .unwrap();
        let merged = engine(&ws).merged_sheet(&sheet("cloud")).unwrap();
        assert_eq!(merged, sheet("local"));
    }

    #[test]
    fn schema_mismatch_touches_nothing() {
        let ws = Workspace::new();
        two_experiments(&ws);
        let err = engine(&ws)
            .apply(&sheet("tape"), Some(&sheet_schema()), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.warning_code(), Some("gov_sheet_schema_mismatch"));
        assert!(!ws.layout().gov_sheet().exists());
    }

    #[test]
    fn sheet_hiding_required_task_is_rejected_before_archiving() {
        let ws = Workspace::new();
        two_experiments(&ws);
        let rules = json!({ "dmp": { "storage": [ { "value": "none", "hide": ["collect"] } ] } });
        std::fs::write(ws.layout().task_mapping(), rules.to_string()).unwrap();

        let err = engine(&ws)
            .apply(&sheet("none"), None, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, FlowError::Consistency(_)));
        assert!(!ws.layout().archive_root().exists());
        assert!(!ws.layout().gov_sheet().exists());
    }

    #[test]
    fn cancelled_apply_leaves_sheet_unwritten() {
        let ws = Workspace::new();
        two_experiments(&ws);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine(&ws).apply(&sheet("cloud"), None, &cancel).unwrap_err();
        assert!(matches!(err, FlowError::Cancelled));
        assert!(!ws.layout().gov_sheet().exists());
    }

    #[test]
    fn interrupted_rebuild_is_finished_by_the_next_apply() {
        let ws = Workspace::new();
        let (a, b) = two_experiments(&ws);
        let e = engine(&ws);
        e.apply(&sheet("cloud"), None, &CancellationToken::new()).unwrap();

        let notebook = ws.layout().base_task_dir().join("dmp/archive_data.ipynb");
        let aside = ws.temp.path().join("archive_data.ipynb");
        std::fs::rename(&notebook, &aside).unwrap();
        let err = e
            .apply(&sheet("local"), None, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFoundContents(_)));
        assert!(e.has_pending_apply());
        assert_eq!(e.persisted_sheet().unwrap(), Some(sheet("local")));

        std::fs::rename(&aside, &notebook).unwrap();
        let outcome = e
            .apply(&sheet("local"), None, &CancellationToken::new())
            .unwrap();
        let ApplyOutcome::Recreated { subflow_ids, .. } = outcome else {
            panic!("expected the interrupted apply to be resumed");
        };
        assert_eq!(subflow_ids, vec![a.clone(), b.clone()]);
        assert!(!e.has_pending_apply());
        for id in [&a, &b] {
            let key = SubflowKey::new(2, "experiment", id);
            let sf = ws.store.read_subflow_status(key).unwrap();
            assert!(sf.task("archive").unwrap().active);
            assert!(!sf.task("upload").unwrap().active);
            assert!(ws.layout().task_notebook(key, "archive_data").exists());
        }

        let again = e
            .apply(&sheet("local"), None, &CancellationToken::new())
            .unwrap();
        assert_eq!(again, ApplyOutcome::NoChange);
    }

    #[tokio::test]
    async fn fetch_applies_and_syncs() {
        let ws = Workspace::new();
        two_experiments(&ws);
        let vault = MemoryVault::default();
        vault.set(GOV_SHEET_TOKEN_KEY, "tok").unwrap();
        let store = MemoryStore::default();
        let remote = Collaborators {
            schema: &StaticSchema(sheet_schema()),
            sheets: &StaticSheet {
                token: "tok".into(),
                project: "proj".into(),
                sheet: sheet("local"),
            },
            vault: &vault,
            object_store: Some(&store),
        };
        let source = SheetSource {
            project: "proj".into(),
            path: "gov-sheet.json".into(),
        };

        let report = engine(&ws)
            .fetch_and_apply(&remote, &source, None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(report.outcome, ApplyOutcome::Recreated { .. }));
        assert!(report.synced.unwrap().uploaded > 0);
        assert!(store
            .objects
            .lock()
            .unwrap()
            .contains_key("proj:researchflow/research_flow_status.json"));
    }

    #[tokio::test]
    async fn rejected_token_is_cleared() {
        let ws = Workspace::new();
        let vault = MemoryVault::default();
        vault.set(GOV_SHEET_TOKEN_KEY, "stale").unwrap();
        let remote = Collaborators {
            schema: &StaticSchema(sheet_schema()),
            sheets: &StaticSheet {
                token: "fresh".into(),
                project: "proj".into(),
                sheet: sheet("cloud"),
            },
            vault: &vault,
            object_store: None,
        };
        let source = SheetSource {
            project: "proj".into(),
            path: "gov-sheet.json".into(),
        };

        let err = engine(&ws)
            .fetch_and_apply(&remote, &source, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Unauthorized(_)));
        assert_eq!(vault.get(GOV_SHEET_TOKEN_KEY).unwrap(), None);
    }
}
