//! Subflow lifecycle: create, rename, relink and delete.
//!
//! Every operation reads the research-flow document, mutates it and writes it
//! back. Multi-step operations record their side effects in a [`Rollback`] and
//! undo them in reverse order when a later step fails.

mod prepare;
mod rollback;
pub mod validate;

pub use prepare::find_task_template;
pub(crate) use prepare::{clear_subflow_artifacts, prepare_subflow};

use crate::error::{FlowError, Result};
use crate::govsheet;
use crate::layout::{Layout, SubflowKey, PREPARATION_SEQ};
use crate::status::{StatusStore, SubFlow, UNMATERIALIZED_DATETIME};
use crate::util::now_unix;

use rollback::Rollback;
use validate::{validate_data_dir, validate_name, validate_parents};

/// Performs subflow lifecycle operations against one workspace.
#[derive(Debug, Clone)]
pub struct SubflowManager {
    store: StatusStore,
}

impl SubflowManager {
    pub fn new(store: StatusStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    fn layout(&self) -> &Layout {
        self.store.layout()
    }

    /// Create a subflow in phase `phase_seq`.
    ///
    /// Input is validated before any side effect. The persisted governance
    /// sheet, if there is one, selects the active tasks.
    pub fn create(
        &self,
        phase_seq: u32,
        name: &str,
        data_dir: &str,
        parent_ids: &[String],
    ) -> Result<SubFlow> {
        reject_preparation(phase_seq)?;
        let rf = self.store.read_rf()?;
        let phase = rf
            .phase(phase_seq)
            .ok_or_else(|| FlowError::input("unknown_phase"))?;
        let data_dir = validate_data_dir(phase, data_dir, None)?;
        let name = validate_name(phase, name, None)?;
        validate_parents(&rf, phase_seq, parent_ids)?;
        let phase_name = phase.name.clone();
        let activation = govsheet::current_activation(self.layout())?;

        let id = self.store.issue_subflow_id(&rf)?;
        let key = SubflowKey::new(phase_seq, &phase_name, &id);
        let subflow = SubFlow {
            id: id.clone(),
            name: name.clone(),
            data_dir: data_dir.clone(),
            link: self.layout().subflow_link(key),
            parent_ids: parent_ids.to_vec(),
            create_datetime: now_unix(),
        };

        let mut rollback = Rollback::new(&self.store);
        let outcome = (|| -> Result<()> {
            let mut updated = rf.clone();
            updated
                .phase_mut(phase_seq)
                .ok_or_else(|| FlowError::input("unknown_phase"))?
                .sub_flows
                .push(subflow.clone());
            self.store.write_rf(&updated)?;
            rollback.restore_research_flow(rf.clone());

            let data_path = self.layout().data_dir(&phase_name, &data_dir);
            create_fresh_dir(&data_path)?;
            rollback.remove_dir(data_path);

            rollback.remove_dir(self.layout().subflow_dir(key));
            rollback.remove_dir(self.layout().working_subflow_dir(key));
            prepare_subflow(&self.store, key, &name, activation.as_ref())?;
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                tracing::info!(phase = %phase_name, subflow_id = %id, name = %name, "Created subflow");
                Ok(subflow)
            }
            Err(e) => {
                tracing::warn!(phase = %phase_name, subflow_id = %id, error = %e, "Create failed, rolling back");
                rollback.run();
                Err(e)
            }
        }
    }

    /// Change a subflow's name and data directory.
    ///
    /// A changed data directory is moved on disk.
    pub fn rename(&self, phase_seq: u32, id: &str, new_name: &str, new_data_dir: &str) -> Result<SubFlow> {
        reject_preparation(phase_seq)?;
        let rf = self.store.read_rf()?;
        let phase = rf
            .phase(phase_seq)
            .ok_or_else(|| FlowError::input("unknown_phase"))?;
        let current = phase
            .subflow(id)
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?
            .clone();
        let data_dir = validate_data_dir(phase, new_data_dir, Some(id))?;
        let name = validate_name(phase, new_name, Some(id))?;
        let phase_name = phase.name.clone();

        let mut rollback = Rollback::new(&self.store);
        let outcome = (|| -> Result<SubFlow> {
            if data_dir != current.data_dir {
                let from = self.layout().data_dir(&phase_name, &current.data_dir);
                let to = self.layout().data_dir(&phase_name, &data_dir);
                if to.exists() {
                    return Err(FlowError::input("data_dir_already_exists"));
                }
                if from.exists() {
                    std::fs::rename(&from, &to).map_err(|e| {
                        FlowError::io(format!("Failed to move {}", from.display()), e)
                    })?;
                    rollback.move_back(to, from);
                } else {
                    create_fresh_dir(&to)?;
                    rollback.remove_dir(to);
                }
            }

            let mut updated = rf.clone();
            let record = updated
                .phase_mut(phase_seq)
                .and_then(|p| p.subflow_mut(id))
                .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?;
            record.name = name.clone();
            record.data_dir = data_dir.clone();
            let renamed = record.clone();
            self.store.write_rf(&updated)?;
            Ok(renamed)
        })();

        match outcome {
            Ok(renamed) => {
                tracing::info!(phase = %phase_name, subflow_id = %id, name = %name, data_dir = %data_dir, "Renamed subflow");
                Ok(renamed)
            }
            Err(e) => {
                rollback.run();
                Err(e)
            }
        }
    }

    /// Replace a subflow's parents.
    pub fn relink(&self, phase_seq: u32, id: &str, new_parent_ids: &[String]) -> Result<SubFlow> {
        let mut rf = self.store.read_rf()?;
        rf.phase(phase_seq)
            .ok_or_else(|| FlowError::input("unknown_phase"))?
            .subflow(id)
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?;
        validate_parents(&rf, phase_seq, new_parent_ids)?;

        let record = rf
            .phase_mut(phase_seq)
            .and_then(|p| p.subflow_mut(id))
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?;
        record.parent_ids = new_parent_ids.to_vec();
        let relinked = record.clone();
        self.store.write_rf(&rf)?;
        tracing::info!(subflow_id = %id, parents = ?new_parent_ids, "Relinked subflow");
        Ok(relinked)
    }

    /// Remove a subflow record and detach it from its children.
    ///
    /// The subflow directory and data directory stay on disk.
    pub fn delete(&self, id: &str) -> Result<SubFlow> {
        let mut rf = self.store.read_rf()?;
        let (phase_seq, _) = rf
            .find_subflow(id)
            .map(|(p, s)| (p.seq_number, s.id.clone()))
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?;
        reject_preparation(phase_seq)?;

        let phase = rf
            .phase_mut(phase_seq)
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?;
        let index = phase
            .sub_flows
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| FlowError::NotFoundSubflowData(id.to_string()))?;
        let removed = phase.sub_flows.remove(index);

        for phase in &mut rf.phases {
            for sub in &mut phase.sub_flows {
                sub.parent_ids.retain(|p| p != id);
            }
        }
        self.store.write_rf(&rf)?;
        tracing::info!(subflow_id = %id, name = %removed.name, "Deleted subflow");
        Ok(removed)
    }

    /// Materialise the preparation subflow on first access.
    ///
    /// Returns the record unchanged when it is already materialised.
    pub fn materialize_preparation(&self) -> Result<SubFlow> {
        let rf = self.store.read_rf()?;
        let phase = rf
            .preparation()
            .ok_or_else(|| FlowError::Consistency("missing preparation phase".to_string()))?;
        let prep = phase
            .sub_flows
            .first()
            .ok_or_else(|| FlowError::Consistency("missing preparation subflow".to_string()))?
            .clone();
        if prep.create_datetime != UNMATERIALIZED_DATETIME {
            return Ok(prep);
        }
        let phase_name = phase.name.clone();
        let key = SubflowKey::new(PREPARATION_SEQ, &phase_name, &prep.id);
        let activation = govsheet::current_activation(self.layout())?;

        let data_path = self.layout().data_dir(&phase_name, &prep.data_dir);
        std::fs::create_dir_all(&data_path)
            .map_err(|e| FlowError::io(format!("Failed to create {}", data_path.display()), e))?;
        prepare_subflow(&self.store, key, &prep.name, activation.as_ref())?;

        let mut updated = rf.clone();
        let record = updated
            .phase_mut(PREPARATION_SEQ)
            .and_then(|p| p.sub_flows.first_mut())
            .ok_or_else(|| FlowError::Consistency("missing preparation subflow".to_string()))?;
        record.create_datetime = now_unix();
        let materialized = record.clone();
        self.store.write_rf(&updated)?;
        tracing::info!(phase = %phase_name, subflow_id = %prep.id, "Materialised preparation subflow");
        Ok(materialized)
    }
}

fn reject_preparation(phase_seq: u32) -> Result<()> {
    if phase_seq == PREPARATION_SEQ {
        return Err(FlowError::input("preparation_phase_is_immutable"));
    }
    Ok(())
}

/// Create `path`, failing if it already exists.
fn create_fresh_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(FlowError::input("data_dir_already_exists"))
        }
        Err(e) => Err(FlowError::io(format!("Failed to create {}", path.display()), e)),
    }
}
