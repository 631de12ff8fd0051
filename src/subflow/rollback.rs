//! Undo log for multi-step subflow operations.

use std::path::PathBuf;

use crate::status::{ResearchFlowStatus, StatusStore};

#[derive(Debug)]
enum Undo {
    /// Write back the research-flow document as it was before the operation.
    RestoreResearchFlow(ResearchFlowStatus),
    /// Remove a directory tree created by the operation.
    RemoveDir(PathBuf),
    /// Move a renamed directory back to its original location.
    MoveBack { from: PathBuf, to: PathBuf },
}

/// Side effects performed so far, undone in reverse order on failure.
pub(crate) struct Rollback<'a> {
    store: &'a StatusStore,
    actions: Vec<Undo>,
}

impl<'a> Rollback<'a> {
    pub fn new(store: &'a StatusStore) -> Self {
        Self {
            store,
            actions: Vec::new(),
        }
    }

    pub fn restore_research_flow(&mut self, rf: ResearchFlowStatus) {
        self.actions.push(Undo::RestoreResearchFlow(rf));
    }

    pub fn remove_dir(&mut self, path: PathBuf) {
        self.actions.push(Undo::RemoveDir(path));
    }

    pub fn move_back(&mut self, from: PathBuf, to: PathBuf) {
        self.actions.push(Undo::MoveBack { from, to });
    }

    /// Undo every recorded action, newest first.
    ///
    /// Failures are logged; the original error is what the caller reports.
    pub fn run(self) {
        for action in self.actions.into_iter().rev() {
            let outcome = match &action {
                Undo::RestoreResearchFlow(rf) => {
                    self.store.write_rf(rf).map_err(|e| e.to_string())
                }
                Undo::RemoveDir(path) => {
                    if path.exists() {
                        std::fs::remove_dir_all(path).map_err(|e| e.to_string())
                    } else {
                        Ok(())
                    }
                }
                Undo::MoveBack { from, to } => {
                    std::fs::rename(from, to).map_err(|e| e.to_string())
                }
            };
            match outcome {
                Ok(()) => tracing::debug!(?action, "Rolled back"),
                Err(e) => tracing::error!(?action, error = %e, "Rollback step failed"),
            }
        }
    }
}
