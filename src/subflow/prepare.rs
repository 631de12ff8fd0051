//! Materialisation of a subflow's artifacts from the phase template bundle.
//!
//! Shared by subflow creation and the governance-sheet recreate pass.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{read_error, FlowError, Result};
use crate::govsheet::mapping::{apply_activation, Activation};
use crate::layout::{Layout, ReservedFile, SubflowKey, SUBFLOW_NAME_PLACEHOLDER};
use crate::status::{write_atomic, StatusStore, SubflowStatus};
use crate::task_state;
use crate::util::{html_escape, json_string_body};

/// Copy the phase templates into the subflow directory and the active task
/// notebooks into its working task directory.
///
/// The status document is written before any notebook is copied.
pub(crate) fn prepare_subflow(
    store: &StatusStore,
    key: SubflowKey<'_>,
    display_name: &str,
    activation: Option<&Activation>,
) -> Result<SubflowStatus> {
    let layout = store.layout();
    let template_dir = layout.base_subflow_dir(key.phase_name);
    if !template_dir.is_dir() {
        return Err(FlowError::NotFoundContents(format!(
            "template bundle for phase {}",
            key.phase_name
        )));
    }

    let subflow_dir = layout.subflow_dir(key);
    std::fs::create_dir_all(&subflow_dir)
        .map_err(|e| FlowError::io(format!("Failed to create {}", subflow_dir.display()), e))?;

    write_menu(layout, key, display_name)?;
    copy_template(layout, key, ReservedFile::Property)?;

    let template_status = layout.base_template(key.phase_name, ReservedFile::Status);
    if !template_status.exists() {
        return Err(missing_template(&template_status));
    }
    let mut sf = store.read_sf(&template_status)?;
    match activation {
        Some(activation) => apply_activation(&mut sf, activation)?,
        None => task_state::recompute(&mut sf),
    }
    store.write_subflow_status(key, &sf)?;

    copy_active_notebooks(layout, key, &sf)?;

    tracing::debug!(
        phase = %key.phase_name,
        subflow_id = %key.id,
        tasks = sf.tasks.len(),
        "Prepared subflow artifacts"
    );
    Ok(sf)
}

/// Remove the working task directory and the reserved files of a subflow.
pub(crate) fn clear_subflow_artifacts(layout: &Layout, key: SubflowKey<'_>) -> Result<()> {
    let task_dir = layout.working_task_dir(key);
    if task_dir.exists() {
        std::fs::remove_dir_all(&task_dir)
            .map_err(|e| FlowError::io(format!("Failed to remove {}", task_dir.display()), e))?;
    }
    for file in ReservedFile::ALL {
        let path = layout.subflow_file(key, file);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(FlowError::io(
                    format!("Failed to remove {}", path.display()),
                    e,
                ))
            }
        }
    }
    Ok(())
}

/// Locate `<task_name>.ipynb` anywhere under the task template directory.
///
/// Entries are visited in file-name order so the first match is stable.
pub fn find_task_template(base_task_dir: &Path, task_name: &str) -> Option<PathBuf> {
    let wanted = format!("{}.ipynb", task_name);
    WalkDir::new(base_task_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some(wanted.as_str()))
        .map(|e| e.into_path())
}

fn write_menu(layout: &Layout, key: SubflowKey<'_>, display_name: &str) -> Result<()> {
    let src = layout.base_template(key.phase_name, ReservedFile::Menu);
    let template = std::fs::read_to_string(&src).map_err(|e| match read_error(&src, e) {
        FlowError::FileNotFound(path) => missing_template(&path),
        other => other,
    })?;
    // The menu is a notebook (JSON); the name lands inside a string literal.
    let replacement = json_string_body(&html_escape(display_name));
    let menu = template.replace(SUBFLOW_NAME_PLACEHOLDER, &replacement);
    write_atomic(&layout.menu(key), menu.as_bytes())
}

fn copy_template(layout: &Layout, key: SubflowKey<'_>, file: ReservedFile) -> Result<()> {
    let src = layout.base_template(key.phase_name, file);
    if !src.exists() {
        return Err(missing_template(&src));
    }
    let dst = layout.subflow_file(key, file);
    std::fs::copy(&src, &dst)
        .map_err(|e| FlowError::io(format!("Failed to copy {}", src.display()), e))?;
    Ok(())
}

fn copy_active_notebooks(layout: &Layout, key: SubflowKey<'_>, sf: &SubflowStatus) -> Result<()> {
    let task_dir = layout.working_task_dir(key);
    std::fs::create_dir_all(&task_dir)
        .map_err(|e| FlowError::io(format!("Failed to create {}", task_dir.display()), e))?;

    let base_task_dir = layout.base_task_dir();
    for task in sf.tasks.iter().filter(|t| t.active) {
        let src = find_task_template(&base_task_dir, &task.name).ok_or_else(|| {
            FlowError::NotFoundContents(format!("task notebook {}.ipynb", task.name))
        })?;
        let dst = layout.task_notebook(key, &task.name);
        std::fs::copy(&src, &dst)
            .map_err(|e| FlowError::io(format!("Failed to copy {}", src.display()), e))?;
    }
    Ok(())
}

fn missing_template(path: &Path) -> FlowError {
    FlowError::NotFoundContents(format!("template {}", path.display()))
}
