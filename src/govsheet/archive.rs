//! Recovery archives written before a governance sheet is applied.

use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{FlowError, Result};
use crate::layout::{Layout, ReservedFile, SubflowKey};
use crate::status::write_atomic;

/// Zip the subflow's menu and status documents plus every notebook under its
/// working directory into `.log/<phase>/<id>/<timestamp>.zip`.
///
/// Missing inputs are skipped; a subflow whose previous recreate was
/// interrupted still gets an archive of whatever is left.
pub fn archive_subflow(layout: &Layout, key: SubflowKey<'_>, timestamp: &str) -> Result<PathBuf> {
    let target = layout.subflow_archive(key.phase_name, key.id, timestamp);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;
    }

    let file = std::fs::File::create(&target)
        .map_err(|e| FlowError::io(format!("Failed to create {}", target.display()), e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut entries = 0usize;
    for reserved in [ReservedFile::Menu, ReservedFile::Status] {
        let path = layout.subflow_file(key, reserved);
        if path.is_file() {
            add_file(&mut zip, &path, reserved.file_name(), options)?;
            entries += 1;
        }
    }

    let working = layout.working_subflow_dir(key);
    if working.is_dir() {
        for entry in WalkDir::new(&working)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_notebook = path.extension().and_then(|e| e.to_str()) == Some("ipynb");
            if !entry.file_type().is_file() || !is_notebook {
                continue;
            }
            let rel = path.strip_prefix(&working).unwrap_or(path);
            let name = format!("working/{}", crate::util::to_link(rel));
            add_file(&mut zip, path, &name, options)?;
            entries += 1;
        }
    }

    zip.finish()
        .map_err(|e| FlowError::Internal(format!("Failed to finalize {}: {}", target.display(), e)))?;
    tracing::debug!(
        phase = %key.phase_name,
        subflow_id = %key.id,
        entries,
        path = %target.display(),
        "Archived subflow"
    );
    Ok(target)
}

/// Copy the previously applied sheet to `.log/gov-sheet-rf/<timestamp>.json`.
///
/// Returns `None` when no sheet has been applied yet.
pub fn archive_previous_sheet(layout: &Layout, timestamp: &str) -> Result<Option<PathBuf>> {
    let current = layout.gov_sheet();
    let contents = match std::fs::read(&current) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(crate::error::read_error(&current, e)),
    };
    let target = layout.gov_sheet_archive(timestamp);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| FlowError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    write_atomic(&target, &contents)?;
    Ok(Some(target))
}

fn add_file<W: Write + std::io::Seek>(
    zip: &mut zip::ZipWriter<W>,
    path: &Path,
    name: &str,
    options: zip::write::SimpleFileOptions,
) -> Result<()> {
    let contents = std::fs::read(path).map_err(|e| crate::error::read_error(path, e))?;
    zip.start_file(name, options)
        .map_err(|e| FlowError::Internal(format!("Failed to add {} to archive: {}", name, e)))?;
    zip.write_all(&contents)
        .map_err(|e| FlowError::io(format!("Failed to write {} to archive", name), e))?;
    Ok(())
}
