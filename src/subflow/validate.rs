//! Input validation for subflow names, data directories and parents.
//!
//! Failures are [`FlowError::InputWarning`]s carrying stable message codes.

use std::collections::HashSet;

use crate::error::{FlowError, Result};
use crate::status::{Phase, ResearchFlowStatus, MAX_SUBFLOW_NAME_CHARS};
use crate::util::is_half_width;

/// Validate a display name and return it trimmed.
///
/// `exclude_id` skips the subflow being renamed in the uniqueness check.
pub fn validate_name(phase: &Phase, name: &str, exclude_id: Option<&str>) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FlowError::input("empty_name"));
    }
    if name.chars().count() > MAX_SUBFLOW_NAME_CHARS {
        return Err(FlowError::input("name_too_long"));
    }
    let taken = phase
        .sub_flows
        .iter()
        .any(|s| Some(s.id.as_str()) != exclude_id && s.name == name);
    if taken {
        return Err(FlowError::input("must_not_same_name"));
    }
    Ok(name.to_string())
}

/// Validate a data directory name and return it trimmed.
pub fn validate_data_dir(phase: &Phase, data_dir: &str, exclude_id: Option<&str>) -> Result<String> {
    let data_dir = data_dir.trim();
    if data_dir.is_empty() {
        return Err(FlowError::input("empty_data_dir"));
    }
    if data_dir.contains(['/', '\\', '\0']) {
        return Err(FlowError::input("data_dir_invalid_char"));
    }
    if data_dir == "." || data_dir == ".." {
        return Err(FlowError::input("data_dir_reserved"));
    }
    if !is_half_width(data_dir) {
        return Err(FlowError::input("data_dir_not_half_width"));
    }
    let taken = phase
        .sub_flows
        .iter()
        .any(|s| Some(s.id.as_str()) != exclude_id && s.data_dir == data_dir);
    if taken {
        return Err(FlowError::input("must_not_same_data_dir"));
    }
    Ok(data_dir.to_string())
}

/// Every parent must exist in a phase strictly before `phase_seq`.
pub fn validate_parents(rf: &ResearchFlowStatus, phase_seq: u32, parent_ids: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for parent in parent_ids {
        if !seen.insert(parent.as_str()) {
            return Err(FlowError::input("duplicate_parent"));
        }
        match rf.find_subflow(parent) {
            Some((parent_phase, _)) if parent_phase.seq_number < phase_seq => {}
            Some(_) => return Err(FlowError::input("parent_not_in_earlier_phase")),
            None => return Err(FlowError::input("unknown_parent")),
        }
    }
    Ok(())
}
