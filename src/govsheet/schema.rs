//! Validation of governance sheets against the remotely supplied schema.

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Validate `sheet` against `schema`.
///
/// The first violation is reported as [`FlowError::SchemaMismatch`] with the
/// JSON pointer of the offending instance.
pub fn validate_sheet(schema: &Value, sheet: &Value) -> Result<()> {
    let compiled = JSONSchema::compile(schema)
        .map_err(|e| FlowError::Internal(format!("invalid governance-sheet schema: {}", e)))?;

    let first = match compiled.validate(sheet) {
        Ok(()) => return Ok(()),
        Err(mut errors) => errors
            .next()
            .map(|e| (e.instance_path.to_string(), e.to_string())),
    };

    let (path, message) = first.unwrap_or_else(|| ("/".to_string(), "invalid".to_string()));
    Err(FlowError::SchemaMismatch {
        path: if path.is_empty() { "/".to_string() } else { path },
        message,
    })
}
