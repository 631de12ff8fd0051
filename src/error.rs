//! Error taxonomy for research-flow operations.
//!
//! Every fallible operation returns [`FlowError`]. The UI layer only needs the
//! coarse [`ErrorKind`]: input warnings are shown without a traceback, the
//! rest are displayed as errors and logged.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification surfaced to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputWarning,
    NotFoundSubflowData,
    ProjectNotExist,
    Unauthorized,
    UnusableVault,
    NotFoundContents,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputWarning => "input_warning",
            Self::NotFoundSubflowData => "not_found_subflow_data",
            Self::ProjectNotExist => "project_not_exist",
            Self::Unauthorized => "unauthorized",
            Self::UnusableVault => "unusable_vault",
            Self::NotFoundContents => "not_found_contents",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    /// User input is invalid; the payload is a stable message code.
    #[error("input warning: {0}")]
    InputWarning(String),

    #[error("governance sheet does not match schema at '{path}': {message}")]
    SchemaMismatch { path: String, message: String },

    #[error("subflow not found: {0}")]
    NotFoundSubflowData(String),

    #[error("project does not exist: {0}")]
    ProjectNotExist(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("credential vault unusable: {0}")]
    UnusableVault(String),

    #[error("contents not found: {0}")]
    NotFoundContents(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A structural invariant would be violated (cycles, dangling ids, ...).
    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    pub fn input(code: &str) -> Self {
        Self::InputWarning(code.to_string())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputWarning(_) | Self::SchemaMismatch { .. } => ErrorKind::InputWarning,
            Self::NotFoundSubflowData(_) => ErrorKind::NotFoundSubflowData,
            Self::ProjectNotExist(_) => ErrorKind::ProjectNotExist,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::UnusableVault(_) => ErrorKind::UnusableVault,
            Self::NotFoundContents(_) => ErrorKind::NotFoundContents,
            Self::FileNotFound(_)
            | Self::Decode { .. }
            | Self::Consistency(_)
            | Self::Cancelled
            | Self::Timeout(_)
            | Self::Io { .. }
            | Self::Remote(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Warnings go to the warning channel without a traceback.
    pub fn is_warning(&self) -> bool {
        self.kind() == ErrorKind::InputWarning
    }

    /// The message code of an input warning, if this is one.
    pub fn warning_code(&self) -> Option<&str> {
        match self {
            Self::InputWarning(code) => Some(code),
            Self::SchemaMismatch { .. } => Some("gov_sheet_schema_mismatch"),
            _ => None,
        }
    }
}

/// Map a filesystem read error, turning `NotFound` into [`FlowError::FileNotFound`].
pub(crate) fn read_error(path: &std::path::Path, err: std::io::Error) -> FlowError {
    if err.kind() == std::io::ErrorKind::NotFound {
        FlowError::FileNotFound(path.to_path_buf())
    } else {
        FlowError::io(format!("Failed to read {}", path.display()), err)
    }
}
