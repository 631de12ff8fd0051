//! Configuration management for researchflow.
//!
//! Configuration can be set via environment variables:
//! - `RESEARCHFLOW_ROOT` - Optional. The workspace root. Defaults to current directory.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `GOV_SHEET_URL` - Optional. Base URL of the governance-sheet service.
//! - `GOV_SHEET_PROJECT` - Optional. Project holding the governance sheet.
//! - `GOV_SHEET_PATH` - Optional. Sheet path inside the project. Defaults to `gov-sheet.json`.
//! - `OBJECT_STORE_URL` - Optional. Base URL of the object store used for sync.
//! - `REMOTE_TIMEOUT_SECS` - Optional. Timeout for remote calls. Defaults to `30`.
//! - `RESEARCHFLOW_ENV_ID` - Optional. Environment token for the activity log. Defaults to `default`.
//! - `VAULT_KEY` - Optional. Hex or base64 AES-256 key for the credential vault.
//!   Without it a key is generated into `.vault/key`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Remote collaborator endpoints.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Schema/sheet service base URL
    pub gov_sheet_url: Option<String>,

    /// Project identifier passed to the sheet service
    pub gov_sheet_project: Option<String>,

    /// Path of the sheet inside the project
    pub gov_sheet_path: String,

    /// Object store base URL
    pub object_store_url: Option<String>,

    /// Timeout applied to every remote call
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            gov_sheet_url: None,
            gov_sheet_project: None,
            gov_sheet_path: "gov-sheet.json".to_string(),
            object_store_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RemoteConfig {
    pub fn sheet_enabled(&self) -> bool {
        self.gov_sheet_url.is_some() && self.gov_sheet_project.is_some()
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root (holds `data_governance/`, `data/` and `.log/`)
    pub root: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment token written to the activity log
    pub env_id: String,

    /// Remote collaborators
    pub remote: RemoteConfig,

    /// Credential vault key (hex or base64)
    pub vault_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::var("RESEARCHFLOW_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let timeout_secs: u64 = std::env::var("REMOTE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("REMOTE_TIMEOUT_SECS".to_string(), format!("{}", e))
            })?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "REMOTE_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let env_id =
            std::env::var("RESEARCHFLOW_ENV_ID").unwrap_or_else(|_| "default".to_string());

        let remote = RemoteConfig {
            gov_sheet_url: non_empty_env("GOV_SHEET_URL"),
            gov_sheet_project: non_empty_env("GOV_SHEET_PROJECT"),
            gov_sheet_path: std::env::var("GOV_SHEET_PATH")
                .unwrap_or_else(|_| "gov-sheet.json".to_string()),
            object_store_url: non_empty_env("OBJECT_STORE_URL"),
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            root,
            host,
            port,
            env_id,
            remote,
            vault_key: non_empty_env("VAULT_KEY"),
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            host: "127.0.0.1".to_string(),
            port: 3000,
            env_id: "default".to_string(),
            remote: RemoteConfig::default(),
            vault_key: None,
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
