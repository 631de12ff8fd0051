//! Collaborators the engine consumes: schema and sheet services, an object
//! store and a credential vault.
//!
//! The traits are the seam; [`http`] and [`vault`] hold the reference
//! implementations used by the binary. Tests substitute in-memory fakes.

pub mod http;
pub mod vault;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{read_error, FlowError, Result};

pub use http::{GovSheetClient, HttpObjectStore};
pub use vault::FileVault;

/// Vault key under which the governance-service token is stored.
pub const GOV_SHEET_TOKEN_KEY: &str = "gov_sheet_token";

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// JSON schema every governance sheet must satisfy.
    async fn govsheet_schema(&self) -> Result<Value>;
}

#[async_trait]
pub trait SheetProvider: Send + Sync {
    /// Download the sheet at `path` in `project`.
    ///
    /// A missing project is [`FlowError::ProjectNotExist`], a missing sheet
    /// [`FlowError::NotFoundContents`], a rejected token
    /// [`FlowError::Unauthorized`].
    async fn download_sheet(&self, token: &str, project: &str, path: &str) -> Result<Value>;
}

/// Progress of an object-store sync, one message per uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub done: usize,
    pub total: usize,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: usize,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, token: &str, project: &str, remote_path: &str, contents: Vec<u8>) -> Result<()>;

    async fn download(&self, token: &str, project: &str, remote_path: &str) -> Result<Vec<u8>>;

    /// Upload every file under `local_root` to `<prefix>/<relative path>`.
    ///
    /// Cancellation is checked between files; files already uploaded stay
    /// uploaded.
    async fn sync(
        &self,
        token: &str,
        project: &str,
        local_root: &Path,
        prefix: &str,
        progress: Option<mpsc::Sender<SyncProgress>>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let files: Vec<_> = WalkDir::new(local_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        let total = files.len();

        let mut report = SyncReport::default();
        for (i, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            let rel = path.strip_prefix(local_root).unwrap_or(path);
            let remote_path = join_remote(prefix, &crate::util::to_link(rel));
            let contents = tokio::fs::read(path).await.map_err(|e| read_error(path, e))?;
            self.upload(token, project, &remote_path, contents).await?;
            report.uploaded += 1;

            if let Some(tx) = &progress {
                // A dropped receiver only means nobody is watching.
                let _ = tx
                    .send(SyncProgress {
                        done: i + 1,
                        total,
                        path: remote_path.clone(),
                    })
                    .await;
            }
        }
        tracing::info!(project = %project, uploaded = report.uploaded, "Synced to object store");
        Ok(report)
    }
}

/// Key/value store for credentials.
pub trait CredentialVault: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

fn join_remote(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", prefix, rel)
    }
}
