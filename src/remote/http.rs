//! HTTP clients for the governance-sheet service and the object store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{ObjectStore, SchemaProvider, SheetProvider};
use crate::error::{FlowError, Result};

/// Client whose `timeout` bounds each request from connect until the body has
/// been read.
fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FlowError::Remote(format!("failed to build HTTP client: {}", e)))
}

fn remote_error(e: reqwest::Error, what: &str) -> FlowError {
    if e.is_timeout() {
        FlowError::Timeout(what.to_string())
    } else {
        FlowError::Remote(format!("{}: {}", what, e))
    }
}

/// Send `request` and map auth failures.
async fn send(request: RequestBuilder, what: &str) -> Result<Response> {
    let resp = request.send().await.map_err(|e| remote_error(e, what))?;

    if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
        return Err(FlowError::Unauthorized(format!("{}: {}", what, resp.status())));
    }
    Ok(resp)
}

async fn failure(resp: Response, what: &str) -> FlowError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    FlowError::Remote(format!("{} failed: {} - {}", what, status, text))
}

/// Percent-encode each segment of a slash-separated path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Client for the service that serves the sheet schema and project sheets.
pub struct GovSheetClient {
    client: Client,
    base_url: String,
}

impl GovSheetClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/projects/{}", self.base_url, urlencoding::encode(project))
    }
}

#[async_trait]
impl SchemaProvider for GovSheetClient {
    async fn govsheet_schema(&self) -> Result<Value> {
        let what = "fetch governance-sheet schema";
        let resp = send(self.client.get(format!("{}/schema", self.base_url)), what).await?;
        if !resp.status().is_success() {
            return Err(failure(resp, what).await);
        }
        resp.json().await.map_err(|e| remote_error(e, what))
    }
}

#[async_trait]
impl SheetProvider for GovSheetClient {
    async fn download_sheet(&self, token: &str, project: &str, path: &str) -> Result<Value> {
        let what = "download governance sheet";

        let resp = send(self.client.get(self.project_url(project)).bearer_auth(token), what).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FlowError::ProjectNotExist(project.to_string()));
        }
        if !resp.status().is_success() {
            return Err(failure(resp, what).await);
        }

        let url = format!("{}/files/{}", self.project_url(project), encode_path(path));
        let resp = send(self.client.get(url).bearer_auth(token), what).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FlowError::NotFoundContents(path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(failure(resp, what).await);
        }
        resp.json().await.map_err(|e| remote_error(e, what))
    }
}

/// Object store addressed as `<base>/projects/<project>/objects/<path>`.
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, project: &str, remote_path: &str) -> String {
        format!(
            "{}/projects/{}/objects/{}",
            self.base_url,
            urlencoding::encode(project),
            encode_path(remote_path)
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, token: &str, project: &str, remote_path: &str, contents: Vec<u8>) -> Result<()> {
        let what = format!("upload {}", remote_path);
        let digest = hex::encode(Sha256::digest(&contents));
        let request = self
            .client
            .put(self.object_url(project, remote_path))
            .bearer_auth(token)
            .header("Content-Type", "application/octet-stream")
            .header("x-content-sha256", digest)
            .body(contents);

        let resp = send(request, &what).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FlowError::ProjectNotExist(project.to_string()));
        }
        if !resp.status().is_success() {
            return Err(failure(resp, &what).await);
        }
        tracing::debug!(project = %project, path = %remote_path, "Uploaded object");
        Ok(())
    }

    async fn download(&self, token: &str, project: &str, remote_path: &str) -> Result<Vec<u8>> {
        let what = format!("download {}", remote_path);
        let request = self
            .client
            .get(self.object_url(project, remote_path))
            .bearer_auth(token);

        let resp = send(request, &what).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FlowError::NotFoundContents(remote_path.to_string()));
        }
        if !resp.status().is_success() {
            return Err(failure(resp, &what).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| remote_error(e, &what))?;
        Ok(bytes.to_vec())
    }
}
