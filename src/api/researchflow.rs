//! Research-flow endpoints: status documents, subflows, tasks, diagrams and
//! governance sheets.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{api_error, ApiError};
use super::routes::AppState;
use crate::activity::Level;
use crate::diagram::{render_svg, resolve_titles, DiagramOptions, View};
use crate::error::{FlowError, Result};
use crate::govsheet::{ApplyOutcome, Collaborators, FetchReport, SheetSource};
use crate::layout::SubflowKey;
use crate::remote::{
    CredentialVault, ObjectStore, SchemaProvider, SyncProgress, GOV_SHEET_TOKEN_KEY,
};
use crate::status::{ResearchFlowStatus, SubFlow, SubflowStatus, DEFAULT_PHASES};
use crate::task_state;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/research-flow", get(get_research_flow))
        .route("/research-flow/init", post(init_research_flow))
        .route("/phases", get(list_phases))
        .route("/phases/:phase/subflows", get(list_subflows))
        .route("/preparation/materialize", post(materialize_preparation))
        .route("/subflows", post(create_subflow))
        .route("/subflows/:id", put(rename_subflow))
        .route("/subflows/:id", delete(delete_subflow))
        .route("/subflows/:id/parents", put(relink_subflow))
        .route("/subflows/:id/status", get(get_subflow_status))
        .route("/subflows/:id/diagram", get(get_diagram))
        .route("/subflows/:id/tasks/:task_id/start", post(start_task))
        .route("/subflows/:id/tasks/:task_id/finish", post(finish_task))
        .route("/subflows/:id/tasks/:task_id/reset", post(reset_task))
        .route("/govsheet", get(get_govsheet))
        .route("/govsheet/apply", post(apply_govsheet))
        .route("/govsheet/fetch", post(fetch_govsheet))
        .route("/govsheet/cancel", post(cancel_govsheet))
        .route("/govsheet/token", put(set_token))
}

/// Run filesystem-heavy engine work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FlowError::Internal(format!("blocking task failed: {}", e)))?
}

/// Record the outcome of a mutation in the activity log and convert it.
fn finish<T>(state: &AppState, action: &str, result: Result<T>) -> std::result::Result<Json<T>, ApiError> {
    match result {
        Ok(value) => {
            state.activity.record(Level::Info, action);
            Ok(Json(value))
        }
        Err(e) => {
            let level = if e.is_warning() { Level::Warning } else { Level::Error };
            state.activity.record(level, &format!("{}: {}", action, e));
            Err(api_error(e))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Research flow
// ─────────────────────────────────────────────────────────────────────────────

async fn get_research_flow(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<ResearchFlowStatus>, ApiError> {
    state.store.read_rf().map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub phases: Vec<String>,
}

async fn init_research_flow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitRequest>,
) -> std::result::Result<Json<ResearchFlowStatus>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let store = state.store.clone();
    let result = blocking(move || {
        let phases: Vec<&str> = if req.phases.is_empty() {
            DEFAULT_PHASES.to_vec()
        } else {
            req.phases.iter().map(String::as_str).collect()
        };
        store.init_research_flow(&phases)
    })
    .await;
    finish(&state, "initialise research flow", result)
}

async fn list_phases(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<Vec<String>>, ApiError> {
    state.store.list_phases().map(Json).map_err(api_error)
}

async fn list_subflows(
    State(state): State<Arc<AppState>>,
    Path(phase): Path<String>,
) -> std::result::Result<Json<Vec<String>>, ApiError> {
    state.store.list_subflow_ids(&phase).map(Json).map_err(api_error)
}

// ─────────────────────────────────────────────────────────────────────────────
// Subflows
// ─────────────────────────────────────────────────────────────────────────────

async fn materialize_preparation(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<SubFlow>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let subflows = state.subflows.clone();
    let result = blocking(move || subflows.materialize_preparation()).await;
    finish(&state, "materialise preparation subflow", result)
}

#[derive(Debug, Deserialize)]
pub struct CreateSubflowRequest {
    pub phase_seq: u32,
    pub name: String,
    pub data_dir: String,
    #[serde(default)]
    pub parent_ids: Vec<String>,
}

async fn create_subflow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSubflowRequest>,
) -> std::result::Result<(StatusCode, Json<SubFlow>), ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("create subflow '{}' in phase {}", req.name.trim(), req.phase_seq);
    let subflows = state.subflows.clone();
    let result = blocking(move || {
        subflows.create(req.phase_seq, &req.name, &req.data_dir, &req.parent_ids)
    })
    .await;
    finish(&state, &action, result).map(|json| (StatusCode::CREATED, json))
}

#[derive(Debug, Deserialize)]
pub struct RenameSubflowRequest {
    pub phase_seq: u32,
    pub name: String,
    pub data_dir: String,
}

async fn rename_subflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RenameSubflowRequest>,
) -> std::result::Result<Json<SubFlow>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("rename subflow {}", id);
    let subflows = state.subflows.clone();
    let result =
        blocking(move || subflows.rename(req.phase_seq, &id, &req.name, &req.data_dir)).await;
    finish(&state, &action, result)
}

#[derive(Debug, Deserialize)]
pub struct RelinkSubflowRequest {
    pub phase_seq: u32,
    pub parent_ids: Vec<String>,
}

async fn relink_subflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RelinkSubflowRequest>,
) -> std::result::Result<Json<SubFlow>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("relink subflow {}", id);
    let subflows = state.subflows.clone();
    let result = blocking(move || subflows.relink(req.phase_seq, &id, &req.parent_ids)).await;
    finish(&state, &action, result)
}

async fn delete_subflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> std::result::Result<Json<SubFlow>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("delete subflow {}", id);
    let subflows = state.subflows.clone();
    let result = blocking(move || subflows.delete(&id)).await;
    finish(&state, &action, result)
}

async fn get_subflow_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> std::result::Result<Json<SubflowStatus>, ApiError> {
    read_subflow_status(&state, &id).map(Json).map_err(api_error)
}

fn read_subflow_status(state: &AppState, id: &str) -> Result<SubflowStatus> {
    let (seq, phase_name) = state.store.phase_of(id)?;
    state
        .store
        .read_subflow_status(SubflowKey::new(seq, &phase_name, id))
}

#[derive(Debug, Deserialize)]
pub struct DiagramQuery {
    #[serde(default)]
    pub view: View,
    /// Link anchor relative to the workspace root; defaults to the subflow
    /// directory holding the menu.
    pub current_dir: Option<PathBuf>,
}

async fn get_diagram(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DiagramQuery>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let (seq, phase_name) = state.store.phase_of(&id).map_err(api_error)?;
    let key = SubflowKey::new(seq, &phase_name, &id);
    let sf = state.store.read_subflow_status(key).map_err(api_error)?;
    let layout = state.store.layout();

    let current_dir = match query.current_dir {
        Some(dir) if dir.is_relative() => layout.root().join(dir),
        Some(_) => return Err(api_error(FlowError::input("current_dir_must_be_relative"))),
        None => layout.subflow_dir(key),
    };
    let titles = resolve_titles(layout, key, &sf);
    let options = DiagramOptions {
        view: query.view,
        current_dir,
        task_dir: layout.working_task_dir(key),
    };
    let svg = render_svg(&sf, &titles, &options);
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnvironmentRequest {
    pub environment: String,
}

/// Read, mutate and write one subflow status document.
async fn update_subflow_status<F>(state: &AppState, id: String, f: F) -> Result<SubflowStatus>
where
    F: FnOnce(&mut SubflowStatus) -> Result<()> + Send + 'static,
{
    let store = state.store.clone();
    blocking(move || {
        let (seq, phase_name) = store.phase_of(&id)?;
        let key = SubflowKey::new(seq, &phase_name, &id);
        let mut sf = store.read_subflow_status(key)?;
        f(&mut sf)?;
        store.write_subflow_status(key, &sf)?;
        Ok(sf)
    })
    .await
}

async fn start_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
    Json(req): Json<EnvironmentRequest>,
) -> std::result::Result<Json<SubflowStatus>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("start task {} of {} in {}", task_id, id, req.environment);
    let result = update_subflow_status(&state, id, move |sf| {
        task_state::start(sf, &task_id, &req.environment)
    })
    .await;
    finish(&state, &action, result)
}

async fn finish_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
    Json(req): Json<EnvironmentRequest>,
) -> std::result::Result<Json<SubflowStatus>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("finish task {} of {} in {}", task_id, id, req.environment);
    let result = update_subflow_status(&state, id, move |sf| {
        task_state::finish(sf, &task_id, &req.environment)
    })
    .await;
    finish(&state, &action, result)
}

async fn reset_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
) -> std::result::Result<Json<SubflowStatus>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let action = format!("reset task {} of {}", task_id, id);
    let result =
        update_subflow_status(&state, id, move |sf| task_state::reset(sf, &task_id)).await;
    finish(&state, &action, result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Governance sheet
// ─────────────────────────────────────────────────────────────────────────────

async fn get_govsheet(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<Option<Value>>, ApiError> {
    state.govsheet.persisted_sheet().map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub sheet: Value,
}

/// Register a cancellation token for the apply about to run.
fn begin_apply(state: &AppState) -> CancellationToken {
    let token = CancellationToken::new();
    if let Ok(mut running) = state.running_apply.lock() {
        *running = Some(token.clone());
    }
    token
}

fn end_apply(state: &AppState) {
    if let Ok(mut running) = state.running_apply.lock() {
        *running = None;
    }
}

async fn apply_govsheet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplyRequest>,
) -> std::result::Result<Json<ApplyOutcome>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let schema = match &state.sheet_client {
        Some(client) => Some(client.govsheet_schema().await.map_err(api_error)?),
        None => None,
    };
    let cancel = begin_apply(&state);
    let engine = state.govsheet.clone();
    let result = blocking(move || engine.apply(&req.sheet, schema.as_ref(), &cancel)).await;
    end_apply(&state);
    finish(&state, "apply governance sheet", result)
}

async fn fetch_govsheet(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<FetchReport>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let (Some(client), Some(project)) = (
        state.sheet_client.as_ref(),
        state.config.remote.gov_sheet_project.clone(),
    ) else {
        return Err(api_error(FlowError::input("gov_sheet_service_not_configured")));
    };
    let vault = state
        .vault
        .as_ref()
        .ok_or_else(|| api_error(FlowError::UnusableVault("vault not initialised".to_string())))?;

    let remote = Collaborators {
        schema: client.as_ref(),
        sheets: client.as_ref(),
        vault: vault.as_ref(),
        object_store: state.object_store.as_ref().map(|s| s.as_ref() as &dyn ObjectStore),
    };
    let source = SheetSource {
        project,
        path: state.config.remote.gov_sheet_path.clone(),
    };

    let (tx, mut rx) = mpsc::channel::<SyncProgress>(64);
    let progress_log = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            tracing::debug!(done = p.done, total = p.total, path = %p.path, "Sync progress");
        }
    });

    let cancel = begin_apply(&state);
    let result = state
        .govsheet
        .fetch_and_apply(&remote, &source, Some(tx), &cancel)
        .await;
    end_apply(&state);
    let _ = progress_log.await;
    finish(&state, "fetch and apply governance sheet", result)
}

async fn cancel_govsheet(State(state): State<Arc<AppState>>) -> StatusCode {
    let running = state.running_apply.lock().ok().and_then(|r| r.clone());
    match running {
        Some(token) => {
            token.cancel();
            tracing::info!("Cancellation requested for running governance apply");
            StatusCode::ACCEPTED
        }
        None => StatusCode::NO_CONTENT,
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

async fn set_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    let vault = state
        .vault
        .as_ref()
        .ok_or_else(|| api_error(FlowError::UnusableVault("vault not initialised".to_string())))?;
    let token = req.token.trim();
    if token.is_empty() {
        return Err(api_error(FlowError::input("empty_token")));
    }
    vault.set(GOV_SHEET_TOKEN_KEY, token).map_err(api_error)?;
    state.activity.record(Level::Info, "store governance-service token");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testutil::Workspace;

    fn state(ws: &Workspace) -> Arc<AppState> {
        let mut config = Config::new(ws.temp.path().to_path_buf());
        config.vault_key = Some("33".repeat(32));
        Arc::new(AppState::new(config))
    }

    fn create_request(name: &str, data_dir: &str) -> CreateSubflowRequest {
        CreateSubflowRequest {
            phase_seq: 2,
            name: name.to_string(),
            data_dir: data_dir.to_string(),
            parent_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_then_duplicate_data_dir() {
        let ws = Workspace::new();
        let state = state(&ws);

        let (status, Json(sf)) = create_subflow(State(state.clone()), Json(create_request("Exp A", "expA")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(sf.name, "Exp A");

        let (status, Json(body)) = create_subflow(State(state.clone()), Json(create_request("Exp B", "expA")))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code.as_deref(), Some("must_not_same_data_dir"));

        let log = std::fs::read_to_string(state.activity.current_file()).unwrap();
        assert!(log.contains("\tINFO\tcreate subflow 'Exp A'"));
        assert!(log.contains("\tWARNING\t"));
    }

    #[tokio::test]
    async fn task_transitions_and_diagram() {
        let ws = Workspace::new();
        let state = state(&ws);
        let (_, Json(sf)) = create_subflow(State(state.clone()), Json(create_request("Exp", "exp")))
            .await
            .unwrap();

        let env = || {
            Json(EnvironmentRequest {
                environment: "env-1".to_string(),
            })
        };
        let id = sf.id.clone();
        let Json(started) = start_task(State(state.clone()), Path((id.clone(), "collect".to_string())), env())
            .await
            .unwrap();
        assert_eq!(started.task("collect").unwrap().status, crate::status::TaskStatus::Doing);
        let Json(status) = finish_task(State(state.clone()), Path((id.clone(), "collect".to_string())), env())
            .await
            .unwrap();
        assert_eq!(status.task("collect").unwrap().status, crate::status::TaskStatus::Done);
        assert_eq!(status.task("upload").unwrap().status, crate::status::TaskStatus::Unexecuted);

        let query = DiagramQuery {
            view: View::Full,
            current_dir: None,
        };
        let response = match get_diagram(State(state.clone()), Path(id), Query(query)).await {
            Ok(svg) => svg.into_response(),
            Err((status, _)) => panic!("diagram failed with {}", status),
        };
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/svg+xml"
        );
    }

    #[tokio::test]
    async fn unknown_subflow_is_not_found() {
        let ws = Workspace::new();
        let (status, _) = get_subflow_status(State(state(&ws)), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn fetch_without_service_is_a_warning() {
        let ws = Workspace::new();
        let (status, Json(body)) = fetch_govsheet(State(state(&ws))).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code.as_deref(), Some("gov_sheet_service_not_configured"));
    }

    #[tokio::test]
    async fn apply_without_schema_service() {
        let ws = Workspace::new();
        let state = state(&ws);
        let req = ApplyRequest {
            sheet: crate::testutil::sheet("cloud"),
        };
        let Json(outcome) = apply_govsheet(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Persisted);
        assert_eq!(cancel_govsheet(State(state)).await, StatusCode::NO_CONTENT);
    }
}
