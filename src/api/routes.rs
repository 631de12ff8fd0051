//! HTTP server setup.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::activity::ActivityLog;
use crate::config::Config;
use crate::govsheet::GovSheetEngine;
use crate::layout::Layout;
use crate::remote::{FileVault, GovSheetClient, HttpObjectStore};
use crate::status::StatusStore;
use crate::subflow::SubflowManager;

use super::researchflow;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: StatusStore,
    pub subflows: SubflowManager,
    pub govsheet: GovSheetEngine,
    pub activity: ActivityLog,
    /// Credential vault; `None` when it could not be opened
    pub vault: Option<Arc<FileVault>>,
    pub sheet_client: Option<Arc<GovSheetClient>>,
    pub object_store: Option<Arc<HttpObjectStore>>,
    /// Held by every mutating request so writes never interleave
    pub write_lock: Mutex<()>,
    /// Cancellation handle of the governance apply in progress
    pub running_apply: std::sync::Mutex<Option<CancellationToken>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let layout = Layout::new(config.root.clone());
        let store = StatusStore::new(layout.clone());

        let vault = match FileVault::open(layout.vault_dir(), config.vault_key.as_deref()) {
            Ok(vault) => Some(Arc::new(vault)),
            Err(e) => {
                tracing::warn!("Failed to open credential vault: {}", e);
                None
            }
        };

        let timeout = config.remote.timeout;
        let sheet_client = config.remote.gov_sheet_url.as_deref().and_then(|url| {
            GovSheetClient::new(url, timeout)
                .map_err(|e| tracing::warn!("Governance-sheet client unavailable: {}", e))
                .ok()
                .map(Arc::new)
        });
        let object_store = config.remote.object_store_url.as_deref().and_then(|url| {
            HttpObjectStore::new(url, timeout)
                .map_err(|e| tracing::warn!("Object-store client unavailable: {}", e))
                .ok()
                .map(Arc::new)
        });
        if sheet_client.is_none() {
            tracing::info!("Governance-sheet service disabled (GOV_SHEET_URL not set)");
        }

        Self {
            activity: ActivityLog::new(&layout, &config.env_id),
            subflows: SubflowManager::new(store.clone()),
            govsheet: GovSheetEngine::new(store.clone()),
            store,
            vault,
            sheet_client,
            object_store,
            write_lock: Mutex::new(()),
            running_apply: std::sync::Mutex::new(None),
            config,
        }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(researchflow::routes());
    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));
    let app = app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM and cancel a running governance apply.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    if let Ok(running) = state.running_apply.lock() {
        if let Some(token) = running.as_ref() {
            token.cancel();
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub setup_completed: bool,
    pub gov_sheet_service: bool,
    pub object_store: bool,
    /// A governance apply was interrupted and should be re-run
    pub pending_apply: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        setup_completed: state.store.layout().setup_completed().exists(),
        gov_sheet_service: state.sheet_client.is_some(),
        object_store: state.object_store.is_some(),
        pending_apply: state.govsheet.has_pending_apply(),
    })
}
