//! HTTP adapter for the research-flow engine.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check and setup flag
//! - `GET /api/research-flow` - Research-flow status document
//! - `POST /api/research-flow/init` - Initialise the research flow
//! - `GET /api/phases` - Phase names in order
//! - `GET /api/phases/{phase}/subflows` - Subflow ids of a phase
//! - `POST /api/preparation/materialize` - Materialise the preparation subflow
//! - `POST /api/subflows` - Create a subflow
//! - `PUT /api/subflows/{id}` - Rename a subflow
//! - `DELETE /api/subflows/{id}` - Delete a subflow
//! - `PUT /api/subflows/{id}/parents` - Relink a subflow
//! - `GET /api/subflows/{id}/status` - Subflow status document
//! - `GET /api/subflows/{id}/diagram` - Task diagram as SVG
//! - `POST /api/subflows/{id}/tasks/{task}/start|finish|reset` - Task transitions
//! - `GET /api/govsheet` - Applied governance sheet
//! - `POST /api/govsheet/apply` - Apply a governance sheet
//! - `POST /api/govsheet/fetch` - Download and apply the project's sheet
//! - `POST /api/govsheet/cancel` - Cancel a running apply
//! - `PUT /api/govsheet/token` - Store the governance-service token

mod error;
mod researchflow;
mod routes;

pub use error::{api_error, ErrorBody};
pub use routes::{app, serve, AppState, HealthResponse};
