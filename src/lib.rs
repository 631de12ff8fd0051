//! # researchflow
//!
//! State engine for research workflows organised in phases.
//!
//! A research flow is a sequence of phases; each phase holds subflows, and
//! each subflow owns a set of tasks backed by notebook templates. The engine
//! keeps two kinds of JSON documents on disk (the research-flow status and one
//! status per subflow) and offers:
//!
//! - `layout`: canonical paths inside a workspace
//! - `status`: the documents and their store
//! - `task_state`: task transitions and dependency unlocking
//! - `subflow`: create, rename, relink and delete with rollback
//! - `govsheet`: governance sheets selecting the active tasks
//! - `diagram`: SVG rendering of a subflow's tasks
//! - `remote`: schema/sheet service, object store and credential vault
//! - `api`: an HTTP adapter over the same operations
//!
//! ```text
//!   governance sheet ──► mapping ──► active tasks ──► subflow status.json
//!                                                        │
//!   start/finish ──► task_state ──► recompute ───────────┘──► diagram
//! ```

pub mod activity;
pub mod api;
pub mod config;
pub mod diagram;
pub mod error;
pub mod govsheet;
pub mod layout;
pub mod remote;
pub mod status;
pub mod subflow;
pub mod task_state;
pub mod util;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::{ErrorKind, FlowError, Result};
pub use govsheet::{ApplyOutcome, GovSheetEngine};
pub use layout::{Layout, SubflowKey};
pub use status::StatusStore;
pub use subflow::SubflowManager;
