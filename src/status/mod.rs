//! Status documents and their persistence.

mod store;
pub mod types;

pub use store::{StatusStore, DEFAULT_PHASES};
pub(crate) use store::{read_json, write_atomic, write_json};
pub use types::*;
