//! Append-only inbound message archive and conversational context-window
//! queries.

pub mod db;
pub mod error;
pub mod manager;
pub mod retention;
pub mod types;

pub use error::{ArchiveError, Result};
pub use manager::ArchiveStore;
pub use retention::{run_daily_sweep, DEFAULT_RETENTION};
pub use types::{ChatRef, SearchHit};
