//! Short-term per-chat session history, distinct from `conduit-archive`'s
//! persistent full-text-indexed inbound archive — this is a small rolling
//! window kept for quick recent-turn lookups, capped at 50 entries per file.

pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::SessionStore;
pub use types::{Role, SessionTurn};
