pub mod cache;
pub mod config;
pub mod error;
pub mod media;
pub mod types;

pub use error::{ConduitError, Result};
