//! Discord adapter: a thin [`conduit_channels::Channel`] implementation over
//! serenity's gateway client, converting inbound messages into the canonical
//! [`conduit_core::types::Message`] and translating [`conduit_core::types::OrchestratorIntent`]s
//! back into Discord API calls.

pub mod adapter;
pub mod attach;
pub mod error;
pub mod mention;
pub mod send;

pub use adapter::{DiscordChannel, DiscordSettings};
pub use error::DiscordError;
