use async_trait::async_trait;
use conduit_core::types::OrchestratorIntent;

use crate::error::ChannelError;
use crate::types::ChannelStatus;

/// Common interface implemented by every channel adapter (WhatsApp,
/// Telegram, Discord, Feishu). An adapter converts a platform event into a
/// canonical `Message` and publishes it onto the inbound bus.
///
/// An adapter owns the platform connection and pushes inbound
/// [`conduit_core::types::Message`]s onto the [`crate::bus::InboundBus`] it
/// was constructed with; it does not call into the pipeline directly. The
/// only pull-based operation the rest of the system needs from an adapter
/// is `send` (delivering an outbound intent back out).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    ///
    /// Used as the key inside [`crate::manager::ChannelManager`] and must be
    /// unique across all registered adapters.
    fn name(&self) -> &str;

    /// Establish the connection to the external service and begin
    /// publishing inbound messages onto the bus. Returns once the initial
    /// connection succeeds; the adapter's event loop continues on its own
    /// background task.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Deliver one outbound intent (text, media, reaction, typing) to the
    /// channel. `&self` so a connected adapter can send concurrently
    /// without a mutable borrow.
    async fn send(&self, intent: &OrchestratorIntent) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
