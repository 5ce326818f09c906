//! WhatsApp bridge adapter: owns the wire protocol, participant and
//! media processing, reconnect supervision, and the loopback control-plane
//! server. Everything that talks to WhatsApp's actual multi-device protocol
//! lives behind [`transport::WhatsAppTransport`].

pub mod channel;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod jid;
pub mod media;
pub mod mention;
pub mod processing;
pub mod raw;
pub mod reconnect;
pub mod server;
pub mod session;
pub mod transport;

pub use channel::{WhatsAppBridgeSettings, WhatsAppChannel};
pub use error::BridgeError;
pub use server::{router, BridgeServer};
pub use session::{BridgeSession, BridgeSettings};
pub use transport::{NullTransport, WhatsAppTransport};
