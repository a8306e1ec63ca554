//! Chrome DevTools Protocol client: framed JSON over a WebSocket,
//! command/event multiplexing, target discovery, and the attach
//! lifecycle with reconnection.

mod discovery;
mod error;
mod session;
mod source;
mod transport;

pub use discovery::fetch_targets;
pub use error::CdpError;
pub use session::{CdpSession, Subscription, DEFAULT_COMMAND_TIMEOUT};
pub use source::{CdpSource, SourceConfig, SourceEvent, SourceMode};
pub use transport::{connect, InboundFrame, Transport};
