//! Minimal Chrome DevTools Protocol client.
//!
//! Only what is needed to watch an embedded Chromium page from the outside:
//!
//! - **discovery**: find a page in the `/json` list served on the debugging
//!   port and read its `webSocketDebuggerUrl`;
//! - **transport**: one blocking WebSocket per page, read in short slices;
//! - **session**: command ids and response correlation with a bounded wait,
//!   plus `Runtime.evaluate`;
//! - **extract**: tolerant `"key": value` lookups in JSON-ish text.
//!
//! Everything is synchronous; callers run it from their own threads.

pub mod discovery;
pub mod errors;
pub mod extract;
pub mod message;
pub mod session;
pub mod transport;

pub use discovery::{DEFAULT_DISCOVERY_TIMEOUT, discover_endpoint, find_endpoint};
pub use errors::{CdpError, DiscoveryError};
pub use message::{CdpCommand, CdpResponse, CdpResponseError};
pub use session::{CdpSession, CommandPolicy};
pub use transport::{FrameTransport, WsTransport};
