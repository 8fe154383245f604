//! # pmonetease
//!
//! Observes the NetEase Cloud Music desktop client through the DevTools
//! port of its embedded Chromium, and publishes what it is playing.
//!
//! - [`probes`]: the JavaScript injected in the page and the parsing of its
//!   answers;
//! - [`client`]: [`NeteaseClient`], a [`PlayerSession`] over `pmocdp`;
//! - [`smoothing`]: play/pause inference from coarse progress samples;
//! - [`driver`]: [`NeteaseDriver`], connection lifecycle and the monitor
//!   thread;
//! - [`logging`]: log callback plumbing and subscriber setup;
//! - `ffi` (feature `ffi`): C entry points over the driver.
//!
//! The client must be started with `--remote-debugging-port=<port>`.

pub mod client;
pub mod config;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod probes;
pub mod smoothing;
pub mod state;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use client::{ClientOptions, NeteaseClient, PlayerSession};
pub use config::DriverConfig;
pub use driver::{NeteaseDriver, NeteaseDriverBuilder, SessionFactory, TrackChangedCallback};
pub use errors::NeteaseError;
pub use logging::{CallbackLayer, LogCallback, LogSink, LoggingError, LoggingOptions, init_logging};
pub use probes::ProgressSample;
pub use smoothing::{SmoothingCache, SmoothingParams};
pub use state::{ConnectionState, PlaybackSnapshot, RawPlaybackState, TRACK_ID_CAPACITY};
