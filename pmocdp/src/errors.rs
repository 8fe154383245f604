use std::time::Duration;

use thiserror::Error;

/// Why the debuggable page of the target could not be located.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("cannot reach DevTools endpoint on port {port}: {reason}")]
    Unreachable { port: u16, reason: String },
    #[error("DevTools endpoint on port {port} answered HTTP {status}")]
    HttpStatus { port: u16, status: u16 },
    /// The page list answered but no entry carries the target marker, and the
    /// body does not look like a page list at all.
    #[error("target page '{marker}' not found on port {port} (body length {body_len})")]
    TargetNotRunning {
        port: u16,
        marker: String,
        body_len: usize,
    },
    /// A page list was served, but by some other debuggable process.
    #[error("port {port} is used by another debuggable process: {snippet}")]
    PortConflict { port: u16, snippet: String },
    #[error("target page on port {port} has no webSocketDebuggerUrl")]
    MissingEndpoint { port: u16 },
}

#[derive(Error, Debug)]
pub enum CdpError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("failed to open DevTools session at {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },
    #[error("DevTools session closed: {0}")]
    ConnectionClosed(String),
    #[error("CDP command '{method}' (id {id}) got no response within {waited:?}")]
    Timeout {
        method: String,
        id: u64,
        waited: Duration,
    },
    #[error("CDP protocol error: {0}")]
    Protocol(String),
    #[error("CDP error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("no DevTools session is open")]
    NotConnected,
}

impl CdpError {
    pub fn transport(endpoint: &str, reason: impl ToString) -> Self {
        CdpError::Transport {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the session cannot be used anymore and must be reopened.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, CdpError::ConnectionClosed(_) | CdpError::NotConnected)
    }

    /// Soft failures leave the session usable.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CdpError::Timeout { .. })
    }
}
