use pmocdp::CdpError;
use thiserror::Error;

/// Errors raised by the NetEase client and driver.
#[derive(Debug, Error)]
pub enum NeteaseError {
    #[error(transparent)]
    Cdp(#[from] CdpError),

    /// The poll answer did not carry the expected fields.
    #[error("unreadable progress probe answer: {detail}")]
    ProbeParse { detail: String },

    #[error("progress listener registration rejected: {reason}")]
    ListenerRejected { reason: String },

    #[error("not connected to the NetEase client")]
    NotConnected,

    #[error("failed to start the monitor thread: {0}")]
    MonitorSpawn(#[source] std::io::Error),
}

impl NeteaseError {
    /// True when the session is gone and a reconnect is needed.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            NeteaseError::Cdp(err) => err.is_connection_lost(),
            NeteaseError::NotConnected => true,
            _ => false,
        }
    }
}
