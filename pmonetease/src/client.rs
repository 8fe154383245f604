//! Protocol client for the NetEase page: discovery, session and probes
//! behind one small interface.

use std::time::Duration;

use pmocdp::extract::truncate_utf8;
use pmocdp::{CdpError, CdpResponse, CdpSession, CommandPolicy, discover_endpoint};
use tracing::{debug, info, warn};

use crate::errors::NeteaseError;
use crate::probes::{
    ProgressSample, parse_progress, poll_probe, register_probe, registration_accepted,
    registration_error,
};

/// Operations the driver needs from a session with the player.
///
/// [`NeteaseClient`] is the real implementation; tests plug scripted ones into
/// the driver through its session factory.
pub trait PlayerSession: Send {
    /// Discovers the page on `port` and opens a session. Succeeds without
    /// doing anything when already connected.
    fn connect(&mut self, port: u16) -> Result<(), NeteaseError>;

    fn is_connected(&self) -> bool;

    /// Runs `expression` in the page and returns the raw answer.
    fn evaluate(&mut self, expression: &str) -> Result<CdpResponse, NeteaseError>;

    /// Installs the progress listener in the page.
    fn register_listener(&mut self) -> Result<(), NeteaseError>;

    /// Reads the latest progress.
    fn poll_progress(&mut self) -> Result<ProgressSample, NeteaseError>;

    /// Closes the session. Idempotent.
    fn disconnect(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub target_marker: String,
    /// Bounds the page list request and the WebSocket handshake.
    pub discovery_timeout: Duration,
    pub policy: CommandPolicy,
    pub stale_after: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            target_marker: pmoconfig::DEFAULT_TARGET_MARKER.to_string(),
            discovery_timeout: pmocdp::DEFAULT_DISCOVERY_TIMEOUT,
            policy: CommandPolicy::default(),
            stale_after: Duration::from_millis(pmoconfig::DEFAULT_STALE_AFTER_MS),
        }
    }
}

/// [`PlayerSession`] over a real DevTools connection.
#[derive(Debug)]
pub struct NeteaseClient {
    options: ClientOptions,
    session: Option<CdpSession>,
    register_expression: String,
    poll_expression: String,
}

impl NeteaseClient {
    pub fn new(options: ClientOptions) -> Self {
        let poll_expression = poll_probe(options.stale_after);
        Self {
            options,
            session: None,
            register_expression: register_probe(),
            poll_expression,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.endpoint())
    }
}

impl Default for NeteaseClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl PlayerSession for NeteaseClient {
    fn connect(&mut self, port: u16) -> Result<(), NeteaseError> {
        if self.is_connected() {
            return Ok(());
        }
        // A session that lost its socket is dropped before opening a new one.
        self.disconnect();

        let endpoint = discover_endpoint(
            port,
            &self.options.target_marker,
            self.options.discovery_timeout,
        )
        .map_err(CdpError::from)?;

        info!(port, endpoint = %endpoint, "Connecting to NetEase page");
        let session = CdpSession::open(
            &endpoint,
            self.options.discovery_timeout,
            self.options.policy,
        )?;
        self.session = Some(session);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
    }

    fn evaluate(&mut self, expression: &str) -> Result<CdpResponse, NeteaseError> {
        let session = self.session.as_mut().ok_or(NeteaseError::NotConnected)?;
        match session.evaluate(expression) {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_connection_lost() {
                    warn!(error = %err, "NetEase session lost");
                    self.disconnect();
                }
                Err(err.into())
            }
        }
    }

    fn register_listener(&mut self) -> Result<(), NeteaseError> {
        let expression = self.register_expression.clone();
        let response = self.evaluate(&expression)?;

        if registration_accepted(&response.raw) {
            info!("Progress listener registered");
            return Ok(());
        }

        let reason = registration_error(&response.raw)
            .or_else(|| response.exception_text())
            .unwrap_or_else(|| truncate_utf8(&response.raw, 200).to_string());
        Err(NeteaseError::ListenerRejected { reason })
    }

    fn poll_progress(&mut self) -> Result<ProgressSample, NeteaseError> {
        let expression = self.poll_expression.clone();
        let response = self.evaluate(&expression)?;

        if let Some(exception) = response.exception_text() {
            return Err(NeteaseError::ProbeParse {
                detail: format!("probe threw: {exception}"),
            });
        }

        let sample = parse_progress(&response.raw)?;
        debug!(
            current_time = sample.current_time,
            duration = ?sample.total_duration,
            track_id = ?sample.track_id,
            "Progress polled"
        );
        Ok(sample)
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            debug!(endpoint = session.endpoint(), "NetEase session closed");
        }
    }
}

impl Drop for NeteaseClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_require_a_session() {
        let mut client = NeteaseClient::default();
        assert!(!client.is_connected());
        assert!(matches!(
            client.evaluate("1 + 1"),
            Err(NeteaseError::NotConnected)
        ));
        assert!(matches!(
            client.poll_progress(),
            Err(NeteaseError::NotConnected)
        ));
        assert!(matches!(
            client.register_listener(),
            Err(NeteaseError::NotConnected)
        ));
        client.disconnect();
        client.disconnect();
    }

    #[test]
    fn test_connect_without_target_fails_cleanly() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = NeteaseClient::new(ClientOptions {
            discovery_timeout: Duration::from_millis(300),
            ..ClientOptions::default()
        });
        let err = client.connect(port).unwrap_err();
        assert!(matches!(
            err,
            NeteaseError::Cdp(CdpError::Discovery(
                pmocdp::DiscoveryError::Unreachable { .. }
            ))
        ));
        assert!(!client.is_connected());
    }
}
