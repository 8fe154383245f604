//! Persistent WebSocket connection to a DevTools session endpoint.
//!
//! The transport knows nothing about command ids: it writes text frames and
//! hands back inbound text frames one at a time, waiting at most one short
//! slice for each. Correlation lives in [`crate::session`].

use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::{Message, WebSocket};

use crate::errors::CdpError;

/// Frame-level I/O used by the correlator.
///
/// Implemented by [`WsTransport`] for real sessions; tests substitute scripted
/// transports.
pub trait FrameTransport: Send {
    /// Writes one text frame.
    fn send_text(&mut self, text: &str) -> Result<(), CdpError>;

    /// Waits at most one slice for the next inbound text frame.
    ///
    /// `Ok(None)` means nothing usable arrived during the slice (including
    /// control frames). An error means the connection is gone.
    fn poll_frame(&mut self) -> Result<Option<String>, CdpError>;

    /// Releases the connection. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Blocking tungstenite WebSocket over a plain TCP stream.
///
/// DevTools endpoints are always `ws://` on the local host, so TLS is not
/// supported.
pub struct WsTransport {
    endpoint: String,
    socket: WebSocket<TcpStream>,
    open: bool,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.open)
            .finish()
    }
}

impl WsTransport {
    /// Connects and performs the WebSocket handshake.
    ///
    /// `open_timeout` bounds the TCP connect and the handshake; afterwards the
    /// socket read timeout is set to `slice` so that [`poll_frame`] never
    /// blocks longer than that. Failures are reported, never retried here.
    ///
    /// [`poll_frame`]: FrameTransport::poll_frame
    pub fn open(endpoint: &str, open_timeout: Duration, slice: Duration) -> Result<Self, CdpError> {
        let request = endpoint
            .into_client_request()
            .map_err(|e| CdpError::transport(endpoint, e))?;

        let (host, port) = {
            let uri = request.uri();
            if uri.scheme_str() != Some("ws") {
                return Err(CdpError::transport(
                    endpoint,
                    "only ws:// endpoints are supported",
                ));
            }
            let host = uri
                .host()
                .ok_or_else(|| CdpError::transport(endpoint, "endpoint has no host"))?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            (host, uri.port_u16().unwrap_or(80))
        };

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| CdpError::transport(endpoint, e))?
            .next()
            .ok_or_else(|| CdpError::transport(endpoint, "endpoint host does not resolve"))?;

        let stream = TcpStream::connect_timeout(&addr, open_timeout)
            .map_err(|e| CdpError::transport(endpoint, e))?;
        stream
            .set_read_timeout(Some(open_timeout))
            .and_then(|_| stream.set_write_timeout(Some(open_timeout)))
            .map_err(|e| CdpError::transport(endpoint, e))?;
        let _ = stream.set_nodelay(true);

        let (socket, _response) =
            tungstenite::client(request, stream).map_err(|e| CdpError::transport(endpoint, e))?;

        // Zero is rejected by the OS as a read timeout.
        let slice = slice.max(Duration::from_millis(1));
        socket
            .get_ref()
            .set_read_timeout(Some(slice))
            .map_err(|e| CdpError::transport(endpoint, e))?;

        debug!(endpoint, "DevTools WebSocket opened");

        Ok(Self {
            endpoint: endpoint.to_string(),
            socket,
            open: true,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn lost(&mut self, reason: String) -> CdpError {
        warn!(endpoint = %self.endpoint, reason = %reason, "DevTools WebSocket lost");
        self.open = false;
        CdpError::ConnectionClosed(reason)
    }
}

impl FrameTransport for WsTransport {
    fn send_text(&mut self, text: &str) -> Result<(), CdpError> {
        if !self.open {
            return Err(CdpError::NotConnected);
        }
        self.socket
            .send(Message::Text(text.to_owned().into()))
            .map_err(|e| self.lost(format!("send failed: {e}")))
    }

    fn poll_frame(&mut self) -> Result<Option<String>, CdpError> {
        if !self.open {
            return Err(CdpError::NotConnected);
        }
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text.to_string())),
            Ok(Message::Binary(bytes)) => Ok(String::from_utf8(bytes.to_vec()).ok()),
            Ok(Message::Close(_)) => Err(self.lost("closed by remote".to_string())),
            // Ping/pong are answered by tungstenite itself.
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(e) => Err(self.lost(format!("read failed: {e}"))),
        }
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        let _ = self.socket.get_ref().shutdown(Shutdown::Both);
        debug!(endpoint = %self.endpoint, "DevTools WebSocket closed");
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
