//! Command correlation over a [`FrameTransport`].
//!
//! The client issues one outstanding command at a time, so instead of a
//! reader thread and a dispatch table the session polls the transport in
//! short slices right after writing a command, until the matching response
//! shows up or the slice budget runs out.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::errors::CdpError;
use crate::message::{CdpCommand, CdpResponse, parse_response};
use crate::transport::{FrameTransport, WsTransport};

/// Default number of polling slices granted to one command.
pub const DEFAULT_COMMAND_BUDGET: u32 = 200;
/// Default length of one polling slice.
pub const DEFAULT_COMMAND_SLICE: Duration = Duration::from_millis(1);

/// Unmatched responses kept around in case their command is still awaited.
const PENDING_CAPACITY: usize = 32;

/// Limits applied to each command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandPolicy {
    /// How long one poll of the transport may wait.
    pub slice: Duration,
    /// How many polls a command gets before timing out.
    pub budget: u32,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            slice: DEFAULT_COMMAND_SLICE,
            budget: DEFAULT_COMMAND_BUDGET,
        }
    }
}

impl CommandPolicy {
    /// Upper bound of the time spent waiting for one response.
    pub fn ceiling(&self) -> Duration {
        self.slice * self.budget
    }
}

/// One open DevTools session: transport, id counter and pending responses.
pub struct CdpSession {
    endpoint: String,
    transport: Box<dyn FrameTransport>,
    next_id: u64,
    pending: VecDeque<CdpResponse>,
    policy: CommandPolicy,
}

impl std::fmt::Debug for CdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpSession")
            .field("endpoint", &self.endpoint)
            .field("open", &self.transport.is_open())
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl CdpSession {
    /// Opens a WebSocket session on `endpoint`.
    pub fn open(
        endpoint: &str,
        open_timeout: Duration,
        policy: CommandPolicy,
    ) -> Result<Self, CdpError> {
        let transport = WsTransport::open(endpoint, open_timeout, policy.slice)?;
        Ok(Self::with_transport(endpoint, Box::new(transport), policy))
    }

    /// Wraps an already opened transport.
    pub fn with_transport(
        endpoint: &str,
        transport: Box<dyn FrameTransport>,
        policy: CommandPolicy,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            transport,
            next_id: 1,
            pending: VecDeque::new(),
            policy,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn policy(&self) -> CommandPolicy {
        self.policy
    }

    /// Sends `method` and waits for the response carrying the same id.
    ///
    /// Frames for other ids are kept in a small pending buffer, events and
    /// malformed frames are dropped. Exhausting the budget yields
    /// [`CdpError::Timeout`], which leaves the session usable.
    pub fn send(&mut self, method: &str, params: Value) -> Result<CdpResponse, CdpError> {
        if !self.transport.is_open() {
            return Err(CdpError::NotConnected);
        }

        let id = self.next_id;
        self.next_id += 1;

        let command = CdpCommand::new(id, method, params);
        let text = serde_json::to_string(&command)
            .map_err(|e| CdpError::Protocol(format!("failed to serialize command: {e}")))?;

        debug!(id, method, "sending CDP command");
        self.transport.send_text(&text)?;

        if let Some(response) = self.take_pending(id) {
            return Self::checked(response);
        }

        for _ in 0..self.policy.budget {
            let Some(frame) = self.transport.poll_frame()? else {
                continue;
            };
            let Some(response) = parse_response(&frame) else {
                trace!(len = frame.len(), "skipping CDP event or malformed frame");
                continue;
            };
            if response.id == id {
                return Self::checked(response);
            }
            trace!(id = response.id, awaited = id, "buffering unmatched CDP response");
            self.remember(response);
        }

        Err(CdpError::Timeout {
            method: method.to_string(),
            id,
            waited: self.policy.ceiling(),
        })
    }

    /// `Runtime.evaluate` with `returnByValue: true`.
    pub fn evaluate(&mut self, expression: &str) -> Result<CdpResponse, CdpError> {
        self.send(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
            }),
        )
    }

    /// Releases the connection. Idempotent.
    pub fn close(&mut self) {
        self.transport.close();
        self.pending.clear();
    }

    fn checked(response: CdpResponse) -> Result<CdpResponse, CdpError> {
        if let Some(err) = &response.error {
            return Err(CdpError::Remote {
                code: err.code,
                message: err.message.clone(),
            });
        }
        Ok(response)
    }

    fn take_pending(&mut self, id: u64) -> Option<CdpResponse> {
        let index = self.pending.iter().position(|r| r.id == id)?;
        self.pending.remove(index)
    }

    fn remember(&mut self, response: CdpResponse) {
        // Responses to ids we already gave up on can never be claimed.
        if response.id < self.next_id - 1 {
            return;
        }
        if self.pending.len() == PENDING_CAPACITY {
            self.pending.pop_front();
        }
        self.pending.push_back(response);
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.close();
    }
}
