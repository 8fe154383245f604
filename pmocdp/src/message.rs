//! CDP wire messages: outgoing commands and correlated responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command frame, `{"id": N, "method": M, "params": P}`.
#[derive(Debug, Clone, Serialize)]
pub struct CdpCommand {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl CdpCommand {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Error object carried by a CDP response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

/// A response frame matched to a command by its `id`.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpResponseError>,
    /// Frame text as received, kept for tolerant field extraction.
    pub raw: String,
}

impl CdpResponse {
    /// `result.result.value` of a `Runtime.evaluate` answer made with
    /// `returnByValue: true`.
    pub fn evaluated_value(&self) -> Option<&Value> {
        self.result.as_ref()?.get("result")?.get("value")
    }

    /// Text of the JavaScript exception, if evaluation threw.
    pub fn exception_text(&self) -> Option<String> {
        let details = self.result.as_ref()?.get("exceptionDetails")?;
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .or_else(|| details.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown exception");
        Some(text.to_string())
    }
}

/// Parses one inbound frame. Returns `None` for events (no `id`) and for
/// frames that are not JSON objects.
pub fn parse_response(text: &str) -> Option<CdpResponse> {
    let json: Value = serde_json::from_str(text).ok()?;
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
        raw: text.to_string(),
    })
}
