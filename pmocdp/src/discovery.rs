//! Locating the debuggable page of the target through the DevTools HTTP
//! endpoint (`GET /json`).

use std::time::Duration;

use tracing::{debug, error};
use ureq::Agent;

use crate::errors::DiscoveryError;
use crate::extract::{enclosing_object, extract_string, find_ignore_ascii_case, truncate_utf8};

/// Connection timeout used for the page list request.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How much of a foreign page list is kept in a port conflict report.
const CONFLICT_SNIPPET_BYTES: usize = 300;

pub fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_connect(Some(timeout))
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// Fetches the page list served on `127.0.0.1:<port>` and returns the
/// `webSocketDebuggerUrl` of the page whose descriptor mentions `marker`.
pub fn discover_endpoint(
    port: u16,
    marker: &str,
    timeout: Duration,
) -> Result<String, DiscoveryError> {
    let url = format!("http://127.0.0.1:{}/json", port);
    debug!(url = %url, "querying DevTools page list");

    let mut response = build_agent(timeout)
        .get(&url)
        .call()
        .map_err(|e| DiscoveryError::Unreachable {
            port,
            reason: e.to_string(),
        })?;

    let status = response.status().as_u16();
    if status != 200 {
        error!(port, status, "DevTools page list request failed");
        return Err(DiscoveryError::HttpStatus { port, status });
    }

    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| DiscoveryError::Unreachable {
            port,
            reason: format!("failed to read page list: {e}"),
        })?;

    find_endpoint(&body, port, marker)
}

/// Scans a `/json` page list for the target page.
///
/// The marker is searched case-insensitively. When it is missing, a body that
/// still looks like a page list (it has a `"url"` key) means another
/// debuggable process owns the port; anything else means the target is not
/// running.
pub fn find_endpoint(body: &str, port: u16, marker: &str) -> Result<String, DiscoveryError> {
    let Some(at) = find_ignore_ascii_case(body, marker) else {
        if body.contains("\"url\"") {
            let snippet = truncate_utf8(body, CONFLICT_SNIPPET_BYTES).to_string();
            error!(port, snippet = %snippet, "port is used by a foreign debuggable process");
            return Err(DiscoveryError::PortConflict { port, snippet });
        }
        error!(port, marker, body_len = body.len(), "target page not found");
        return Err(DiscoveryError::TargetNotRunning {
            port,
            marker: marker.to_string(),
            body_len: body.len(),
        });
    };

    let page = enclosing_object(body, at).ok_or(DiscoveryError::MissingEndpoint { port })?;
    let endpoint = extract_string(page, "webSocketDebuggerUrl")
        .filter(|url| !url.is_empty())
        .ok_or(DiscoveryError::MissingEndpoint { port })?;

    debug!(port, endpoint = %endpoint, "target page found");
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "orpheus://";

    const PAGE_LIST: &str = r#"[ {
   "description": "",
   "devtoolsFrontendUrl": "/devtools/inspector.html?ws=127.0.0.1:9222/devtools/page/AAA",
   "id": "AAA",
   "title": "Other",
   "type": "page",
   "url": "https://music.163.com/",
   "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/AAA"
}, {
   "description": "",
   "id": "BBB",
   "title": "NetEase",
   "type": "page",
   "url": "Orpheus://orpheus/pub/app.html",
   "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/BBB"
} ]"#;

    #[test]
    fn test_finds_the_marked_page() {
        let endpoint = find_endpoint(PAGE_LIST, 9222, MARKER).unwrap();
        assert_eq!(endpoint, "ws://127.0.0.1:9222/devtools/page/BBB");
    }

    #[test]
    fn test_foreign_page_list_is_a_port_conflict() {
        let body = r#"[{"url":"https://unrelated","webSocketDebuggerUrl":"ws://x"}]"#;
        match find_endpoint(body, 9222, MARKER) {
            Err(DiscoveryError::PortConflict { port, snippet }) => {
                assert_eq!(port, 9222);
                assert!(snippet.contains("unrelated"));
            }
            other => panic!("expected a port conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_body_without_url_key_means_target_not_running() {
        let result = find_endpoint("[]", 9222, MARKER);
        assert!(matches!(
            result,
            Err(DiscoveryError::TargetNotRunning { body_len: 2, .. })
        ));
    }

    #[test]
    fn test_conflict_snippet_is_bounded() {
        let body = format!(r#"[{{"url":"{}"}}]"#, "x".repeat(1000));
        match find_endpoint(&body, 9222, MARKER) {
            Err(DiscoveryError::PortConflict { snippet, .. }) => {
                assert_eq!(snippet.len(), CONFLICT_SNIPPET_BYTES)
            }
            other => panic!("expected a port conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_marked_page_without_endpoint() {
        let body = r#"[{"url":"orpheus://orpheus/pub/app.html","id":"BBB"}]"#;
        assert_eq!(
            find_endpoint(body, 9222, MARKER),
            Err(DiscoveryError::MissingEndpoint { port: 9222 })
        );
    }

    #[test]
    fn test_unreachable_port() {
        // Nothing listens on port 9 (discard) on a test machine.
        let result = discover_endpoint(9, MARKER, Duration::from_millis(300));
        assert!(matches!(result, Err(DiscoveryError::Unreachable { port: 9, .. })));
    }
}
