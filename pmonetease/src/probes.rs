//! JavaScript probes evaluated inside the NetEase page, and the parsing of
//! their answers.
//!
//! The page exposes playback progress only through its internal event bus
//! (`window.channel`). The register probe installs a listener that mirrors the
//! last `audioplayer.onPlayProgress` event into `window.__NCM_PROGRESS__`; the
//! poll probe reads it back, re-installing the listener when the mirror is
//! missing or stale, and scrapes the track duration from the progress slider.

use std::time::Duration;

use pmocdp::extract::{extract_bool, extract_number, extract_string, truncate_utf8};
use serde::Serialize;

use crate::errors::NeteaseError;

/// Event bus message carrying `(songId, currentTime)`.
pub const PROGRESS_EVENT: &str = "audioplayer.onPlayProgress";

/// Page global holding the last progress event.
pub const PROGRESS_GLOBAL: &str = "__NCM_PROGRESS__";

const LISTENER: &str = r#"function (songId, currentTime) {
        var p = window.__NCM_PROGRESS__ || {};
        p.songId = String(songId || '');
        p.currentTime = Number(currentTime) || 0;
        p.timestamp = Date.now();
        window.__NCM_PROGRESS__ = p;
    }"#;

const REGISTER_TEMPLATE: &str = r#"(function () {
    var channel = window.channel;
    if (!channel || typeof channel.registerCall !== 'function') {
        return { success: false, error: 'NO_CHANNEL' };
    }
    channel.registerCall('__EVENT__', __LISTENER__);
    return { success: true };
})()"#;

const POLL_TEMPLATE: &str = r#"(function () {
    var progress = window.__NCM_PROGRESS__;
    if (!progress || Date.now() - (progress.timestamp || 0) > __STALE_MS__) {
        var channel = window.channel;
        if (channel && typeof channel.registerCall === 'function') {
            channel.registerCall('__EVENT__', __LISTENER__);
        }
    }

    var p = window.__NCM_PROGRESS__ || {};
    var duration = null;
    try {
        var slider = document.querySelector('[class*="slider"][class*="StyledSliderContainer"]')
            || document.querySelector('[class*="slider"]');
        var input = slider
            && (slider.querySelector('input[type="range"]') || slider.querySelector('input'));
        if (input) {
            if (input.max) {
                duration = parseFloat(input.max);
            } else {
                for (var key in input) {
                    if (key.indexOf('__reactFiber') === 0
                        || key.indexOf('__reactInternalInstance') === 0) {
                        var fiber = input[key];
                        var props = fiber && (fiber.pendingProps || fiber.memoizedProps);
                        if (props && typeof props.max === 'number') {
                            duration = props.max;
                            break;
                        }
                    }
                }
            }
        }
    } catch (e) {}

    return {
        songId: p.songId || '',
        currentTime: p.currentTime || 0,
        duration: (typeof duration === 'number' && isFinite(duration)) ? duration : null
    };
})()"#;

/// Expression installing the progress listener. Evaluating it twice simply
/// replaces the listener.
pub fn register_probe() -> String {
    REGISTER_TEMPLATE
        .replace("__EVENT__", PROGRESS_EVENT)
        .replace("__LISTENER__", LISTENER)
}

/// Expression reading back the progress mirror.
///
/// The listener is re-registered inline when the mirror is missing or older
/// than `stale_after`, which covers page reloads inside the client.
pub fn poll_probe(stale_after: Duration) -> String {
    POLL_TEMPLATE
        .replace("__STALE_MS__", &stale_after.as_millis().to_string())
        .replace("__EVENT__", PROGRESS_EVENT)
        .replace("__LISTENER__", LISTENER)
}

/// One successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    /// Position in the current track, in seconds.
    pub current_time: f64,
    /// Track length read from the UI; `None` when the slider could not be read.
    pub total_duration: Option<f64>,
    /// `None` when the page reported no track id.
    pub track_id: Option<String>,
}

/// Reads a poll answer.
///
/// `currentTime` is mandatory and must be positive; `duration` and `songId`
/// are best effort.
pub fn parse_progress(raw: &str) -> Result<ProgressSample, NeteaseError> {
    let current_time =
        extract_number(raw, "currentTime").ok_or_else(|| NeteaseError::ProbeParse {
            detail: format!("no currentTime in {}", truncate_utf8(raw, 200)),
        })?;
    // The poll script answers 0 while the mirror is empty (page reload, lost
    // listener): no position has been reported yet.
    if current_time <= 0.0 {
        return Err(NeteaseError::ProbeParse {
            detail: "empty progress mirror".to_string(),
        });
    }

    let total_duration = extract_number(raw, "duration").filter(|d| d.is_finite() && *d >= 0.0);
    let track_id = extract_string(raw, "songId").filter(|id| !id.is_empty());

    Ok(ProgressSample {
        current_time,
        total_duration,
        track_id,
    })
}

/// True when the register probe reported `success: true`.
pub fn registration_accepted(raw: &str) -> bool {
    extract_bool(raw, "success") == Some(true)
}

/// Reason given by a rejected registration, if any.
pub fn registration_error(raw: &str) -> Option<String> {
    extract_string(raw, "error").filter(|e| !e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluated(value: &str) -> String {
        format!(
            r#"{{"id":7,"result":{{"result":{{"type":"object","value":{}}}}}}}"#,
            value
        )
    }

    #[test]
    fn test_parse_full_sample() {
        let raw = evaluated(r#"{"songId":"501220770_KRHXXN","currentTime":42.25,"duration":215.5}"#);
        let sample = parse_progress(&raw).unwrap();
        assert_eq!(sample.current_time, 42.25);
        assert_eq!(sample.total_duration, Some(215.5));
        assert_eq!(sample.track_id.as_deref(), Some("501220770_KRHXXN"));
    }

    #[test]
    fn test_missing_current_time_is_a_parse_failure() {
        let raw = evaluated(r#"{"songId":"1","duration":100}"#);
        assert!(matches!(
            parse_progress(&raw),
            Err(NeteaseError::ProbeParse { .. })
        ));
    }

    #[test]
    fn test_empty_mirror_is_a_parse_failure() {
        let raw = evaluated(r#"{"songId":"","currentTime":0,"duration":null}"#);
        assert!(matches!(
            parse_progress(&raw),
            Err(NeteaseError::ProbeParse { .. })
        ));

        let negative = evaluated(r#"{"songId":"1","currentTime":-1,"duration":100}"#);
        assert!(parse_progress(&negative).is_err());
    }

    #[test]
    fn test_duration_is_optional() {
        let missing = evaluated(r#"{"songId":"1","currentTime":3}"#);
        assert_eq!(parse_progress(&missing).unwrap().total_duration, None);

        let null = evaluated(r#"{"songId":"1","currentTime":3,"duration":null}"#);
        assert_eq!(parse_progress(&null).unwrap().total_duration, None);
    }

    #[test]
    fn test_empty_song_id_is_absent() {
        let raw = evaluated(r#"{"songId":"","currentTime":3,"duration":null}"#);
        assert_eq!(parse_progress(&raw).unwrap().track_id, None);
    }

    #[test]
    fn test_registration_outcome() {
        assert!(registration_accepted(&evaluated(r#"{"success":true}"#)));
        assert!(registration_accepted(r#"{"success": true}"#));

        let rejected = evaluated(r#"{"success":false,"error":"NO_CHANNEL"}"#);
        assert!(!registration_accepted(&rejected));
        assert_eq!(registration_error(&rejected).as_deref(), Some("NO_CHANNEL"));

        assert!(!registration_accepted(r#"{"id":1,"result":{}}"#));
    }

    #[test]
    fn test_probes_are_fully_expanded() {
        let register = register_probe();
        assert!(register.contains("'audioplayer.onPlayProgress'"));
        assert!(register.contains("window.__NCM_PROGRESS__ = p"));
        assert!(!register.contains("__LISTENER__"));

        let poll = poll_probe(Duration::from_secs(5));
        assert!(poll.contains("> 5000"));
        assert!(poll.contains("__reactFiber"));
        assert!(poll.contains("__reactInternalInstance"));
        assert!(!poll.contains("__STALE_MS__"));
        assert!(!poll.contains("__EVENT__"));
    }
}
