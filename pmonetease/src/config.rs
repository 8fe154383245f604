//! Driver settings and their mapping from `pmoconfig`.

use std::time::Duration;

use pmocdp::CommandPolicy;
use pmoconfig::Config;

use crate::client::ClientOptions;
use crate::smoothing::SmoothingParams;

/// Shortest monitor tick or reconnect pause accepted from configuration.
pub const MIN_MONITOR_WAIT: Duration = Duration::from_millis(10);

/// Everything the driver and its client need to know, resolved once.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Remote debugging port of the NetEase client.
    pub port: u16,
    pub target_marker: String,
    pub discovery_timeout: Duration,
    pub command_slice: Duration,
    pub command_budget: u32,
    /// Monitor tick.
    pub poll_interval: Duration,
    /// Pause after a failed reconnect.
    pub reconnect_backoff: Duration,
    /// Age after which the poll probe re-installs the page listener.
    pub stale_after: Duration,
    pub playing_threshold: Duration,
    pub duration_epsilon: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port: pmoconfig::DEFAULT_CDP_PORT,
            target_marker: pmoconfig::DEFAULT_TARGET_MARKER.to_string(),
            discovery_timeout: Duration::from_millis(pmoconfig::DEFAULT_DISCOVERY_TIMEOUT_MS),
            command_slice: Duration::from_millis(pmoconfig::DEFAULT_COMMAND_SLICE_MS),
            command_budget: pmoconfig::DEFAULT_COMMAND_BUDGET as u32,
            poll_interval: Duration::from_millis(pmoconfig::DEFAULT_POLL_INTERVAL_MS),
            reconnect_backoff: Duration::from_millis(pmoconfig::DEFAULT_RECONNECT_BACKOFF_MS),
            stale_after: Duration::from_millis(pmoconfig::DEFAULT_STALE_AFTER_MS),
            playing_threshold: Duration::from_millis(pmoconfig::DEFAULT_PLAYING_THRESHOLD_MS),
            duration_epsilon: pmoconfig::DEFAULT_DURATION_EPSILON,
        }
    }
}

impl DriverConfig {
    /// Reads the `cdp` and `driver` sections. Unreadable values keep their
    /// defaults; the monitor waits are at least [`MIN_MONITOR_WAIT`].
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();

        Self {
            port: config.get_cdp_port(),
            target_marker: config
                .get_target_marker()
                .unwrap_or_else(|_| defaults.target_marker.clone()),
            discovery_timeout: millis(
                config.get_discovery_timeout_ms(),
                defaults.discovery_timeout,
            ),
            command_slice: millis(config.get_command_slice_ms(), defaults.command_slice),
            command_budget: config
                .get_command_budget()
                .ok()
                .and_then(|b| u32::try_from(b).ok())
                .filter(|b| *b > 0)
                .unwrap_or(defaults.command_budget),
            poll_interval: millis(config.get_poll_interval_ms(), defaults.poll_interval)
                .max(MIN_MONITOR_WAIT),
            reconnect_backoff: millis(
                config.get_reconnect_backoff_ms(),
                defaults.reconnect_backoff,
            )
            .max(MIN_MONITOR_WAIT),
            stale_after: millis(config.get_stale_after_ms(), defaults.stale_after),
            playing_threshold: millis(
                config.get_playing_threshold_ms(),
                defaults.playing_threshold,
            ),
            duration_epsilon: config
                .get_duration_epsilon()
                .unwrap_or(defaults.duration_epsilon),
        }
    }

    pub fn command_policy(&self) -> CommandPolicy {
        CommandPolicy {
            slice: self.command_slice,
            budget: self.command_budget,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            target_marker: self.target_marker.clone(),
            discovery_timeout: self.discovery_timeout,
            policy: self.command_policy(),
            stale_after: self.stale_after,
        }
    }

    pub fn smoothing(&self) -> SmoothingParams {
        SmoothingParams {
            playing_threshold: self.playing_threshold,
            duration_epsilon: self.duration_epsilon,
        }
    }
}

fn millis<E>(value: Result<u64, E>, fallback: Duration) -> Duration {
    match value {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_embedded_configuration() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(DriverConfig::from_config(&config), DriverConfig::default());
    }

    #[test]
    fn test_values_are_read_from_configuration() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config.set_cdp_port(9333).unwrap();
        config.set_poll_interval_ms(250).unwrap();
        config.set_command_budget(50).unwrap();
        config.set_duration_epsilon(0.5).unwrap();

        let driver = DriverConfig::from_config(&config);
        assert_eq!(driver.port, 9333);
        assert_eq!(driver.poll_interval, Duration::from_millis(250));
        assert_eq!(driver.command_policy().budget, 50);
        assert_eq!(driver.smoothing().duration_epsilon, 0.5);
    }

    #[test]
    fn test_zero_monitor_waits_are_clamped() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config.set_poll_interval_ms(0).unwrap();
        config.set_reconnect_backoff_ms(0).unwrap();

        let driver = DriverConfig::from_config(&config);
        assert_eq!(driver.poll_interval, MIN_MONITOR_WAIT);
        assert_eq!(driver.reconnect_backoff, MIN_MONITOR_WAIT);
    }

    #[test]
    fn test_zero_budget_falls_back() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config.set_command_budget(0).unwrap();

        assert_eq!(DriverConfig::from_config(&config).command_budget, 200);
    }
}
