//! Engine configuration.

use std::time::Duration;

/// Privacy consent status supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivacyStatus {
    /// Hits may be collected and sent.
    OptedIn,
    /// Hits must not be sent.
    OptedOut,
    #[default]
    Unknown,
}

/// Snapshot of the host-supplied configuration and privacy state.
///
/// The engine never mutates this; the host pushes a fresh snapshot whenever
/// configuration or privacy state changes.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    /// Collection endpoint URL. `None` until analytics is configured.
    pub collect_url: Option<String>,
    /// Current privacy status.
    pub privacy: PrivacyStatus,
    /// Whether hits may be buffered offline and sent later.
    pub offline_enabled: bool,
    /// Queue depth above which delivery starts even while offline batching
    /// is enabled.
    pub batch_limit: usize,
    /// Epoch-seconds instant of the last "reset identities" call. Hits at or
    /// before this instant must not leak post-reset identifiers back to the
    /// host.
    pub reset_cutoff: f64,
}

impl ConfigSnapshot {
    /// Whether a collection destination is known.
    pub fn is_configured(&self) -> bool {
        self.collect_url.is_some()
    }
}

/// Static engine tuning, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed delay between re-attempts of a recoverable failure. Retries
    /// recur at this interval indefinitely; there is deliberately no attempt
    /// cap and no backoff growth.
    pub retry_interval: Duration,
    /// Maximum age of a hit when offline batching is disabled; older hits
    /// are dropped instead of sent.
    pub offline_wait_threshold: Duration,
    /// Network request timeout.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(30),
            offline_wait_threshold: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_default_is_unconfigured_and_unknown() {
        let config = ConfigSnapshot::default();
        assert!(!config.is_configured());
        assert_eq!(config.privacy, PrivacyStatus::Unknown);
        assert!(!config.offline_enabled);
        assert_eq!(config.batch_limit, 0);
    }

    #[test]
    fn engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_interval, Duration::from_secs(30));
        assert_eq!(config.offline_wait_threshold, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
