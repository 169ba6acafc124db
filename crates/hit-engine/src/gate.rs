//! Batch gate: the single predicate deciding whether delivery may drain.

use crate::{ConfigSnapshot, PrivacyStatus};

/// Decides whether the delivery processor should begin or continue draining
/// the main queue.
///
/// Batching and backpressure are a pure function of the current config
/// snapshot, the queue depth and the `forced` flag; the gate holds no other
/// state.
#[derive(Debug, Clone)]
pub struct BatchGate {
    config: ConfigSnapshot,
}

impl BatchGate {
    pub fn new(config: ConfigSnapshot) -> Self {
        Self { config }
    }

    /// Replace the config snapshot (host config or privacy change).
    pub fn update_config(&mut self, config: ConfigSnapshot) {
        self.config = config;
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    /// Whether sending is possible at all: a destination is configured and
    /// the user is opted in. Checked again before every hit of a drain so a
    /// mid-drain opt-out stops delivery.
    pub fn is_ready(&self) -> bool {
        self.config.is_configured() && self.config.privacy == PrivacyStatus::OptedIn
    }

    /// Whether a new drain of the main queue should start.
    pub fn should_drain(&self, main_depth: usize, forced: bool) -> bool {
        if !self.is_ready() {
            return false;
        }
        forced || !self.config.offline_enabled || main_depth > self.config.batch_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_config() -> ConfigSnapshot {
        ConfigSnapshot {
            collect_url: Some("https://collect.example.com/b/ss".to_string()),
            privacy: PrivacyStatus::OptedIn,
            offline_enabled: true,
            batch_limit: 2,
            reset_cutoff: 0.0,
        }
    }

    #[test]
    fn withheld_without_destination() {
        let mut config = ready_config();
        config.collect_url = None;
        let gate = BatchGate::new(config);
        assert!(!gate.should_drain(100, true));
    }

    #[test]
    fn withheld_unless_opted_in() {
        for privacy in [PrivacyStatus::OptedOut, PrivacyStatus::Unknown] {
            let mut config = ready_config();
            config.privacy = privacy;
            let gate = BatchGate::new(config);
            assert!(!gate.should_drain(100, true));
        }
    }

    #[test]
    fn batch_limit_is_a_strict_threshold() {
        let gate = BatchGate::new(ready_config());
        assert!(!gate.should_drain(1, false));
        assert!(!gate.should_drain(2, false));
        assert!(gate.should_drain(3, false));
    }

    #[test]
    fn forced_bypasses_batch_limit() {
        let gate = BatchGate::new(ready_config());
        assert!(gate.should_drain(1, true));
    }

    #[test]
    fn drains_immediately_when_offline_disabled() {
        let mut config = ready_config();
        config.offline_enabled = false;
        let gate = BatchGate::new(config);
        assert!(gate.should_drain(1, false));
    }

    #[test]
    fn update_config_changes_the_decision() {
        let mut gate = BatchGate::new(ready_config());
        assert!(!gate.should_drain(1, false));

        let mut config = ready_config();
        config.offline_enabled = false;
        gate.update_config(config);
        assert!(gate.should_drain(1, false));
    }
}
