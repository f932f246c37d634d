//! Recovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DISCOVERY_INTERVAL_SECS, DEFAULT_RECOVERY_THREADS};

/// Tuning for the shard recovery subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Period of the missing-shard discovery loop, in seconds. Also the
    /// upper bound of the per-cycle jitter sleep.
    pub missing_shard_discovery_interval_secs: u64,
    /// Maximum concurrent recovery workers.
    pub recovery_threads: usize,
}

impl RecoveryConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    ///
    /// * `LARCH_RECOVERY_DISCOVERY_INTERVAL_SECS`
    /// * `LARCH_RECOVERY_THREADS`
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("LARCH_RECOVERY_DISCOVERY_INTERVAL_SECS")
            && let Ok(secs) = value.parse()
        {
            config.missing_shard_discovery_interval_secs = secs;
        }
        if let Ok(value) = std::env::var("LARCH_RECOVERY_THREADS")
            && let Ok(threads) = value.parse()
        {
            config.recovery_threads = threads;
        }
        config
    }

    /// Discovery period as a duration.
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.missing_shard_discovery_interval_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            missing_shard_discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            recovery_threads: DEFAULT_RECOVERY_THREADS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RecoveryConfig::default();
        assert_eq!(
            config.discovery_interval(),
            Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS)
        );
        assert!(config.recovery_threads >= 1);
    }
}
