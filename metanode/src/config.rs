use std::time::Duration;

use crate::core::placement::PlacementPolicy;
use crate::core::recovery::RecoveryConfig;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("warning threshold ({warning:?}) must be below dead threshold ({dead:?})")]
    WarningNotBelowDead { warning: Duration, dead: Duration },
    #[error("replication factor must be at least 1")]
    ZeroReplicationFactor,
    #[error("recovery batch size must be at least 1")]
    ZeroBatchSize,
    #[error("{0} must be non-zero")]
    ZeroValue(&'static str),
}

/// Staleness limits for the health monitor. Only constructible with
/// `warning < dead`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthThresholds {
    warning: Duration,
    dead: Duration,
}

impl HealthThresholds {
    pub fn new(warning: Duration, dead: Duration) -> Result<Self, ConfigError> {
        if warning >= dead {
            return Err(ConfigError::WarningNotBelowDead { warning, dead });
        }
        Ok(Self { warning, dead })
    }

    pub fn warning(&self) -> Duration {
        self.warning
    }

    pub fn dead(&self) -> Duration {
        self.dead
    }
}

#[derive(Clone, Debug)]
pub struct MetaConfig {
    pub replication_factor: usize,
    pub placement_policy: PlacementPolicy,
    pub heartbeat_interval: Duration,
    pub thresholds: HealthThresholds,
    pub recovery: RecoveryConfig,
    pub max_concurrent_recoveries: usize,
    pub dead_event_queue: usize,
}

impl MetaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication_factor == 0 {
            return Err(ConfigError::ZeroReplicationFactor);
        }
        if self.recovery.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroValue("heartbeat interval"));
        }
        if self.recovery.replicate_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("replicate timeout"));
        }
        if self.max_concurrent_recoveries == 0 {
            return Err(ConfigError::ZeroValue("max concurrent recoveries"));
        }
        if self.dead_event_queue == 0 {
            return Err(ConfigError::ZeroValue("dead event queue"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> MetaConfig {
        MetaConfig {
            replication_factor: 3,
            placement_policy: PlacementPolicy::LeastLoaded,
            heartbeat_interval: Duration::from_secs(10),
            thresholds: HealthThresholds::new(Duration::from_secs(15), Duration::from_secs(30))
                .unwrap(),
            recovery: RecoveryConfig::default(),
            max_concurrent_recoveries: 4,
            dead_event_queue: 64,
        }
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let err = HealthThresholds::new(Duration::from_secs(30), Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, ConfigError::WarningNotBelowDead { .. }));
        assert!(HealthThresholds::new(Duration::from_secs(40), Duration::from_secs(30)).is_err());
    }

    #[test]
    fn default_shape_is_valid() {
        assert_eq!(base().validate(), Ok(()));
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut cfg = base();
        cfg.replication_factor = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroReplicationFactor));

        let mut cfg = base();
        cfg.recovery.batch_size = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBatchSize));

        let mut cfg = base();
        cfg.heartbeat_interval = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroValue(_))));
    }
}
