//! Agent and registry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use roomcast_state::{HealthPolicy, MergePolicy};

use crate::scheduler::PollingPolicy;

/// Configuration for device agents and the registry
///
/// Defaults are tuned for LAN audio devices: sub-second feedback while
/// anything is playing, slow frugal polling when the whole system is idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Timeout for one snapshot request
    pub poll_timeout: Duration,
    /// In-cycle retries after a failed snapshot request
    pub poll_retries: u32,
    /// Base delay between in-cycle retries, doubled per attempt
    pub retry_backoff: Duration,
    /// Polling tier intervals and windows
    pub polling: PollingPolicy,
    /// Merge tunables
    pub merge: MergePolicy,
    /// Push-channel health tunables
    pub health: HealthPolicy,
    /// Delay between refreshing a leader and its members in a cascade,
    /// giving the leader's own state time to settle
    pub cascade_settle_delay: Duration,
    /// Interval between topology reconciliation passes
    pub reconcile_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            poll_retries: 2,
            retry_backoff: Duration::from_millis(250),
            polling: PollingPolicy::default(),
            merge: MergePolicy::default(),
            health: HealthPolicy::default(),
            cascade_settle_delay: Duration::from_millis(300),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = AgentConfig::default();
        assert!(config.poll_timeout > Duration::ZERO);
        assert!(config.cascade_settle_delay < config.poll_timeout);
        assert!(config.polling.active_interval < config.polling.dormant_interval);
    }
}
