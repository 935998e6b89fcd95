//! Adaptive poll interval computation
//!
//! Each device's poll frequency follows its activity: fast while playing,
//! slowing through named tiers as the state goes quiet. A leader with an
//! active member inherits the active tier regardless of its own state,
//! since group-wide commands land on the leader. Repeated poll failures do
//! not change the tier; they stack a capped backoff multiplier on top of
//! it, and polling continues indefinitely - a device is never declared
//! dead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named polling-frequency bucket, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityTier {
    /// Actively playing, or leading a group that is
    Active,
    /// State changed recently, or an explicit boost is in effect
    Recent,
    /// Quiet for a while
    Idle,
    /// Quiet for a long time
    Dormant,
}

/// Intervals and windows driving tier selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingPolicy {
    /// Poll interval while Active
    pub active_interval: Duration,
    /// Poll interval while Recent
    pub recent_interval: Duration,
    /// Poll interval while Idle
    pub idle_interval: Duration,
    /// Poll interval while Dormant
    pub dormant_interval: Duration,
    /// How long after the last state change a device counts as Recent
    pub recent_window: Duration,
    /// Quiet time after which a device counts as Dormant
    pub dormant_window: Duration,
    /// How long an explicit boost pins the tier at Recent or better
    pub boost_window: Duration,
    /// Cap on the failure backoff exponent (multiplier is 2^n)
    pub max_backoff_exponent: u32,
    /// Consecutive failures after which logging escalates to warn
    pub failure_warn_threshold: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(1),
            recent_interval: Duration::from_secs(5),
            idle_interval: Duration::from_secs(30),
            dormant_interval: Duration::from_secs(120),
            recent_window: Duration::from_secs(30),
            dormant_window: Duration::from_secs(600),
            boost_window: Duration::from_secs(30),
            max_backoff_exponent: 5,
            failure_warn_threshold: 3,
        }
    }
}

impl PollingPolicy {
    /// Base interval for a tier, before backoff
    pub fn interval(&self, tier: ActivityTier) -> Duration {
        match tier {
            ActivityTier::Active => self.active_interval,
            ActivityTier::Recent => self.recent_interval,
            ActivityTier::Idle => self.idle_interval,
            ActivityTier::Dormant => self.dormant_interval,
        }
    }
}

/// Per-device poll interval planner
///
/// Tier derivation is pure in its inputs (time since last change, group
/// role); the planner only holds the boost deadline and the consecutive
/// failure count feeding the backoff multiplier.
#[derive(Debug)]
pub struct PollPlanner {
    policy: PollingPolicy,
    boost_until: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

impl PollPlanner {
    /// Create a planner with the given policy
    pub fn new(policy: PollingPolicy) -> Self {
        Self {
            policy,
            boost_until: None,
            consecutive_failures: 0,
        }
    }

    /// Derive the activity tier for the current situation
    pub fn tier(
        &self,
        now: DateTime<Utc>,
        last_change: DateTime<Utc>,
        playing: bool,
        leader_has_active_member: bool,
    ) -> ActivityTier {
        if playing || leader_has_active_member {
            return ActivityTier::Active;
        }

        let quiet = now
            .signed_duration_since(last_change)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let mut tier = if quiet <= self.policy.recent_window {
            ActivityTier::Recent
        } else if quiet < self.policy.dormant_window {
            ActivityTier::Idle
        } else {
            ActivityTier::Dormant
        };

        if self.is_boosted(now) {
            tier = tier.min(ActivityTier::Recent);
        }
        tier
    }

    /// Interval until the next poll: tier interval times failure backoff
    pub fn next_interval(&self, tier: ActivityTier) -> Duration {
        let exponent = self
            .consecutive_failures
            .min(self.policy.max_backoff_exponent);
        self.policy
            .interval(tier)
            .saturating_mul(2u32.saturating_pow(exponent))
    }

    /// Pin the tier at Recent or better for the boost window
    ///
    /// Issued on explicit user-initiated commands so feedback stays prompt
    /// even on an otherwise idle device; decays on its own.
    pub fn boost(&mut self, now: DateTime<Utc>) {
        let until = now
            + chrono::Duration::from_std(self.policy.boost_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.boost_until = Some(until);
    }

    /// Whether a boost is currently in effect
    pub fn is_boosted(&self, now: DateTime<Utc>) -> bool {
        self.boost_until.is_some_and(|until| now < until)
    }

    /// Record a failed poll; returns the new consecutive failure count
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// Record a successful poll, resetting the backoff
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Threshold at which failure logging escalates
    pub fn failure_warn_threshold(&self) -> u32 {
        self.policy.failure_warn_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn planner() -> PollPlanner {
        PollPlanner::new(PollingPolicy::default())
    }

    #[test]
    fn test_playing_is_active() {
        let p = planner();
        let now = Utc::now();
        // Long-quiet device, but playing.
        let last_change = now - ChronoDuration::hours(3);
        assert_eq!(p.tier(now, last_change, true, false), ActivityTier::Active);
    }

    #[test]
    fn test_leader_with_active_member_inherits_active() {
        let p = planner();
        let now = Utc::now();
        let last_change = now - ChronoDuration::hours(3);
        assert_eq!(p.tier(now, last_change, false, true), ActivityTier::Active);
    }

    #[test]
    fn test_tiers_decay_with_quiet_time() {
        let p = planner();
        let now = Utc::now();

        let recent = now - ChronoDuration::seconds(10);
        assert_eq!(p.tier(now, recent, false, false), ActivityTier::Recent);

        let idle = now - ChronoDuration::seconds(120);
        assert_eq!(p.tier(now, idle, false, false), ActivityTier::Idle);

        let dormant = now - ChronoDuration::seconds(3600);
        assert_eq!(p.tier(now, dormant, false, false), ActivityTier::Dormant);
    }

    #[test]
    fn test_boost_forces_recent_then_decays() {
        let mut p = planner();
        let now = Utc::now();
        let long_ago = now - ChronoDuration::hours(2);
        assert_eq!(p.tier(now, long_ago, false, false), ActivityTier::Dormant);

        p.boost(now);
        assert_eq!(p.tier(now, long_ago, false, false), ActivityTier::Recent);

        // After the boost window the tier falls back on its own.
        let later = now + ChronoDuration::seconds(31);
        assert_eq!(p.tier(later, long_ago, false, false), ActivityTier::Dormant);
    }

    #[test]
    fn test_boost_does_not_slow_an_active_device() {
        let mut p = planner();
        let now = Utc::now();
        p.boost(now);
        assert_eq!(p.tier(now, now, true, false), ActivityTier::Active);
    }

    #[test]
    fn test_intervals_follow_tiers() {
        let p = planner();
        assert_eq!(p.next_interval(ActivityTier::Active), Duration::from_secs(1));
        assert_eq!(p.next_interval(ActivityTier::Recent), Duration::from_secs(5));
        assert_eq!(p.next_interval(ActivityTier::Idle), Duration::from_secs(30));
        assert_eq!(
            p.next_interval(ActivityTier::Dormant),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut p = planner();
        p.record_failure();
        assert_eq!(p.next_interval(ActivityTier::Active), Duration::from_secs(2));
        p.record_failure();
        assert_eq!(p.next_interval(ActivityTier::Active), Duration::from_secs(4));

        for _ in 0..20 {
            p.record_failure();
        }
        // Capped at 2^5.
        assert_eq!(
            p.next_interval(ActivityTier::Active),
            Duration::from_secs(32)
        );
    }

    #[test]
    fn test_backoff_saturates_on_oversized_exponent_cap() {
        let mut p = PollPlanner::new(PollingPolicy {
            max_backoff_exponent: 40,
            ..PollingPolicy::default()
        });
        for _ in 0..64 {
            p.record_failure();
        }
        // 2^40 overflows u32; the multiplier saturates instead of wrapping.
        let interval = p.next_interval(ActivityTier::Active);
        assert_eq!(
            interval,
            Duration::from_secs(1).saturating_mul(u32::MAX)
        );
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut p = planner();
        p.record_failure();
        p.record_failure();
        p.record_success();
        assert_eq!(p.next_interval(ActivityTier::Active), Duration::from_secs(1));
        assert_eq!(p.consecutive_failures(), 0);
    }
}
