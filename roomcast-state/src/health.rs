//! Push-channel liveness and trust tracking
//!
//! The push subscription can fail silently: the transport stays nominally
//! connected while useful updates stop arriving. This module tracks, per
//! device, whether push-origin data can currently be trusted by the merger.
//!
//! State machine:
//!
//! ```text
//! subscribing → healthy → degraded → failed → subscribing
//! ```
//!
//! Any non-empty update moves the monitor to healthy and resets the failure
//! counter. An empty update (the transport's documented resubscription
//! failure signal) increments the counter: the first one degrades, a second
//! consecutive one fails. A healthy monitor that hears nothing for longer
//! than the silence window also fails. Failed is left either by a delivered
//! non-empty update (proof the channel is flowing again) or by an explicit
//! successful resubscription, which re-enters subscribing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{DeviceId, PartialUpdate};

/// Health of one device's push subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionHealth {
    /// Subscription requested, no update seen yet
    Subscribing,
    /// Updates flowing normally
    Healthy,
    /// One resubscription failure observed
    Degraded,
    /// Channel considered dead until it proves otherwise
    Failed,
}

/// Tunables for health tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// How long a healthy channel may stay silent before it is failed
    pub silence_window: Duration,
    /// Consecutive empty payloads that move the channel to failed
    pub failures_to_fail: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            silence_window: Duration::from_secs(300),
            failures_to_fail: 2,
        }
    }
}

/// Point-in-time health record handed to the merger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    /// Current health
    pub health: SubscriptionHealth,
    /// When the last update (empty or not) arrived
    pub last_event_at: Option<DateTime<Utc>>,
    /// Consecutive empty payloads seen
    pub consecutive_failures: u32,
    /// When health last transitioned to failed; the trust-window boundary
    pub failed_at: Option<DateTime<Utc>>,
}

impl SubscriptionStatus {
    /// Status for a freshly requested subscription
    pub fn subscribing() -> Self {
        Self {
            health: SubscriptionHealth::Subscribing,
            last_event_at: None,
            consecutive_failures: 0,
            failed_at: None,
        }
    }

    /// Push-origin data is usable in merges only while healthy
    pub fn is_trusted(&self) -> bool {
        self.health == SubscriptionHealth::Healthy
    }
}

/// Per-device tracker that folds channel signals into a [`SubscriptionStatus`]
#[derive(Debug)]
pub struct HealthMonitor {
    device_id: DeviceId,
    policy: HealthPolicy,
    status: SubscriptionStatus,
}

impl HealthMonitor {
    /// Create a monitor in the subscribing state
    pub fn new(device_id: DeviceId, policy: HealthPolicy) -> Self {
        Self {
            device_id,
            policy,
            status: SubscriptionStatus::subscribing(),
        }
    }

    /// Current status snapshot
    pub fn status(&self) -> &SubscriptionStatus {
        &self.status
    }

    /// Shorthand for `status().is_trusted()`
    pub fn is_trusted(&self) -> bool {
        self.status.is_trusted()
    }

    /// Fold a delivered update into the health state
    pub fn record_update(&mut self, update: &PartialUpdate, now: DateTime<Utc>) {
        self.status.last_event_at = Some(now);

        if update.is_empty() {
            self.status.consecutive_failures += 1;
            let next = if self.status.consecutive_failures >= self.policy.failures_to_fail {
                SubscriptionHealth::Failed
            } else {
                SubscriptionHealth::Degraded
            };
            self.transition(next, now);
        } else {
            self.status.consecutive_failures = 0;
            self.transition(SubscriptionHealth::Healthy, now);
        }
    }

    /// Fail a healthy channel that has been silent past the window
    ///
    /// Called on every poll cycle; a channel in any other state is left
    /// alone (subscribing channels get time for their first update, and
    /// degraded/failed ones are already distrusted).
    pub fn check_silence(&mut self, now: DateTime<Utc>) {
        if self.status.health != SubscriptionHealth::Healthy {
            return;
        }
        let silent_too_long = self.status.last_event_at.is_some_and(|last| {
            now.signed_duration_since(last)
                .to_std()
                .is_ok_and(|elapsed| elapsed > self.policy.silence_window)
        });
        if silent_too_long {
            tracing::warn!(
                device = %self.device_id,
                window = ?self.policy.silence_window,
                "push channel silent past window, failing subscription"
            );
            self.transition(SubscriptionHealth::Failed, now);
        }
    }

    /// Note an explicit successful (re)subscription reported by the channel
    ///
    /// Re-enters subscribing; trust returns only once an actual update
    /// arrives.
    pub fn record_resubscribed(&mut self, now: DateTime<Utc>) {
        self.status.consecutive_failures = 0;
        self.transition(SubscriptionHealth::Subscribing, now);
    }

    fn transition(&mut self, next: SubscriptionHealth, now: DateTime<Utc>) {
        let prev = self.status.health;
        if prev == next {
            return;
        }
        self.status.health = next;
        match next {
            SubscriptionHealth::Failed => {
                self.status.failed_at = Some(now);
                tracing::warn!(device = %self.device_id, ?prev, "push subscription failed");
            }
            SubscriptionHealth::Healthy => {
                // Trust restored; the old trust-window boundary no longer applies.
                self.status.failed_at = None;
                tracing::debug!(device = %self.device_id, ?prev, "push subscription healthy");
            }
            SubscriptionHealth::Degraded => {
                tracing::debug!(device = %self.device_id, ?prev, "push subscription degraded");
            }
            SubscriptionHealth::Subscribing => {
                tracing::debug!(device = %self.device_id, ?prev, "push channel resubscribing");
            }
        }
    }
}
