//! Poll/push arbitration into canonical state
//!
//! The merger combines one optional poll snapshot and any push updates
//! accumulated since the last merge into a new [`DeviceState`], under
//! field-level trust rules:
//!
//! - Per field, the newest-timestamped candidate wins. Push candidates are
//!   eligible only while the subscription is healthy.
//! - A missing observation never nulls out a previously known value; the
//!   current field is retained untouched.
//! - No field's observation timestamp ever goes backwards.
//! - A stopped/idle phase reading while playback is active is not believed
//!   until it repeats: track transitions legitimately report a gap that
//!   looks like a stop, so a single reading only arms a confirmation
//!   counter. The confirmation count is a tunable, not a settled contract.
//!
//! Once the subscription has failed, push data older than the failure
//! transition is discarded outright rather than deprioritized; merges fall
//! back to poll-origin values until health returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::SubscriptionStatus;
use crate::model::{DeviceState, Observed, Origin, PartialUpdate, StatusSnapshot};

/// Tunables for merge behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Consecutive stopped/idle observations required to end active playback
    pub stop_confirmations: u8,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            stop_confirmations: 2,
        }
    }
}

/// Stateless merge engine, parameterized by policy
#[derive(Debug, Clone, Default)]
pub struct Merger {
    policy: MergePolicy,
}

/// One eligible value for a field: (value, origin, observed_at)
type Candidate<T> = (T, Origin, DateTime<Utc>);

impl Merger {
    /// Create a merger with the given policy
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Merge a poll snapshot and pending push updates into a new state
    ///
    /// `current` is the canonical state as stored; the result is a full
    /// replacement candidate for [`StateStore::apply`](crate::store::StateStore::apply).
    pub fn merge(
        &self,
        current: &DeviceState,
        poll: Option<&StatusSnapshot>,
        pending: &[PartialUpdate],
        status: &SubscriptionStatus,
    ) -> DeviceState {
        let trusted = status.is_trusted();
        let mut next = current.clone();

        adopt(
            &mut next.volume,
            select(poll, pending, trusted, |s| s.volume, |u| u.volume).map(clamp_volume),
        );
        adopt(
            &mut next.muted,
            select(poll, pending, trusted, |s| s.muted, |u| u.muted),
        );
        adopt(
            &mut next.track,
            select(
                poll,
                pending,
                trusted,
                |s| s.track.clone().map(Some),
                |u| u.track.clone().map(Some),
            ),
        );
        adopt(
            &mut next.position_secs,
            select(
                poll,
                pending,
                trusted,
                |s| s.position_secs.map(Some),
                |u| u.position_secs.map(Some),
            ),
        );
        adopt(
            &mut next.duration_secs,
            select(
                poll,
                pending,
                trusted,
                |s| s.duration_secs.map(Some),
                |u| u.duration_secs.map(Some),
            ),
        );
        adopt(
            &mut next.source,
            select(
                poll,
                pending,
                trusted,
                |s| s.source.clone().map(Some),
                |u| u.source.clone().map(Some),
            ),
        );
        adopt(
            &mut next.topology,
            select(
                poll,
                pending,
                trusted,
                |s| s.topology.clone(),
                |u| u.topology.clone(),
            ),
        );

        self.merge_phase(
            current,
            &mut next,
            select(poll, pending, trusted, |s| s.phase, |u| u.phase),
        );

        if let Some(snap) = poll {
            next.position_capability = next
                .position_capability
                .observe(snap.position_secs.is_some());
        }

        next
    }

    /// Apply the phase candidate under the stop-confirmation rule
    fn merge_phase(
        &self,
        current: &DeviceState,
        next: &mut DeviceState,
        candidate: Option<Candidate<crate::model::PlaybackPhase>>,
    ) {
        let Some((phase, origin, observed_at)) = candidate else {
            // No observation: retain phase and leave the streak armed.
            return;
        };
        if observed_at < next.phase.observed_at {
            return;
        }

        if current.phase.value.is_active() && phase.is_ceased() {
            let streak = current.stop_streak.saturating_add(1);
            if streak >= self.policy.stop_confirmations {
                next.phase = Observed::new(phase, origin, observed_at);
                next.stop_streak = 0;
            } else {
                // Could be a track-transition gap rather than a real stop.
                next.stop_streak = streak;
                tracing::debug!(
                    device = %current.id,
                    observed = %phase,
                    streak,
                    needed = self.policy.stop_confirmations,
                    "unconfirmed stop signal during active playback"
                );
            }
        } else {
            next.phase = Observed::new(phase, origin, observed_at);
            next.stop_streak = 0;
        }
    }
}

/// Pick the newest eligible candidate for one field
///
/// Push candidates are considered only while the subscription is trusted;
/// a distrusted buffer contributes nothing, which is exactly the hard
/// discard the failed state requires.
fn select<T: Clone>(
    poll: Option<&StatusSnapshot>,
    pending: &[PartialUpdate],
    trusted: bool,
    from_poll: impl Fn(&StatusSnapshot) -> Option<T>,
    from_push: impl Fn(&PartialUpdate) -> Option<T>,
) -> Option<Candidate<T>> {
    let poll_candidate =
        poll.and_then(|snap| from_poll(snap).map(|v| (v, Origin::Poll, snap.taken_at)));
    let push_candidate = if trusted {
        pending
            .iter()
            .filter_map(|u| from_push(u).map(|v| (v, Origin::Push, u.observed_at)))
            .max_by_key(|(_, _, at)| *at)
    } else {
        None
    };

    match (poll_candidate, push_candidate) {
        (Some(p), Some(q)) => Some(if q.2 >= p.2 { q } else { p }),
        (Some(p), None) => Some(p),
        (None, q) => q,
    }
}

/// Write a candidate into a field unless it would regress the timestamp
fn adopt<T>(field: &mut Observed<T>, candidate: Option<Candidate<T>>) {
    if let Some((value, origin, observed_at)) = candidate {
        if observed_at >= field.observed_at {
            *field = Observed::new(value, origin, observed_at);
        }
    }
}

fn clamp_volume(candidate: Candidate<u8>) -> Candidate<u8> {
    (candidate.0.min(100), candidate.1, candidate.2)
}
