//! Property tests for merge monotonicity and post-failure push distrust
//!
//! Random interleavings of poll and push observations with random
//! timestamps must never move any field's observation timestamp backwards,
//! and once the subscription has failed, the merge never adopts another
//! push observation, however fresh its timestamp claims to be.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;

use roomcast_state::{
    DeviceId, DeviceState, Merger, Origin, PartialUpdate, PlaybackPhase, StateField,
    StatusSnapshot, SubscriptionHealth, SubscriptionStatus,
};

const ALL_FIELDS: [StateField; 8] = [
    StateField::Phase,
    StateField::Volume,
    StateField::Mute,
    StateField::Track,
    StateField::Position,
    StateField::Duration,
    StateField::Source,
    StateField::Topology,
];

#[derive(Debug, Clone)]
enum Op {
    Poll {
        offset_secs: i64,
        phase: Option<PlaybackPhase>,
        volume: Option<u8>,
        muted: Option<bool>,
        position_secs: Option<u64>,
    },
    Push {
        offset_secs: i64,
        phase: Option<PlaybackPhase>,
        volume: Option<u8>,
        muted: Option<bool>,
        position_secs: Option<u64>,
    },
}

fn phase_strategy() -> impl Strategy<Value = Option<PlaybackPhase>> + Clone {
    prop_oneof![
        Just(None),
        Just(Some(PlaybackPhase::Idle)),
        Just(Some(PlaybackPhase::Playing)),
        Just(Some(PlaybackPhase::Paused)),
        Just(Some(PlaybackPhase::Stopped)),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let fields = (
        1i64..10_000,
        phase_strategy(),
        prop::option::of(0u8..=100),
        prop::option::of(any::<bool>()),
        prop::option::of(0u64..7200),
    );
    prop_oneof![
        fields
            .clone()
            .prop_map(|(offset_secs, phase, volume, muted, position_secs)| Op::Poll {
                offset_secs,
                phase,
                volume,
                muted,
                position_secs,
            }),
        fields.prop_map(|(offset_secs, phase, volume, muted, position_secs)| Op::Push {
            offset_secs,
            phase,
            volume,
            muted,
            position_secs,
        }),
    ]
}

fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn healthy(at: DateTime<Utc>) -> SubscriptionStatus {
    SubscriptionStatus {
        health: SubscriptionHealth::Healthy,
        last_event_at: Some(at),
        consecutive_failures: 0,
        failed_at: None,
    }
}

fn run_op(merger: &Merger, current: &DeviceState, op: &Op, status: &SubscriptionStatus) -> DeviceState {
    let base = base_time();
    match op {
        Op::Poll {
            offset_secs,
            phase,
            volume,
            muted,
            position_secs,
        } => {
            let mut snap = StatusSnapshot::empty(base + ChronoDuration::seconds(*offset_secs));
            snap.phase = *phase;
            snap.volume = *volume;
            snap.muted = *muted;
            snap.position_secs = *position_secs;
            merger.merge(current, Some(&snap), &[], status)
        }
        Op::Push {
            offset_secs,
            phase,
            volume,
            muted,
            position_secs,
        } => {
            let mut update = PartialUpdate::empty(base + ChronoDuration::seconds(*offset_secs));
            update.phase = *phase;
            update.volume = *volume;
            update.muted = *muted;
            update.position_secs = *position_secs;
            merger.merge(current, None, &[update], status)
        }
    }
}

fn field_provenance(state: &DeviceState) -> Vec<(Origin, DateTime<Utc>)> {
    vec![
        (state.phase.origin, state.phase.observed_at),
        (state.volume.origin, state.volume.observed_at),
        (state.muted.origin, state.muted.observed_at),
        (state.track.origin, state.track.observed_at),
        (state.position_secs.origin, state.position_secs.observed_at),
        (state.duration_secs.origin, state.duration_secs.observed_at),
        (state.source.origin, state.source.observed_at),
        (state.topology.origin, state.topology.observed_at),
    ]
}

proptest! {
    /// For all interleavings of poll/push merges, no field's observation
    /// timestamp ever decreases.
    #[test]
    fn merge_timestamps_never_decrease(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let merger = Merger::default();
        let base = base_time();
        let mut current = DeviceState::new(DeviceId::new("prop-dev"), base);
        let status = healthy(base);

        for op in &ops {
            let next = run_op(&merger, &current, op, &status);
            for field in ALL_FIELDS {
                prop_assert!(
                    next.field_observed_at(field) >= current.field_observed_at(field),
                    "timestamp regressed for {:?}",
                    field,
                );
            }
            current = next;
        }
    }

    /// After the subscription fails, the merge may retain push-origin
    /// fields it already held, but it never adopts a new one: every
    /// push-origin field in the output is exactly what the state carried
    /// going into the merge. Trust returns through the health monitor,
    /// never through the merge itself.
    #[test]
    fn failed_subscription_adopts_no_new_push_fields(
        healthy_ops in prop::collection::vec(op_strategy(), 1..20),
        failed_ops in prop::collection::vec(op_strategy(), 1..20),
    ) {
        let merger = Merger::default();
        let base = base_time();
        let mut current = DeviceState::new(DeviceId::new("prop-dev"), base);
        let healthy_status = healthy(base);

        // Run a healthy phase, then land one push newer than any random
        // offset, so the state enters the failure carrying real push
        // provenance no later observation has displaced.
        for op in &healthy_ops {
            current = run_op(&merger, &current, op, &healthy_status);
        }
        let seed = Op::Push {
            offset_secs: 10_001,
            phase: None,
            volume: Some(50),
            muted: None,
            position_secs: None,
        };
        current = run_op(&merger, &current, &seed, &healthy_status);
        prop_assert!(
            field_provenance(&current)
                .iter()
                .any(|(origin, _)| *origin == Origin::Push)
        );

        // The channel fails after everything observed so far.
        let failed_at = current.latest_observation() + ChronoDuration::seconds(1);
        let status = SubscriptionStatus {
            health: SubscriptionHealth::Failed,
            last_event_at: Some(failed_at),
            consecutive_failures: 2,
            failed_at: Some(failed_at),
        };

        for op in &failed_ops {
            let before = field_provenance(&current);
            let next = run_op(&merger, &current, op, &status);
            for (prev, now) in before.iter().zip(field_provenance(&next)) {
                prop_assert!(
                    now.0 != Origin::Push || now == *prev,
                    "merge adopted a push observation from a failed subscription",
                );
            }
            current = next;
        }
    }
}
