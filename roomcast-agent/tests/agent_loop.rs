//! Registry-level behavior: agents, push handling, fallback, lifecycle
//!
//! These run under a paused clock; assertions are about state outcomes,
//! never about wall-clock timing.

mod common;

use std::sync::Arc;

use chrono::Utc;

use common::{playing_snapshot, wait_until, ScriptedClient, ScriptedSubscriber};
use roomcast_agent::{AgentConfig, AgentError, DeviceRegistry};
use roomcast_state::{
    DeviceId, GroupRole, GroupTopology, Origin, PartialUpdate, PlaybackPhase, StateChanged,
};

fn registry() -> (Arc<ScriptedClient>, Arc<ScriptedSubscriber>, DeviceRegistry) {
    let client = Arc::new(ScriptedClient::default());
    let subscriber = Arc::new(ScriptedSubscriber::default());
    let registry = DeviceRegistry::new(client.clone(), subscriber.clone(), AgentConfig::default());
    (client, subscriber, registry)
}

#[tokio::test(start_paused = true)]
async fn test_push_wakes_idle_device() {
    let (_client, subscriber, registry) = registry();
    let id = DeviceId::new("den");
    registry.register_device(id.clone()).unwrap();
    wait_until(|| subscriber.has_sink(&id)).await;

    assert_eq!(
        registry.state(&id).unwrap().phase.value,
        PlaybackPhase::Idle
    );

    let mut update = PartialUpdate::empty(Utc::now());
    update.phase = Some(PlaybackPhase::Playing);
    assert!(subscriber.push(&id, update));

    wait_until(|| {
        registry
            .state(&id)
            .is_some_and(|s| s.phase.value == PlaybackPhase::Playing)
    })
    .await;

    let state = registry.state(&id).unwrap();
    assert_eq!(state.phase.origin, Origin::Push);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_push_channel_falls_back_to_polls() {
    let (client, subscriber, registry) = registry();
    let id = DeviceId::new("kitchen");
    registry.register_device(id.clone()).unwrap();
    wait_until(|| subscriber.has_sink(&id)).await;

    // Two consecutive empty payloads push the channel through
    // degraded into failed.
    assert!(subscriber.push(&id, PartialUpdate::empty(Utc::now())));
    assert!(subscriber.push(&id, PartialUpdate::empty(Utc::now())));

    // The failed channel gets torn down and replaced.
    wait_until(|| !subscriber.unsubscribed().is_empty()).await;

    // Meanwhile polls keep flowing and their fields are trusted.
    client.script_snapshot(&id, playing_snapshot(40));
    wait_until(|| {
        registry
            .state(&id)
            .is_some_and(|s| s.phase.value == PlaybackPhase::Playing && s.volume.value == 40)
    })
    .await;

    let state = registry.state(&id).unwrap();
    assert_eq!(state.phase.origin, Origin::Poll);
    assert_eq!(state.volume.origin, Origin::Poll);

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_change_events_reach_subscribers() {
    let (client, _subscriber, registry) = registry();
    let id = DeviceId::new("office");
    let mut changes = registry.subscribe_changes();
    registry.register_device(id.clone()).unwrap();

    let added = changes.recv().await.unwrap();
    assert!(matches!(added, StateChanged::DeviceAdded { .. }));

    client.script_snapshot(&id, playing_snapshot(15));
    loop {
        match changes.recv().await.unwrap() {
            StateChanged::DeviceUpdated { device_id, fields } => {
                assert_eq!(device_id, id);
                assert!(!fields.is_empty());
                break;
            }
            _ => continue,
        }
    }

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deregister_stops_agent_and_unsubscribes() {
    let (_client, subscriber, registry) = registry();
    let id = DeviceId::new("attic");
    registry.register_device(id.clone()).unwrap();
    wait_until(|| subscriber.has_sink(&id)).await;

    registry.deregister_device(&id).await.unwrap();

    assert!(registry.state(&id).is_none());
    assert!(!subscriber.has_sink(&id));
    // Pushing after teardown has nowhere to go.
    assert!(!subscriber.push(&id, PartialUpdate::empty(Utc::now())));

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_rejected() {
    let (_client, _subscriber, registry) = registry();
    let id = DeviceId::new("twice");
    registry.register_device(id.clone()).unwrap();
    assert!(registry.register_device(id).is_err());

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_boost_requires_known_device() {
    let (_client, _subscriber, registry) = registry();
    let err = registry.request_boost(&DeviceId::new("ghost")).unwrap_err();
    assert!(matches!(err, AgentError::UnknownDevice(_)));

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_request_join_updates_topology() {
    let (_client, subscriber, registry) = registry();
    let leader = DeviceId::new("living-room");
    let member = DeviceId::new("bedroom");
    registry.register_device(leader.clone()).unwrap();
    registry.register_device(member.clone()).unwrap();
    wait_until(|| subscriber.has_sink(&leader) && subscriber.has_sink(&member)).await;

    let result = registry
        .request_join(leader.clone(), vec![member.clone()])
        .await
        .unwrap();
    assert!(result.is_complete());

    let leader_state = registry.state(&leader).unwrap();
    assert_eq!(leader_state.topology.value.role, GroupRole::Leader);
    assert!(leader_state.topology.value.has_member(&member));
    assert_eq!(
        registry.state(&member).unwrap().topology.value,
        GroupTopology::member(leader.clone())
    );

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reported_topology_drift_corrected_end_to_end() {
    let (client, _subscriber, registry) = registry();
    let leader = DeviceId::new("hall");
    let member = DeviceId::new("porch");
    registry.register_device(leader.clone()).unwrap();
    registry.register_device(member.clone()).unwrap();

    // The leader starts reporting a group the coordinator never formed;
    // reconciliation picks it up from the polled topology and brings the
    // member's record in line.
    let mut snapshot = playing_snapshot(20);
    snapshot.topology = Some(GroupTopology::leader(vec![member.clone()]));
    client.script_snapshot(&leader, snapshot);

    wait_until(|| {
        registry.state(&member).is_some_and(|s| {
            s.topology.value.role == GroupRole::Member
                && s.topology.value.leader_id.as_ref() == Some(&leader)
        })
    })
    .await;

    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_work() {
    let (_client, _subscriber, registry) = registry();
    let id = DeviceId::new("late");
    registry.shutdown().await;

    assert!(matches!(
        registry.register_device(id.clone()),
        Err(AgentError::ShuttingDown)
    ));
    assert!(matches!(
        registry.request_join(id, vec![]).await,
        Err(AgentError::ShuttingDown)
    ));
}
