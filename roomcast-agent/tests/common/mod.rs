//! Scripted transport doubles shared by the integration tests
//!
//! Both doubles are programmable from the test body while agents run:
//! snapshots can be scripted per device, commands can be made to fail, and
//! push updates are injected through the sink captured at subscribe time.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use roomcast_agent::{
    AgentError, DeviceClient, DeviceCommand, EventSubscriber, PushSink, Result, SubscriptionHandle,
};
use roomcast_state::{DeviceId, PartialUpdate, PlaybackPhase, StatusSnapshot};

/// Device client answering from scripted snapshots
#[derive(Default)]
pub struct ScriptedClient {
    snapshots: Mutex<HashMap<DeviceId, StatusSnapshot>>,
    rejecting: Mutex<HashSet<DeviceId>>,
    commands: Mutex<Vec<(DeviceId, DeviceCommand)>>,
    snapshot_calls: Mutex<HashMap<DeviceId, usize>>,
}

impl ScriptedClient {
    /// Answer this device's polls with the given snapshot from now on
    pub fn script_snapshot(&self, device: &DeviceId, snapshot: StatusSnapshot) {
        self.snapshots.lock().insert(device.clone(), snapshot);
    }

    /// Make every command sent to this device fail
    pub fn reject_commands_to(&self, device: &DeviceId) {
        self.rejecting.lock().insert(device.clone());
    }

    /// All commands sent so far, in order
    pub fn commands(&self) -> Vec<(DeviceId, DeviceCommand)> {
        self.commands.lock().clone()
    }

    /// How many snapshot requests this device has answered
    pub fn snapshot_calls(&self, device: &DeviceId) -> usize {
        self.snapshot_calls.lock().get(device).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeviceClient for ScriptedClient {
    async fn get_snapshot(&self, device: &DeviceId) -> Result<StatusSnapshot> {
        *self
            .snapshot_calls
            .lock()
            .entry(device.clone())
            .or_insert(0) += 1;
        // Unscripted devices answer with an empty (but successful) snapshot.
        let snapshot = self
            .snapshots
            .lock()
            .get(device)
            .cloned()
            .unwrap_or_else(|| StatusSnapshot::empty(Utc::now()));
        Ok(snapshot)
    }

    async fn send_command(&self, device: &DeviceId, command: DeviceCommand) -> Result<()> {
        self.commands.lock().push((device.clone(), command));
        if self.rejecting.lock().contains(device) {
            return Err(AgentError::CommandRejected {
                device: device.clone(),
                reason: "scripted rejection".into(),
            });
        }
        Ok(())
    }
}

/// Subscription transport that hands the captured sink back to the test
#[derive(Default)]
pub struct ScriptedSubscriber {
    sinks: Mutex<HashMap<DeviceId, PushSink>>,
    handles: Mutex<HashMap<u64, DeviceId>>,
    unsubscribed: Mutex<Vec<SubscriptionHandle>>,
    next_handle: AtomicU64,
}

impl ScriptedSubscriber {
    /// Deliver a push update to a subscribed device's sink
    ///
    /// Returns false if the device has no live subscription.
    pub fn push(&self, device: &DeviceId, update: PartialUpdate) -> bool {
        self.sinks
            .lock()
            .get(device)
            .is_some_and(|sink| sink.send(update).is_ok())
    }

    /// Whether the device currently has a live subscription
    pub fn has_sink(&self, device: &DeviceId) -> bool {
        self.sinks.lock().contains_key(device)
    }

    /// Handles torn down so far
    pub fn unsubscribed(&self) -> Vec<SubscriptionHandle> {
        self.unsubscribed.lock().clone()
    }
}

#[async_trait]
impl EventSubscriber for ScriptedSubscriber {
    async fn subscribe(&self, device: &DeviceId, sink: PushSink) -> Result<SubscriptionHandle> {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().insert(device.clone(), sink);
        self.handles.lock().insert(id, device.clone());
        Ok(SubscriptionHandle(id))
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        if let Some(device) = self.handles.lock().remove(&handle.0) {
            self.sinks.lock().remove(&device);
        }
        self.unsubscribed.lock().push(handle);
        Ok(())
    }
}

/// A snapshot reporting active playback at the given volume
pub fn playing_snapshot(volume: u8) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::empty(Utc::now());
    snapshot.phase = Some(PlaybackPhase::Playing);
    snapshot.volume = Some(volume);
    snapshot
}

/// Await a condition, letting agent tasks run between checks
///
/// Panics if the condition does not hold within the wait budget.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within wait budget");
}
