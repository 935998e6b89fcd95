//! Canonical state store with change notification
//!
//! The store is the single mutation point for device state. `apply` takes a
//! full candidate state (produced by the merger), re-checks per-field
//! timestamp monotonicity, and notifies listeners only when at least one
//! visible field actually changed. Change events carry the diffed field set
//! so the group coordinator can watch for topology movement without diffing
//! whole states.
//!
//! The store is an explicit, lifecycle-scoped registry object: tests and
//! applications construct isolated instances; there is no ambient global.
//! Per-device listeners use `tokio::sync::watch`; a `broadcast` firehose
//! carries every change for cross-device observers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

use crate::error::{Result, StateError};
use crate::model::{DeviceId, DeviceState, StateField};

/// A state change event emitted on the firehose channel
#[derive(Debug, Clone)]
pub enum StateChanged {
    /// One or more visible fields of a device changed
    DeviceUpdated {
        device_id: DeviceId,
        fields: Vec<StateField>,
    },
    /// A device was registered
    DeviceAdded { device_id: DeviceId },
    /// A device was deregistered
    DeviceRemoved { device_id: DeviceId },
}

struct DeviceEntry {
    state: DeviceState,
    watch_tx: watch::Sender<DeviceState>,
}

/// Id-keyed registry of canonical device state
#[derive(Clone)]
pub struct StateStore {
    devices: Arc<RwLock<HashMap<DeviceId, DeviceEntry>>>,
    changes_tx: broadcast::Sender<StateChanged>,
}

impl StateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            changes_tx,
        }
    }

    /// Register a device, creating its initial state record
    pub fn register(&self, id: DeviceId) -> Result<()> {
        {
            let mut devices = self.devices.write();
            if devices.contains_key(&id) {
                return Err(StateError::AlreadyRegistered(id));
            }
            let state = DeviceState::new(id.clone(), Utc::now());
            let (watch_tx, _) = watch::channel(state.clone());
            devices.insert(id.clone(), DeviceEntry { state, watch_tx });
        }
        tracing::info!(device = %id, "device registered");
        let _ = self
            .changes_tx
            .send(StateChanged::DeviceAdded { device_id: id });
        Ok(())
    }

    /// Deregister a device, dropping its state and closing its watchers
    pub fn deregister(&self, id: &DeviceId) -> Result<()> {
        let removed = self.devices.write().remove(id);
        match removed {
            Some(_) => {
                tracing::info!(device = %id, "device deregistered");
                let _ = self.changes_tx.send(StateChanged::DeviceRemoved {
                    device_id: id.clone(),
                });
                Ok(())
            }
            None => Err(StateError::UnknownDevice(id.clone())),
        }
    }

    /// Get the current state of a device
    pub fn get(&self, id: &DeviceId) -> Option<DeviceState> {
        self.devices.read().get(id).map(|e| e.state.clone())
    }

    /// All registered device ids
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.read().keys().cloned().collect()
    }

    /// Current state of every registered device
    pub fn states(&self) -> Vec<DeviceState> {
        self.devices
            .read()
            .values()
            .map(|e| e.state.clone())
            .collect()
    }

    /// Whether the device is registered
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Whether the store has no devices
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Apply a merged candidate state; the sole mutation point
    ///
    /// Each field is adopted only if its observation timestamp is not older
    /// than the stored one, so a racing stale candidate can never regress
    /// state. Returns the set of visible fields whose values changed;
    /// listeners are notified only when that set is non-empty.
    pub fn apply(&self, candidate: DeviceState) -> Result<Vec<StateField>> {
        let mut devices = self.devices.write();
        let entry = devices
            .get_mut(&candidate.id)
            .ok_or_else(|| StateError::UnknownDevice(candidate.id.clone()))?;

        let mut changed = Vec::new();
        let current = &mut entry.state;
        // Captured before adoption: after it, the stored phase may already
        // be the candidate's.
        let phase_fresh = candidate.phase.observed_at >= current.phase.observed_at;

        macro_rules! adopt {
            ($field:ident, $tag:expr) => {
                if candidate.$field.observed_at >= current.$field.observed_at {
                    if candidate.$field.value != current.$field.value {
                        changed.push($tag);
                    }
                    current.$field = candidate.$field.clone();
                }
            };
        }

        adopt!(phase, StateField::Phase);
        adopt!(volume, StateField::Volume);
        adopt!(muted, StateField::Mute);
        adopt!(track, StateField::Track);
        adopt!(position_secs, StateField::Position);
        adopt!(duration_secs, StateField::Duration);
        adopt!(source, StateField::Source);
        adopt!(topology, StateField::Topology);

        // Bookkeeping travels with the candidate; it is not a visible field
        // and carries no timestamp of its own, so it rides along only when
        // the candidate's phase observation is at least as new. A candidate
        // built from an earlier read (a topology write racing a poll merge)
        // must not clobber a fresher streak.
        if phase_fresh {
            current.stop_streak = candidate.stop_streak;
            current.position_capability = candidate.position_capability;
        }

        if !changed.is_empty() {
            let device_id = current.id.clone();
            entry.watch_tx.send_replace(entry.state.clone());
            drop(devices);
            tracing::debug!(
                device = %device_id,
                fields = ?changed.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                "state updated"
            );
            let _ = self.changes_tx.send(StateChanged::DeviceUpdated {
                device_id,
                fields: changed.clone(),
            });
        }

        Ok(changed)
    }

    /// Watch one device's state
    ///
    /// The receiver holds the current state and wakes on every visible
    /// change. Returns None for unregistered devices.
    pub fn watch(&self, id: &DeviceId) -> Option<watch::Receiver<DeviceState>> {
        self.devices.read().get(id).map(|e| e.watch_tx.subscribe())
    }

    /// Subscribe to every state change across all devices
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChanged> {
        self.changes_tx.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
