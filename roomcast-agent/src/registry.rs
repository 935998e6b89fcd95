//! Device registry and lifecycle root
//!
//! One registry owns the store, the per-device agents, and the group
//! coordinator for the lifetime of the application. It is created on
//! startup and torn down with [`DeviceRegistry::shutdown`]; tests build
//! isolated instances instead of sharing ambient global state.
//!
//! Device identity is supplied by the caller; the registry never generates
//! or rewrites ids.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use roomcast_state::{DeviceId, DeviceState, StateChanged, StateField, StateStore};

use crate::agent::{spawn_agent, AgentCommand, AgentHandle};
use crate::client::{DeviceClient, EventSubscriber};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::group::{GroupCoordinator, GroupOpResult, TopologyCorrection};

/// Owns every device agent and the group coordinator
pub struct DeviceRegistry {
    store: StateStore,
    client: Arc<dyn DeviceClient>,
    subscriber: Arc<dyn EventSubscriber>,
    config: AgentConfig,
    agents: Arc<DashMap<DeviceId, AgentHandle>>,
    coordinator: Arc<GroupCoordinator>,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl DeviceRegistry {
    /// Create a registry and start its reconciliation loop
    pub fn new(
        client: Arc<dyn DeviceClient>,
        subscriber: Arc<dyn EventSubscriber>,
        config: AgentConfig,
    ) -> Self {
        let store = StateStore::new();
        let agents: Arc<DashMap<DeviceId, AgentHandle>> = Arc::new(DashMap::new());
        let coordinator = Arc::new(GroupCoordinator::new(
            store.clone(),
            Arc::clone(&client),
            Arc::clone(&agents),
            config.cascade_settle_delay,
        ));

        let reconcile_task = tokio::spawn(reconcile_loop(
            store.clone(),
            Arc::clone(&coordinator),
            config.reconcile_interval,
        ));

        Self {
            store,
            client,
            subscriber,
            config,
            agents,
            coordinator,
            reconcile_task: Mutex::new(Some(reconcile_task)),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register a device and spawn its agent
    pub fn register_device(&self, id: DeviceId) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AgentError::ShuttingDown);
        }
        self.store.register(id.clone())?;
        let handle = spawn_agent(
            id.clone(),
            self.store.clone(),
            Arc::clone(&self.client),
            Arc::clone(&self.subscriber),
            self.config.clone(),
        );
        self.agents.insert(id, handle);
        Ok(())
    }

    /// Deregister a device: stop its agent, then drop its state
    ///
    /// Safe to call while the agent is mid-merge; the agent drains its
    /// subscription and timers before the state entry disappears.
    pub async fn deregister_device(&self, id: &DeviceId) -> Result<()> {
        let Some((_, handle)) = self.agents.remove(id) else {
            return Err(AgentError::UnknownDevice(id.clone()));
        };
        handle.shutdown().await;
        self.store.deregister(id)?;
        Ok(())
    }

    /// Read-only snapshot of a device's canonical state
    pub fn state(&self, id: &DeviceId) -> Option<DeviceState> {
        self.store.get(id)
    }

    /// Per-device state watch; the receiver always holds the latest value
    pub fn watch(&self, id: &DeviceId) -> Option<watch::Receiver<DeviceState>> {
        self.store.watch(id)
    }

    /// Firehose of state-change events across all devices
    pub fn subscribe_changes(&self) -> broadcast::Receiver<StateChanged> {
        self.store.subscribe_changes()
    }

    /// Topology corrections emitted by reconciliation
    pub fn subscribe_corrections(&self) -> broadcast::Receiver<TopologyCorrection> {
        self.coordinator.subscribe_corrections()
    }

    /// Join members to a leader's group
    pub async fn request_join(
        &self,
        leader: DeviceId,
        members: Vec<DeviceId>,
    ) -> Result<GroupOpResult> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AgentError::ShuttingDown);
        }
        self.coordinator.join(leader, members).await
    }

    /// Remove a device from its group
    pub async fn request_leave(&self, device: DeviceId) -> Result<GroupOpResult> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(AgentError::ShuttingDown);
        }
        self.coordinator.leave(device).await
    }

    /// Pin a device's polling at the recent tier for the boost window
    ///
    /// Issued alongside user-initiated commands so their effect shows up
    /// promptly even on an otherwise dormant device.
    pub fn request_boost(&self, id: &DeviceId) -> Result<()> {
        let Some(handle) = self.agents.get(id) else {
            return Err(AgentError::UnknownDevice(id.clone()));
        };
        handle.send(AgentCommand::Boost);
        Ok(())
    }

    /// Run one reconciliation pass immediately; returns the drift count
    pub fn reconcile_now(&self) -> usize {
        self.coordinator.reconcile()
    }

    /// Ids of all registered devices
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.store.device_ids()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Stop every agent and the reconciliation loop
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Some(task) = self.reconcile_task.lock().take() {
            task.abort();
        }

        let ids: Vec<DeviceId> = self.agents.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.agents.remove(&id) {
                handle.shutdown().await;
            }
        }
        tracing::info!("registry shut down");
    }
}

/// Periodic reconciliation, with an extra pass whenever any device's
/// self-reported topology changes so drift is caught within one poll
/// cycle instead of one reconcile interval
async fn reconcile_loop(
    store: StateStore,
    coordinator: Arc<GroupCoordinator>,
    interval: std::time::Duration,
) {
    let mut changes = store.subscribe_changes();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let drift = coordinator.reconcile();
                if drift > 0 {
                    tracing::info!(drift, "reconciliation pass corrected drift");
                }
            }
            event = changes.recv() => match event {
                Ok(StateChanged::DeviceUpdated { fields, .. })
                    if fields.contains(&StateField::Topology) =>
                {
                    // Converges: a pass that corrects nothing writes
                    // nothing, so it emits no further topology events.
                    coordinator.reconcile();
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "reconcile loop lagged behind change events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
