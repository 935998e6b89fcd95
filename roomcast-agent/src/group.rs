//! Leader/member group coordination
//!
//! Join and leave send control commands to each affected device and await
//! the acknowledgments independently; one member failing never aborts the
//! operation for its siblings. The coordinator keeps a cached view of each
//! device's topology and periodically reconciles it against what the
//! devices themselves report, trusting self-reports over the cache.
//!
//! Group operations take no cross-device lock. Consistency is eventual,
//! bounded by the refresh-cascade delay; brief topology disagreement
//! between devices is normal, not an error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use roomcast_state::{DeviceId, GroupRole, GroupTopology, Observed, StateStore};

use crate::agent::{AgentCommand, AgentHandle};
use crate::client::{DeviceClient, DeviceCommand};
use crate::error::{AgentError, Result};

/// Capacity of the topology-correction broadcast channel
const CORRECTIONS_CAPACITY: usize = 256;

/// Outcome of a multi-device group operation
///
/// Per-device command failures land in `failed` instead of aborting the
/// whole operation; callers inspect the split to report partial success.
#[derive(Debug, Default)]
pub struct GroupOpResult {
    /// Devices whose command was acknowledged and whose topology changed
    pub applied: Vec<DeviceId>,
    /// Devices whose command failed, with the error
    pub failed: Vec<(DeviceId, AgentError)>,
}

impl GroupOpResult {
    /// Every addressed device acknowledged
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Some devices acknowledged, some failed
    pub fn is_partial(&self) -> bool {
        !self.applied.is_empty() && !self.failed.is_empty()
    }
}

/// Emitted when reconciliation overrides a cached or self-reported topology
#[derive(Debug, Clone)]
pub struct TopologyCorrection {
    pub device_id: DeviceId,
    /// What the coordinator previously believed
    pub previous: GroupTopology,
    /// What it believes after trusting the self-reports
    pub corrected: GroupTopology,
    pub corrected_at: DateTime<Utc>,
}

/// Tracks group topology and issues join/leave/reconcile operations
pub struct GroupCoordinator {
    store: StateStore,
    client: Arc<dyn DeviceClient>,
    agents: Arc<DashMap<DeviceId, AgentHandle>>,
    cascade_settle_delay: Duration,
    /// Coordinator's cached topology view, checked against self-reports
    cached: Mutex<HashMap<DeviceId, GroupTopology>>,
    corrections_tx: broadcast::Sender<TopologyCorrection>,
}

impl GroupCoordinator {
    pub fn new(
        store: StateStore,
        client: Arc<dyn DeviceClient>,
        agents: Arc<DashMap<DeviceId, AgentHandle>>,
        cascade_settle_delay: Duration,
    ) -> Self {
        let (corrections_tx, _) = broadcast::channel(CORRECTIONS_CAPACITY);
        Self {
            store,
            client,
            agents,
            cascade_settle_delay,
            cached: Mutex::new(HashMap::new()),
            corrections_tx,
        }
    }

    /// Subscribe to topology corrections emitted by reconciliation
    pub fn subscribe_corrections(&self) -> broadcast::Receiver<TopologyCorrection> {
        self.corrections_tx.subscribe()
    }

    /// Join members to a leader's group
    ///
    /// Each member's join command is awaited independently. Members whose
    /// acknowledgment fails are excluded from the resulting topology and
    /// reported in the result; the rest proceed. Joining a member that is
    /// already in the group is a no-op for the topology, so repeating a
    /// join yields the same result as issuing it once.
    pub async fn join(&self, leader: DeviceId, members: Vec<DeviceId>) -> Result<GroupOpResult> {
        if !self.store.contains(&leader) {
            return Err(AgentError::UnknownDevice(leader));
        }

        let mut result = GroupOpResult::default();
        for member in members {
            if member == leader {
                continue;
            }
            if !self.store.contains(&member) {
                result
                    .failed
                    .push((member.clone(), AgentError::UnknownDevice(member)));
                continue;
            }
            let command = DeviceCommand::JoinGroup {
                leader: leader.clone(),
            };
            match self.client.send_command(&member, command).await {
                Ok(()) => result.applied.push(member),
                Err(e) => {
                    tracing::warn!(
                        member = %member,
                        leader = %leader,
                        error = %e,
                        "join command failed, excluding member"
                    );
                    result.failed.push((member, e));
                }
            }
        }

        if result.applied.is_empty() {
            return Ok(result);
        }

        // Union the acknowledged members into the leader's existing set.
        let mut member_ids = match self.store.get(&leader) {
            Some(s) if s.topology.value.role == GroupRole::Leader => {
                s.topology.value.member_ids.clone()
            }
            _ => Vec::new(),
        };
        for member in &result.applied {
            if !member_ids.contains(member) {
                member_ids.push(member.clone());
            }
        }

        let now = Utc::now();
        let leader_topology = GroupTopology::leader(member_ids);
        self.write_topology(&leader, leader_topology.clone(), now);
        for member in &result.applied {
            self.write_topology(member, GroupTopology::member(leader.clone()), now);
        }

        {
            let mut cache = self.cached.lock();
            cache.insert(leader.clone(), leader_topology);
            for member in &result.applied {
                cache.insert(member.clone(), GroupTopology::member(leader.clone()));
            }
        }

        tracing::info!(
            leader = %leader,
            joined = result.applied.len(),
            failed = result.failed.len(),
            "group join"
        );
        self.cascade(leader, result.applied.clone());
        Ok(result)
    }

    /// Remove a device from its group
    ///
    /// A member is removed via its leader; a leader disbands its whole
    /// group. Leaving a solo device is a no-op.
    pub async fn leave(&self, device: DeviceId) -> Result<GroupOpResult> {
        let Some(state) = self.store.get(&device) else {
            return Err(AgentError::UnknownDevice(device));
        };
        let topology = state.topology.value.clone();
        let now = Utc::now();
        let mut result = GroupOpResult::default();

        match topology.role {
            GroupRole::Solo => {
                tracing::debug!(device = %device, "leave on a solo device, nothing to do");
            }
            GroupRole::Member => {
                let Some(leader) = topology.leader_id.clone() else {
                    // Inconsistent self-report; reconciliation owns this case.
                    tracing::warn!(device = %device, "member without a leader id, leaving as-is");
                    return Ok(result);
                };
                let command = DeviceCommand::RemoveMember {
                    member: device.clone(),
                };
                match self.client.send_command(&leader, command).await {
                    Ok(()) => {
                        let leader_topology = self.leader_without(&leader, &device);
                        self.write_topology(&device, GroupTopology::solo(), now);
                        self.write_topology(&leader, leader_topology.clone(), now);
                        {
                            let mut cache = self.cached.lock();
                            cache.insert(device.clone(), GroupTopology::solo());
                            cache.insert(leader.clone(), leader_topology);
                        }
                        result.applied.push(device.clone());
                        tracing::info!(device = %device, leader = %leader, "left group");
                        self.cascade(leader, vec![device]);
                    }
                    Err(e) => result.failed.push((device, e)),
                }
            }
            GroupRole::Leader => {
                match self.client.send_command(&device, DeviceCommand::Disband).await {
                    Ok(()) => {
                        self.write_topology(&device, GroupTopology::solo(), now);
                        result.applied.push(device.clone());
                        let mut cache = self.cached.lock();
                        cache.insert(device.clone(), GroupTopology::solo());
                        for member in &topology.member_ids {
                            self.write_topology(member, GroupTopology::solo(), now);
                            cache.insert(member.clone(), GroupTopology::solo());
                            result.applied.push(member.clone());
                        }
                        drop(cache);
                        tracing::info!(
                            leader = %device,
                            members = topology.member_ids.len(),
                            "group disbanded"
                        );
                        self.cascade(device, topology.member_ids);
                    }
                    Err(e) => result.failed.push((device, e)),
                }
            }
        }
        Ok(result)
    }

    /// Reconcile cached topology against device self-reports
    ///
    /// Trusts each device's self-reported role plus the leader's own member
    /// list over anything cached, pruning leader lists of members that are
    /// gone or answer to another leader. Never fabricates membership not
    /// reported by at least one device. Returns the number of drifted
    /// devices, each counted at most once per pass.
    pub fn reconcile(&self) -> usize {
        let now = Utc::now();
        let states = self.store.states();

        let reported: HashMap<DeviceId, GroupTopology> = states
            .iter()
            .map(|s| (s.id.clone(), s.topology.value.clone()))
            .collect();

        // Leader member lists are authoritative: a leader listing a device
        // makes it a member, a leader omitting a claimed member unmakes it.
        // Sorted so that two leaders claiming the same member resolve
        // deterministically.
        let mut leader_of: HashMap<DeviceId, DeviceId> = HashMap::new();
        let mut leaders: Vec<(&DeviceId, &GroupTopology)> = reported
            .iter()
            .filter(|(_, t)| t.role == GroupRole::Leader)
            .collect();
        leaders.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        for (leader_id, topology) in leaders {
            for member in &topology.member_ids {
                if reported.contains_key(member) {
                    leader_of
                        .entry(member.clone())
                        .or_insert_with(|| leader_id.clone());
                }
            }
        }

        let mut corrected = reported.clone();
        for (id, topology) in &reported {
            match (&topology.role, leader_of.get(id)) {
                // Claims membership no leader confirms.
                (GroupRole::Member, None) => {
                    corrected.insert(id.clone(), GroupTopology::solo());
                }
                // A leader lists it under a different (or missing) leader id.
                (GroupRole::Member, Some(leader)) if topology.leader_id.as_ref() != Some(leader) => {
                    corrected.insert(id.clone(), GroupTopology::member(leader.clone()));
                }
                // Reports solo, but a leader lists it.
                (GroupRole::Solo, Some(leader)) => {
                    corrected.insert(id.clone(), GroupTopology::member(leader.clone()));
                }
                // A leader's own list keeps only members that resolved to
                // it and are still registered; deregistered devices and
                // members claimed by an earlier-sorted leader drop out.
                (GroupRole::Leader, _) => {
                    let kept: Vec<DeviceId> = topology
                        .member_ids
                        .iter()
                        .filter(|member| leader_of.get(*member) == Some(id))
                        .cloned()
                        .collect();
                    if kept.len() != topology.member_ids.len() {
                        let next = if kept.is_empty() {
                            GroupTopology::solo()
                        } else {
                            GroupTopology::leader(kept)
                        };
                        corrected.insert(id.clone(), next);
                    }
                }
                _ => {}
            }
        }

        let mut drift = 0usize;
        let mut refresh_leaders: HashSet<DeviceId> = HashSet::new();
        let mut poke_solo: Vec<DeviceId> = Vec::new();
        {
            let mut cache = self.cached.lock();
            for (id, topology) in &corrected {
                let Some(prior) = cache.get(id).cloned() else {
                    // First sighting; adopt silently.
                    cache.insert(id.clone(), topology.clone());
                    continue;
                };
                let self_report = &reported[id];
                if &prior != self_report || &prior != topology {
                    drift += 1;
                    let correction = TopologyCorrection {
                        device_id: id.clone(),
                        previous: prior,
                        corrected: topology.clone(),
                        corrected_at: now,
                    };
                    tracing::info!(
                        device = %id,
                        role = ?topology.role,
                        "topology drift corrected"
                    );
                    let _ = self.corrections_tx.send(correction);

                    match topology.role {
                        GroupRole::Leader => {
                            refresh_leaders.insert(id.clone());
                        }
                        GroupRole::Member => {
                            if let Some(leader) = &topology.leader_id {
                                refresh_leaders.insert(leader.clone());
                            }
                        }
                        GroupRole::Solo => poke_solo.push(id.clone()),
                    }
                }
                cache.insert(id.clone(), topology.clone());
            }
            // Drop cache entries for devices that have been deregistered.
            cache.retain(|id, _| reported.contains_key(id));
        }

        // Write back only where the correction disagrees with the device's
        // own report; agreeing state would be a no-op in the store anyway.
        for (id, topology) in &corrected {
            if reported[id] != *topology {
                self.write_topology(id, topology.clone(), now);
            }
        }

        for leader in refresh_leaders {
            let members = corrected
                .get(&leader)
                .map(|t| t.member_ids.clone())
                .unwrap_or_default();
            self.cascade(leader, members);
        }
        for device in poke_solo {
            if let Some(handle) = self.agents.get(&device) {
                handle.send(AgentCommand::PollNow);
            }
        }

        drift
    }

    /// Refresh a group: leader first, then members after a settle delay
    pub(crate) fn cascade(&self, leader: DeviceId, members: Vec<DeviceId>) {
        let agents = Arc::clone(&self.agents);
        let delay = self.cascade_settle_delay;
        tokio::spawn(async move {
            if let Some(handle) = agents.get(&leader) {
                handle.send(AgentCommand::PollNow);
            }
            tokio::time::sleep(delay).await;
            for member in members {
                if let Some(handle) = agents.get(&member) {
                    handle.send(AgentCommand::PollNow);
                }
            }
        });
    }

    /// Leader's topology after removing one member
    fn leader_without(&self, leader: &DeviceId, removed: &DeviceId) -> GroupTopology {
        let mut member_ids = match self.store.get(leader) {
            Some(s) if s.topology.value.role == GroupRole::Leader => {
                s.topology.value.member_ids.clone()
            }
            _ => Vec::new(),
        };
        member_ids.retain(|m| m != removed);
        if member_ids.is_empty() {
            GroupTopology::solo()
        } else {
            GroupTopology::leader(member_ids)
        }
    }

    /// Write a topology into the store as a fresh observation
    fn write_topology(&self, id: &DeviceId, topology: GroupTopology, now: DateTime<Utc>) {
        let Some(mut state) = self.store.get(id) else {
            tracing::debug!(device = %id, "topology write raced deregistration");
            return;
        };
        state.topology = Observed::poll(topology, now);
        if let Err(e) = self.store.apply(state) {
            tracing::debug!(device = %id, error = %e, "topology write raced deregistration");
        }
    }
}
