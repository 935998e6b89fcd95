//! Group topology types
//!
//! A device is either solo, the leader of a group, or a member of a group.
//! Leader and member references are ids, never object pointers, so the
//! leader/member relationship is representable without ownership cycles and
//! serializes cleanly for diagnostics.

use serde::{Deserialize, Serialize};

use super::ids::DeviceId;

/// Role a device plays in group topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    /// Not part of any group
    #[default]
    Solo,
    /// Originates a shared stream for its members
    Leader,
    /// Receives a shared stream from its leader
    Member,
}

/// Self-contained topology record for one device
///
/// Invariant: `leader_id` is present only when role is Member and
/// `member_ids` is non-empty only when role is Leader. `is_consistent`
/// checks this; the store and coordinator only ever write consistent values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupTopology {
    /// This device's role
    pub role: GroupRole,
    /// The leader this device follows (Member only)
    pub leader_id: Option<DeviceId>,
    /// The members this device leads (Leader only)
    pub member_ids: Vec<DeviceId>,
}

impl GroupTopology {
    /// Topology for an ungrouped device
    pub fn solo() -> Self {
        Self::default()
    }

    /// Topology for a group leader with the given members
    pub fn leader(member_ids: Vec<DeviceId>) -> Self {
        Self {
            role: GroupRole::Leader,
            leader_id: None,
            member_ids,
        }
    }

    /// Topology for a member following the given leader
    pub fn member(leader_id: DeviceId) -> Self {
        Self {
            role: GroupRole::Member,
            leader_id: Some(leader_id),
            member_ids: Vec::new(),
        }
    }

    /// Whether field presence matches the role
    pub fn is_consistent(&self) -> bool {
        match self.role {
            GroupRole::Solo => self.leader_id.is_none() && self.member_ids.is_empty(),
            GroupRole::Leader => self.leader_id.is_none(),
            GroupRole::Member => self.leader_id.is_some() && self.member_ids.is_empty(),
        }
    }

    /// Whether this device claims the given member
    pub fn has_member(&self, id: &DeviceId) -> bool {
        self.role == GroupRole::Leader && self.member_ids.contains(id)
    }
}
