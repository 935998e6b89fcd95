//! Observation shapes delivered by the two external channels
//!
//! The wire client and subscription transport normalize vendor formats into
//! these two structs before they enter the core. Fields are `Option` because
//! devices report partial views; `None` always means "not reported", never
//! "reported empty".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::playback::PlaybackPhase;
use super::topology::GroupTopology;
use super::track::TrackInfo;

/// Full status observation produced by one poll request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Playback phase, if reported
    pub phase: Option<PlaybackPhase>,
    /// Volume 0-100, if reported
    pub volume: Option<u8>,
    /// Mute flag, if reported
    pub muted: Option<bool>,
    /// Track metadata, if reported
    pub track: Option<TrackInfo>,
    /// Position in seconds, if reported
    pub position_secs: Option<u64>,
    /// Duration in seconds, if reported
    pub duration_secs: Option<u64>,
    /// Active source identifier, if reported
    pub source: Option<String>,
    /// Self-reported group topology, if reported
    pub topology: Option<GroupTopology>,
}

impl StatusSnapshot {
    /// An empty snapshot taken at the given time
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            phase: None,
            volume: None,
            muted: None,
            track: None,
            position_secs: None,
            duration_secs: None,
            source: None,
            topology: None,
        }
    }
}

/// Partial state update delivered by the push subscription
///
/// An update with no populated field is the documented signal that the
/// underlying channel failed an internal resubscription attempt; it carries
/// no state and only feeds the health monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialUpdate {
    /// When the update was observed
    pub observed_at: DateTime<Utc>,
    /// Playback phase, if included
    pub phase: Option<PlaybackPhase>,
    /// Volume 0-100, if included
    pub volume: Option<u8>,
    /// Mute flag, if included
    pub muted: Option<bool>,
    /// Track metadata, if included
    pub track: Option<TrackInfo>,
    /// Position in seconds, if included
    pub position_secs: Option<u64>,
    /// Duration in seconds, if included
    pub duration_secs: Option<u64>,
    /// Active source identifier, if included
    pub source: Option<String>,
    /// Self-reported group topology, if included
    pub topology: Option<GroupTopology>,
}

impl PartialUpdate {
    /// An update with no fields, observed at the given time
    ///
    /// This is the resubscription-failure signal.
    pub fn empty(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            phase: None,
            volume: None,
            muted: None,
            track: None,
            position_secs: None,
            duration_secs: None,
            source: None,
            topology: None,
        }
    }

    /// Whether the update carries no state at all
    pub fn is_empty(&self) -> bool {
        self.phase.is_none()
            && self.volume.is_none()
            && self.muted.is_none()
            && self.track.is_none()
            && self.position_secs.is_none()
            && self.duration_secs.is_none()
            && self.source.is_none()
            && self.topology.is_none()
    }
}
