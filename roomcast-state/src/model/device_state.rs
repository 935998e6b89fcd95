//! Canonical per-device state record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::DeviceId;
use super::observed::{Capability, Observed};
use super::playback::PlaybackPhase;
use super::topology::GroupTopology;
use super::track::TrackInfo;

/// Names of the visible fields of [`DeviceState`]
///
/// Change notifications carry sets of these so listeners (and the group
/// coordinator in particular) can react to specific fields without diffing
/// whole states themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateField {
    Phase,
    Volume,
    Mute,
    Track,
    Position,
    Duration,
    Source,
    Topology,
}

impl StateField {
    /// Stable key for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::Phase => "phase",
            StateField::Volume => "volume",
            StateField::Mute => "mute",
            StateField::Track => "track",
            StateField::Position => "position",
            StateField::Duration => "duration",
            StateField::Source => "source",
            StateField::Topology => "topology",
        }
    }
}

/// Last-known-good canonical snapshot for one device
///
/// Every visible field is an [`Observed`] carrying its origin channel and
/// observation timestamp. The only way a stored DeviceState changes is
/// through [`StateStore::apply`](crate::store::StateStore::apply), which
/// enforces per-field timestamp monotonicity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Stable device identity, supplied by the external registry
    pub id: DeviceId,
    /// Playback phase
    pub phase: Observed<PlaybackPhase>,
    /// Volume, 0-100
    pub volume: Observed<u8>,
    /// Mute flag
    pub muted: Observed<bool>,
    /// Current track metadata, if any is known
    pub track: Observed<Option<TrackInfo>>,
    /// Playback position in seconds, if the device reports it
    pub position_secs: Observed<Option<u64>>,
    /// Track duration in seconds, if the device reports it
    pub duration_secs: Observed<Option<u64>>,
    /// Identifier of the active input source
    pub source: Observed<Option<String>>,
    /// Group role and references
    pub topology: Observed<GroupTopology>,
    /// Consecutive stopped/idle observations seen while playback was active.
    /// Bookkeeping for the merger's stop-confirmation rule, not a visible field.
    pub stop_streak: u8,
    /// Whether this device reports playback position at all
    pub position_capability: Capability,
}

impl DeviceState {
    /// Fresh record for a newly registered device
    ///
    /// All fields start at their defaults with a poll-origin observation at
    /// `registered_at`, so any real observation (which is necessarily newer)
    /// can replace them.
    pub fn new(id: DeviceId, registered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            phase: Observed::poll(PlaybackPhase::Idle, registered_at),
            volume: Observed::poll(0, registered_at),
            muted: Observed::poll(false, registered_at),
            track: Observed::poll(None, registered_at),
            position_secs: Observed::poll(None, registered_at),
            duration_secs: Observed::poll(None, registered_at),
            source: Observed::poll(None, registered_at),
            topology: Observed::poll(GroupTopology::solo(), registered_at),
            stop_streak: 0,
            position_capability: Capability::Unknown,
        }
    }

    /// Whether the device is actively playing
    pub fn is_playing(&self) -> bool {
        self.phase.value.is_active()
    }

    /// The newest observation timestamp across all visible fields
    pub fn latest_observation(&self) -> DateTime<Utc> {
        [
            self.phase.observed_at,
            self.volume.observed_at,
            self.muted.observed_at,
            self.track.observed_at,
            self.position_secs.observed_at,
            self.duration_secs.observed_at,
            self.source.observed_at,
            self.topology.observed_at,
        ]
        .into_iter()
        .max()
        .unwrap_or(self.phase.observed_at)
    }

    /// Observation timestamp of one field, for diagnostics and tests
    pub fn field_observed_at(&self, field: StateField) -> DateTime<Utc> {
        match field {
            StateField::Phase => self.phase.observed_at,
            StateField::Volume => self.volume.observed_at,
            StateField::Mute => self.muted.observed_at,
            StateField::Track => self.track.observed_at,
            StateField::Position => self.position_secs.observed_at,
            StateField::Duration => self.duration_secs.observed_at,
            StateField::Source => self.source.observed_at,
            StateField::Topology => self.topology.observed_at,
        }
    }
}
