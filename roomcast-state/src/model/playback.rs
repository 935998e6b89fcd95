//! Playback phase type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback phase of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// Nothing queued, nothing playing
    #[default]
    Idle,
    /// Actively playing
    Playing,
    /// Playback paused mid-track
    Paused,
    /// Playback stopped with a queue still present
    Stopped,
}

impl PlaybackPhase {
    /// Whether this phase counts as active playback
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackPhase::Playing)
    }

    /// Whether this phase means playback has ceased
    ///
    /// Idle and Stopped are both "not playing and not about to resume";
    /// they are the phases gated by the stop-confirmation rule in the merger.
    pub fn is_ceased(&self) -> bool {
        matches!(self, PlaybackPhase::Idle | PlaybackPhase::Stopped)
    }
}

impl fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "idle"),
            PlaybackPhase::Playing => write!(f, "playing"),
            PlaybackPhase::Paused => write!(f, "paused"),
            PlaybackPhase::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(PlaybackPhase::default(), PlaybackPhase::Idle);
    }

    #[test]
    fn test_is_active() {
        assert!(PlaybackPhase::Playing.is_active());
        assert!(!PlaybackPhase::Paused.is_active());
        assert!(!PlaybackPhase::Idle.is_active());
    }

    #[test]
    fn test_is_ceased() {
        assert!(PlaybackPhase::Idle.is_ceased());
        assert!(PlaybackPhase::Stopped.is_ceased());
        assert!(!PlaybackPhase::Playing.is_ceased());
        assert!(!PlaybackPhase::Paused.is_ceased());
    }
}
