//! Device identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a networked audio endpoint
///
/// Identity is assigned by an external registry (discovery, configuration)
/// and is never generated here. Leader and member references in group
/// topology store these ids rather than object references, so cyclic
/// leader/member relationships stay cycle-free in memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new DeviceId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_as_str() {
        let id = DeviceId::new("living-room");
        assert_eq!(id.as_str(), "living-room");
        assert_eq!(id.to_string(), "living-room");
    }

    #[test]
    fn test_equality() {
        assert_eq!(DeviceId::new("a"), DeviceId::from("a"));
        assert_ne!(DeviceId::new("a"), DeviceId::new("b"));
    }
}
