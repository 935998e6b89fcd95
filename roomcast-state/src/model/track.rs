//! Track metadata type

use serde::{Deserialize, Serialize};

/// Metadata for the currently loaded track
///
/// All fields are optional; devices report whatever their current source
/// exposes. An all-empty TrackInfo is treated as "no track known".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track title
    pub title: Option<String>,
    /// Artist name
    pub artist: Option<String>,
    /// Album name
    pub album: Option<String>,
}

impl TrackInfo {
    /// Create track info with a title only
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// Check if no field carries meaningful content
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}
