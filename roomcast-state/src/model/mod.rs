//! Data model for roomcast device state

mod device_state;
mod ids;
mod observed;
mod playback;
mod topology;
mod track;
mod updates;

pub use device_state::{DeviceState, StateField};
pub use ids::DeviceId;
pub use observed::{Capability, Observed, Origin};
pub use playback::PlaybackPhase;
pub use topology::{GroupRole, GroupTopology};
pub use track::TrackInfo;
pub use updates::{PartialUpdate, StatusSnapshot};
