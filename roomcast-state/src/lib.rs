//! # roomcast-state
//!
//! Canonical state management for networked audio endpoints fed by two
//! disagreeing, independently-failing channels: a pull poll and a push
//! event subscription.
//!
//! The crate provides:
//!
//! - [`model`] - the per-device state record, where every visible field
//!   carries its origin channel and observation timestamp
//! - [`store::StateStore`] - the id-keyed registry and single mutation
//!   point, with per-field monotonicity and change notification
//! - [`health::HealthMonitor`] - push-channel liveness and trust tracking
//! - [`merge::Merger`] - field-level arbitration of poll snapshots and
//!   pending push updates into new canonical state
//!
//! Agents, polling policy, and group coordination live in `roomcast-agent`,
//! which drives these pieces one task per device.

pub mod error;
pub mod health;
pub mod logging;
pub mod merge;
pub mod model;
pub mod store;

pub use error::{Result, StateError};
pub use health::{HealthMonitor, HealthPolicy, SubscriptionHealth, SubscriptionStatus};
pub use merge::{MergePolicy, Merger};
pub use model::{
    Capability, DeviceId, DeviceState, GroupRole, GroupTopology, Observed, Origin, PartialUpdate,
    PlaybackPhase, StateField, StatusSnapshot, TrackInfo,
};
pub use store::{StateChanged, StateStore};
