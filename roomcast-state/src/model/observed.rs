//! Field-level observation wrapper
//!
//! Every visible field of [`DeviceState`](super::DeviceState) carries the
//! channel it was last observed on and the time of that observation. The
//! merge and store layers use the timestamp to enforce monotonicity: a
//! field's value is never replaced by one observed earlier, regardless of
//! which channel delivered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which channel produced an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Synchronous request/response fetch on the poll timer
    Poll,
    /// Asynchronous subscription-delivered update
    Push,
}

/// A value together with its observation provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed<T> {
    /// The observed value
    pub value: T,
    /// Channel the value arrived on
    pub origin: Origin,
    /// When the value was observed
    pub observed_at: DateTime<Utc>,
}

impl<T> Observed<T> {
    /// Wrap a value observed on the given channel at the given time
    pub fn new(value: T, origin: Origin, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            origin,
            observed_at,
        }
    }

    /// Wrap a poll-origin observation
    pub fn poll(value: T, observed_at: DateTime<Utc>) -> Self {
        Self::new(value, Origin::Poll, observed_at)
    }

    /// Wrap a push-origin observation
    pub fn push(value: T, observed_at: DateTime<Utc>) -> Self {
        Self::new(value, Origin::Push, observed_at)
    }
}

/// Memoized availability of an optional device capability
///
/// Computed once from the first successful poll snapshot instead of
/// re-probing or branching on failures on every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Not yet determined
    #[default]
    Unknown,
    /// The device reports this field
    Supported,
    /// The device has never reported this field
    Unsupported,
}

impl Capability {
    /// Fold a new observation into the memoized state
    ///
    /// Unknown resolves on the first observation; Unsupported upgrades to
    /// Supported if the field ever appears, since a positive sighting cannot
    /// be wrong.
    pub fn observe(self, present: bool) -> Self {
        match (self, present) {
            (Capability::Unknown, true) | (Capability::Unsupported, true) => Capability::Supported,
            (Capability::Unknown, false) => Capability::Unsupported,
            (current, _) => current,
        }
    }
}
