//! External collaborator interfaces
//!
//! The wire-protocol client and the push-subscription transport live
//! outside this crate; both are consumed through the narrow traits below.
//! Implementations are expected to normalize vendor formats into the
//! [`StatusSnapshot`]/[`PartialUpdate`] shapes before they cross this
//! boundary.

use async_trait::async_trait;
use tokio::sync::mpsc;

use roomcast_state::{DeviceId, PartialUpdate, StatusSnapshot};

use crate::error::Result;

/// Control commands the coordinator issues to devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Join the addressed device to the given leader's group
    JoinGroup { leader: DeviceId },
    /// Ask the addressed leader to drop one member from its group
    RemoveMember { member: DeviceId },
    /// Ask the addressed leader to dissolve its whole group
    Disband,
}

/// Non-blocking sink for push updates
///
/// Subscription callbacks send into this and return immediately; the
/// receiving device agent merges from its own task.
pub type PushSink = mpsc::UnboundedSender<PartialUpdate>;

/// Opaque token for an established push subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Request/response access to one device
///
/// `get_snapshot` is issued on the poll timer; `send_command` carries group
/// and control operations. Both surface transport failures as errors and
/// never block beyond their own internal timeouts.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fetch a full status snapshot from the device
    async fn get_snapshot(&self, device: &DeviceId) -> Result<StatusSnapshot>;

    /// Send a control command and await the device's acknowledgment
    async fn send_command(&self, device: &DeviceId, command: DeviceCommand) -> Result<()>;
}

/// Push-event subscription transport
///
/// A subscribed transport delivers [`PartialUpdate`]s into the sink at any
/// time. Delivering an *empty* update is the documented signal that an
/// internal resubscription attempt failed; the health monitor consumes it.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to push updates for a device
    async fn subscribe(&self, device: &DeviceId, sink: PushSink) -> Result<SubscriptionHandle>;

    /// Tear down a subscription
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;
}
