//! # roomcast-agent
//!
//! Drives networked audio endpoints: one agent task per device running an
//! adaptive poll loop and hosting a push subscription, a group coordinator
//! for leader/member topology, and a registry tying the lifecycle together.
//!
//! The crate provides:
//!
//! - [`registry::DeviceRegistry`] - the lifecycle root; register devices,
//!   read state, issue group operations, shut everything down
//! - [`agent`] - the per-device task serializing polls, pushes, and merges
//! - [`scheduler::PollPlanner`] - activity-tiered poll intervals with
//!   capped failure backoff
//! - [`group::GroupCoordinator`] - join/leave operations and periodic
//!   topology drift reconciliation
//! - [`client`] - the [`client::DeviceClient`] and
//!   [`client::EventSubscriber`] traits the surrounding transport
//!   implements
//!
//! Canonical state itself (the store, merger, and health monitor) lives in
//! `roomcast-state`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use roomcast_agent::{AgentConfig, DeviceRegistry};
//! use roomcast_state::DeviceId;
//!
//! let registry = DeviceRegistry::new(client, subscriber, AgentConfig::default());
//! registry.register_device(DeviceId::new("living-room"))?;
//!
//! let mut changes = registry.subscribe_changes();
//! while let Ok(event) = changes.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod group;
pub mod registry;
pub mod scheduler;

pub use agent::{AgentCommand, AgentHandle};
pub use client::{DeviceClient, DeviceCommand, EventSubscriber, PushSink, SubscriptionHandle};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use group::{GroupCoordinator, GroupOpResult, TopologyCorrection};
pub use registry::DeviceRegistry;
pub use scheduler::{ActivityTier, PollPlanner, PollingPolicy};
