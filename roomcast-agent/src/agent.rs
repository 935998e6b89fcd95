//! Per-device agent task
//!
//! One agent runs per registered device. It owns the device's poll loop,
//! hosts its push subscription, and serializes every mutation of that
//! device's state through its own task: push callbacks only append to a
//! mailbox and return, and merges happen here, so a merge never observes a
//! half-updated pending buffer.
//!
//! At most one poll request is in flight per device by construction - the
//! loop awaits the request inline, so an interval elapsing mid-request
//! defers the next cycle instead of stacking a second one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use roomcast_state::{
    DeviceId, DeviceState, GroupRole, HealthMonitor, Merger, PartialUpdate, StateStore,
    StatusSnapshot, SubscriptionHealth,
};

use crate::client::{DeviceClient, EventSubscriber, SubscriptionHandle};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::scheduler::PollPlanner;

/// Upper bound on buffered push updates awaiting a trusted merge
const PENDING_CAP: usize = 64;

/// Commands accepted by a running agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    /// Poll immediately, ahead of schedule
    PollNow,
    /// Pin the polling tier at Recent or better for the boost window
    Boost,
    /// Stop the loop, unsubscribe, and exit
    Shutdown,
}

/// Handle to a spawned agent task
#[derive(Debug)]
pub struct AgentHandle {
    device_id: DeviceId,
    command_tx: mpsc::UnboundedSender<AgentCommand>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// The device this agent drives
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Send a command; returns false if the agent has already stopped
    pub fn send(&self, command: AgentCommand) -> bool {
        self.command_tx.send(command).is_ok()
    }

    /// Stop the agent and wait for its task to finish
    ///
    /// Safe to call while a merge or poll is in flight; the loop observes
    /// the shutdown command at its next wakeup and tears down its timer
    /// and subscription before exiting.
    pub async fn shutdown(self) {
        let AgentHandle {
            device_id,
            command_tx,
            task,
        } = self;
        let _ = command_tx.send(AgentCommand::Shutdown);
        let abort = task.abort_handle();
        if tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .is_err()
        {
            tracing::warn!(device = %device_id, "agent did not stop in time, aborting");
            abort.abort();
        }
    }
}

/// Spawn the agent task for one device
pub fn spawn_agent(
    id: DeviceId,
    store: StateStore,
    client: Arc<dyn DeviceClient>,
    subscriber: Arc<dyn EventSubscriber>,
    config: AgentConfig,
) -> AgentHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (push_tx, push_rx) = mpsc::unbounded_channel();

    let agent = DeviceAgent {
        id: id.clone(),
        store,
        client,
        subscriber,
        merger: Merger::new(config.merge.clone()),
        health: HealthMonitor::new(id.clone(), config.health.clone()),
        planner: PollPlanner::new(config.polling.clone()),
        config,
        pending: Vec::new(),
        subscription: None,
        push_tx,
        last_change_at: Utc::now(),
    };

    let task = tokio::spawn(agent.run(command_rx, push_rx));

    AgentHandle {
        device_id: id,
        command_tx,
        task,
    }
}

struct DeviceAgent {
    id: DeviceId,
    store: StateStore,
    client: Arc<dyn DeviceClient>,
    subscriber: Arc<dyn EventSubscriber>,
    merger: Merger,
    health: HealthMonitor,
    planner: PollPlanner,
    config: AgentConfig,
    /// Push updates accumulated since the last merge that consumed them
    pending: Vec<PartialUpdate>,
    subscription: Option<SubscriptionHandle>,
    /// Kept for resubscription attempts after a channel failure
    push_tx: mpsc::UnboundedSender<PartialUpdate>,
    last_change_at: DateTime<Utc>,
}

impl DeviceAgent {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<AgentCommand>,
        mut push_rx: mpsc::UnboundedReceiver<PartialUpdate>,
    ) {
        tracing::info!(device = %self.id, "agent started");

        match self
            .subscriber
            .subscribe(&self.id, self.push_tx.clone())
            .await
        {
            Ok(handle) => self.subscription = Some(handle),
            Err(e) => {
                tracing::warn!(device = %self.id, error = %e, "initial subscription failed, relying on polls");
            }
        }

        self.poll_cycle().await;
        let mut next_poll_at = Instant::now() + self.compute_interval();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_poll_at) => {
                    self.poll_cycle().await;
                    next_poll_at = Instant::now() + self.compute_interval();
                }
                Some(update) = push_rx.recv() => {
                    self.on_push(update);
                    // A push can change the activity tier; never let it push
                    // the next poll further out, only pull it in.
                    next_poll_at = next_poll_at.min(Instant::now() + self.compute_interval());
                }
                command = command_rx.recv() => match command {
                    Some(AgentCommand::PollNow) => {
                        self.poll_cycle().await;
                        next_poll_at = Instant::now() + self.compute_interval();
                    }
                    Some(AgentCommand::Boost) => {
                        self.planner.boost(Utc::now());
                        self.poll_cycle().await;
                        next_poll_at = Instant::now() + self.compute_interval();
                    }
                    Some(AgentCommand::Shutdown) | None => break,
                },
            }
        }

        if let Some(handle) = self.subscription.take() {
            let _ = self.subscriber.unsubscribe(handle).await;
        }
        tracing::info!(device = %self.id, "agent stopped");
    }

    /// One full poll cycle: silence check, snapshot fetch, merge, apply
    async fn poll_cycle(&mut self) {
        self.health.check_silence(Utc::now());

        match self.fetch_snapshot().await {
            Ok(snapshot) => {
                self.planner.record_success();
                self.merge_and_apply(Some(&snapshot));
            }
            Err(e) => {
                let failures = self.planner.record_failure();
                if failures >= self.planner.failure_warn_threshold() {
                    tracing::warn!(
                        device = %self.id,
                        failures,
                        error = %e,
                        "poll failing repeatedly, backing off"
                    );
                } else {
                    tracing::debug!(device = %self.id, failures, error = %e, "poll failed");
                }
            }
        }

        self.maybe_resubscribe().await;
    }

    /// Fetch a snapshot with timeout and bounded in-cycle retries
    async fn fetch_snapshot(&self) -> Result<StatusSnapshot> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(
                self.config.poll_timeout,
                self.client.get_snapshot(&self.id),
            )
            .await;

            let err = match outcome {
                Ok(Ok(snapshot)) => return Ok(snapshot),
                Ok(Err(e)) => e,
                Err(_) => AgentError::Timeout {
                    device: self.id.clone(),
                },
            };

            if attempt >= self.config.poll_retries || !err.is_transient() {
                return Err(err);
            }

            let backoff = self.config.retry_backoff.saturating_mul(1 << attempt.min(8));
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Accept one push update: feed health, buffer, merge if trusted
    fn on_push(&mut self, update: PartialUpdate) {
        let now = Utc::now();
        self.health.record_update(&update, now);

        if update.is_empty() {
            // Resubscription-failure signal; carries no state.
            return;
        }

        if self.pending.len() >= PENDING_CAP {
            self.pending.remove(0);
        }
        self.pending.push(update);

        if self.health.is_trusted() {
            self.merge_and_apply(None);
        }
    }

    /// Run the merger against current state and write the result back
    ///
    /// The pending buffer is drained whenever this merge consumed it: on
    /// every poll merge, and on push merges while trusted. Untrusted
    /// buffered updates stay put until a poll settles their fate.
    fn merge_and_apply(&mut self, poll: Option<&StatusSnapshot>) {
        let Some(current) = self.store.get(&self.id) else {
            // Deregistered while a request was in flight.
            return;
        };

        let merged = self
            .merger
            .merge(&current, poll, &self.pending, self.health.status());

        if poll.is_some() || self.health.is_trusted() {
            self.pending.clear();
        }

        match self.store.apply(merged) {
            Ok(fields) if !fields.is_empty() => {
                self.last_change_at = Utc::now();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(device = %self.id, error = %e, "apply raced deregistration");
            }
        }
    }

    /// After a channel failure, try to establish a fresh subscription
    async fn maybe_resubscribe(&mut self) {
        if self.health.status().health != SubscriptionHealth::Failed {
            return;
        }

        if let Some(handle) = self.subscription.take() {
            let _ = self.subscriber.unsubscribe(handle).await;
        }

        match self
            .subscriber
            .subscribe(&self.id, self.push_tx.clone())
            .await
        {
            Ok(handle) => {
                self.subscription = Some(handle);
                self.health.record_resubscribed(Utc::now());
                tracing::info!(device = %self.id, "push channel resubscribed");
            }
            Err(e) => {
                tracing::debug!(device = %self.id, error = %e, "resubscription attempt failed");
            }
        }
    }

    /// Interval until the next scheduled poll for the current situation
    fn compute_interval(&self) -> Duration {
        let now = Utc::now();
        let state = self.store.get(&self.id);
        let (playing, leader_active) = match &state {
            Some(s) => (s.is_playing(), self.leader_has_active_member(s)),
            None => (false, false),
        };
        let tier = self
            .planner
            .tier(now, self.last_change_at, playing, leader_active);
        self.planner.next_interval(tier)
    }

    /// Whether this device leads a group with at least one playing member
    fn leader_has_active_member(&self, state: &DeviceState) -> bool {
        state.topology.value.role == GroupRole::Leader
            && state.topology.value.member_ids.iter().any(|member| {
                self.store
                    .get(member)
                    .is_some_and(|member_state| member_state.is_playing())
            })
    }
}
