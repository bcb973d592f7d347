//! Election task implementation
//!
//! One task per instance. It owns the channel handle and the role sender and
//! runs the state machine until shutdown:
//!
//! ```text
//! Initializing ──probe──> AwaitingResponses ──primary-exists─────> Secondary
//!                                │          ──lower-id candidate──> Secondary
//!                                └── window T elapsed ────────────> Primary
//! ```

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::messages::{ControlRequest, ElectionSnapshot, ElectionState, Role};
use crate::channel::{ChannelHandle, InstanceMessage};
use crate::config::ElectionConfig;
use crate::identity::InstanceId;

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// State and resources of one running election
pub(crate) struct ElectionTask {
    id: InstanceId,
    config: ElectionConfig,
    channel: ChannelHandle,
    role_tx: watch::Sender<Role>,
    state: ElectionState,
    /// Armed only while awaiting responses; lives and dies with the task
    deadline: Option<Instant>,
    stats: ElectionSnapshot,
}

impl ElectionTask {
    pub(crate) fn new(
        id: InstanceId,
        config: ElectionConfig,
        channel: ChannelHandle,
        role_tx: watch::Sender<Role>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let stats = ElectionSnapshot::initial(id, channel.channel(), created_at);
        Self {
            id,
            config,
            channel,
            role_tx,
            state: ElectionState::Initializing,
            deadline: None,
            stats,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ElectionState {
        self.state
    }

    /// Broadcast a probe and arm the election window
    pub(crate) fn begin_election(&mut self) {
        self.state = ElectionState::AwaitingResponses;
        self.deadline = Some(Instant::now() + self.config.window());
        self.stats.elections += 1;

        debug!(
            instance_id = %self.id,
            channel = %self.channel.channel(),
            generation = self.stats.elections,
            "ElectionTask::begin_election: probing"
        );
        self.send(InstanceMessage::CheckPrimary { from: self.id });
        self.stats.probes_sent += 1;
    }

    /// Run until shutdown is requested, the handle goes away, or the channel closes
    ///
    /// Returns the final snapshot.
    pub(crate) async fn run(mut self, mut control_rx: mpsc::Receiver<ControlRequest>) -> ElectionSnapshot {
        info!(instance_id = %self.id, channel = %self.channel.channel(), "Election task started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                request = control_rx.recv() => match request {
                    Some(ControlRequest::Snapshot { reply_tx }) => {
                        let _ = reply_tx.send(self.snapshot(true));
                    }
                    Some(ControlRequest::Shutdown) | None => break,
                },

                received = self.channel.recv() => match received {
                    Ok(message) => self.handle_message(message),
                    Err(e) => {
                        warn!(instance_id = %self.id, error = %e, "Channel failed, stopping election task");
                        break;
                    }
                },

                _ = wait_for_deadline(deadline) => self.on_window_elapsed(),
            }
        }

        self.finish()
    }

    pub(crate) fn handle_message(&mut self, message: InstanceMessage) {
        let peer = message.from();
        trace!(instance_id = %self.id, %peer, kind = message.kind(), state = %self.state, "Message received");

        match (self.state, message) {
            (ElectionState::Primary, InstanceMessage::CheckPrimary { .. }) => {
                self.send(InstanceMessage::PrimaryExists { from: self.id });
                self.stats.probes_answered += 1;
            }

            (ElectionState::Primary, InstanceMessage::PrimaryExists { .. }) => {
                warn!(instance_id = %self.id, %peer, "Another primary answered on this channel");
            }

            (ElectionState::AwaitingResponses, InstanceMessage::PrimaryExists { .. }) => {
                self.stats.responses_received += 1;
                self.settle(ElectionState::Secondary, "primary exists");
            }

            (ElectionState::AwaitingResponses, InstanceMessage::CheckPrimary { .. }) if self.config.tie_break => {
                // Let the prober know someone else is mid-election
                self.send(InstanceMessage::Candidate { from: self.id });
                self.observe_candidate(peer);
            }

            (ElectionState::AwaitingResponses, InstanceMessage::Candidate { .. }) if self.config.tie_break => {
                self.observe_candidate(peer);
            }

            (ElectionState::Secondary, InstanceMessage::PrimaryResigned { .. }) if self.config.rejoin_on_resign => {
                info!(instance_id = %self.id, %peer, "Primary resigned, starting new election");
                self.begin_election();
            }

            _ => {
                trace!(instance_id = %self.id, kind = message.kind(), state = %self.state, "Message ignored");
            }
        }
    }

    /// Lower id wins a simultaneous start
    fn observe_candidate(&mut self, peer: InstanceId) {
        self.stats.candidates_seen += 1;
        if peer < self.id {
            self.settle(ElectionState::Secondary, "lower-id candidate");
        }
    }

    pub(crate) fn on_window_elapsed(&mut self) {
        self.deadline = None;
        if self.state == ElectionState::AwaitingResponses {
            self.settle(ElectionState::Primary, "window elapsed with no primary");
        } else {
            debug!(instance_id = %self.id, state = %self.state, "Window elapsed after settling, ignored");
        }
    }

    fn settle(&mut self, state: ElectionState, reason: &str) {
        self.state = state;
        self.deadline = None;
        self.stats.settled_at = Some(Utc::now());
        let role = state.role();
        self.role_tx.send_replace(role);
        info!(
            instance_id = %self.id,
            channel = %self.channel.channel(),
            %role,
            reason,
            "Election settled"
        );
    }

    fn send(&self, message: InstanceMessage) {
        if let Err(e) = self.channel.publish(message) {
            warn!(instance_id = %self.id, kind = message.kind(), error = %e, "Failed to publish");
        }
    }

    fn snapshot(&self, running: bool) -> ElectionSnapshot {
        ElectionSnapshot {
            state: self.state,
            role: *self.role_tx.borrow(),
            running,
            ..self.stats.clone()
        }
    }

    /// Resign if primary, then close the channel
    fn finish(mut self) -> ElectionSnapshot {
        self.deadline = None;
        if self.state == ElectionState::Primary {
            debug!(instance_id = %self.id, "ElectionTask::finish: resigning primary");
            self.send(InstanceMessage::PrimaryResigned { from: self.id });
        }
        self.channel.close();
        let role = *self.role_tx.borrow();
        info!(instance_id = %self.id, %role, "Election task stopped");
        self.snapshot(false)
    }
}
