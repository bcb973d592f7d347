//! InstanceCoordinator - public interface for one application instance

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::core::ElectionTask;
use super::messages::{ControlRequest, ElectionSnapshot, Role};
use crate::channel::ChannelHub;
use crate::config::ElectionConfig;
use crate::error::CoordinationError;
use crate::identity::InstanceId;

const CONTROL_BUFFER: usize = 8;

enum Lifecycle {
    /// Constructed; the role sender waits here until the task takes it
    Idle { role_tx: watch::Sender<Role> },
    Running {
        control_tx: mpsc::Sender<ControlRequest>,
        task: JoinHandle<ElectionSnapshot>,
    },
    Stopped { last: Option<ElectionSnapshot> },
}

/// Decides whether this instance is the primary among its peers
///
/// Construct one per application entry point and pass it down; peers are
/// the coordinators opened on the same [`ChannelHub`] and channel name.
/// The election runs on a tokio task, so `initialize` needs a runtime.
pub struct InstanceCoordinator {
    id: InstanceId,
    config: ElectionConfig,
    hub: ChannelHub,
    created_at: DateTime<Utc>,
    role_rx: watch::Receiver<Role>,
    lifecycle: Mutex<Lifecycle>,
}

impl InstanceCoordinator {
    /// Create a coordinator; nothing is sent until `initialize`
    ///
    /// The id is allocated here, so tie-breaks favor the coordinator that
    /// was constructed first, even if it initializes later.
    pub fn new(hub: ChannelHub, config: ElectionConfig) -> Self {
        let id = InstanceId::generate();
        debug!(instance_id = %id, channel = %config.channel_name, "InstanceCoordinator::new: called");
        let (role_tx, role_rx) = watch::channel(Role::Unknown);
        Self {
            id,
            config,
            hub,
            created_at: Utc::now(),
            role_rx,
            lifecycle: Mutex::new(Lifecycle::Idle { role_tx }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start the election
    ///
    /// Subscribes to the channel, broadcasts the probe and arms the window.
    /// Idempotent; a no-op once running or after shutdown. On error the
    /// coordinator stays idle and may be initialized again.
    pub fn initialize(&self) -> Result<(), CoordinationError> {
        debug!(instance_id = %self.id, "InstanceCoordinator::initialize: called");
        let mut lifecycle = self.lifecycle();

        let role_tx = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped { last: None }) {
            Lifecycle::Idle { role_tx } => role_tx,
            other => {
                debug!(instance_id = %self.id, "InstanceCoordinator::initialize: already started");
                *lifecycle = other;
                return Ok(());
            }
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                *lifecycle = Lifecycle::Idle { role_tx };
                return Err(CoordinationError::UnsupportedEnvironment(format!("no tokio runtime: {}", e)));
            }
        };

        let channel = match self.hub.open(&self.config.channel_name) {
            Ok(channel) => channel,
            Err(e) => {
                *lifecycle = Lifecycle::Idle { role_tx };
                return Err(e);
            }
        };

        let mut task = ElectionTask::new(self.id, self.config.clone(), channel, role_tx, self.created_at);
        task.begin_election();

        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let task = runtime.spawn(task.run(control_rx));
        *lifecycle = Lifecycle::Running { control_tx, task };

        debug!(instance_id = %self.id, "InstanceCoordinator::initialize: election started");
        Ok(())
    }

    /// True only once this instance has settled as primary
    ///
    /// Not yet settled and settled secondary both read as false; use
    /// [`role`](Self::role) or [`settled`](Self::settled) to tell them apart.
    pub fn is_primary(&self) -> bool {
        *self.role_rx.borrow() == Role::Primary
    }

    /// Last settled role, or `Unknown`
    pub fn role(&self) -> Role {
        *self.role_rx.borrow()
    }

    /// Receiver that observes every role change
    pub fn watch_role(&self) -> watch::Receiver<Role> {
        self.role_rx.clone()
    }

    /// Wait until the election settles
    ///
    /// Resolves with `Unknown` if the coordinator stops before settling.
    pub async fn settled(&self) -> Role {
        let mut role_rx = self.role_rx.clone();
        let settled = match role_rx.wait_for(|role| role.is_settled()).await {
            Ok(role) => Some(*role),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| *role_rx.borrow())
    }

    /// Whether the election task is running
    pub fn is_running(&self) -> bool {
        matches!(&*self.lifecycle(), Lifecycle::Running { task, .. } if !task.is_finished())
    }

    /// Current snapshot; after shutdown, the final one
    ///
    /// Returns None only if the running task failed to answer.
    pub async fn snapshot(&self) -> Option<ElectionSnapshot> {
        let control_tx = match &*self.lifecycle() {
            Lifecycle::Running { control_tx, .. } => control_tx.clone(),
            Lifecycle::Stopped { last: Some(last) } => return Some(last.clone()),
            Lifecycle::Idle { .. } | Lifecycle::Stopped { last: None } => {
                return Some(ElectionSnapshot::initial(
                    self.id,
                    self.config.channel_name.clone(),
                    self.created_at,
                ));
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        control_tx.send(ControlRequest::Snapshot { reply_tx }).await.ok()?;
        reply_rx.await.ok()
    }

    /// Stop coordinating
    ///
    /// Safe from any state and idempotent. A primary announces its
    /// resignation before closing. The settled role is kept.
    pub async fn shutdown(&self) {
        debug!(instance_id = %self.id, "InstanceCoordinator::shutdown: called");
        let running = {
            let mut lifecycle = self.lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped { last: None }) {
                Lifecycle::Running { control_tx, task } => Some((control_tx, task)),
                Lifecycle::Idle { .. } => {
                    debug!(instance_id = %self.id, "InstanceCoordinator::shutdown: never initialized");
                    None
                }
                stopped @ Lifecycle::Stopped { .. } => {
                    *lifecycle = stopped;
                    None
                }
            }
        };

        let Some((control_tx, task)) = running else {
            return;
        };

        // The task also stops when the sender is dropped, so a full or
        // closed control channel is not an error here
        let _ = control_tx.send(ControlRequest::Shutdown).await;
        drop(control_tx);

        match task.await {
            Ok(snapshot) => {
                debug!(instance_id = %self.id, role = %snapshot.role, "InstanceCoordinator::shutdown: stopped");
                *self.lifecycle() = Lifecycle::Stopped { last: Some(snapshot) };
            }
            Err(e) => warn!(instance_id = %self.id, error = %e, "Election task ended abnormally"),
        }
    }
}

impl Drop for InstanceCoordinator {
    fn drop(&mut self) {
        if let Lifecycle::Running { task, .. } = &*self.lifecycle() {
            debug!(instance_id = %self.id, "InstanceCoordinator::drop: aborting election task");
            task.abort();
        }
    }
}
