//! Channel Hub - named fan-out buses shared by instances
//!
//! Each channel name maps to one tokio broadcast channel. A channel is
//! created by the first `open` and dropped from the hub when its last handle
//! closes. Delivery is best-effort: late joiners see nothing sent before they
//! opened, and a receiver that falls more than `capacity` messages behind
//! skips the overflow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::messages::{Envelope, InstanceMessage};
use crate::config::HubConfig;
use crate::error::CoordinationError;

/// Default per-channel capacity (messages)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

type Registry = HashMap<String, broadcast::Sender<Envelope>>;

fn closed(channel: &str) -> CoordinationError {
    CoordinationError::ChannelClosed {
        channel: channel.to_string(),
    }
}

/// Registry of named broadcast channels
///
/// Cheap to clone; clones share the same channels. Construct one per
/// application (or per test) and hand it to every coordinator that should
/// see the others.
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl ChannelHub {
    /// Create a hub whose channels buffer `capacity` messages
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "ChannelHub::new: creating hub");
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            // broadcast::channel panics on zero
            capacity: capacity.max(1),
        }
    }

    /// Create a hub with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a hub from the `hub` config section
    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    /// Per-channel buffer size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or attach to the channel with the given name
    pub fn open(&self, channel_name: &str) -> Result<ChannelHandle, CoordinationError> {
        debug!(%channel_name, "ChannelHub::open: called");
        if channel_name.trim().is_empty() {
            return Err(CoordinationError::InvalidChannelName(channel_name.to_string()));
        }

        // Subscribe under the lock so a concurrent release cannot drop the
        // entry between lookup and subscribe
        let (tx, rx) = {
            let mut channels = self.registry();
            let tx = channels
                .entry(channel_name.to_string())
                .or_insert_with(|| {
                    debug!(%channel_name, "ChannelHub::open: creating channel");
                    broadcast::channel(self.capacity).0
                })
                .clone();
            let rx = tx.subscribe();
            (tx, rx)
        };

        let handle = ChannelHandle {
            id: Uuid::now_v7(),
            channel: channel_name.to_string(),
            tx,
            rx: Some(rx),
            hub: self.clone(),
        };
        debug!(handle_id = %handle.id, %channel_name, "ChannelHub::open: handle opened");
        Ok(handle)
    }

    /// Drop the channel if no handle is listening anymore
    fn release(&self, channel_name: &str) {
        let mut channels = self.registry();
        if let Some(tx) = channels.get(channel_name)
            && tx.receiver_count() == 0
        {
            channels.remove(channel_name);
            debug!(%channel_name, "ChannelHub::release: channel torn down");
        }
    }

    /// Number of live channels
    pub fn channel_count(&self) -> usize {
        self.registry().len()
    }

    /// Number of open handles on a channel
    pub fn subscriber_count(&self, channel_name: &str) -> usize {
        self.registry()
            .get(channel_name)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// One instance's attachment to a channel
pub struct ChannelHandle {
    id: Uuid,
    channel: String,
    tx: broadcast::Sender<Envelope>,
    /// None once closed
    rx: Option<broadcast::Receiver<Envelope>>,
    hub: ChannelHub,
}

impl ChannelHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    /// Send a message to every other open handle on this channel
    pub fn publish(&self, message: InstanceMessage) -> Result<(), CoordinationError> {
        if self.is_closed() {
            return Err(closed(&self.channel));
        }
        trace!(handle_id = %self.id, kind = message.kind(), "ChannelHandle::publish");
        // Our own receiver keeps the channel alive, so this only fails if
        // nobody at all is listening, which is fine
        let _ = self.tx.send(Envelope {
            sender: self.id,
            message,
        });
        Ok(())
    }

    /// Wait for the next message from another handle
    pub async fn recv(&mut self) -> Result<InstanceMessage, CoordinationError> {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return Err(closed(&self.channel));
            };
            match rx.recv().await {
                Ok(envelope) if envelope.sender == self.id => continue,
                Ok(envelope) => return Ok(envelope.message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(handle_id = %self.id, channel = %self.channel, skipped, "Receiver lagged, messages dropped");
                }
                Err(RecvError::Closed) => return Err(closed(&self.channel)),
            }
        }
    }

    /// Deliver incoming messages to a callback on a background task
    ///
    /// The callback runs once per message, in delivery order. The handle
    /// moves into the task and is closed when the subscription closes.
    pub fn subscribe<F>(mut self, mut on_message: F) -> Result<Subscription, CoordinationError>
    where
        F: FnMut(InstanceMessage) + Send + 'static,
    {
        debug!(handle_id = %self.id, channel = %self.channel, "ChannelHandle::subscribe: called");
        if self.is_closed() {
            return Err(closed(&self.channel));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoordinationError::UnsupportedEnvironment(e.to_string()))?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let id = self.id;
        let channel = self.channel.clone();
        let tx = self.tx.clone();

        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    received = self.recv() => match received {
                        Ok(message) => on_message(message),
                        Err(_) => break,
                    },
                }
            }
            self.close();
        });

        Ok(Subscription {
            id,
            channel,
            tx,
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Unsubscribe; idempotent
    pub fn close(&mut self) {
        if let Some(rx) = self.rx.take() {
            drop(rx);
            self.hub.release(&self.channel);
            debug!(handle_id = %self.id, channel = %self.channel, "ChannelHandle::close: closed");
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Callback subscription created by [`ChannelHandle::subscribe`]
///
/// Dropping it stops delivery as well; `close` additionally waits for the
/// delivery task to finish.
pub struct Subscription {
    id: Uuid,
    channel: String,
    tx: broadcast::Sender<Envelope>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Publish through the subscribed handle
    pub fn publish(&self, message: InstanceMessage) -> Result<(), CoordinationError> {
        if self.stop_tx.is_none() || self.task.as_ref().is_some_and(|t| t.is_finished()) {
            return Err(closed(&self.channel));
        }
        let _ = self.tx.send(Envelope {
            sender: self.id,
            message,
        });
        Ok(())
    }

    /// Stop delivery and wait for the handle to close
    pub async fn close(mut self) {
        debug!(handle_id = %self.id, channel = %self.channel, "Subscription::close: called");
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(handle_id = %self.id, error = %e, "Subscription task ended abnormally");
        }
    }
}
