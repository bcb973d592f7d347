//! singleapp - one primary among many application instances
//!
//! Instances of the same application share a named broadcast channel. Each
//! new instance asks the channel whether a primary already exists and, if
//! nobody answers within a short election window, takes the primary role
//! itself. The primary answers every later probe until it shuts down.
//!
//! # Modules
//!
//! - [`channel`] - named fan-out buses ([`ChannelHub`], [`ChannelHandle`])
//! - [`coordinator`] - the election itself ([`InstanceCoordinator`])
//! - [`consumer`] - binding a coordinator to an application lifetime
//! - [`host_lock`] - file-lock exclusivity across processes
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface for the `sa` demo binary
//!
//! # Usage
//!
//! ```rust,ignore
//! use singleapp::{ChannelHub, ElectionConfig, InstanceCoordinator};
//!
//! let hub = ChannelHub::default();
//! let coordinator = InstanceCoordinator::new(hub.clone(), ElectionConfig::for_channel("app-x"));
//! coordinator.initialize()?;
//!
//! if coordinator.settled().await.is_settled() && !coordinator.is_primary() {
//!     println!("Another instance is already running");
//! }
//! coordinator.shutdown().await;
//! ```

pub mod channel;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod host_lock;
pub mod identity;

// Re-export commonly used types
pub use channel::{ChannelHandle, ChannelHub, InstanceMessage, Subscription};
pub use config::{Config, ConsumerConfig, ElectionConfig, HostLockConfig, HubConfig};
pub use consumer::{AppInstance, InstanceStatus};
pub use coordinator::{ElectionSnapshot, ElectionState, InstanceCoordinator, Role};
pub use error::CoordinationError;
pub use host_lock::HostLock;
pub use identity::InstanceId;
