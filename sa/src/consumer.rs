//! Consumer integration
//!
//! Ties a coordinator to an application's lifetime: mount starts the
//! election, unmount shuts it down. When coordination cannot start, the
//! configured fallback role is assumed instead of failing the application.

use std::fmt;

use tracing::{debug, warn};

use crate::channel::ChannelHub;
use crate::config::Config;
use crate::coordinator::{InstanceCoordinator, Role};

/// What the application should present right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// Election still running
    Pending,
    Primary,
    Secondary,
    /// Coordination failed; the fallback role is in effect
    Uncoordinated(Role),
}

impl InstanceStatus {
    /// Whether the app should show the "another instance is running" warning
    pub fn shows_warning(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Secondary | InstanceStatus::Uncoordinated(Role::Secondary)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Primary => write!(f, "primary"),
            InstanceStatus::Secondary => write!(f, "secondary"),
            InstanceStatus::Uncoordinated(role) => write!(f, "uncoordinated ({})", role),
        }
    }
}

/// One mounted application instance
pub struct AppInstance {
    coordinator: InstanceCoordinator,
    /// Set when initialize failed
    fallback: Option<Role>,
}

impl AppInstance {
    /// Construct the coordinator and start the election
    pub fn mount(hub: ChannelHub, config: &Config) -> Self {
        let coordinator = InstanceCoordinator::new(hub, config.election.clone());
        debug!(instance_id = %coordinator.id(), "AppInstance::mount: called");

        let fallback = match coordinator.initialize() {
            Ok(()) => None,
            Err(e) => {
                let role = config.consumer.fallback_role;
                warn!(
                    instance_id = %coordinator.id(),
                    error = %e,
                    fallback = %role,
                    "Coordination unavailable, assuming fallback role"
                );
                Some(role)
            }
        };

        Self { coordinator, fallback }
    }

    pub fn coordinator(&self) -> &InstanceCoordinator {
        &self.coordinator
    }

    pub fn is_coordinated(&self) -> bool {
        self.fallback.is_none()
    }

    pub fn is_primary(&self) -> bool {
        match self.fallback {
            Some(role) => role == Role::Primary,
            None => self.coordinator.is_primary(),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        if let Some(role) = self.fallback {
            return InstanceStatus::Uncoordinated(role);
        }
        match self.coordinator.role() {
            Role::Unknown => InstanceStatus::Pending,
            Role::Primary => InstanceStatus::Primary,
            Role::Secondary => InstanceStatus::Secondary,
        }
    }

    /// Wait for the election, or return the fallback immediately
    pub async fn settled(&self) -> InstanceStatus {
        if self.fallback.is_none() {
            self.coordinator.settled().await;
        }
        self.status()
    }

    /// Notice text for the current status
    pub fn banner(&self) -> &'static str {
        if self.status().shows_warning() {
            "Warning: another instance is already running. This is a secondary instance; \
             please close it and use the primary instance."
        } else {
            "This is the primary instance. Only one instance can be primary at a time."
        }
    }

    /// Shut the coordinator down
    pub async fn unmount(self) {
        debug!(instance_id = %self.coordinator.id(), "AppInstance::unmount: called");
        self.coordinator.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(channel: &str) -> Config {
        let mut config = Config::default();
        config.election.channel_name = channel.to_string();
        config
    }

    #[test]
    fn test_mount_without_runtime_uses_fallback() {
        let app = AppInstance::mount(ChannelHub::new(8), &config_for("app-x"));
        assert!(!app.is_coordinated());
        assert!(app.is_primary());
        assert_eq!(app.status(), InstanceStatus::Uncoordinated(Role::Primary));
        assert!(app.banner().starts_with("This is the primary"));
    }

    #[test]
    fn test_secondary_fallback_shows_warning() {
        let mut config = config_for("app-x");
        config.consumer.fallback_role = Role::Secondary;
        let app = AppInstance::mount(ChannelHub::new(8), &config);
        assert!(!app.is_primary());
        assert!(app.status().shows_warning());
        assert!(app.banner().starts_with("Warning"));
    }

    #[tokio::test]
    async fn test_invalid_channel_uses_fallback() {
        let app = AppInstance::mount(ChannelHub::new(8), &config_for(" "));
        assert_eq!(app.settled().await, InstanceStatus::Uncoordinated(Role::Primary));
        app.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_moves_from_pending_to_primary() {
        let app = AppInstance::mount(ChannelHub::new(8), &config_for("app-x"));
        assert_eq!(app.status(), InstanceStatus::Pending);
        assert!(!app.is_primary());

        assert_eq!(app.settled().await, InstanceStatus::Primary);
        assert!(app.is_primary());
        assert!(!app.status().shows_warning());
        app.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_mount_is_secondary() {
        let hub = ChannelHub::new(8);
        let config = config_for("app-x");
        let first = AppInstance::mount(hub.clone(), &config);
        first.settled().await;

        let second = AppInstance::mount(hub.clone(), &config);
        assert_eq!(second.settled().await, InstanceStatus::Secondary);
        assert!(second.banner().starts_with("Warning"));

        second.unmount().await;
        first.unmount().await;
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(InstanceStatus::Pending.to_string(), "pending");
        assert_eq!(
            InstanceStatus::Uncoordinated(Role::Secondary).to_string(),
            "uncoordinated (secondary)"
        );
    }
}
