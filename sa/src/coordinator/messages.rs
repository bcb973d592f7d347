//! Role, state and control types for the Instance Coordinator

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::identity::InstanceId;

/// Role of an instance as seen by the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Election has not settled yet
    #[default]
    Unknown,
    Primary,
    Secondary,
}

impl Role {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Role::Unknown)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unknown => write!(f, "unknown"),
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

/// Internal election state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElectionState {
    Initializing,
    AwaitingResponses,
    Primary,
    Secondary,
}

impl ElectionState {
    /// Role this state settles on, if any
    pub fn role(&self) -> Role {
        match self {
            ElectionState::Primary => Role::Primary,
            ElectionState::Secondary => Role::Secondary,
            ElectionState::Initializing | ElectionState::AwaitingResponses => Role::Unknown,
        }
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Initializing => write!(f, "initializing"),
            ElectionState::AwaitingResponses => write!(f, "awaiting-responses"),
            ElectionState::Primary => write!(f, "primary"),
            ElectionState::Secondary => write!(f, "secondary"),
        }
    }
}

/// Point-in-time view of one coordinator, for observability
#[derive(Debug, Clone, Serialize)]
pub struct ElectionSnapshot {
    #[serde(rename = "instance-id")]
    pub instance_id: InstanceId,
    pub channel: String,
    pub state: ElectionState,
    /// Last settled role; kept through re-elections and after shutdown
    pub role: Role,
    pub running: bool,
    #[serde(rename = "created-at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "settled-at")]
    pub settled_at: Option<DateTime<Utc>>,
    /// Election generations run (more than one only with rejoin enabled)
    pub elections: u32,
    #[serde(rename = "probes-sent")]
    pub probes_sent: u64,
    #[serde(rename = "probes-answered")]
    pub probes_answered: u64,
    #[serde(rename = "responses-received")]
    pub responses_received: u64,
    #[serde(rename = "candidates-seen")]
    pub candidates_seen: u64,
}

impl ElectionSnapshot {
    /// Snapshot of a coordinator that never started an election
    pub fn initial(instance_id: InstanceId, channel: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            channel: channel.into(),
            state: ElectionState::Initializing,
            role: Role::Unknown,
            running: false,
            created_at,
            settled_at: None,
            elections: 0,
            probes_sent: 0,
            probes_answered: 0,
            responses_received: 0,
            candidates_seen: 0,
        }
    }
}

/// Requests from a coordinator handle to its election task
#[derive(Debug)]
pub(crate) enum ControlRequest {
    Snapshot {
        reply_tx: oneshot::Sender<ElectionSnapshot>,
    },
    Shutdown,
}
