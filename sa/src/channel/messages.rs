//! Message vocabulary exchanged between instances

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::InstanceId;

/// Messages broadcast on an instance channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InstanceMessage {
    /// Probe: does a primary already exist?
    CheckPrimary { from: InstanceId },

    /// Answer from the primary
    PrimaryExists { from: InstanceId },

    /// An instance still inside its election window announces itself
    Candidate { from: InstanceId },

    /// The primary is shutting down gracefully
    PrimaryResigned { from: InstanceId },
}

impl InstanceMessage {
    /// Identity of the sending instance
    pub fn from(&self) -> InstanceId {
        match self {
            Self::CheckPrimary { from }
            | Self::PrimaryExists { from }
            | Self::Candidate { from }
            | Self::PrimaryResigned { from } => *from,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CheckPrimary { .. } => "check-primary",
            Self::PrimaryExists { .. } => "primary-exists",
            Self::Candidate { .. } => "candidate",
            Self::PrimaryResigned { .. } => "primary-resigned",
        }
    }
}

/// A message tagged with the handle that sent it
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub sender: Uuid,
    pub message: InstanceMessage,
}
