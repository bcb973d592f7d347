//! Coordination error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while coordinating instances
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Broadcast coordination unavailable: {0}")]
    UnsupportedEnvironment(String),

    #[error("Channel '{channel}' is closed")]
    ChannelClosed { channel: String },

    #[error("Invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("Lock file {} could not be used", path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoordinationError {
    /// Check if this error means coordination cannot happen at all
    ///
    /// Callers typically fall back to an assumed role in this case.
    pub fn is_fatal_to_coordination(&self) -> bool {
        matches!(
            self,
            CoordinationError::UnsupportedEnvironment(_) | CoordinationError::InvalidChannelName(_)
        )
    }
}
