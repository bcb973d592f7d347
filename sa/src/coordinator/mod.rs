//! Instance Coordinator
//!
//! Decides once per instance lifetime whether this instance is primary:
//! probe the channel, wait up to the election window for a `primary-exists`
//! answer, and default to primary if none comes. A primary keeps answering
//! probes until it shuts down.
//!
//! This is a timeout heuristic, not a consensus protocol. Ties between
//! instances that start inside each other's window are broken by instance
//! id when `tie-break` is on; message loss or a window shorter than delivery
//! latency can still yield zero or several primaries. A primary that dies
//! without `shutdown` is never replaced.

mod core;
mod handle;
mod messages;

pub use handle::InstanceCoordinator;
pub use messages::{ElectionSnapshot, ElectionState, Role};
