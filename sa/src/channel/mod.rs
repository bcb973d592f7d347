//! Broadcast channel transport
//!
//! An unordered, best-effort, fan-out bus scoped by channel name. Any handle
//! can publish; every other open handle on the same name receives it. There is
//! no replay for handles that open later.
//!
//! ```text
//!                                         ┌──> handle B
//!   handle A ── publish ──> hub["app-x"] ─┤
//!                                         └──> handle C
//! ```
//!
//! A never receives its own messages.

mod bus;
mod messages;

pub use bus::{ChannelHandle, ChannelHub, DEFAULT_CHANNEL_CAPACITY, Subscription};
pub use messages::InstanceMessage;
