//! Lifecycle notifications emitted by the event channel.
//!
//! These are broadcast alongside (not through) the topic handlers so that
//! session code can react to connectivity changes without touching the
//! reconcile path.

/// A connectivity change of an [`EventChannel`](crate::channel::EventChannel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// First successful handshake of this connect cycle.
    Connected,

    /// The live transport dropped; the channel is retrying.
    Disconnected,

    /// The transport is live again and every subscription was re-sent.
    Reconnected,

    /// The server refused the handshake. The channel stops retrying.
    Rejected { reason: String },

    /// The connection task exited (after `disconnect` or a rejection).
    Closed,
}
