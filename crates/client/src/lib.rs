//! Real-time sync engine for retro boards.
//!
//! Loads a team board over REST, then keeps it current from the team's
//! STOMP-over-WebSocket event stream. Topic handlers decode envelopes and
//! apply the pure reconcilers from `retroboard-core` to a
//! [`BoardStore`](retroboard_store::BoardStore).

pub mod api;
pub mod auth;
pub mod channel;
pub mod client;
pub mod config;
pub mod events;
mod processor;
pub mod reconnect;
pub mod session;
pub mod snapshot;
pub mod stomp;

pub use api::{ApiError, BoardApi};
pub use auth::{StaticToken, TokenProvider};
pub use channel::{ChannelError, EventChannel, Handler, SubscriptionId};
pub use client::{ClientError, RetroClient};
pub use config::{ConfigError, SyncConfig};
pub use events::ChannelEvent;
pub use reconnect::ReconnectConfig;
pub use session::{BoardSession, SessionError};
pub use snapshot::SnapshotLoader;
