//! Retro board domain: entities, event addressing, the inbound envelope,
//! and the pure reconcilers that fold change notifications into board
//! collections.

pub mod envelope;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod topics;
pub mod types;

pub use envelope::{EntityMessage, Envelope, MessageKind};
pub use error::MessageError;
pub use models::{ActionItem, ColumnTitle, ColumnTopic, Entity, Thought};
pub use topics::EventTopic;
