//! Observable in-memory entity stores for a retro board.
//!
//! - [`BoardStore`]: the single writer-owned slot holding thoughts,
//!   action items and column titles, published through
//!   `tokio::sync::watch` so every change is seen as one consistent value.
//! - [`BoardView`]: the read-only handle handed to presentation code.
//! - [`BoardState`]: the value readers observe.

pub mod store;

pub use store::{BoardSnapshot, BoardState, BoardStore, BoardView, SyncStatus};
