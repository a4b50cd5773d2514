//! Board state container backed by a `tokio::sync::watch` channel.
//!
//! [`BoardStore`] is owned by the synchronization engine and is the only
//! thing that writes board collections. Every write swaps in freshly built
//! collections (never an in-place edit), so readers can compare `Arc`
//! pointers to find out what changed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use retroboard_core::envelope::EntityMessage;
use retroboard_core::models::{ActionItem, ColumnTitle, ColumnTopic, Thought};
use retroboard_core::reconcile;
use retroboard_core::types::{TeamId, Timestamp};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// SyncStatus
// ---------------------------------------------------------------------------

/// Where the board is in its load/sync lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// Snapshot requested, not yet applied.
    Loading,
    /// Snapshot applied and the event stream is live.
    Live,
    /// The event stream dropped; the last-known board is still shown.
    Reconnecting,
    /// The snapshot could not be fetched. Events may still apply.
    SnapshotFailed(String),
    /// The server refused the session (usually an expired token).
    Rejected(String),
    /// The board was unmounted.
    Closed,
}

// ---------------------------------------------------------------------------
// BoardState
// ---------------------------------------------------------------------------

/// One consistent view of a team board.
#[derive(Debug, Clone, Default)]
pub struct BoardState {
    pub team_id: Option<TeamId>,
    pub thoughts: Arc<Vec<Thought>>,
    pub action_items: Arc<Vec<ActionItem>>,
    pub column_titles: Arc<Vec<ColumnTitle>>,
    pub status: SyncStatus,
    /// Bumped on every write.
    pub revision: u64,
    pub updated_at: Option<Timestamp>,
}

impl BoardState {
    /// Thoughts posted to one column, in collection order.
    pub fn thoughts_in(&self, topic: ColumnTopic) -> Vec<&Thought> {
        self.thoughts.iter().filter(|t| t.topic == topic).collect()
    }

    pub fn discussed_count(&self, topic: ColumnTopic) -> usize {
        self.thoughts
            .iter()
            .filter(|t| t.topic == topic && t.discussed)
            .count()
    }

    /// Action items not yet completed.
    pub fn open_action_items(&self) -> Vec<&ActionItem> {
        self.action_items.iter().filter(|a| !a.completed).collect()
    }

    pub fn column_title(&self, topic: ColumnTopic) -> Option<&ColumnTitle> {
        self.column_titles.iter().find(|c| c.topic == topic)
    }
}

/// Full initial load of a board, as returned by the REST endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    pub thoughts: Vec<Thought>,
    pub action_items: Vec<ActionItem>,
    pub column_titles: Vec<ColumnTitle>,
}

// ---------------------------------------------------------------------------
// BoardStore
// ---------------------------------------------------------------------------

/// A live change recorded while a snapshot fetch is in flight.
#[derive(Debug, Clone)]
enum Change {
    Thought(EntityMessage<Thought>),
    ActionItem(EntityMessage<ActionItem>),
    ColumnTitle(EntityMessage<ColumnTitle>),
    EndRetro,
}

impl Change {
    fn apply_to(&self, state: &mut BoardState) {
        match self {
            Change::Thought(message) => {
                state.thoughts = Arc::new(reconcile::reconcile(state.thoughts.as_slice(), message));
            }
            Change::ActionItem(message) => {
                state.action_items =
                    Arc::new(reconcile::reconcile(state.action_items.as_slice(), message));
            }
            Change::ColumnTitle(message) => {
                state.column_titles = Arc::new(reconcile::reconcile_column_titles(
                    state.column_titles.as_slice(),
                    message,
                ));
            }
            Change::EndRetro => {
                let ended =
                    reconcile::end_retro(state.thoughts.as_slice(), state.action_items.as_slice());
                state.thoughts = Arc::new(ended.thoughts);
                state.action_items = Arc::new(ended.action_items);
            }
        }
    }
}

/// Single-writer, multi-reader board store.
///
/// Designed to be shared via `Arc<BoardStore>` between the snapshot loader
/// and the event channel handlers. Writes are synchronous and never await,
/// so a handler finishes its update before the next message is processed.
///
/// Between [`begin_snapshot`](Self::begin_snapshot) and
/// [`load_snapshot`](Self::load_snapshot) every applied change is also
/// recorded, then replayed on top of the fetched collections so that events
/// delivered while the fetch was in flight are not lost.
pub struct BoardStore {
    sender: watch::Sender<BoardState>,
    /// `Some` while a snapshot fetch is in flight.
    in_flight: Mutex<Option<Vec<Change>>>,
}

impl BoardStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(BoardState::default());
        Self {
            sender,
            in_flight: Mutex::new(None),
        }
    }

    /// Read-only handle for presentation code.
    pub fn view(&self) -> BoardView {
        BoardView {
            receiver: self.sender.subscribe(),
        }
    }

    /// Raw change feed. Each notification carries a fully-formed state.
    pub fn subscribe(&self) -> watch::Receiver<BoardState> {
        self.sender.subscribe()
    }

    /// Clone of the current state.
    pub fn current(&self) -> BoardState {
        self.sender.borrow().clone()
    }

    /// Point the store at `team_id` and mark it loading.
    ///
    /// Switching to a different team drops the previous team's collections;
    /// remounting the same team keeps them on screen until the snapshot lands.
    pub fn begin(&self, team_id: &str) {
        *self.lock_in_flight() = None;
        self.write(|state| {
            if state.team_id.as_deref() != Some(team_id) {
                state.thoughts = Arc::default();
                state.action_items = Arc::default();
                state.column_titles = Arc::default();
                state.team_id = Some(team_id.to_string());
            }
            state.status = SyncStatus::Loading;
        });
    }

    /// Start recording applied changes for replay onto the next snapshot.
    pub fn begin_snapshot(&self) {
        *self.lock_in_flight() = Some(Vec::new());
    }

    /// Stop recording without applying anything; the fetch failed.
    pub fn abandon_snapshot(&self) {
        *self.lock_in_flight() = None;
    }

    /// Replace all three collections with a fresh snapshot in one update.
    ///
    /// Changes recorded since [`begin_snapshot`](Self::begin_snapshot) are
    /// reapplied on top, in arrival order, within the same update.
    pub fn load_snapshot(&self, snapshot: BoardSnapshot) {
        let mut in_flight = self.lock_in_flight();
        let replay = in_flight.take().unwrap_or_default();
        tracing::debug!(
            thoughts = snapshot.thoughts.len(),
            action_items = snapshot.action_items.len(),
            column_titles = snapshot.column_titles.len(),
            replayed = replay.len(),
            "Applying board snapshot",
        );
        self.write(|state| {
            state.thoughts = Arc::new(snapshot.thoughts);
            state.action_items = Arc::new(snapshot.action_items);
            state.column_titles = Arc::new(snapshot.column_titles);
            for change in &replay {
                change.apply_to(state);
            }
        });
    }

    pub fn apply_thought(&self, message: &EntityMessage<Thought>) {
        self.apply(Change::Thought(message.clone()));
    }

    pub fn apply_action_item(&self, message: &EntityMessage<ActionItem>) {
        self.apply(Change::ActionItem(message.clone()));
    }

    pub fn apply_column_title(&self, message: &EntityMessage<ColumnTitle>) {
        self.apply(Change::ColumnTitle(message.clone()));
    }

    /// Clear thoughts and completed action items as a single published change.
    pub fn apply_end_retro(&self) {
        {
            let state = self.sender.borrow();
            tracing::info!(
                cleared_thoughts = state.thoughts.len(),
                carried_action_items = state.open_action_items().len(),
                "Retro ended",
            );
        }
        self.apply(Change::EndRetro);
    }

    pub fn set_status(&self, status: SyncStatus) {
        self.write(|state| state.status = status);
    }

    // ---- private helpers ----

    /// Lock order is `in_flight`, then the watch channel.
    fn apply(&self, change: Change) {
        let mut in_flight = self.lock_in_flight();
        self.write(|state| change.apply_to(state));
        if let Some(log) = in_flight.as_mut() {
            log.push(change);
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<Vec<Change>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, update: impl FnOnce(&mut BoardState)) {
        self.sender.send_modify(|state| {
            update(state);
            state.revision += 1;
            state.updated_at = Some(Utc::now());
        });
    }
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// BoardView
// ---------------------------------------------------------------------------

/// Read-only access to a [`BoardStore`].
///
/// Cheap to clone; every clone tracks changes independently.
#[derive(Clone)]
pub struct BoardView {
    receiver: watch::Receiver<BoardState>,
}

impl BoardView {
    pub fn current(&self) -> BoardState {
        self.receiver.borrow().clone()
    }

    pub fn thoughts(&self) -> Arc<Vec<Thought>> {
        Arc::clone(&self.receiver.borrow().thoughts)
    }

    pub fn action_items(&self) -> Arc<Vec<ActionItem>> {
        Arc::clone(&self.receiver.borrow().action_items)
    }

    pub fn column_titles(&self) -> Arc<Vec<ColumnTitle>> {
        Arc::clone(&self.receiver.borrow().column_titles)
    }

    pub fn status(&self) -> SyncStatus {
        self.receiver.borrow().status.clone()
    }

    /// Wait for the next change and return the new state.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<BoardState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the state satisfies `predicate`, which may already be true.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&BoardState) -> bool,
    ) -> Option<BoardState> {
        self.receiver
            .wait_for(predicate)
            .await
            .ok()
            .map(|state| (*state).clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
