//! Initial board load.

use std::sync::Arc;

use retroboard_store::{BoardSnapshot, BoardStore, SyncStatus};

use crate::api::{ApiError, BoardApi};

/// Fetches a team's full board and writes it to the store.
pub struct SnapshotLoader {
    api: BoardApi,
    store: Arc<BoardStore>,
}

impl SnapshotLoader {
    pub fn new(api: BoardApi, store: Arc<BoardStore>) -> Self {
        Self { api, store }
    }

    /// Fetch thoughts, action items and column titles concurrently.
    pub async fn fetch(&self, team_id: &str) -> Result<BoardSnapshot, ApiError> {
        let (thoughts, action_items, column_titles) = tokio::try_join!(
            self.api.get_thoughts(team_id),
            self.api.get_action_items(team_id),
            self.api.get_column_titles(team_id),
        )?;
        Ok(BoardSnapshot {
            thoughts,
            action_items,
            column_titles,
        })
    }

    /// Fetch and apply a snapshot as one store update.
    ///
    /// Changes the store applies while the fetch is in flight are replayed
    /// on top of the snapshot. On failure the current collections are left
    /// untouched and the status becomes [`SyncStatus::SnapshotFailed`].
    pub async fn load(&self, team_id: &str) -> Result<(), ApiError> {
        self.store.begin_snapshot();
        match self.fetch(team_id).await {
            Ok(snapshot) => {
                tracing::info!(
                    team_id,
                    thoughts = snapshot.thoughts.len(),
                    action_items = snapshot.action_items.len(),
                    "Board snapshot loaded",
                );
                self.store.load_snapshot(snapshot);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(team_id, error = %e, "Board snapshot failed");
                self.store.abandon_snapshot();
                self.store
                    .set_status(SyncStatus::SnapshotFailed(e.to_string()));
                Err(e)
            }
        }
    }
}
