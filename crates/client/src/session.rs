//! Board view mount/unmount lifecycle.
//!
//! [`BoardSession`] ties the three moving parts together for one team:
//! snapshot first, then the event channel, then the four topic handlers
//! that feed decoded messages into the [`BoardStore`]. A background
//! watcher turns channel lifecycle events into store status changes.

use std::sync::Arc;

use retroboard_core::envelope::{EntityMessage, Envelope, MessageKind};
use retroboard_core::topics::EventTopic;
use retroboard_store::{BoardStore, BoardView, SyncStatus};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, BoardApi};
use crate::auth::TokenProvider;
use crate::channel::{ChannelError, EventChannel};
use crate::client::RetroClient;
use crate::config::SyncConfig;
use crate::events::ChannelEvent;
use crate::snapshot::SnapshotLoader;

/// Owns the store and channel for whichever team board is mounted.
pub struct BoardSession {
    store: Arc<BoardStore>,
    channel: Arc<EventChannel>,
    loader: Arc<SnapshotLoader>,
    resnapshot_on_reconnect: bool,
    mounted: Mutex<Option<Mounted>>,
}

struct Mounted {
    team_id: String,
    watcher: JoinHandle<()>,
    cancel: CancellationToken,
}

impl BoardSession {
    /// Build a session with its own store, REST client and event channel.
    pub fn new(config: &SyncConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, SessionError> {
        let store = Arc::new(BoardStore::new());
        let api = BoardApi::new(&config.api_url, Arc::clone(&tokens), config.request_timeout)?;
        let client = RetroClient::new(config.ws_url.clone(), tokens);
        let channel = EventChannel::new(client, config.reconnect.clone());

        Ok(Self::from_parts(
            Arc::clone(&store),
            Arc::new(channel),
            SnapshotLoader::new(api, store),
            config.resnapshot_on_reconnect,
        ))
    }

    pub fn from_parts(
        store: Arc<BoardStore>,
        channel: Arc<EventChannel>,
        loader: SnapshotLoader,
        resnapshot_on_reconnect: bool,
    ) -> Self {
        Self {
            store,
            channel,
            loader: Arc::new(loader),
            resnapshot_on_reconnect,
            mounted: Mutex::new(None),
        }
    }

    /// Read-only handle on the board.
    pub fn view(&self) -> BoardView {
        self.store.view()
    }

    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.channel
    }

    /// Team currently mounted, if any.
    pub async fn team_id(&self) -> Option<String> {
        self.mounted.lock().await.as_ref().map(|m| m.team_id.clone())
    }

    /// Mount the board for `team_id`.
    ///
    /// Loads the snapshot, connects the channel and registers the four
    /// topic handlers. Mounting while another board is mounted tears that
    /// one down first. A failed snapshot does not abort the mount; the
    /// status shows it and live events still apply. A rejected token does.
    pub async fn mount(&self, team_id: &str) -> Result<(), SessionError> {
        let mut mounted = self.mounted.lock().await;
        if let Some(previous) = mounted.take() {
            tracing::info!(team_id = %previous.team_id, "Remounting, tearing down previous board");
            self.teardown(previous).await;
        }

        tracing::info!(team_id, "Mounting board");
        self.store.begin(team_id);

        let snapshot_ok = match self.loader.load(team_id).await {
            Ok(()) => true,
            Err(e) if e.is_unauthorized() => {
                self.store.set_status(SyncStatus::Rejected(e.to_string()));
                return Err(SessionError::Unauthorized(e));
            }
            Err(_) => false,
        };

        // Listen before connecting so the first lifecycle event is not missed.
        let events = self.channel.events();
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_lifecycle(
            events,
            Arc::clone(&self.store),
            Arc::clone(&self.loader),
            team_id.to_string(),
            self.resnapshot_on_reconnect,
            cancel.clone(),
        ));
        *mounted = Some(Mounted {
            team_id: team_id.to_string(),
            watcher,
            cancel,
        });

        let store = Arc::clone(&self.store);
        self.channel
            .connect(move || {
                if snapshot_ok {
                    store.set_status(SyncStatus::Live);
                }
            })
            .await;

        self.subscribe_all(team_id).await?;
        Ok(())
    }

    /// Disconnect and stop reacting to channel events.
    ///
    /// The last board stays readable; its status becomes `Closed`.
    pub async fn unmount(&self) {
        let Some(mounted) = self.mounted.lock().await.take() else {
            return;
        };
        tracing::info!(team_id = %mounted.team_id, "Unmounting board");
        self.teardown(mounted).await;
        self.store.set_status(SyncStatus::Closed);
    }

    // ---- private helpers ----

    async fn teardown(&self, mounted: Mounted) {
        mounted.cancel.cancel();
        if let Err(e) = mounted.watcher.await {
            tracing::warn!(error = %e, "Lifecycle watcher ended abnormally");
        }
        self.channel.disconnect().await;
    }

    async fn subscribe_all(&self, team_id: &str) -> Result<(), SessionError> {
        for topic in EventTopic::ALL {
            let handler = match topic {
                EventTopic::Thoughts => {
                    entity_handler(Arc::clone(&self.store), BoardStore::apply_thought)
                }
                EventTopic::ActionItems => {
                    entity_handler(Arc::clone(&self.store), BoardStore::apply_action_item)
                }
                EventTopic::ColumnTitles => {
                    entity_handler(Arc::clone(&self.store), BoardStore::apply_column_title)
                }
                EventTopic::EndRetro => end_retro_handler(Arc::clone(&self.store)),
            };
            self.channel.subscribe(topic, team_id, handler).await?;
        }
        Ok(())
    }
}

type BoxedHandler = Box<dyn Fn(Envelope) + Send + Sync>;

/// Decode the envelope as `T` and hand it to `apply`. Payloads that do not
/// decode are logged and dropped.
fn entity_handler<T, F>(store: Arc<BoardStore>, apply: F) -> BoxedHandler
where
    T: DeserializeOwned + 'static,
    F: Fn(&BoardStore, &EntityMessage<T>) + Send + Sync + 'static,
{
    Box::new(move |envelope: Envelope| match envelope.decode::<T>() {
        Ok(message) => apply(&store, &message),
        Err(e) => tracing::warn!(
            error = %e,
            payload = %envelope.payload,
            "Dropping undecodable board change",
        ),
    })
}

fn end_retro_handler(store: Arc<BoardStore>) -> BoxedHandler {
    Box::new(move |envelope: Envelope| match envelope.kind {
        MessageKind::Put => store.apply_end_retro(),
        MessageKind::Delete => tracing::debug!("Ignoring end-retro delete"),
    })
}

/// Map channel lifecycle events onto the store status until cancelled.
async fn watch_lifecycle(
    mut events: broadcast::Receiver<ChannelEvent>,
    store: Arc<BoardStore>,
    loader: Arc<SnapshotLoader>,
    team_id: String,
    resnapshot_on_reconnect: bool,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(ChannelEvent::Connected) => {
                tracing::debug!(team_id = %team_id, "Event channel connected");
            }
            Ok(ChannelEvent::Disconnected) => {
                store.set_status(SyncStatus::Reconnecting);
            }
            Ok(ChannelEvent::Reconnected) => {
                if !resnapshot_on_reconnect {
                    store.set_status(SyncStatus::Live);
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = loader.load(&team_id) => {
                        if result.is_ok() {
                            store.set_status(SyncStatus::Live);
                        }
                    }
                }
            }
            Ok(ChannelEvent::Rejected { reason }) => {
                store.set_status(SyncStatus::Rejected(reason));
            }
            Ok(ChannelEvent::Closed) => {
                tracing::debug!(team_id = %team_id, "Event channel closed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Lifecycle watcher lagged behind channel events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Errors returned by [`BoardSession`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The REST client could not be built.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The board API refused the token during the snapshot.
    #[error("Board API refused the session: {0}")]
    Unauthorized(#[source] ApiError),

    /// The channel stopped before the subscriptions were registered,
    /// typically because the handshake was rejected.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use retroboard_core::models::{ActionItem, ColumnTopic, Thought};
    use serde_json::json;

    use super::*;

    fn thought(id: i64, hearts: u32) -> Thought {
        Thought {
            id,
            message: format!("thought {id}"),
            hearts,
            discussed: false,
            topic: ColumnTopic::Positive,
            board_id: None,
        }
    }

    #[test]
    fn entity_handler_applies_decoded_puts() {
        let store = Arc::new(BoardStore::new());
        let handler = entity_handler(Arc::clone(&store), BoardStore::apply_thought);

        handler(Envelope::put(serde_json::to_value(thought(1, 0)).unwrap()));
        handler(Envelope::put(serde_json::to_value(thought(1, 3)).unwrap()));

        assert_eq!(store.current().thoughts.as_slice(), &[thought(1, 3)]);
    }

    #[test]
    fn entity_handler_drops_undecodable_payloads() {
        let store = Arc::new(BoardStore::new());
        let handler = entity_handler(Arc::clone(&store), BoardStore::apply_thought);
        let before = store.current().revision;

        handler(Envelope::put(json!({ "message": "no id" })));
        handler(Envelope::put(serde_json::Value::Null));

        assert_eq!(store.current().revision, before);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn undecodable_payload_is_logged_with_its_body() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        let handler = entity_handler(Arc::new(BoardStore::new()), BoardStore::apply_thought);

        tracing::subscriber::with_default(subscriber, || {
            handler(Envelope::put(json!({ "message": "no id" })));
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Dropping undecodable board change"));
        assert!(output.contains(r#"payload={"message":"no id"}"#));
    }

    #[test]
    fn end_retro_handler_only_acts_on_put() {
        let store = Arc::new(BoardStore::new());
        store.apply_thought(&EntityMessage::Put(thought(1, 0)));
        store.apply_action_item(&EntityMessage::Put(ActionItem {
            id: 9,
            task: "ship it".into(),
            assignee: None,
            completed: true,
            date_created: NaiveDate::from_ymd_opt(2024, 3, 1),
            archived: false,
        }));
        let handler = end_retro_handler(Arc::clone(&store));

        handler(Envelope::delete(serde_json::Value::Null));
        assert_eq!(store.current().thoughts.len(), 1);

        handler(Envelope::put(serde_json::Value::Null));
        let state = store.current();
        assert!(state.thoughts.is_empty());
        assert!(state.action_items.is_empty());
    }
}
