//! Per-team event channel.
//!
//! [`EventChannel`] owns one persistent STOMP connection and routes each
//! inbound `MESSAGE` to the handler registered for its subscription. A
//! single background task reads the socket, so handlers run one at a
//! time in arrival order.
//!
//! Lifecycle notifications are broadcast via a [`tokio::sync::broadcast`]
//! channel. Call [`EventChannel::events`] to receive them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use retroboard_core::envelope::Envelope;
use retroboard_core::topics::EventTopic;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::RetroClient;
use crate::events::ChannelEvent;
use crate::processor::{process_frames, LinkOutcome};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the connection task before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback invoked with every envelope received on a subscription.
pub type Handler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Identifies one registered subscription (the STOMP `id` header).
pub type SubscriptionId = String;

/// A registered topic handler.
pub(crate) struct Subscription {
    pub(crate) topic: EventTopic,
    pub(crate) destination: String,
    pub(crate) handler: Handler,
}

/// Handlers of the current connect cycle, keyed by subscription id.
pub(crate) type Registry = Arc<RwLock<HashMap<SubscriptionId, Subscription>>>;

/// Requests from the public API to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe(SubscriptionId),
    Unsubscribe(SubscriptionId),
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Persistent subscription to a team's board streams.
///
/// Created once per board view; the returned value can be wrapped in an
/// `Arc` and shared with whatever mounts and unmounts the view.
pub struct EventChannel {
    client: Arc<RetroClient>,
    reconnect: ReconnectConfig,
    session: Mutex<Option<ChannelSession>>,
    event_tx: broadcast::Sender<ChannelEvent>,
    next_subscription: AtomicU64,
}

/// Bookkeeping for one connect cycle.
struct ChannelSession {
    registry: Registry,
    commands: mpsc::UnboundedSender<Command>,
    task_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl ChannelSession {
    fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }
}

impl EventChannel {
    pub fn new(client: RetroClient, reconnect: ReconnectConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client: Arc::new(client),
            reconnect,
            session: Mutex::new(None),
            event_tx,
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Subscribe to connectivity changes.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Whether a connection task is running (live or retrying).
    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(ChannelSession::is_running)
    }

    /// Start the connection task.
    ///
    /// `on_ready` runs exactly once, after the first successful handshake.
    /// Calling `connect` while a task is already running does nothing and
    /// drops the new callback.
    pub async fn connect<F>(&self, on_ready: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(ChannelSession::is_running) {
            tracing::debug!("Event channel already connected");
            return;
        }

        let registry: Registry = Arc::default();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let ctx = LoopContext {
            client: Arc::clone(&self.client),
            reconnect: self.reconnect.clone(),
            registry: Arc::clone(&registry),
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };

        let task_handle = tokio::spawn(async move {
            tracing::info!(url = %ctx.client.ws_url(), "Starting event channel task");
            run_connection_loop(ctx, command_rx, Box::new(on_ready)).await;
            tracing::info!("Event channel task exited");
        });

        *session = Some(ChannelSession {
            registry,
            commands,
            task_handle,
            cancel,
        });
    }

    /// Register `handler` for `topic` of `team_id`.
    ///
    /// May be called before the transport is live; the subscription is sent
    /// as soon as it is, and again after every reconnect.
    pub async fn subscribe<F>(
        &self,
        topic: EventTopic,
        team_id: &str,
        handler: F,
    ) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        let session = self.session.lock().await;
        let session = session
            .as_ref()
            .filter(|s| s.is_running())
            .ok_or(ChannelError::NotConnected)?;

        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        let destination = topic.destination(team_id);

        session.registry.write().await.insert(
            id.clone(),
            Subscription {
                topic,
                destination: destination.clone(),
                handler: Arc::new(handler),
            },
        );
        session
            .commands
            .send(Command::Subscribe(id.clone()))
            .map_err(|_| ChannelError::NotConnected)?;

        tracing::debug!(subscription = %id, destination = %destination, "Subscribed");
        Ok(id)
    }

    pub async fn subscribe_thoughts<F>(
        &self,
        team_id: &str,
        handler: F,
    ) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventTopic::Thoughts, team_id, handler).await
    }

    pub async fn subscribe_action_items<F>(
        &self,
        team_id: &str,
        handler: F,
    ) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventTopic::ActionItems, team_id, handler).await
    }

    pub async fn subscribe_column_titles<F>(
        &self,
        team_id: &str,
        handler: F,
    ) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventTopic::ColumnTitles, team_id, handler).await
    }

    pub async fn subscribe_end_retro<F>(
        &self,
        team_id: &str,
        handler: F,
    ) -> Result<SubscriptionId, ChannelError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.subscribe(EventTopic::EndRetro, team_id, handler).await
    }

    /// Remove one subscription. Its handler is never called afterwards.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), ChannelError> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(ChannelError::NotConnected)?;

        if session.registry.write().await.remove(id).is_none() {
            return Err(ChannelError::UnknownSubscription(id.to_string()));
        }
        // The task may already be gone; the registry entry is what matters.
        let _ = session.commands.send(Command::Unsubscribe(id.to_string()));
        Ok(())
    }

    /// Tear down the transport and drop every handler.
    ///
    /// Once this returns no handler runs again until the next `connect`.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        tracing::info!("Disconnecting event channel");
        session.cancel.cancel();

        let abort = session.task_handle.abort_handle();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, session.task_handle)
            .await
            .is_err()
        {
            tracing::warn!("Event channel task did not stop in time, aborting");
            abort.abort();
        }
        session.registry.write().await.clear();
    }
}

/// Everything the connection task needs, moved into it at spawn time.
struct LoopContext {
    client: Arc<RetroClient>,
    reconnect: ReconnectConfig,
    registry: Registry,
    event_tx: broadcast::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl LoopContext {
    fn emit(&self, event: ChannelEvent) {
        // Ignore the SendError: it only means nobody is listening.
        let _ = self.event_tx.send(event);
    }

    fn reject(&self, reason: String) {
        tracing::error!(reason = %reason, "Board event stream rejected the session");
        self.emit(ChannelEvent::Rejected { reason });
    }
}

/// Core connection loop: connect -> process frames -> reconnect.
///
/// Runs until cancelled or until the server rejects the handshake.
async fn run_connection_loop(
    ctx: LoopContext,
    mut commands: mpsc::UnboundedReceiver<Command>,
    on_ready: ReadyCallback,
) {
    let mut on_ready = Some(on_ready);

    let first = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        result = ctx.client.connect() => Some(result),
    };
    let mut pending = match first {
        None => {
            ctx.emit(ChannelEvent::Closed);
            return;
        }
        Some(Ok(conn)) => Some(conn),
        Some(Err(e)) if e.is_rejection() => {
            ctx.reject(e.to_string());
            ctx.emit(ChannelEvent::Closed);
            return;
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Connection failed, entering reconnect loop");
            None
        }
    };

    loop {
        let conn = match pending.take() {
            Some(conn) => conn,
            None => match reconnect_loop(&ctx.client, &ctx.reconnect, &ctx.cancel).await {
                Ok(Some(conn)) => conn,
                Ok(None) => break,
                Err(e) => {
                    ctx.reject(e.to_string());
                    break;
                }
            },
        };

        match on_ready.take() {
            Some(ready) => {
                ready();
                ctx.emit(ChannelEvent::Connected);
            }
            None => ctx.emit(ChannelEvent::Reconnected),
        }

        let connection_id = conn.connection_id.clone();
        match process_frames(conn, &ctx.registry, &mut commands, &ctx.cancel).await {
            LinkOutcome::Cancelled => break,
            LinkOutcome::Dropped => {
                ctx.emit(ChannelEvent::Disconnected);
                if ctx.cancel.is_cancelled() {
                    break;
                }
                tracing::info!(
                    connection_id = %connection_id,
                    "Connection lost, entering reconnect loop",
                );
            }
        }
    }

    ctx.emit(ChannelEvent::Closed);
}

/// Errors returned by the channel's public API.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    /// `subscribe` was called without a running connection task.
    #[error("Event channel is not connected")]
    NotConnected,

    #[error("No subscription with id {0}")]
    UnknownSubscription(SubscriptionId),
}
