//! Frame processing loop for one live STOMP connection.
//!
//! Sends the registered subscriptions, then reads frames one at a time,
//! parses them into [`StompFrame`]s and hands each `MESSAGE` body to the
//! handler of its subscription. Malformed frames and envelopes, and messages
//! whose destination names a different topic than their subscription, are
//! logged and dropped; they never reach a handler.

use std::collections::HashSet;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use retroboard_core::envelope::Envelope;
use retroboard_core::topics::EventTopic;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::channel::{Command, Registry};
use crate::client::{StompConnection, WsStream};
use crate::stomp::{parse_frame, StompCommand, StompFrame};

type WsSink = SplitSink<WsStream, Message>;

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOutcome {
    /// Cancellation was requested; DISCONNECT has been sent.
    Cancelled,
    /// The socket closed or failed underneath us.
    Dropped,
}

/// Drive one connection until it drops or `cancel` fires.
pub(crate) async fn process_frames(
    conn: StompConnection,
    registry: &Registry,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    cancel: &CancellationToken,
) -> LinkOutcome {
    let connection_id = conn.connection_id;
    let (mut sink, mut stream) = conn.ws_stream.split();

    // Subscription ids already sent on this socket.
    let mut active: HashSet<String> = HashSet::new();

    let registered: Vec<(String, String)> = registry
        .read()
        .await
        .iter()
        .map(|(id, sub)| (id.clone(), sub.destination.clone()))
        .collect();
    for (id, destination) in registered {
        if let Err(e) = send_frame(&mut sink, &StompFrame::subscribe(&id, &destination)).await {
            tracing::warn!(connection_id = %connection_id, error = %e, "Failed to send SUBSCRIBE");
            return LinkOutcome::Dropped;
        }
        active.insert(id);
    }

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = send_frame(&mut sink, &StompFrame::disconnect()).await;
                let _ = sink.close().await;
                tracing::info!(connection_id = %connection_id, "Sent DISCONNECT");
                return LinkOutcome::Cancelled;
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    // The owning channel is gone.
                    let _ = send_frame(&mut sink, &StompFrame::disconnect()).await;
                    return LinkOutcome::Cancelled;
                };
                if let Err(e) = apply_command(&mut sink, registry, &mut active, command).await {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Failed to send frame");
                    return LinkOutcome::Dropped;
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&connection_id, &text, registry).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(connection_id = %connection_id, ?frame, "Board WebSocket closed");
                        return LinkOutcome::Dropped;
                    }
                    Some(Ok(_)) => {
                        tracing::trace!(connection_id = %connection_id, "Ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        tracing::error!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                        return LinkOutcome::Dropped;
                    }
                    None => {
                        tracing::info!(connection_id = %connection_id, "WebSocket stream exhausted");
                        return LinkOutcome::Dropped;
                    }
                }
            }
        }
    }
}

async fn send_frame(
    sink: &mut WsSink,
    frame: &StompFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    sink.send(Message::Text(frame.encode())).await
}

/// Turn a subscribe/unsubscribe request into the matching frame, at most
/// once per subscription id on this socket.
async fn apply_command(
    sink: &mut WsSink,
    registry: &Registry,
    active: &mut HashSet<String>,
    command: Command,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match command {
        Command::Subscribe(id) => {
            if active.contains(&id) {
                return Ok(());
            }
            let destination = registry
                .read()
                .await
                .get(&id)
                .map(|sub| sub.destination.clone());
            // Unsubscribed again before we got here.
            let Some(destination) = destination else {
                return Ok(());
            };
            send_frame(sink, &StompFrame::subscribe(&id, &destination)).await?;
            active.insert(id);
        }
        Command::Unsubscribe(id) => {
            if active.remove(&id) {
                send_frame(sink, &StompFrame::unsubscribe(&id)).await?;
            }
        }
    }
    Ok(())
}

/// Dispatch a single text frame.
async fn handle_text_frame(connection_id: &str, text: &str, registry: &Registry) {
    let frame = match parse_frame(text) {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(
                connection_id,
                error = %e,
                raw_frame = %text,
                "Dropping malformed STOMP frame",
            );
            return;
        }
    };

    match frame.command {
        StompCommand::Message => dispatch_message(connection_id, &frame, registry).await,
        StompCommand::Error => {
            tracing::warn!(
                connection_id,
                message = frame.header("message").unwrap_or(""),
                body = %frame.body,
                "Server sent ERROR frame",
            );
        }
        StompCommand::Receipt => {
            tracing::debug!(connection_id, receipt = frame.header("receipt-id"), "Receipt");
        }
        other => {
            tracing::debug!(connection_id, command = other.as_str(), "Ignoring frame");
        }
    }
}

async fn dispatch_message(connection_id: &str, frame: &StompFrame, registry: &Registry) {
    let Some(subscription_id) = frame.header("subscription") else {
        tracing::warn!(connection_id, "Dropping MESSAGE without subscription header");
        return;
    };

    let target = registry
        .read()
        .await
        .get(subscription_id)
        .map(|sub| (sub.topic, sub.handler.clone()));
    let Some((topic, handler)) = target else {
        tracing::debug!(
            connection_id,
            subscription = subscription_id,
            "Dropping MESSAGE for unknown subscription",
        );
        return;
    };

    let routed = frame
        .header("destination")
        .and_then(EventTopic::parse_destination);
    if let Some((_, routed_topic)) = routed {
        if routed_topic != topic {
            tracing::warn!(
                connection_id,
                subscription = subscription_id,
                %topic,
                %routed_topic,
                "Dropping MESSAGE routed to another topic",
            );
            return;
        }
    }
    let team_id = routed.map(|(team_id, _)| team_id);

    match Envelope::parse(&frame.body) {
        Ok(envelope) => {
            tracing::debug!(
                connection_id,
                team_id,
                %topic,
                kind = envelope.kind.as_str(),
                "Delivering board change",
            );
            handler(envelope);
        }
        Err(e) => {
            tracing::warn!(
                connection_id,
                team_id,
                %topic,
                error = %e,
                raw_message = %frame.body,
                "Dropping malformed envelope",
            );
        }
    }
}
