//! `retroboard-watch` -- follow a team's retro board from the terminal.
//!
//! Mounts the board for one team, then logs a summary line every time the
//! board changes until interrupted with Ctrl-C.
//!
//! # Environment variables
//!
//! | Variable        | Required | Default | Description                         |
//! |-----------------|----------|---------|-------------------------------------|
//! | `RETRO_TEAM_ID` | yes      | --      | Team whose board to follow          |
//! | `RETRO_TOKEN`   | no       | --      | Bearer token for REST and WebSocket |
//!
//! Connection settings (`RETRO_API_URL`, `RETRO_WS_URL`, ...) are read by
//! [`SyncConfig::from_env`].

use std::sync::Arc;

use anyhow::Context;
use retroboard_client::{BoardSession, StaticToken, SyncConfig};
use retroboard_core::models::ColumnTopic;
use retroboard_store::BoardState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retroboard_watch=info,retroboard_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env().context("invalid sync configuration")?;
    let team_id = std::env::var("RETRO_TEAM_ID").context("RETRO_TEAM_ID is required")?;
    let token = StaticToken::new(std::env::var("RETRO_TOKEN").ok());

    tracing::info!(
        team_id = %team_id,
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        "Starting retroboard-watch",
    );

    let session = BoardSession::new(&config, Arc::new(token))?;
    let mut view = session.view();

    session
        .mount(&team_id)
        .await
        .with_context(|| format!("failed to mount board for team {team_id}"))?;
    log_summary(&view.current());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for Ctrl-C")?;
                tracing::info!("Shutdown requested");
                break;
            }
            state = view.changed() => match state {
                Some(state) => log_summary(&state),
                None => break,
            },
        }
    }

    session.unmount().await;
    Ok(())
}

fn log_summary(state: &BoardState) {
    let columns: Vec<String> = ColumnTopic::ALL
        .iter()
        .filter(|topic| **topic != ColumnTopic::Action)
        .map(|&topic| {
            let title = state
                .column_title(topic)
                .map_or(topic.as_str(), |c| c.title.as_str());
            format!(
                "{title}: {} ({} discussed)",
                state.thoughts_in(topic).len(),
                state.discussed_count(topic),
            )
        })
        .collect();

    tracing::info!(
        revision = state.revision,
        status = ?state.status,
        open_action_items = state.open_action_items().len(),
        total_action_items = state.action_items.len(),
        "{}",
        columns.join(" | "),
    );
}
