//! Exponential-backoff reconnection for the board event stream.
//!
//! When the live transport drops, the channel calls [`reconnect_loop`]
//! to keep retrying with increasing delays until the handshake succeeds,
//! the server rejects it, or the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, RetroClient, StompConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt to reconnect with exponential backoff.
///
/// Returns `Ok(Some(connection))` once a handshake succeeds, `Ok(None)` if
/// `cancel` fires first, and `Err` when the server rejects the handshake.
pub async fn reconnect_loop(
    client: &RetroClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Result<Option<StompConnection>, ClientError> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        // Wait before each attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to board event stream",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return Ok(None);
            }
            result = client.connect() => {
                match result {
                    Ok(conn) => {
                        tracing::info!(attempt, "Reconnected to board event stream");
                        return Ok(Some(conn));
                    }
                    Err(e) if e.is_rejection() => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::StaticToken;

    #[test]
    fn default_backoff_doubles_up_to_thirty_seconds() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay.as_secs());
            delay = next_delay(delay, &config);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn sub_second_delays_grow_by_multiplier() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            multiplier: 3.0,
        };
        assert_eq!(
            next_delay(Duration::from_millis(50), &config),
            Duration::from_millis(150)
        );
        assert_eq!(
            next_delay(Duration::from_millis(450), &config),
            Duration::from_millis(500)
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = RetroClient::new(
            "ws://127.0.0.1:9/websocket".into(),
            Arc::new(StaticToken::default()),
        );
        let config = ReconnectConfig::default();

        let result = reconnect_loop(&client, &config, &cancel).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_mid_backoff_returns_none() {
        let cancel = CancellationToken::new();
        let client = RetroClient::new(
            "ws://127.0.0.1:9/websocket".into(),
            Arc::new(StaticToken::default()),
        );
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            ..Default::default()
        };

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let result = reconnect_loop(&client, &config, &cancel).await;
        assert!(matches!(result, Ok(None)));
    }
}
