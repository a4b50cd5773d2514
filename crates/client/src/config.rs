use std::time::Duration;

use crate::reconnect::ReconnectConfig;

/// Sync engine configuration loaded from environment variables.
///
/// Every field has a default suitable for a local board server.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the board REST API.
    pub api_url: String,
    /// STOMP-over-WebSocket endpoint.
    pub ws_url: String,
    /// Per-request timeout for snapshot calls.
    pub request_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Re-fetch the snapshot after the event stream reconnects.
    pub resnapshot_on_reconnect: bool,
}

const DEFAULT_API_URL: &str = "http://localhost:8080";
const WS_PATH: &str = "/websocket/websocket";

impl SyncConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default                               |
    /// |---------------------------------|---------------------------------------|
    /// | `RETRO_API_URL`                 | `http://localhost:8080`               |
    /// | `RETRO_WS_URL`                  | API URL as `ws(s)://` + `/websocket/websocket` |
    /// | `RETRO_REQUEST_TIMEOUT_SECS`    | `30`                                  |
    /// | `RETRO_RECONNECT_INITIAL_MS`    | `1000`                                |
    /// | `RETRO_RECONNECT_MAX_SECS`      | `30`                                  |
    /// | `RETRO_RESNAPSHOT_ON_RECONNECT` | `true`                                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = lookup("RETRO_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.into())
            .trim_end_matches('/')
            .to_string();

        let ws_url = match lookup("RETRO_WS_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => url,
            None => derive_ws_url(&api_url)?,
        };

        let request_timeout_secs: u64 = parse_or(&lookup, "RETRO_REQUEST_TIMEOUT_SECS", 30)?;
        let initial_ms: u64 = parse_or(&lookup, "RETRO_RECONNECT_INITIAL_MS", 1000)?;
        let max_secs: u64 = parse_or(&lookup, "RETRO_RECONNECT_MAX_SECS", 30)?;
        let resnapshot_on_reconnect: bool =
            parse_or(&lookup, "RETRO_RESNAPSHOT_ON_RECONNECT", true)?;

        if initial_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRO_RECONNECT_INITIAL_MS",
                value: "0".into(),
            });
        }

        Ok(Self {
            api_url,
            ws_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_secs(max_secs),
                ..ReconnectConfig::default()
            },
            resnapshot_on_reconnect,
        })
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            ws_url: format!("ws://localhost:8080{WS_PATH}"),
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            resnapshot_on_reconnect: true,
        }
    }
}

fn derive_ws_url(api_url: &str) -> Result<String, ConfigError> {
    let rest = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ConfigError::Invalid {
            key: "RETRO_API_URL",
            value: api_url.to_string(),
        });
    };
    Ok(format!("{rest}{WS_PATH}"))
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

/// Errors raised while reading [`SyncConfig`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(load(&[]).unwrap(), SyncConfig::default());
    }

    #[test]
    fn ws_url_follows_api_scheme() {
        let config = load(&[("RETRO_API_URL", "https://retro.example.com/")]).unwrap();
        assert_eq!(config.api_url, "https://retro.example.com");
        assert_eq!(config.ws_url, "wss://retro.example.com/websocket/websocket");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = load(&[
            ("RETRO_API_URL", "http://api:8080"),
            ("RETRO_WS_URL", "ws://events:9000/stomp"),
        ])
        .unwrap();
        assert_eq!(config.ws_url, "ws://events:9000/stomp");
    }

    #[test]
    fn reconnect_and_resnapshot_overrides() {
        let config = load(&[
            ("RETRO_RECONNECT_INITIAL_MS", "250"),
            ("RETRO_RECONNECT_MAX_SECS", "5"),
            ("RETRO_RESNAPSHOT_ON_RECONNECT", "false"),
            ("RETRO_REQUEST_TIMEOUT_SECS", " 7 "),
        ])
        .unwrap();
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(7));
        assert!(!config.resnapshot_on_reconnect);
    }

    #[test]
    fn bad_values_are_reported_with_their_key() {
        assert_eq!(
            load(&[("RETRO_RECONNECT_MAX_SECS", "soon")]),
            Err(ConfigError::Invalid {
                key: "RETRO_RECONNECT_MAX_SECS",
                value: "soon".into()
            })
        );
        assert!(load(&[("RETRO_RECONNECT_INITIAL_MS", "0")]).is_err());
        assert!(load(&[("RETRO_API_URL", "ftp://nope")]).is_err());
    }
}
