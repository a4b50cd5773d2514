//! Bearer token seam.
//!
//! Token storage and refresh live outside this crate; the engine only asks
//! for the current token whenever it opens a connection or issues a request.

/// Source of the bearer token attached to REST calls and the STOMP handshake.
pub trait TokenProvider: Send + Sync {
    /// Current token, or `None` to connect anonymously.
    fn token(&self) -> Option<String>;
}

/// A fixed token, e.g. read once from the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
