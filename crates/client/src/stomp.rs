//! STOMP 1.2 frame codec.
//!
//! The board event stream is a STOMP session carried over a WebSocket,
//! one frame per text message:
//!
//! ```text
//! COMMAND
//! header:value
//!
//! body^@
//! ```
//!
//! Bare end-of-line messages are heart-beats and parse to `None`.

/// Frame commands used by the board stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Stomp => "STOMP",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, StompError> {
        Ok(match line {
            "CONNECT" => StompCommand::Connect,
            "STOMP" => StompCommand::Stomp,
            "CONNECTED" => StompCommand::Connected,
            "SEND" => StompCommand::Send,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "DISCONNECT" => StompCommand::Disconnect,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED frames carry headers verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(
            self,
            StompCommand::Connect | StompCommand::Stomp | StompCommand::Connected
        )
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header. Repeated names are kept; readers see the first.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    // ---- client frames ----

    /// Session handshake. `token` becomes a bearer `Authorization` header.
    pub fn connect(host: &str, token: Option<&str>) -> Self {
        let frame = Self::new(StompCommand::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", "0,0");
        match token {
            Some(token) => frame.with_header("Authorization", format!("Bearer {token}")),
            None => frame,
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(StompCommand::Unsubscribe).with_header("id", id)
    }

    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    // ---- server frames ----

    pub fn connected(version: &str) -> Self {
        Self::new(StompCommand::Connected).with_header("version", version)
    }

    pub fn message(destination: &str, subscription: &str, message_id: &str, body: &str) -> Self {
        Self::new(StompCommand::Message)
            .with_header("destination", destination)
            .with_header("subscription", subscription)
            .with_header("message-id", message_id)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    pub fn error(message: &str) -> Self {
        Self::new(StompCommand::Error).with_header("message", message)
    }

    /// Serialize to wire text, terminated by NUL.
    ///
    /// A `content-length` header is emitted for non-empty bodies unless one
    /// was set explicitly.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            push_header_part(&mut out, name, escape);
            out.push(':');
            push_header_part(&mut out, value, escape);
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn push_header_part(out: &mut String, raw: &str, escape: bool) {
    if !escape {
        out.push_str(raw);
        return;
    }
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str, escape: bool) -> Result<String, StompError> {
    if !escape || !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(StompError::InvalidEscape(format!("\\{other}"))),
            None => return Err(StompError::InvalidEscape("\\".to_string())),
        }
    }
    Ok(out)
}

/// Split off one line, tolerating CRLF endings.
fn next_line(text: &str) -> Option<(&str, &str)> {
    let idx = text.find('\n')?;
    let line = &text[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &text[idx + 1..]))
}

/// Parse one WebSocket text message as a STOMP frame.
///
/// Returns `Ok(None)` for heart-beats.
pub fn parse_frame(text: &str) -> Result<Option<StompFrame>, StompError> {
    let text = text.trim_start_matches(|c: char| c == '\r' || c == '\n');
    if text.is_empty() || text == "\0" {
        return Ok(None);
    }

    let (command_line, mut rest) = next_line(text).ok_or(StompError::Truncated)?;
    let command = StompCommand::parse(command_line)?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, after) = next_line(rest).ok_or(StompError::Truncated)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
        headers.push((unescape(name, escape)?, unescape(value, escape)?));
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| StompError::MalformedHeader(format!("content-length:{v}")))
        })
        .transpose()?;

    let body = match content_length {
        Some(len) => {
            let body = rest.get(..len).ok_or(StompError::Truncated)?;
            if !rest[len..].starts_with('\0') {
                return Err(StompError::Unterminated);
            }
            body
        }
        None => {
            let end = rest.find('\0').ok_or(StompError::Unterminated)?;
            &rest[..end]
        }
    };

    Ok(Some(StompFrame {
        command,
        headers,
        body: body.to_string(),
    }))
}

/// Frame-level decoding failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StompError {
    #[error("Unknown STOMP command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid header escape sequence: {0}")]
    InvalidEscape(String),

    #[error("Frame ended before headers were complete")]
    Truncated,

    #[error("Frame body is not NUL-terminated")]
    Unterminated,
}
