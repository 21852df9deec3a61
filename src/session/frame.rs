//! STOMP frame subset used by the message bus.
//!
//! A frame is a command line, zero or more `key:value` header lines, a blank
//! line, and a body terminated by a NUL sentinel. Outbound the core only
//! builds CONNECT, SUBSCRIBE and UNSUBSCRIBE; inbound it recognizes
//! CONNECTED, MESSAGE, ERROR and RECEIPT and ignores everything else.

use crate::config::{ACCEPT_VERSION, HEART_BEAT};
use crate::error::{CoreError, CoreResult};

/// Frame terminator appended to every serialized frame.
const SENTINEL: char = '\0';

/// Header carrying the caller's identity in the CONNECT frame.
pub const IDENTITY_HEADER: &str = "userId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Connect,
    Subscribe,
    Unsubscribe,
    Connected,
    Message,
    Error,
    Receipt,
    Other(String),
}

impl FrameKind {
    fn as_command(&self) -> &str {
        match self {
            FrameKind::Connect => "CONNECT",
            FrameKind::Subscribe => "SUBSCRIBE",
            FrameKind::Unsubscribe => "UNSUBSCRIBE",
            FrameKind::Connected => "CONNECTED",
            FrameKind::Message => "MESSAGE",
            FrameKind::Error => "ERROR",
            FrameKind::Receipt => "RECEIPT",
            FrameKind::Other(command) => command,
        }
    }

    fn from_command(command: &str) -> Self {
        match command {
            "CONNECT" => FrameKind::Connect,
            "SUBSCRIBE" => FrameKind::Subscribe,
            "UNSUBSCRIBE" => FrameKind::Unsubscribe,
            "CONNECTED" => FrameKind::Connected,
            "MESSAGE" => FrameKind::Message,
            "ERROR" => FrameKind::Error,
            "RECEIPT" => FrameKind::Receipt,
            other => FrameKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Handshake frame carrying the caller's identity.
    pub fn connect(identity: &str) -> Self {
        Self {
            kind: FrameKind::Connect,
            headers: vec![
                ("accept-version".to_string(), ACCEPT_VERSION.to_string()),
                ("heart-beat".to_string(), HEART_BEAT.to_string()),
                (IDENTITY_HEADER.to_string(), identity.to_string()),
            ],
            body: String::new(),
        }
    }

    pub fn subscribe(destination: &str, id: &str) -> Self {
        Self {
            kind: FrameKind::Subscribe,
            headers: vec![
                ("destination".to_string(), destination.to_string()),
                ("id".to_string(), id.to_string()),
            ],
            body: String::new(),
        }
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self {
            kind: FrameKind::Unsubscribe,
            headers: vec![("id".to_string(), id.to_string())],
            body: String::new(),
        }
    }

    /// First header with the given name, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(self.kind.as_command());
        out.push('\n');
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(SENTINEL);
        out
    }

    /// Parse one delimited frame.
    ///
    /// Malformed input yields an error and never panics; the session drops
    /// such frames individually.
    pub fn parse(raw: &str) -> CoreResult<Frame> {
        let raw = raw.strip_suffix(SENTINEL).unwrap_or(raw);
        let (head, body) = raw
            .split_once("\n\n")
            .ok_or_else(|| CoreError::Protocol("missing header terminator".to_string()))?;

        let mut lines = head.lines();
        let command = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| CoreError::Protocol("empty command line".to_string()))?;

        let mut headers = Vec::new();
        for line in lines {
            let (key, value) = line.split_once(':').ok_or_else(|| {
                CoreError::Protocol(format!("malformed header line: {}", line))
            })?;
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }

        Ok(Frame {
            kind: FrameKind::from_command(command),
            headers,
            body: body.trim_end_matches(SENTINEL).to_string(),
        })
    }
}
