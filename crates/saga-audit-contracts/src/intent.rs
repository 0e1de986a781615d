//! Message intent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Why a message was sent.  Carried in the `NServiceBus.MessageIntent` header
/// and copied into audit records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIntent {
    /// Point-to-point command.  Also the fallback for messages from senders
    /// that never stamped an intent.
    #[default]
    Send,
    Publish,
    Subscribe,
    Unsubscribe,
    Reply,
}

impl MessageIntent {
    /// Parse a header value, falling back to `Send` when the value is absent
    /// or unknown.
    pub fn from_header(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageIntent::Send => "Send",
            MessageIntent::Publish => "Publish",
            MessageIntent::Subscribe => "Subscribe",
            MessageIntent::Unsubscribe => "Unsubscribe",
            MessageIntent::Reply => "Reply",
        }
    }
}

impl fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a header value names no known intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIntent(pub String);

impl FromStr for MessageIntent {
    type Err = UnknownIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "send" => Ok(MessageIntent::Send),
            "publish" => Ok(MessageIntent::Publish),
            "subscribe" => Ok(MessageIntent::Subscribe),
            "unsubscribe" => Ok(MessageIntent::Unsubscribe),
            "reply" => Ok(MessageIntent::Reply),
            _ => Err(UnknownIntent(s.to_string())),
        }
    }
}
