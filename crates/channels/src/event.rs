//! Inbound event model and parsing of the platform's v2 event envelope.

use std::{
    collections::HashSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    parley_common::{ChatKind, MessageKind},
    serde::Deserialize,
};

use crate::{Error, Result};

/// Sender type the platform uses for bot-originated messages.
const BOT_SENDER_TYPE: &str = "app";

/// One inbound delivery, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Unique per delivery; the dedupe key.
    pub event_id: String,
    /// Platform message id, used as the reply anchor.
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    /// `"<chat_id>:<sender_id>"`, one conversation per chat and sender.
    pub session_id: String,
    pub created_at: SystemTime,
    pub sender_is_bot: bool,
    pub chat_kind: ChatKind,
    /// Identifiers of everyone @-mentioned in the message.
    pub mentions: HashSet<String>,
    pub message_kind: MessageKind,
    pub content: MessageContent,
}

/// Decoded message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Audio {
        file_key: String,
        duration_ms: Option<u64>,
    },
    Other {
        message_type: String,
    },
}

/// Where a reply to an event is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: String,
    pub message_id: String,
}

/// Handle to an attachment stored on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub message_id: String,
    pub file_key: String,
}

impl InboundEvent {
    #[must_use]
    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget {
            chat_id: self.chat_id.clone(),
            message_id: self.message_id.clone(),
        }
    }

    /// The audio attachment, if this is an audio message.
    #[must_use]
    pub fn audio_file(&self) -> Option<FileRef> {
        match &self.content {
            MessageContent::Audio { file_key, .. } => Some(FileRef {
                message_id: self.message_id.clone(),
                file_key: file_key.clone(),
            }),
            _ => None,
        }
    }

    /// Text body, if this is a text message.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Age relative to `now`; events stamped in the future have age zero.
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }
}

#[must_use]
pub fn session_id(chat_id: &str, sender_id: &str) -> String {
    format!("{chat_id}:{sender_id}")
}

// ── Wire format ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    header: Header,
    event: EventBody,
}

#[derive(Deserialize)]
struct Header {
    event_id: String,
    /// Milliseconds since the epoch, sent as a string.
    create_time: MillisField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MillisField {
    Number(u64),
    Text(String),
}

impl MillisField {
    fn millis(&self) -> Result<u64> {
        match self {
            Self::Number(ms) => Ok(*ms),
            Self::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::invalid_input(format!("create_time {raw:?}: {e}"))),
        }
    }
}

#[derive(Deserialize)]
struct EventBody {
    sender: Sender,
    message: Message,
}

#[derive(Deserialize)]
struct Sender {
    sender_id: UserId,
    #[serde(default)]
    sender_type: String,
}

#[derive(Deserialize)]
struct UserId {
    #[serde(default)]
    open_id: String,
}

#[derive(Deserialize)]
struct Message {
    message_id: String,
    chat_id: String,
    chat_type: String,
    message_type: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    mentions: Vec<Mention>,
}

#[derive(Deserialize)]
struct Mention {
    id: UserId,
}

#[derive(Deserialize)]
struct TextContent {
    text: String,
}

#[derive(Deserialize)]
struct AudioContent {
    file_key: String,
    #[serde(default)]
    duration: Option<u64>,
}

/// Parse a raw webhook body into an [`InboundEvent`].
pub fn parse_event(raw: &[u8]) -> Result<InboundEvent> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    let Envelope { header, event } = envelope;
    let message = event.message;

    if header.event_id.is_empty() {
        return Err(Error::invalid_input("empty event_id"));
    }

    let chat_kind = match message.chat_type.as_str() {
        "p2p" => ChatKind::Direct,
        "group" => ChatKind::Group,
        other => return Err(Error::invalid_input(format!("unknown chat_type {other:?}"))),
    };

    let content = match message.message_type.as_str() {
        "text" => {
            let body: TextContent = serde_json::from_str(&message.content)?;
            MessageContent::Text(body.text)
        },
        "audio" => {
            let body: AudioContent = serde_json::from_str(&message.content)?;
            MessageContent::Audio {
                file_key: body.file_key,
                duration_ms: body.duration,
            }
        },
        other => MessageContent::Other {
            message_type: other.to_string(),
        },
    };
    let message_kind = match content {
        MessageContent::Text(_) => MessageKind::Text,
        MessageContent::Audio { .. } => MessageKind::Audio,
        MessageContent::Other { .. } => MessageKind::Unsupported,
    };

    let sender_id = event.sender.sender_id.open_id;
    let created_at = UNIX_EPOCH
        .checked_add(Duration::from_millis(header.create_time.millis()?))
        .ok_or_else(|| Error::invalid_input("create_time out of range"))?;

    Ok(InboundEvent {
        session_id: session_id(&message.chat_id, &sender_id),
        event_id: header.event_id,
        message_id: message.message_id,
        chat_id: message.chat_id,
        sender_is_bot: event.sender.sender_type == BOT_SENDER_TYPE,
        sender_id,
        created_at,
        chat_kind,
        mentions: message
            .mentions
            .into_iter()
            .map(|m| m.id.open_id)
            .filter(|id| !id.is_empty())
            .collect(),
        message_kind,
        content,
    })
}
