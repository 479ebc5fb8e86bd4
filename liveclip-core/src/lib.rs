use std::{fmt, time::Duration};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const WS_PATH: &str = "/ws";
pub const MAX_CAPTURE_BYTES: u64 = 10 * 1024 * 1024;
/// Base64 of a full-size capture plus JSON framing.
pub const MAX_RELAY_MESSAGE_BYTES: usize = 20 * 1024 * 1024;
pub const ITEM_LIFETIME: Duration = Duration::from_secs(60);
pub const DEFAULT_CLIPBOARD_IMAGE_NAME: &str = "clipboard.png";

const INBOUND_KINDS: &[&str] = &["sync", "add"];

/// Identity assigned by the backend. Accepts both JSON strings and integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Number(u64),
    Text(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{n}"),
            ItemId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        ItemId::Number(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        ItemId::Text(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Text,
    Image,
    File,
    #[serde(other)]
    Other,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::Image => "image",
            ItemKind::File => "file",
            ItemKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardItem {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Unix seconds, fractional, as stamped by the backend.
    pub created_at: f64,
}

impl ClipboardItem {
    /// Materializes a received envelope. Only the backend calls this.
    pub fn from_envelope(id: ItemId, envelope: OutboundEnvelope, created_at: f64) -> Self {
        let (kind, data, name, size, mime) = match envelope {
            OutboundEnvelope::Text { data, name } => (ItemKind::Text, Some(data), name, None, None),
            OutboundEnvelope::Image { name, data } => {
                (ItemKind::Image, Some(data), Some(name), None, None)
            }
            OutboundEnvelope::File { name, size, mime } => {
                (ItemKind::File, None, Some(name), Some(size), Some(mime))
            }
        };
        Self {
            id,
            kind,
            data,
            name,
            size,
            mime,
            created_at,
        }
    }
}

/// One captured clipboard action on its way to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEnvelope {
    Text {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Image {
        name: String,
        /// Plain base64, no data-URI prefix.
        data: String,
    },
    File {
        name: String,
        size: u64,
        mime: String,
    },
}

impl OutboundEnvelope {
    pub fn kind(&self) -> ItemKind {
        match self {
            OutboundEnvelope::Text { .. } => ItemKind::Text,
            OutboundEnvelope::Image { .. } => ItemKind::Image,
            OutboundEnvelope::File { .. } => ItemKind::File,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientControl {
    /// Ask for a fresh `sync` addressed to this connection only.
    Resync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Envelope(OutboundEnvelope),
    Control(ClientControl),
}

impl From<OutboundEnvelope> for ClientMessage {
    fn from(value: OutboundEnvelope) -> Self {
        ClientMessage::Envelope(value)
    }
}

impl From<ClientControl> for ClientMessage {
    fn from(value: ClientControl) -> Self {
        ClientMessage::Control(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Sync {
        #[serde(default, deserialize_with = "null_as_empty")]
        items: Vec<ClipboardItem>,
    },
    Add {
        item: ClipboardItem,
    },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Returns `Ok(None)` for a well-formed message of a kind this client does not know.
pub fn decode_inbound(text: &str) -> Result<Option<InboundMessage>, CoreError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| CoreError::Malformed(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::Malformed("missing message type".to_owned()))?;
    if !INBOUND_KINDS.contains(&kind) {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| CoreError::Malformed(err.to_string()))
}

pub fn encode_inbound(message: &InboundMessage) -> Result<String, CoreError> {
    serde_json::to_string(message).map_err(|err| CoreError::Serialization(err.to_string()))
}

pub fn encode_outbound(message: &ClientMessage) -> Result<String, CoreError> {
    serde_json::to_string(message).map_err(|err| CoreError::Serialization(err.to_string()))
}

pub fn decode_outbound(text: &str) -> Result<ClientMessage, CoreError> {
    serde_json::from_str(text).map_err(|err| CoreError::Malformed(err.to_string()))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ClipboardItem>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ClipboardItem>>::deserialize(deserializer)?.unwrap_or_default())
}
