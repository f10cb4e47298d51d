//! Wire protocol between planning clients and the sync server.
//!
//! Frame format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ client_id │ room     │ seq      │ payload  │
//! │ 1 byte   │ string    │ string   │ varint   │ variable │
//! └──────────┴───────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Snapshot, Update and Write frames carry a JSON [`Envelope`] as payload so
//! that the stored room document stays readable by any client. Nack frames
//! carry a UTF-8 reason.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use planner_core::migrate::migrate_document;
use planner_core::model::Document;

/// Room used when no `room` query parameter is given.
pub const DEFAULT_ROOM: &str = "default";

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client joins a room; answered with Snapshot or Missing
    Subscribe = 1,
    /// Current room envelope
    Snapshot = 2,
    /// Room has no document yet
    Missing = 3,
    /// Envelope written by some client (the author included)
    Update = 4,
    /// Client writes a whole document
    Write = 5,
    /// Write accepted
    Ack = 6,
    /// Write rejected
    Nack = 7,
    /// Client leaves its room
    Unsubscribe = 8,
    /// Heartbeat ping
    Ping = 9,
    /// Heartbeat pong
    Pong = 10,
}

/// Stable per-device identity used as `updatedBy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Fresh random id (a v4 UUID in hyphenated form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an id read back from storage. Blank ids are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared workspace name. Every client in the same room edits one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Blank names fall back to [`DEFAULT_ROOM`].
    pub fn new(name: impl AsRef<str>) -> Self {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            Self::default()
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Room from the `room` parameter of a query string (`a=1&room=SGA`).
    pub fn from_query(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "room")
            .map(|(_, value)| Self::new(value))
            .unwrap_or_default()
    }

    /// Room from a full page URL; unparseable URLs use the default room.
    pub fn from_url(raw: &str) -> Self {
        match url::Url::parse(raw) {
            Ok(url) => url.query().map(Self::from_query).unwrap_or_default(),
            Err(e) => {
                log::warn!("Cannot parse page URL {raw:?}: {e}");
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self(DEFAULT_ROOM.to_string())
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Writer metadata attached to every stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    #[serde(default)]
    pub updated_at_ms: u64,
    pub updated_by: ClientId,
}

/// A room document plus who wrote it and when.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub state: Document,
    #[serde(rename = "__meta")]
    pub meta: EnvelopeMeta,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    state: serde_json::Value,
    #[serde(rename = "__meta")]
    meta: Option<RawMeta>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    updated_at_ms: Option<f64>,
    #[serde(default)]
    updated_by: Option<String>,
}

impl Envelope {
    pub fn new(state: Document, updated_by: ClientId, updated_at_ms: u64) -> Self {
        Self {
            state,
            meta: EnvelopeMeta {
                updated_at_ms,
                updated_by,
            },
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse an envelope written by any client version.
    ///
    /// The document goes through migration; missing metadata reads as
    /// timestamp 0 from an anonymous writer. Only a missing `state` is fatal.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        if !raw.state.is_object() {
            return Err(ProtocolError::DeserializationError(
                "envelope has no document state".into(),
            ));
        }
        let meta = raw.meta.unwrap_or(RawMeta {
            updated_at_ms: None,
            updated_by: None,
        });
        let updated_at_ms = meta
            .updated_at_ms
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map_or(0, |ms| ms as u64);
        let updated_by = meta
            .updated_by
            .as_deref()
            .and_then(ClientId::parse)
            .unwrap_or_else(|| ClientId("anonymous".to_string()));

        Ok(Self::new(migrate_document(&raw.state), updated_by, updated_at_ms))
    }
}

/// Top-level protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Sender of the frame; for Update frames, the envelope's author
    pub client_id: String,
    pub room: String,
    /// Write correlation number echoed by Ack/Nack
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn bare(msg_type: MessageType, client_id: &ClientId, room: &RoomId) -> Self {
        Self {
            msg_type,
            client_id: client_id.to_string(),
            room: room.to_string(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn subscribe(client_id: &ClientId, room: &RoomId) -> Self {
        Self::bare(MessageType::Subscribe, client_id, room)
    }

    pub fn unsubscribe(client_id: &ClientId, room: &RoomId) -> Self {
        Self::bare(MessageType::Unsubscribe, client_id, room)
    }

    pub fn write(
        client_id: &ClientId,
        room: &RoomId,
        seq: u64,
        envelope: &Envelope,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            seq,
            payload: envelope.to_bytes()?,
            ..Self::bare(MessageType::Write, client_id, room)
        })
    }

    /// Snapshot of the stored envelope bytes, sent verbatim.
    pub fn snapshot(room: &RoomId, envelope_json: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Snapshot,
            client_id: String::new(),
            room: room.to_string(),
            seq: 0,
            payload: envelope_json,
        }
    }

    pub fn missing(room: &RoomId) -> Self {
        Self {
            msg_type: MessageType::Missing,
            client_id: String::new(),
            room: room.to_string(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    pub fn update(author: &str, room: &RoomId, envelope_json: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            client_id: author.to_string(),
            room: room.to_string(),
            seq: 0,
            payload: envelope_json,
        }
    }

    pub fn ack(room: &RoomId, seq: u64) -> Self {
        Self {
            msg_type: MessageType::Ack,
            client_id: String::new(),
            room: room.to_string(),
            seq,
            payload: Vec::new(),
        }
    }

    pub fn nack(room: &RoomId, seq: u64, reason: &str) -> Self {
        Self {
            msg_type: MessageType::Nack,
            client_id: String::new(),
            room: room.to_string(),
            seq,
            payload: reason.as_bytes().to_vec(),
        }
    }

    pub fn ping(client_id: &ClientId) -> Self {
        Self::bare(MessageType::Ping, client_id, &RoomId::default())
    }

    pub fn pong(room: &str) -> Self {
        Self {
            msg_type: MessageType::Pong,
            client_id: String::new(),
            room: room.to_string(),
            seq: 0,
            payload: Vec::new(),
        }
    }

    /// Room named by the frame (blank → default room).
    pub fn room_id(&self) -> RoomId {
        RoomId::new(&self.room)
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the envelope carried by Snapshot, Update and Write frames.
    pub fn envelope(&self) -> Result<Envelope, ProtocolError> {
        match self.msg_type {
            MessageType::Snapshot | MessageType::Update | MessageType::Write => {
                Envelope::from_bytes(&self.payload)
            }
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    pub fn nack_reason(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::Nack {
            return Err(ProtocolError::InvalidMessageType);
        }
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(ts: u64) -> Envelope {
        Envelope::new(Document::seed(), ClientId::generate(), ts)
    }

    #[test]
    fn test_write_frame_roundtrip() {
        let client = ClientId::generate();
        let room = RoomId::new("SGA");
        let env = envelope(1_700_000_000_000);

        let msg = SyncMessage::write(&client, &room, 7, &env).unwrap();
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Write);
        assert_eq!(decoded.client_id, client.as_str());
        assert_eq!(decoded.room_id(), room);
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.envelope().unwrap(), env);
    }

    #[test]
    fn test_envelope_json_shape() {
        let env = envelope(42);
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(value["__meta"]["updatedAtMs"], 42);
        assert_eq!(value["__meta"]["updatedBy"], env.meta.updated_by.as_str());
        assert_eq!(value["state"]["totalBudget"], 15000.0);
        assert!(value["state"].get("ui").is_none());
    }

    #[test]
    fn test_envelope_without_meta() {
        let env = Envelope::from_bytes(br#"{"state":{"totalBudget":900}}"#).unwrap();
        assert_eq!(env.meta.updated_at_ms, 0);
        assert_eq!(env.meta.updated_by.as_str(), "anonymous");
        assert_eq!(env.state.total_budget, 900.0);
    }

    #[test]
    fn test_envelope_without_state_rejected() {
        assert!(Envelope::from_bytes(br#"{"__meta":{"updatedAtMs":5}}"#).is_err());
        assert!(Envelope::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_room_from_query() {
        assert_eq!(RoomId::from_query("?room=SGA").as_str(), "SGA");
        assert_eq!(RoomId::from_query("a=1&room=Spring%20Gala").as_str(), "Spring Gala");
        assert_eq!(RoomId::from_query("room=").as_str(), DEFAULT_ROOM);
        assert_eq!(RoomId::from_query("").as_str(), DEFAULT_ROOM);
    }

    #[test]
    fn test_room_from_url() {
        assert_eq!(RoomId::from_url("https://example.org/?room=board").as_str(), "board");
        assert_eq!(RoomId::from_url("https://example.org/").as_str(), DEFAULT_ROOM);
        assert_eq!(RoomId::from_url("::not a url::").as_str(), DEFAULT_ROOM);
    }

    #[test]
    fn test_client_id_parse() {
        assert!(ClientId::parse("   ").is_none());
        assert_eq!(ClientId::parse(" abc ").unwrap().as_str(), "abc");
        assert_ne!(ClientId::generate(), ClientId::generate());
    }

    #[test]
    fn test_nack_reason() {
        let room = RoomId::default();
        let msg = SyncMessage::nack(&room, 3, "room full");
        let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.nack_reason().unwrap(), "room full");
        assert!(SyncMessage::ack(&room, 3).nack_reason().is_err());
    }

    #[test]
    fn test_invalid_message_type_error() {
        let msg = SyncMessage::ping(&ClientId::generate());
        assert!(matches!(msg.envelope(), Err(ProtocolError::InvalidMessageType)));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(SyncMessage::decode(&garbage).is_err());
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Subscribe as u8, 1);
        assert_eq!(MessageType::Write as u8, 5);
        assert_eq!(MessageType::Pong as u8, 10);
    }
}
