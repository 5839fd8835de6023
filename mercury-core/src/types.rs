use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{conversation, group_conversation, message};

// Message types 1-99 are ordinary bubble messages; >= 100 are system-control
// messages rendered as centered banners (recall, membership, mute notices).
pub const MSG_TYPE_TEXT: i16 = 1;
pub const MSG_TYPE_IMAGE: i16 = 2;
pub const MSG_TYPE_AUDIO: i16 = 3;
pub const MSG_TYPE_VIDEO: i16 = 4;
pub const MSG_TYPE_FILE: i16 = 5;
pub const MSG_TYPE_LOCATION: i16 = 6;

pub const MSG_TYPE_RECALL: i16 = 100;
pub const MSG_TYPE_GROUP_JOIN: i16 = 101;
pub const MSG_TYPE_GROUP_EXIT: i16 = 102;
pub const MSG_TYPE_MUTE: i16 = 103;

pub const SYSTEM_MSG_TYPE_START: i16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvType {
    #[serde(rename = "P2P")]
    P2p,
    #[serde(rename = "GROUP")]
    Group,
}

impl ConvType {
    pub fn as_i16(self) -> i16 {
        match self {
            ConvType::P2p => 1,
            ConvType::Group => 2,
        }
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(ConvType::P2p),
            2 => Some(ConvType::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Normal,
    Recalled,
    Tombstoned,
}

impl MessageStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            MessageStatus::Normal => 0,
            MessageStatus::Recalled => 1,
            MessageStatus::Tombstoned => 2,
        }
    }
}

pub const CONV_STATUS_ACTIVE: i16 = 0;
pub const CONV_STATUS_DELETED: i16 = 1;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = message)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub id: i64,
    pub conv_id: String,
    pub seq: i64,
    pub msg_id: String,
    pub client_msg_id: String,
    pub from_uuid: String,
    pub device_id: String,
    pub msg_type: i16,
    pub content: serde_json::Value,
    pub status: i16,
    pub send_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = message)]
pub struct NewMessage {
    pub conv_id: String,
    pub seq: i64,
    pub msg_id: String,
    pub client_msg_id: String,
    pub from_uuid: String,
    pub device_id: String,
    pub msg_type: i16,
    pub content: serde_json::Value,
    pub status: i16,
    pub send_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = conversation)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Conversation {
    pub id: i64,
    pub conv_id: String,
    pub conv_type: i16,
    pub owner_uuid: String,
    pub target_uuid: String,
    pub last_msg_id: Option<String>,
    pub last_msg_preview: Option<String>,
    pub last_msg_at: Option<DateTime<Utc>>,
    pub max_seq: i64,
    pub read_seq: i64,
    pub clear_seq: i64,
    pub unread_count: i64,
    pub mute: bool,
    pub pin: bool,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = conversation)]
pub struct NewConversation {
    pub conv_id: String,
    pub conv_type: i16,
    pub owner_uuid: String,
    pub target_uuid: String,
    pub last_msg_id: Option<String>,
    pub last_msg_preview: Option<String>,
    pub last_msg_at: Option<DateTime<Utc>>,
    pub max_seq: i64,
    pub read_seq: i64,
    pub clear_seq: i64,
    pub unread_count: i64,
    pub mute: bool,
    pub pin: bool,
    pub status: i16,
    pub updated_at: DateTime<Utc>,
}

/// Shared hot state of one group conversation: a single row per group,
/// rewritten on every group send and merged into each member's listing.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = group_conversation)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GroupConversation {
    pub group_uuid: String,
    pub max_seq: i64,
    pub last_msg_id: Option<String>,
    pub last_msg_preview: Option<String>,
    pub last_msg_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushKind {
    #[serde(rename = "MSG_PUSH")]
    MsgPush,
    #[serde(rename = "MSG_RECALL")]
    MsgRecall,
    #[serde(rename = "MSG_MARK_READ")]
    MsgMarkRead,
}

/// One record on the `msg.push` topic, keyed by conv_id. `data` carries the
/// inner payload (a Message, RecallNotice or MarkReadNotice) as serialized
/// bytes; `device_id` is the originating device, excluded on self-echo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub kind: PushKind,
    pub conv_type: ConvType,
    pub receiver_uuid: String,
    pub device_id: String,
    pub from_uuid: String,
    pub server_ts: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallNotice {
    pub conv_id: String,
    pub msg_id: String,
    pub operator: String,
    pub recall_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkReadNotice {
    pub conv_id: String,
    pub read_seq: i64,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_type_roundtrips_through_i16() {
        assert_eq!(ConvType::from_i16(ConvType::P2p.as_i16()), Some(ConvType::P2p));
        assert_eq!(ConvType::from_i16(ConvType::Group.as_i16()), Some(ConvType::Group));
        assert_eq!(ConvType::from_i16(0), None);
    }

    #[test]
    fn push_event_wire_roundtrip() {
        let event = PushEvent {
            kind: PushKind::MsgPush,
            conv_type: ConvType::P2p,
            receiver_uuid: "U2".to_string(),
            device_id: "D1".to_string(),
            from_uuid: "U1".to_string(),
            server_ts: 1_700_000_000_000,
            data: b"{\"seq\":1}".to_vec(),
        };

        let bytes = serde_json::to_vec(&event).unwrap();
        let parsed: PushEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.kind, PushKind::MsgPush);
        assert_eq!(parsed.data, event.data);

        // Wire names are stable strings, not enum indices
        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw["kind"], "MSG_PUSH");
        assert_eq!(raw["conv_type"], "P2P");
    }
}
