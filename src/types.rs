//! Core domain types shared across parsing, storage, merge, and query.
//!
//! Everything that crosses the worker boundary serializes camelCase;
//! the canonical export structs in this module double as the parse
//! target for the `chatlab` format.

use serde::{Deserialize, Serialize};

// ─── Platform / session kind ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Qq,
    Wechat,
    Discord,
    Mixed,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Qq => "qq",
            Platform::Wechat => "wechat",
            Platform::Discord => "discord",
            Platform::Mixed => "mixed",
            Platform::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Platform {
        match s {
            "qq" => Platform::Qq,
            "wechat" => Platform::Wechat,
            "discord" => Platform::Discord,
            "mixed" => Platform::Mixed,
            _ => Platform::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Group,
    Private,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Group => "group",
            SessionKind::Private => "private",
        }
    }

    pub fn parse(s: &str) -> SessionKind {
        match s {
            "private" => SessionKind::Private,
            _ => SessionKind::Group,
        }
    }
}

// ─── Message type ───

/// Wire-stable message type. Base content kinds sit in 0–19, interactive
/// kinds in 20–39, system kinds in 80–89; everything unknown is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Video,
    File,
    Emoji,
    Link,
    Location,
    RedPacket,
    Transfer,
    Poke,
    Call,
    Share,
    Reply,
    Forward,
    Contact,
    System,
    Recall,
    Other,
}

impl MessageType {
    pub fn as_wire(&self) -> i64 {
        match self {
            MessageType::Text => 0,
            MessageType::Image => 1,
            MessageType::Voice => 2,
            MessageType::Video => 3,
            MessageType::File => 4,
            MessageType::Emoji => 5,
            MessageType::Link => 7,
            MessageType::Location => 8,
            MessageType::RedPacket => 20,
            MessageType::Transfer => 21,
            MessageType::Poke => 22,
            MessageType::Call => 23,
            MessageType::Share => 24,
            MessageType::Reply => 25,
            MessageType::Forward => 26,
            MessageType::Contact => 27,
            MessageType::System => 80,
            MessageType::Recall => 81,
            MessageType::Other => 99,
        }
    }

    pub fn from_wire(value: i64) -> MessageType {
        match value {
            0 => MessageType::Text,
            1 => MessageType::Image,
            2 => MessageType::Voice,
            3 => MessageType::Video,
            4 => MessageType::File,
            5 => MessageType::Emoji,
            7 => MessageType::Link,
            8 => MessageType::Location,
            20 => MessageType::RedPacket,
            21 => MessageType::Transfer,
            22 => MessageType::Poke,
            23 => MessageType::Call,
            24 => MessageType::Share,
            25 => MessageType::Reply,
            26 => MessageType::Forward,
            27 => MessageType::Contact,
            80 => MessageType::System,
            81 => MessageType::Recall,
            _ => MessageType::Other,
        }
    }

    /// Whether the wire integer names a known variant (`Other` included
    /// only as the literal 99). Messages with out-of-enum types are
    /// dropped at import.
    pub fn is_known_wire(value: i64) -> bool {
        matches!(
            value,
            0..=5 | 7 | 8 | 20..=27 | 80 | 81 | 99
        )
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Ok(MessageType::from_wire(value))
    }
}

// ─── Parsed records (parser → import pipeline) ───

/// Conversation-level metadata observed by a parser.
#[derive(Debug, Clone)]
pub struct ParsedMeta {
    pub name: String,
    pub platform: Platform,
    pub kind: SessionKind,
    pub group_id: Option<String>,
    pub group_avatar: Option<String>,
}

/// A participant observed by a parser, keyed by platform id.
#[derive(Debug, Clone)]
pub struct RawMember {
    pub platform_id: String,
    pub account_name: String,
    pub group_nickname: Option<String>,
    pub avatar: Option<String>,
}

/// A message as a parser hands it to the pipeline. Sender names are the
/// point-in-time values observed on the message itself.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub sender_platform_id: String,
    pub account_name: String,
    pub group_nickname: Option<String>,
    pub timestamp: i64,
    pub msg_type: MessageType,
    pub content: Option<String>,
}

// ─── Canonical export (wire format, also the chatlab parse target) ───

pub const CHATLAB_FORMAT_VERSION: &str = "0.0.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatlabStamp {
    pub version: String,
    pub exported_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSource {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub message_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub name: String,
    pub platform: Platform,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<ExportSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMember {
    pub platform_id: String,
    pub account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMessage {
    pub sender: String,
    pub account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_nickname: Option<String>,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub content: Option<String>,
}

// ─── Query filter ───

/// Uniform filter applied conjunctively to query operations. Aggregates
/// additionally exclude the system author.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryFilter {
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub member_id: Option<i64>,
}

/// Account name the import pipelines assign to platform system notices.
/// Human-facing aggregates exclude it.
pub const SYSTEM_AUTHOR: &str = "系统消息";

// ─── Session summaries (worker results) ───

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub imported_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    pub message_count: u64,
    pub member_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: i64,
    pub platform_id: String,
    pub account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_nickname: Option<String>,
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub message_count: u64,
}

/// A stored message as returned by paging and context queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_nickname: Option<String>,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub msg_type: i64,
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_wire() {
        for t in [
            MessageType::Text,
            MessageType::Emoji,
            MessageType::Link,
            MessageType::RedPacket,
            MessageType::Contact,
            MessageType::Recall,
            MessageType::Other,
        ] {
            assert_eq!(MessageType::from_wire(t.as_wire()), t);
        }
    }

    #[test]
    fn unknown_wire_values_map_to_other() {
        assert_eq!(MessageType::from_wire(6), MessageType::Other);
        assert_eq!(MessageType::from_wire(42), MessageType::Other);
        assert!(!MessageType::is_known_wire(6));
        assert!(MessageType::is_known_wire(99));
    }

    #[test]
    fn canonical_export_uses_camel_case_keys() {
        let msg = ExportMessage {
            sender: "10".into(),
            account_name: "A".into(),
            group_nickname: None,
            timestamp: 1_700_000_000,
            msg_type: MessageType::Text,
            content: Some("hi".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["accountName"], "A");
        assert_eq!(json["type"], 0);
    }
}
