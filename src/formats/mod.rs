//! Format registry: the ordered set of supported export formats.
//!
//! Each descriptor pairs identity (id, display name, platform) with the
//! detection signature the sniffer evaluates: permitted extensions,
//! regex patterns over a bounded file prefix, and required top-level
//! JSON field names. Lower priority wins when several formats match.

pub mod sniffer;

use crate::types::Platform;

pub use sniffer::{detect, sniff_prefix, SniffOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    Chatlab,
    QqBackup,
    DiscordExporter,
    WechatText,
}

impl FormatId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatId::Chatlab => "chatlab",
            FormatId::QqBackup => "qq-backup",
            FormatId::DiscordExporter => "discord-exporter",
            FormatId::WechatText => "wechat-text",
        }
    }
}

pub struct FormatDescriptor {
    pub id: FormatId,
    pub display_name: &'static str,
    pub platform: Platform,
    /// Lower is preferred during detection.
    pub priority: u8,
    /// Permitted file extensions; empty means unconstrained.
    pub extensions: &'static [&'static str],
    /// Regex patterns that must each match the prefix at least once.
    pub patterns: &'static [&'static str],
    /// Top-level field names that must appear as JSON keys in the prefix.
    pub required_fields: &'static [&'static str],
}

/// Bytes of file prefix the sniffer reads by default. Parsers may
/// re-read a longer prefix themselves (e.g. for avatar sections).
pub const SNIFF_PREFIX_BYTES: usize = 8 * 1024;

static REGISTRY: &[FormatDescriptor] = &[
    FormatDescriptor {
        id: FormatId::Chatlab,
        display_name: "ChatLab export",
        platform: Platform::Unknown,
        priority: 0,
        extensions: &["json"],
        patterns: &[],
        required_fields: &["chatlab", "meta", "members", "messages"],
    },
    FormatDescriptor {
        id: FormatId::QqBackup,
        display_name: "QQ chat backup",
        platform: Platform::Qq,
        priority: 1,
        extensions: &["json"],
        patterns: &[r#""uin""#],
        required_fields: &["groupInfo", "messages"],
    },
    FormatDescriptor {
        id: FormatId::DiscordExporter,
        display_name: "DiscordChatExporter",
        platform: Platform::Discord,
        priority: 2,
        extensions: &["json"],
        patterns: &[],
        required_fields: &["guild", "channel", "messages"],
    },
    FormatDescriptor {
        id: FormatId::WechatText,
        display_name: "WeChat text backup",
        platform: Platform::Wechat,
        priority: 3,
        extensions: &["txt"],
        patterns: &[r"(?m)^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} .+\(.+\)\s*$"],
        required_fields: &[],
    },
];

/// All descriptors in priority order.
pub fn registry() -> impl Iterator<Item = &'static FormatDescriptor> {
    REGISTRY.iter()
}

pub fn descriptor(id: FormatId) -> &'static FormatDescriptor {
    REGISTRY
        .iter()
        .find(|d| d.id == id)
        .expect("every FormatId has a registry entry")
}
