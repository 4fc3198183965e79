//! Parser for DiscordChatExporter single-channel JSON exports.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::parse::json_scan::JsonScanner;
use crate::parse::{timestamp, ParseOptions, ParseProgress, ParseSink, ParseSummary};
use crate::types::{MessageType, ParsedMeta, Platform, RawMember, RawMessage, SessionKind};

#[derive(Deserialize, Default)]
struct Guild {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Channel {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Author {
    id: Option<String>,
    name: Option<String>,
    nickname: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Attachment {
    url: Option<String>,
    file_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    timestamp: Option<serde_json::Value>,
    content: Option<String>,
    author: Option<Author>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    stickers: Vec<serde_json::Value>,
}

pub fn parse(path: &Path, opts: &ParseOptions, sink: &mut dyn ParseSink) -> Result<ParseSummary> {
    let total_bytes = std::fs::metadata(path)?.len();
    let file = File::open(path)?;
    let mut scanner = JsonScanner::new(file);

    let mut summary = ParseSummary::default();
    let mut batch: Vec<RawMessage> = Vec::with_capacity(opts.batch_size);
    let mut elem: Vec<u8> = Vec::new();
    let mut roster: Vec<RawMember> = Vec::new();
    let mut roster_index: HashMap<String, usize> = HashMap::new();

    // guild and channel both feed the meta; the export writes guild first.
    let mut guild = Guild::default();
    let mut meta_sent = false;

    scanner.begin_object()?;
    while let Some(key) = scanner.next_key()? {
        match key.as_str() {
            "guild" => {
                guild = serde_json::from_value(scanner.read_value()?).unwrap_or_default();
            }
            "channel" => {
                let channel: Channel =
                    serde_json::from_value(scanner.read_value()?).unwrap_or_default();
                sink.on_meta(channel_meta(&guild, &channel))?;
                meta_sent = true;
            }
            "messages" => {
                scanner.begin_array()?;
                while scanner.next_element(&mut elem)? {
                    match to_raw_message(&elem) {
                        Some(msg) => {
                            observe_sender(&mut roster, &mut roster_index, &elem, &msg);
                            batch.push(msg);
                        }
                        None => summary.dropped += 1,
                    }
                    if batch.len() >= opts.batch_size {
                        opts.abort.check()?;
                        flush(sink, &mut batch, &mut summary, &scanner, total_bytes)?;
                    }
                }
            }
            _ => scanner.skip_value()?,
        }
    }

    if !meta_sent {
        sink.on_meta(channel_meta(&guild, &Channel::default()))?;
    }
    if !batch.is_empty() {
        flush(sink, &mut batch, &mut summary, &scanner, total_bytes)?;
    }
    sink.on_members(roster)?;
    summary.bytes_read = scanner.bytes_consumed();
    sink.on_progress(ParseProgress {
        bytes_read: summary.bytes_read,
        total_bytes,
        messages_seen: summary.messages,
    })?;
    Ok(summary)
}

fn channel_meta(guild: &Guild, channel: &Channel) -> ParsedMeta {
    let name = match (&guild.name, &channel.name) {
        (Some(g), Some(c)) => format!("{g} #{c}"),
        (None, Some(c)) => c.clone(),
        (Some(g), None) => g.clone(),
        (None, None) => "Discord channel".to_string(),
    };
    let kind = match channel.kind.as_deref() {
        Some("DirectTextChat") => SessionKind::Private,
        _ => SessionKind::Group,
    };
    ParsedMeta {
        name,
        platform: Platform::Discord,
        kind,
        group_id: channel.id.clone(),
        group_avatar: None,
    }
}

fn to_raw_message(elem: &[u8]) -> Option<RawMessage> {
    let wire: WireMessage = serde_json::from_slice(elem).ok()?;
    let msg_type = map_type(&wire);
    let author = wire.author?;
    let sender = author.id.filter(|s| !s.is_empty())?;
    let ts = timestamp::normalize(&wire.timestamp?)?;

    let content = wire.content.filter(|c| !c.is_empty()).or_else(|| {
        wire.attachments
            .first()
            .and_then(|a| a.url.clone().or_else(|| a.file_name.clone()))
    });

    Some(RawMessage {
        account_name: author.name.unwrap_or_else(|| sender.clone()),
        sender_platform_id: sender,
        group_nickname: author.nickname,
        timestamp: ts,
        msg_type,
        content,
    })
}

fn map_type(wire: &WireMessage) -> MessageType {
    match wire.kind.as_deref() {
        Some("Default") | None => {
            if let Some(att) = wire.attachments.first() {
                if is_image_name(att.file_name.as_deref().or(att.url.as_deref())) {
                    MessageType::Image
                } else {
                    MessageType::File
                }
            } else if !wire.stickers.is_empty() {
                MessageType::Emoji
            } else {
                MessageType::Text
            }
        }
        Some("Reply") => MessageType::Reply,
        Some("Call") => MessageType::Call,
        Some("RecipientAdd") | Some("RecipientRemove") | Some("ChannelNameChange")
        | Some("ChannelIconChange") | Some("ChannelPinnedMessage") | Some("GuildMemberJoin")
        | Some("ThreadCreated") => MessageType::System,
        Some(_) => MessageType::Other,
    }
}

fn is_image_name(name: Option<&str>) -> bool {
    let name = match name {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    // strip query strings on CDN urls
    let name = name.split('?').next().unwrap_or(&name);
    [".png", ".jpg", ".jpeg", ".gif", ".webp"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

fn observe_sender(
    roster: &mut Vec<RawMember>,
    index: &mut HashMap<String, usize>,
    elem: &[u8],
    msg: &RawMessage,
) {
    if index.contains_key(&msg.sender_platform_id) {
        return;
    }
    // re-read the author for the avatar url; the message kept only names
    let avatar = serde_json::from_slice::<WireMessage>(elem)
        .ok()
        .and_then(|w| w.author)
        .and_then(|a| a.avatar_url);
    index.insert(msg.sender_platform_id.clone(), roster.len());
    roster.push(RawMember {
        platform_id: msg.sender_platform_id.clone(),
        account_name: msg.account_name.clone(),
        group_nickname: msg.group_nickname.clone(),
        avatar,
    });
}

fn flush<R: std::io::Read>(
    sink: &mut dyn ParseSink,
    batch: &mut Vec<RawMessage>,
    summary: &mut ParseSummary,
    scanner: &JsonScanner<R>,
    total_bytes: u64,
) -> Result<()> {
    summary.messages += batch.len() as u64;
    sink.on_messages(std::mem::take(batch))?;
    sink.on_progress(ParseProgress {
        bytes_read: scanner.bytes_consumed(),
        total_bytes,
        messages_seen: summary.messages,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(kind: &str, attachments: Vec<Attachment>, stickers: usize) -> WireMessage {
        WireMessage {
            kind: Some(kind.to_string()),
            timestamp: None,
            content: None,
            author: None,
            attachments,
            stickers: vec![serde_json::Value::Null; stickers],
        }
    }

    #[test]
    fn attachments_drive_default_type() {
        let img = wire(
            "Default",
            vec![Attachment {
                url: Some("https://cdn.example/a.PNG?size=1024".into()),
                file_name: None,
            }],
            0,
        );
        assert_eq!(map_type(&img), MessageType::Image);

        let file = wire(
            "Default",
            vec![Attachment {
                url: None,
                file_name: Some("notes.pdf".into()),
            }],
            0,
        );
        assert_eq!(map_type(&file), MessageType::File);
    }

    #[test]
    fn stickers_and_system_kinds_map() {
        assert_eq!(map_type(&wire("Default", Vec::new(), 1)), MessageType::Emoji);
        assert_eq!(
            map_type(&wire("GuildMemberJoin", Vec::new(), 0)),
            MessageType::System
        );
        assert_eq!(map_type(&wire("Slash", Vec::new(), 0)), MessageType::Other);
    }
}
