//! Parser for QQ chat backup exports.
//!
//! Shape: a top-level object with `groupInfo`, a large `messages` array,
//! and an optional `avatars` map (platform id → inline data-url). The
//! avatar section often sits behind the message array, so it is pulled
//! out up front: from an enlarged head prefix when it appears there,
//! otherwise by a second bounded scan of the file. The roster is
//! accumulated from message senders and delivered once streaming ends.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::parse::json_scan::{extract_section, JsonScanner};
use crate::parse::{heuristics, timestamp, ParseOptions, ParseProgress, ParseSink, ParseSummary};
use crate::types::{MessageType, ParsedMeta, Platform, RawMember, RawMessage, SessionKind};

/// Head prefix size for the inline avatar attempt.
const AVATAR_HEAD_BYTES: usize = 256 * 1024;
/// Upper bound for a captured avatar section.
const AVATAR_SECTION_MAX: usize = 64 * 1024 * 1024;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfo {
    name: Option<String>,
    group_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    uin: Option<String>,
    nick: Option<String>,
    card: Option<String>,
    time: Option<serde_json::Value>,
    #[serde(rename = "msgType")]
    msg_type: Option<String>,
    content: Option<String>,
}

pub fn parse(path: &Path, opts: &ParseOptions, sink: &mut dyn ParseSink) -> Result<ParseSummary> {
    let total_bytes = std::fs::metadata(path)?.len();
    let avatars = load_avatars(path)?;

    let file = File::open(path)?;
    let mut scanner = JsonScanner::new(file);

    let mut summary = ParseSummary::default();
    let mut batch: Vec<RawMessage> = Vec::with_capacity(opts.batch_size);
    let mut elem: Vec<u8> = Vec::new();
    // Final roster, insertion-ordered by first appearance.
    let mut roster: Vec<RawMember> = Vec::new();
    let mut roster_index: HashMap<String, usize> = HashMap::new();

    scanner.begin_object()?;
    while let Some(key) = scanner.next_key()? {
        match key.as_str() {
            "groupInfo" => {
                let info: GroupInfo = serde_json::from_value(scanner.read_value()?)?;
                sink.on_meta(ParsedMeta {
                    name: info.name.unwrap_or_else(|| "QQ聊天记录".to_string()),
                    platform: Platform::Qq,
                    kind: info
                        .kind
                        .as_deref()
                        .map(SessionKind::parse)
                        .unwrap_or(SessionKind::Group),
                    group_id: info.group_id,
                    group_avatar: info.avatar,
                })?;
            }
            "messages" => {
                scanner.begin_array()?;
                while scanner.next_element(&mut elem)? {
                    match to_raw_message(&elem) {
                        Some(msg) => {
                            observe_sender(&mut roster, &mut roster_index, &msg, &avatars);
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
            _ => {
                // version stamp, avatars (already indexed), unknown keys
                scanner.skip_value()?;
            }
        }
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

/// Avatar index: enlarged head prefix first, then a bounded full scan.
fn load_avatars(path: &Path) -> Result<HashMap<String, String>> {
    if let Some(raw) = head_prefix_section(path, "avatars")? {
        return Ok(serde_json::from_slice(&raw).unwrap_or_default());
    }
    match extract_section(path, "avatars", AVATAR_SECTION_MAX) {
        Ok(Some(raw)) => Ok(serde_json::from_slice(&raw).unwrap_or_default()),
        // an absent or oversized section costs the avatars, not the import
        _ => Ok(HashMap::new()),
    }
}

/// Try to capture a top-level section entirely inside the head prefix.
fn head_prefix_section(path: &Path, key: &str) -> Result<Option<Vec<u8>>> {
    use std::io::Read;
    let mut file = File::open(path)?;
    let mut head = vec![0u8; AVATAR_HEAD_BYTES];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let mut scanner = JsonScanner::new(&head[..]);
    if scanner.begin_object().is_err() {
        return Ok(None);
    }
    loop {
        match scanner.next_key() {
            Ok(Some(k)) if k == key => {
                let mut raw = Vec::new();
                // truncated at the prefix edge → fall back to full scan
                return match scanner.capture_value(&mut raw) {
                    Ok(()) => Ok(Some(raw)),
                    Err(_) => Ok(None),
                };
            }
            Ok(Some(_)) => {
                if scanner.skip_value().is_err() {
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        }
    }
}

fn to_raw_message(elem: &[u8]) -> Option<RawMessage> {
    let wire: WireMessage = serde_json::from_slice(elem).ok()?;
    let uin = wire.uin.filter(|s| !s.is_empty())?;
    let ts = timestamp::normalize(&wire.time?)?;
    let content = wire.content;
    let msg_type = map_type(wire.msg_type.as_deref(), content.as_deref());
    Some(RawMessage {
        account_name: wire.nick.unwrap_or_else(|| uin.clone()),
        sender_platform_id: uin,
        group_nickname: wire.card.filter(|c| !c.is_empty()),
        timestamp: ts,
        msg_type,
        content,
    })
}

/// Per-format type table, then content heuristics for untyped or
/// mislabelled text.
fn map_type(msg_type: Option<&str>, content: Option<&str>) -> MessageType {
    let mapped = match msg_type {
        Some("text") => Some(MessageType::Text),
        Some("image") | Some("pic") => Some(MessageType::Image),
        Some("voice") | Some("ptt") => Some(MessageType::Voice),
        Some("video") => Some(MessageType::Video),
        Some("file") => Some(MessageType::File),
        Some("face") | Some("marketFace") => Some(MessageType::Emoji),
        Some("link") => Some(MessageType::Link),
        Some("location") => Some(MessageType::Location),
        Some("redPacket") | Some("wallet") => Some(MessageType::RedPacket),
        Some("transfer") => Some(MessageType::Transfer),
        Some("poke") => Some(MessageType::Poke),
        Some("call") => Some(MessageType::Call),
        Some("share") | Some("ark") => Some(MessageType::Share),
        Some("reply") => Some(MessageType::Reply),
        Some("forward") => Some(MessageType::Forward),
        Some("contact") => Some(MessageType::Contact),
        Some("system") | Some("grayTip") => Some(MessageType::System),
        Some("recall") => Some(MessageType::Recall),
        _ => None,
    };
    match mapped {
        Some(MessageType::Text) | None => content
            .and_then(heuristics::classify_content)
            .or(mapped)
            .unwrap_or(if msg_type.is_none() {
                MessageType::Text
            } else {
                MessageType::Other
            }),
        Some(t) => t,
    }
}

fn observe_sender(
    roster: &mut Vec<RawMember>,
    index: &mut HashMap<String, usize>,
    msg: &RawMessage,
    avatars: &HashMap<String, String>,
) {
    match index.get(&msg.sender_platform_id) {
        Some(&at) => {
            // later sightings upgrade names that were missing earlier
            let member = &mut roster[at];
            if member.account_name.is_empty() && !msg.account_name.is_empty() {
                member.account_name = msg.account_name.clone();
            }
            if member.group_nickname.is_none() && msg.group_nickname.is_some() {
                member.group_nickname = msg.group_nickname.clone();
            }
        }
        None => {
            index.insert(msg.sender_platform_id.clone(), roster.len());
            roster.push(RawMember {
                platform_id: msg.sender_platform_id.clone(),
                account_name: msg.account_name.clone(),
                group_nickname: msg.group_nickname.clone(),
                avatar: avatars.get(&msg.sender_platform_id).cloned(),
            });
        }
    }
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

    #[test]
    fn type_table_beats_heuristics_for_structured_kinds() {
        assert_eq!(map_type(Some("image"), Some("whatever")), MessageType::Image);
        assert_eq!(map_type(Some("recall"), None), MessageType::Recall);
    }

    #[test]
    fn text_with_marker_content_reclassifies() {
        assert_eq!(map_type(Some("text"), Some("[图片]")), MessageType::Image);
        assert_eq!(map_type(Some("text"), Some("hello")), MessageType::Text);
    }

    #[test]
    fn unknown_structured_type_maps_to_other() {
        assert_eq!(map_type(Some("hologram"), Some("hello")), MessageType::Other);
        assert_eq!(map_type(None, Some("hello")), MessageType::Text);
    }
}
