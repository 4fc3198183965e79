//! Parser for the canonical ChatLab export format.

use std::fs::File;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::parse::json_scan::JsonScanner;
use crate::parse::{timestamp, ParseOptions, ParseProgress, ParseSink, ParseSummary};
use crate::types::{ExportMeta, MessageType, ParsedMeta, RawMember, RawMessage};

/// Message element as found on disk. Field-level `Option`s keep one
/// malformed element from failing the file; validation decides whether
/// the message survives.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    sender: Option<String>,
    account_name: Option<String>,
    group_nickname: Option<String>,
    timestamp: Option<serde_json::Value>,
    #[serde(rename = "type")]
    msg_type: Option<i64>,
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMember {
    platform_id: String,
    #[serde(default)]
    account_name: Option<String>,
    group_nickname: Option<String>,
    avatar: Option<String>,
}

pub fn parse(path: &Path, opts: &ParseOptions, sink: &mut dyn ParseSink) -> Result<ParseSummary> {
    let total_bytes = std::fs::metadata(path)?.len();
    let file = File::open(path)?;
    let mut scanner = JsonScanner::new(file);

    let mut summary = ParseSummary::default();
    let mut batch: Vec<RawMessage> = Vec::with_capacity(opts.batch_size);
    let mut elem: Vec<u8> = Vec::new();

    scanner.begin_object()?;
    while let Some(key) = scanner.next_key()? {
        match key.as_str() {
            "meta" => {
                let meta: ExportMeta = serde_json::from_value(scanner.read_value()?)?;
                sink.on_meta(ParsedMeta {
                    name: meta.name,
                    platform: meta.platform,
                    kind: meta.kind,
                    group_id: meta.group_id,
                    group_avatar: meta.group_avatar,
                })?;
            }
            "members" => {
                scanner.begin_array()?;
                let mut members = Vec::new();
                while scanner.next_element(&mut elem)? {
                    match serde_json::from_slice::<WireMember>(&elem) {
                        Ok(m) => members.push(RawMember {
                            account_name: m.account_name.unwrap_or_else(|| m.platform_id.clone()),
                            platform_id: m.platform_id,
                            group_nickname: m.group_nickname,
                            avatar: m.avatar,
                        }),
                        Err(_) => summary.dropped += 1,
                    }
                }
                sink.on_members(members)?;
            }
            "messages" => {
                scanner.begin_array()?;
                while scanner.next_element(&mut elem)? {
                    match to_raw_message(&elem) {
                        Some(msg) => batch.push(msg),
                        None => summary.dropped += 1,
                    }
                    if batch.len() >= opts.batch_size {
                        opts.abort.check()?;
                        flush(sink, &mut batch, &mut summary, &scanner, total_bytes)?;
                    }
                }
            }
            _ => {
                // "chatlab" stamp and unknown future keys
                scanner.skip_value()?;
            }
        }
    }

    if !batch.is_empty() {
        flush(sink, &mut batch, &mut summary, &scanner, total_bytes)?;
    }
    summary.bytes_read = scanner.bytes_consumed();
    sink.on_progress(ParseProgress {
        bytes_read: summary.bytes_read,
        total_bytes,
        messages_seen: summary.messages,
    })?;
    Ok(summary)
}

fn to_raw_message(elem: &[u8]) -> Option<RawMessage> {
    let wire: WireMessage = serde_json::from_slice(elem).ok()?;
    let sender = wire.sender.filter(|s| !s.is_empty())?;
    let ts = timestamp::normalize(&wire.timestamp?)?;
    let type_int = wire.msg_type?;
    if !MessageType::is_known_wire(type_int) {
        return None;
    }
    Some(RawMessage {
        account_name: wire.account_name.unwrap_or_else(|| sender.clone()),
        sender_platform_id: sender,
        group_nickname: wire.group_nickname,
        timestamp: ts,
        msg_type: MessageType::from_wire(type_int),
        content: wire.content,
    })
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
