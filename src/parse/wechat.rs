//! Parser for line-oriented WeChat backup text.
//!
//! Record shape: a header line `YYYY-MM-DD HH:MM:SS <name>(<id>)`
//! followed by one or more content lines, terminated by the next header
//! or end of file. Types come entirely from content heuristics; the
//! `系统消息` pseudo-sender marks platform notices.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Result;

use crate::parse::{heuristics, timestamp, ParseOptions, ParseProgress, ParseSink, ParseSummary};
use crate::types::{
    MessageType, ParsedMeta, Platform, RawMember, RawMessage, SessionKind, SYSTEM_AUTHOR,
};

pub fn parse(path: &Path, opts: &ParseOptions, sink: &mut dyn ParseSink) -> Result<ParseSummary> {
    let total_bytes = std::fs::metadata(path)?.len();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("微信聊天记录")
        .to_string();
    sink.on_meta(ParsedMeta {
        name,
        platform: Platform::Wechat,
        kind: SessionKind::Group,
        group_id: None,
        group_avatar: None,
    })?;

    let reader = BufReader::new(File::open(path)?);

    let mut summary = ParseSummary::default();
    let mut batch: Vec<RawMessage> = Vec::with_capacity(opts.batch_size);
    let mut roster: Vec<RawMember> = Vec::new();
    let mut roster_index: HashMap<String, usize> = HashMap::new();

    let mut bytes_read: u64 = 0;
    let mut pending: Option<(i64, String, String)> = None; // (ts, name, id)
    let mut content_lines: Vec<String> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        bytes_read += line.len() as u64 + 1;

        if let Some((ts, sender_name, sender_id)) = parse_header(&line) {
            finish_record(
                &mut pending,
                &mut content_lines,
                &mut batch,
                &mut roster,
                &mut roster_index,
                &mut summary,
            );
            pending = Some((ts, sender_name, sender_id));
            if batch.len() >= opts.batch_size {
                opts.abort.check()?;
                summary.messages += batch.len() as u64;
                sink.on_messages(std::mem::take(&mut batch))?;
                sink.on_progress(ParseProgress {
                    bytes_read,
                    total_bytes,
                    messages_seen: summary.messages,
                })?;
            }
        } else if pending.is_some() {
            content_lines.push(line);
        }
        // preamble lines before the first header are ignored
    }
    finish_record(
        &mut pending,
        &mut content_lines,
        &mut batch,
        &mut roster,
        &mut roster_index,
        &mut summary,
    );

    if !batch.is_empty() {
        summary.messages += batch.len() as u64;
        sink.on_messages(std::mem::take(&mut batch))?;
    }
    sink.on_members(roster)?;
    summary.bytes_read = bytes_read;
    sink.on_progress(ParseProgress {
        bytes_read,
        total_bytes,
        messages_seen: summary.messages,
    })?;
    Ok(summary)
}

/// `2023-05-01 09:30:00 阿明(wxid_abc)` → (ts, name, id). The platform
/// id is taken from the last parenthesized group so display names
/// containing parens keep working.
fn parse_header(line: &str) -> Option<(i64, String, String)> {
    let line = line.trim_end();
    if line.len() < 19 || !line.is_char_boundary(19) {
        return None;
    }
    let (ts_part, rest) = line.split_at(19);
    let ts = timestamp::from_str(ts_part).and_then(timestamp::plausible)?;

    let rest = rest.strip_prefix(' ')?;
    if !rest.ends_with(')') {
        return None;
    }
    let open = rest.rfind('(')?;
    let name = rest[..open].trim();
    let id = &rest[open + 1..rest.len() - 1];
    if name.is_empty() || id.is_empty() {
        return None;
    }
    Some((ts, name.to_string(), id.to_string()))
}

fn finish_record(
    pending: &mut Option<(i64, String, String)>,
    content_lines: &mut Vec<String>,
    batch: &mut Vec<RawMessage>,
    roster: &mut Vec<RawMember>,
    roster_index: &mut HashMap<String, usize>,
    summary: &mut ParseSummary,
) {
    let (ts, sender_name, sender_id) = match pending.take() {
        Some(p) => p,
        None => return,
    };
    while content_lines.last().map(|l| l.trim().is_empty()) == Some(true) {
        content_lines.pop();
    }
    if content_lines.is_empty() {
        summary.dropped += 1;
        return;
    }
    let content = content_lines.join("\n");
    content_lines.clear();

    let is_system = sender_name == SYSTEM_AUTHOR || sender_id == "system";
    let msg_type = if is_system {
        MessageType::System
    } else {
        heuristics::classify_content(&content).unwrap_or(MessageType::Text)
    };
    let account_name = if is_system {
        SYSTEM_AUTHOR.to_string()
    } else {
        sender_name
    };

    if !roster_index.contains_key(&sender_id) {
        roster_index.insert(sender_id.clone(), roster.len());
        roster.push(RawMember {
            platform_id: sender_id.clone(),
            account_name: account_name.clone(),
            group_nickname: None,
            avatar: None,
        });
    }

    batch.push(RawMessage {
        sender_platform_id: sender_id,
        account_name,
        group_nickname: None,
        timestamp: ts,
        msg_type,
        content: Some(content),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lines_parse() {
        let (ts, name, id) = parse_header("2023-05-01 09:30:00 阿明(wxid_abc)").unwrap();
        assert!(ts > 0);
        assert_eq!(name, "阿明");
        assert_eq!(id, "wxid_abc");
    }

    #[test]
    fn parens_in_names_resolve_to_last_group() {
        let (_, name, id) = parse_header("2023-05-01 09:30:00 阿明(大)(wxid_abc)").unwrap();
        assert_eq!(name, "阿明(大)");
        assert_eq!(id, "wxid_abc");
    }

    #[test]
    fn content_lines_are_not_headers() {
        assert!(parse_header("早上好").is_none());
        assert!(parse_header("2023-05-01 09:30:00 no id here").is_none());
    }
}
