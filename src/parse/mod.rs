//! Stream parsers: one per supported format.
//!
//! Every parser consumes a file path and pushes an ordered event
//! sequence into a [`ParseSink`]: one meta, one members roster, zero or
//! more message batches, and interleaved progress. The terminal outcome
//! is the returned [`ParseSummary`] (or an error, in which case the
//! caller treats the session as not created). Inputs are read through
//! an incremental byte pipeline; memory stays bounded by the current
//! batch plus parser-local caches such as avatar indexes.

pub mod chatlab;
pub mod discord;
pub mod heuristics;
pub mod json_scan;
pub mod preprocess;
pub mod qq;
pub mod timestamp;
pub mod wechat;

use std::path::Path;

use anyhow::Result;

use crate::formats::FormatId;
use crate::types::{ParsedMeta, RawMember, RawMessage};
use crate::worker::AbortToken;

/// Consumer side of the parser event stream.
pub trait ParseSink {
    fn on_meta(&mut self, meta: ParsedMeta) -> Result<()>;
    fn on_members(&mut self, members: Vec<RawMember>) -> Result<()>;
    fn on_messages(&mut self, batch: Vec<RawMessage>) -> Result<()>;
    fn on_progress(&mut self, _progress: ParseProgress) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseProgress {
    pub bytes_read: u64,
    pub total_bytes: u64,
    pub messages_seen: u64,
}

impl ParseProgress {
    /// `min(100, round(100·bytesRead/totalBytes))`.
    pub fn percentage(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let pct = (100.0 * self.bytes_read as f64 / self.total_bytes as f64).round() as u64;
        pct.min(100) as u8
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Messages per `on_messages` batch.
    pub batch_size: usize,
    pub abort: AbortOption,
}

/// Parsers run both under the worker (with a live token) and in tests.
#[derive(Debug, Clone, Default)]
pub struct AbortOption(Option<AbortToken>);

impl AbortOption {
    pub fn none() -> Self {
        AbortOption(None)
    }

    pub fn token(token: AbortToken) -> Self {
        AbortOption(Some(token))
    }

    pub fn check(&self) -> Result<()> {
        match &self.0 {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            batch_size: 5000,
            abort: AbortOption::none(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseSummary {
    pub messages: u64,
    /// Soft-dropped messages: missing sender, implausible timestamp,
    /// malformed element.
    pub dropped: u64,
    pub bytes_read: u64,
}

/// Dispatch table over the format registry.
pub fn parse_file(
    format: FormatId,
    path: &Path,
    opts: &ParseOptions,
    sink: &mut dyn ParseSink,
) -> Result<ParseSummary> {
    match format {
        FormatId::Chatlab => chatlab::parse(path, opts, sink),
        FormatId::QqBackup => qq::parse(path, opts, sink),
        FormatId::DiscordExporter => discord::parse(path, opts, sink),
        FormatId::WechatText => wechat::parse(path, opts, sink),
    }
}

/// Summary info for a file without persisting anything: detected
/// format, meta, roster size, message count. Backs the
/// `*.parseFileInfo` operations.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub format: String,
    pub format_name: String,
    pub platform: crate::types::Platform,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: crate::types::SessionKind,
    pub member_count: u64,
    pub message_count: u64,
    pub dropped_count: u64,
    pub first_ts: Option<i64>,
    pub last_ts: Option<i64>,
}

struct CountingSink {
    meta: Option<ParsedMeta>,
    members: u64,
    messages: u64,
    first_ts: Option<i64>,
    last_ts: Option<i64>,
}

impl ParseSink for CountingSink {
    fn on_meta(&mut self, meta: ParsedMeta) -> Result<()> {
        self.meta = Some(meta);
        Ok(())
    }

    fn on_members(&mut self, members: Vec<RawMember>) -> Result<()> {
        self.members = members.len() as u64;
        Ok(())
    }

    fn on_messages(&mut self, batch: Vec<RawMessage>) -> Result<()> {
        self.messages += batch.len() as u64;
        for msg in &batch {
            self.first_ts = Some(match self.first_ts {
                Some(t) => t.min(msg.timestamp),
                None => msg.timestamp,
            });
            self.last_ts = Some(match self.last_ts {
                Some(t) => t.max(msg.timestamp),
                None => msg.timestamp,
            });
        }
        Ok(())
    }
}

pub fn collect_file_info(path: &Path, opts: &ParseOptions) -> Result<FileInfo> {
    use crate::error::CoreError;
    use crate::formats::{descriptor, detect, SniffOutcome};

    let format = match detect(path)? {
        SniffOutcome::Matched(id) => id,
        SniffOutcome::Unrecognized(diagnosis) => {
            return Err(CoreError::UnrecognizedFormat { diagnosis }.into())
        }
    };

    let mut sink = CountingSink {
        meta: None,
        members: 0,
        messages: 0,
        first_ts: None,
        last_ts: None,
    };
    let summary = parse_file(format, path, opts, &mut sink)?;
    let desc = descriptor(format);
    let meta = sink
        .meta
        .ok_or_else(|| CoreError::Parse("input yielded no meta".into()))?;

    Ok(FileInfo {
        format: desc.id.as_str().to_string(),
        format_name: desc.display_name.to_string(),
        platform: meta.platform,
        name: meta.name,
        kind: meta.kind,
        member_count: sink.members,
        message_count: sink.messages,
        dropped_count: summary.dropped,
        first_ts: sink.first_ts,
        last_ts: sink.last_ts,
    })
}
