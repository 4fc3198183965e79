//! Import pipeline: source file → detected format → (optional
//! preprocess) → streamed parse → batched persistence.
//!
//! Throughput comes from three decisions: secondary indexes are created
//! only after the last batch, work is coalesced into large transactions
//! (commit every 50k messages, WAL truncation every 200k), and
//! name-history tracking stays in memory until a single flush at the
//! end. Failure or cancellation at any point rolls back the open
//! transaction and deletes the partial store with its sidecars.

pub mod incremental;
pub mod names;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::formats::{detect, FormatId, SniffOutcome};
use crate::parse::{
    self, preprocess, AbortOption, ParseOptions, ParseProgress, ParseSink, ParseSummary,
};
use crate::paths::{remove_store_files, AppDirs};
use crate::settings::Settings;
use crate::store::SessionStore;
use crate::types::{MessageType, ParsedMeta, RawMember, RawMessage};

use names::NameTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Detect,
    Preprocess,
    Parse,
    Finalize,
    Done,
    Error,
    Stop,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub stage: ImportStage,
    pub bytes_read: u64,
    pub total_bytes: u64,
    pub messages_processed: u64,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImportProgress {
    fn at_stage(stage: ImportStage, parse: ParseProgress) -> Self {
        ImportProgress {
            stage,
            bytes_read: parse.bytes_read,
            total_bytes: parse.total_bytes,
            messages_processed: parse.messages_seen,
            percentage: parse.percentage(),
            message: None,
        }
    }

    fn marker(stage: ImportStage, message: Option<String>) -> Self {
        ImportProgress {
            stage,
            bytes_read: 0,
            total_bytes: 0,
            messages_processed: 0,
            percentage: if stage == ImportStage::Done { 100 } else { 0 },
            message,
        }
    }
}

pub type ProgressFn<'a> = &'a mut dyn FnMut(ImportProgress);

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub commit_every: u64,
    pub checkpoint_every: u64,
    pub abort: AbortOption,
}

impl ImportOptions {
    pub fn from_settings(settings: &Settings, abort: AbortOption) -> Self {
        ImportOptions {
            batch_size: settings.message_batch_size,
            commit_every: settings.commit_every_messages,
            checkpoint_every: settings.checkpoint_every_messages,
            abort,
        }
    }

    pub(crate) fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            batch_size: self.batch_size,
            abort: self.abort.clone(),
        }
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions::from_settings(&Settings::default(), AbortOption::none())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub session_id: String,
    pub message_count: u64,
    pub member_count: u64,
    pub dropped_count: u64,
}

/// Fresh session identifier: `chat_<wall-ms>_<random-6>`.
pub fn new_session_id() -> String {
    let ms = chrono::Utc::now().timestamp_millis();
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("chat_{ms}_{}", &uuid[..6])
}

/// Import one source file into a fresh session store.
pub fn import_file(
    dirs: &AppDirs,
    source: &Path,
    opts: &ImportOptions,
    progress: ProgressFn<'_>,
) -> Result<ImportOutcome> {
    let format = match detect(source)? {
        SniffOutcome::Matched(id) => id,
        SniffOutcome::Unrecognized(diagnosis) => {
            progress(ImportProgress::marker(
                ImportStage::Error,
                Some("unrecognized_format".into()),
            ));
            return Err(CoreError::UnrecognizedFormat { diagnosis }.into());
        }
    };
    progress(ImportProgress::marker(
        ImportStage::Detect,
        Some(format.as_str().to_string()),
    ));

    let (parse_path, temp_file) = preprocess_if_needed(dirs, format, source, opts, progress)?;

    let session_id = new_session_id();
    let db_path = dirs.session_db(&session_id);
    let result = import_into_store(format, &parse_path, &db_path, opts, progress);

    if let Some(temp) = &temp_file {
        if let Err(e) = std::fs::remove_file(temp) {
            warn!(path = %temp.display(), error = %e, "failed to remove preprocessed temp file");
        }
    }

    match result {
        Ok((inserted, members, dropped)) => {
            progress(ImportProgress::marker(ImportStage::Done, None));
            info!(session = %session_id, messages = inserted, members, dropped, "import complete");
            Ok(ImportOutcome {
                session_id,
                message_count: inserted,
                member_count: members,
                dropped_count: dropped,
            })
        }
        Err(e) => {
            let stage = if e.downcast_ref::<CoreError>().map(CoreError::code) == Some("cancelled")
            {
                ImportStage::Stop
            } else {
                ImportStage::Error
            };
            progress(ImportProgress::marker(stage, Some(format!("{e:#}"))));
            Err(e)
        }
    }
}

fn preprocess_if_needed(
    dirs: &AppDirs,
    format: FormatId,
    source: &Path,
    opts: &ImportOptions,
    progress: ProgressFn<'_>,
) -> Result<(PathBuf, Option<PathBuf>)> {
    if !preprocess::needs_preprocess(format, source)? {
        return Ok((source.to_path_buf(), None));
    }
    let parse_opts = opts.parse_options();
    let trimmed = preprocess::preprocess(format, source, &dirs.temp(), &parse_opts, &mut |p| {
        progress(ImportProgress::at_stage(ImportStage::Preprocess, p))
    })?;
    Ok((trimmed.clone(), Some(trimmed)))
}

/// Parse into a fresh store; on any error the partial store and its
/// sidecars are removed.
fn import_into_store(
    format: FormatId,
    parse_path: &Path,
    db_path: &Path,
    opts: &ImportOptions,
    progress: ProgressFn<'_>,
) -> Result<(u64, u64, u64)> {
    let store = SessionStore::create(db_path)?;
    let result = (|| -> Result<(u64, u64, u64)> {
        let parse_opts = opts.parse_options();
        let (summary, sink_inserted, sink_dropped, tracker) = {
            let mut sink = ImportSink {
                store: &store,
                tracker: NameTracker::new(),
                member_ids: HashMap::new(),
                inserted: 0,
                dropped: 0,
                since_commit: 0,
                since_checkpoint: 0,
                commit_every: opts.commit_every.max(1),
                checkpoint_every: opts.checkpoint_every.max(1),
                progress: &mut *progress,
            };
            let summary = parse::parse_file(format, parse_path, &parse_opts, &mut sink)?;
            (summary, sink.inserted, sink.dropped, sink.tracker)
        };
        finalize(&store, &tracker, &opts.abort, progress)?;

        let members = store.member_count()?;
        Ok((sink_inserted, members, total_dropped(summary, sink_dropped)))
    })();

    match result {
        Ok(counts) => Ok(counts),
        Err(e) => {
            if store.in_transaction() {
                let _ = store.rollback();
            }
            drop(store);
            let _ = remove_store_files(db_path);
            Err(e)
        }
    }
}

fn total_dropped(summary: ParseSummary, sink_dropped: u64) -> u64 {
    summary.dropped + sink_dropped
}

fn finalize(
    store: &SessionStore,
    tracker: &NameTracker,
    abort: &AbortOption,
    progress: ProgressFn<'_>,
) -> Result<()> {
    abort.check()?;
    progress(ImportProgress::marker(ImportStage::Finalize, None));
    if store.in_transaction() {
        store.commit()?;
    }
    store.begin()?;
    match tracker.finalize(store) {
        Ok(()) => store.commit()?,
        Err(e) => {
            let _ = store.rollback();
            return Err(e);
        }
    }
    store.create_indexes()?;
    store.checkpoint_truncate()?;
    Ok(())
}

/// Sink that lands parser events in the session store under the batched
/// transaction regime.
struct ImportSink<'a> {
    store: &'a SessionStore,
    tracker: NameTracker,
    /// platform id → member id, so repeat senders skip the upsert.
    member_ids: HashMap<String, i64>,
    inserted: u64,
    dropped: u64,
    since_commit: u64,
    since_checkpoint: u64,
    commit_every: u64,
    checkpoint_every: u64,
    progress: &'a mut dyn FnMut(ImportProgress),
}

impl ImportSink<'_> {
    fn member_id_for(&mut self, msg: &RawMessage) -> Result<i64> {
        if let Some(&id) = self.member_ids.get(&msg.sender_platform_id) {
            return Ok(id);
        }
        let id = self.store.ensure_member(
            &msg.sender_platform_id,
            &msg.account_name,
            msg.group_nickname.as_deref(),
        )?;
        self.member_ids.insert(msg.sender_platform_id.clone(), id);
        Ok(id)
    }

    /// Message-level validity re-check; parsers enforce most of this
    /// but the pipeline is the contract holder.
    fn valid(msg: &RawMessage) -> bool {
        !msg.sender_platform_id.is_empty()
            && msg.timestamp >= 0
            && MessageType::is_known_wire(msg.msg_type.as_wire())
    }
}

impl ParseSink for ImportSink<'_> {
    fn on_meta(&mut self, meta: ParsedMeta) -> Result<()> {
        let imported_at = chrono::Utc::now().timestamp();
        self.store.insert_meta(&meta, imported_at)
    }

    fn on_members(&mut self, members: Vec<RawMember>) -> Result<()> {
        let own_txn = !self.store.in_transaction();
        if own_txn {
            self.store.begin()?;
        }
        for member in &members {
            let id = self.store.upsert_member(member)?;
            self.member_ids.insert(member.platform_id.clone(), id);
        }
        if own_txn {
            self.store.commit()?;
        }
        Ok(())
    }

    fn on_messages(&mut self, batch: Vec<RawMessage>) -> Result<()> {
        if !self.store.in_transaction() {
            self.store.begin()?;
        }
        for msg in &batch {
            if !Self::valid(msg) {
                self.dropped += 1;
                continue;
            }
            let sender_id = self.member_id_for(msg)?;
            self.store.insert_message(sender_id, msg)?;
            self.tracker.observe(
                &msg.sender_platform_id,
                &msg.account_name,
                msg.group_nickname.as_deref(),
                msg.timestamp,
            );
            self.inserted += 1;
            self.since_commit += 1;
            self.since_checkpoint += 1;
        }

        if self.since_commit >= self.commit_every {
            self.store.commit()?;
            self.since_commit = 0;
            if self.since_checkpoint >= self.checkpoint_every {
                self.store.checkpoint_truncate()?;
                self.since_checkpoint = 0;
            }
            self.store.begin()?;
        }
        Ok(())
    }

    fn on_progress(&mut self, p: ParseProgress) -> Result<()> {
        (self.progress)(ImportProgress::at_stage(ImportStage::Parse, p));
        Ok(())
    }
}
