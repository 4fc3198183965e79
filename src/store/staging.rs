//! Staging store: per-source temporary database used during merge and
//! incremental import.
//!
//! Messages keep their raw parsed shape (sender platform id inline, no
//! member join, no monotone id semantics). The merger walks stores in
//! timestamp buckets, so the message table carries a ts index from the
//! start.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::parse::{ParseOptions, ParseSink, ParseSummary};
use crate::store::{apply_write_pragmas, schema};
use crate::types::{MessageType, ParsedMeta, Platform, RawMember, RawMessage, SessionKind};

pub struct StagingStore {
    conn: Connection,
    path: PathBuf,
}

impl StagingStore {
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create staging store at {}", path.display()))?;
        apply_write_pragmas(&conn)?;
        conn.execute_batch(schema::STAGING_DDL)
            .context("failed to initialize staging schema")?;
        Ok(StagingStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(crate::error::CoreError::NotFound(path.display().to_string()).into());
        }
        let conn = Connection::open(path)?;
        apply_write_pragmas(&conn)?;
        Ok(StagingStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_meta(&self, meta: &ParsedMeta) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (name, platform, type, group_id, group_avatar)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meta.name,
                meta.platform.as_str(),
                meta.kind.as_str(),
                meta.group_id,
                meta.group_avatar,
            ],
        )?;
        Ok(())
    }

    pub fn read_meta(&self) -> Result<Option<ParsedMeta>> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, platform, type, group_id, group_avatar FROM meta LIMIT 1",
                [],
                |row| {
                    Ok(ParsedMeta {
                        name: row.get(0)?,
                        platform: Platform::parse(&row.get::<_, String>(1)?),
                        kind: SessionKind::parse(&row.get::<_, String>(2)?),
                        group_id: row.get(3)?,
                        group_avatar: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn upsert_member(&self, member: &RawMember) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO member (platform_id, account_name, group_nickname, avatar)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(platform_id) DO UPDATE SET
                 account_name = CASE WHEN excluded.account_name != '' THEN excluded.account_name ELSE account_name END,
                 group_nickname = COALESCE(excluded.group_nickname, group_nickname),
                 avatar = COALESCE(excluded.avatar, avatar)",
        )?;
        stmt.execute(params![
            member.platform_id,
            member.account_name,
            member.group_nickname,
            member.avatar,
        ])?;
        Ok(())
    }

    pub fn list_members(&self) -> Result<Vec<RawMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT platform_id, account_name, group_nickname, avatar FROM member ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RawMember {
                platform_id: row.get(0)?,
                account_name: row.get(1)?,
                group_nickname: row.get(2)?,
                avatar: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_message(&self, msg: &RawMessage) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO message (sender_platform_id, account_name, group_nickname, ts, type, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            msg.sender_platform_id,
            msg.account_name,
            msg.group_nickname,
            msg.timestamp,
            msg.msg_type.as_wire(),
            msg.content,
        ])?;
        Ok(())
    }

    pub fn message_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Smallest timestamp strictly greater than `after` (or the overall
    /// minimum). Drives the bucket-at-a-time merge walk.
    pub fn min_ts_after(&self, after: Option<i64>) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT MIN(ts) FROM message WHERE ts > ?1")?;
        let bound = after.unwrap_or(i64::MIN);
        Ok(stmt.query_row(params![bound], |row| row.get(0))?)
    }

    /// A page of messages in insertion order, for cursor-style scans.
    /// Returns `(staging row id, message)` pairs.
    pub fn messages_page(&self, after_id: i64, limit: usize) -> Result<Vec<(i64, RawMessage)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, sender_platform_id, account_name, group_nickname, ts, type, content
             FROM message WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after_id, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                RawMessage {
                    sender_platform_id: row.get(1)?,
                    account_name: row.get(2)?,
                    group_nickname: row.get(3)?,
                    timestamp: row.get(4)?,
                    msg_type: MessageType::from_wire(row.get(5)?),
                    content: row.get(6)?,
                },
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All messages at an exact timestamp, in insertion order.
    pub fn messages_at(&self, ts: i64) -> Result<Vec<RawMessage>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT sender_platform_id, account_name, group_nickname, ts, type, content
             FROM message WHERE ts = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![ts], |row| {
            Ok(RawMessage {
                sender_platform_id: row.get(0)?,
                account_name: row.get(1)?,
                group_nickname: row.get(2)?,
                timestamp: row.get(3)?,
                msg_type: MessageType::from_wire(row.get(4)?),
                content: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }
}

/// Sink that lands a parse stream in a staging store, one transaction
/// per batch.
pub struct StagingSink<'a> {
    store: &'a StagingStore,
    pub summary_messages: u64,
}

impl<'a> StagingSink<'a> {
    pub fn new(store: &'a StagingStore) -> Self {
        StagingSink {
            store,
            summary_messages: 0,
        }
    }
}

impl ParseSink for StagingSink<'_> {
    fn on_meta(&mut self, meta: ParsedMeta) -> Result<()> {
        self.store.insert_meta(&meta)
    }

    fn on_members(&mut self, members: Vec<RawMember>) -> Result<()> {
        self.store.begin()?;
        for member in &members {
            self.store.upsert_member(member)?;
        }
        self.store.commit()
    }

    fn on_messages(&mut self, batch: Vec<RawMessage>) -> Result<()> {
        self.store.begin()?;
        for msg in &batch {
            self.store.insert_message(msg)?;
        }
        self.store.commit()?;
        self.summary_messages += batch.len() as u64;
        Ok(())
    }
}

/// Parse a source file into a fresh staging store.
pub fn stage_source(
    source: &Path,
    staging_path: &Path,
    opts: &ParseOptions,
) -> Result<(StagingStore, ParseSummary)> {
    use crate::error::CoreError;
    use crate::formats::{detect, SniffOutcome};

    let format = match detect(source)? {
        SniffOutcome::Matched(id) => id,
        SniffOutcome::Unrecognized(diagnosis) => {
            return Err(CoreError::UnrecognizedFormat { diagnosis }.into())
        }
    };

    let store = StagingStore::create(staging_path)?;
    let summary = {
        let mut sink = StagingSink::new(&store);
        crate::parse::parse_file(format, source, opts, &mut sink)?
    };
    Ok((store, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_walk_steps_through_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = StagingStore::create(&dir.path().join("merge_t.db")).unwrap();
        for (ts, content) in [(100, "a"), (100, "b"), (200, "c")] {
            store
                .insert_message(&RawMessage {
                    sender_platform_id: "10".into(),
                    account_name: "A".into(),
                    group_nickname: None,
                    timestamp: ts,
                    msg_type: MessageType::Text,
                    content: Some(content.into()),
                })
                .unwrap();
        }
        assert_eq!(store.min_ts_after(None).unwrap(), Some(100));
        assert_eq!(store.messages_at(100).unwrap().len(), 2);
        assert_eq!(store.min_ts_after(Some(100)).unwrap(), Some(200));
        assert_eq!(store.min_ts_after(Some(200)).unwrap(), None);
    }
}
