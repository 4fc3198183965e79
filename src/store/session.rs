//! Session store: the per-conversation embedded database.
//!
//! One `SessionStore` wraps one SQLite file under `databases/`. Bulk
//! import drives it through explicit `begin`/`commit` so a single
//! transaction can span many parser batches; everything else uses
//! per-call statements.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::CoreError;
use crate::store::{apply_read_pragmas, apply_write_pragmas, schema};
use crate::types::{MemberInfo, ParsedMeta, Platform, RawMember, RawMessage, SessionKind};

pub struct SessionStore {
    conn: Connection,
    path: PathBuf,
}

/// The single meta row of a store.
#[derive(Debug, Clone)]
pub struct StoredMeta {
    pub name: String,
    pub platform: Platform,
    pub kind: SessionKind,
    pub imported_at: i64,
    pub group_id: Option<String>,
    pub group_avatar: Option<String>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameHistoryEntry {
    pub id: i64,
    pub member_id: i64,
    pub name_type: String,
    pub name: String,
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

impl SessionStore {
    /// Create a fresh store at the latest schema version. Secondary
    /// indexes are deferred to [`SessionStore::create_indexes`].
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to create store at {}", path.display()))?;
        apply_write_pragmas(&conn)?;
        conn.execute_batch(schema::BASE_DDL)
            .context("failed to initialize session schema")?;
        conn.pragma_update(None, "user_version", schema::SCHEMA_VERSION)?;
        Ok(SessionStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store for writing.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::NotFound(path.display().to_string()).into());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        apply_write_pragmas(&conn)?;
        Ok(SessionStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store read-only (query layer, handle cache).
    pub fn open_read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::NotFound(path.display().to_string()).into());
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open store at {}", path.display()))?;
        apply_read_pragmas(&conn)?;
        Ok(SessionStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ─── Transaction control for bulk import ───

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Truncating WAL checkpoint.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn create_indexes(&self) -> Result<()> {
        self.conn.execute_batch(schema::INDEX_DDL)?;
        Ok(())
    }

    // ─── Meta ───

    pub fn insert_meta(&self, meta: &ParsedMeta, imported_at: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (name, platform, type, imported_at, group_id, group_avatar)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.name,
                meta.platform.as_str(),
                meta.kind.as_str(),
                imported_at,
                meta.group_id,
                meta.group_avatar,
            ],
        )?;
        Ok(())
    }

    pub fn read_meta(&self) -> Result<StoredMeta> {
        let meta = self
            .conn
            .query_row(
                "SELECT name, platform, type, imported_at, group_id, group_avatar, owner_id
                 FROM meta LIMIT 1",
                [],
                |row| {
                    Ok(StoredMeta {
                        name: row.get(0)?,
                        platform: Platform::parse(&row.get::<_, String>(1)?),
                        kind: SessionKind::parse(&row.get::<_, String>(2)?),
                        imported_at: row.get(3)?,
                        group_id: row.get(4)?,
                        group_avatar: row.get(5)?,
                        owner_id: row.get(6)?,
                    })
                },
            )
            .optional()?;
        meta.ok_or_else(|| CoreError::NotFound("store has no meta row".into()).into())
    }

    pub fn rename(&self, name: &str) -> Result<()> {
        self.conn
            .execute("UPDATE meta SET name = ?1", params![name])?;
        Ok(())
    }

    pub fn set_owner(&self, owner_id: Option<i64>) -> Result<()> {
        self.conn
            .execute("UPDATE meta SET owner_id = ?1", params![owner_id])?;
        Ok(())
    }

    // ─── Members ───

    /// Insert or update a member by platform id; non-empty incoming
    /// attributes win over stored ones.
    pub fn upsert_member(&self, member: &RawMember) -> Result<i64> {
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
        self.member_id(&member.platform_id)?
            .ok_or_else(|| anyhow::anyhow!("member vanished after upsert"))
    }

    /// Insert an avatar-less member row if the platform id is new,
    /// returning the member id either way. Used for senders first seen
    /// through messages.
    pub fn ensure_member(
        &self,
        platform_id: &str,
        account_name: &str,
        group_nickname: Option<&str>,
    ) -> Result<i64> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO member (platform_id, account_name, group_nickname)
             VALUES (?1, ?2, ?3)",
        )?;
        stmt.execute(params![platform_id, account_name, group_nickname])?;
        self.member_id(platform_id)?
            .ok_or_else(|| anyhow::anyhow!("member vanished after insert"))
    }

    pub fn member_id(&self, platform_id: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM member WHERE platform_id = ?1")?;
        Ok(stmt
            .query_row(params![platform_id], |row| row.get(0))
            .optional()?)
    }

    pub fn list_members(&self) -> Result<Vec<MemberInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.platform_id, m.account_name, m.group_nickname, m.aliases, m.avatar,
                    (SELECT COUNT(*) FROM message WHERE sender_id = m.id) AS message_count
             FROM member m ORDER BY message_count DESC, m.id",
        )?;
        let rows = stmt.query_map([], |row| {
            let aliases_json: String = row.get(4)?;
            Ok(MemberInfo {
                id: row.get(0)?,
                platform_id: row.get(1)?,
                account_name: row.get(2)?,
                group_nickname: row.get(3)?,
                aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
                avatar: row.get(5)?,
                message_count: row.get::<_, i64>(6)? as u64,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn update_aliases(&self, member_id: i64, aliases: &[String]) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE member SET aliases = ?1 WHERE id = ?2",
            params![serde_json::to_string(aliases)?, member_id],
        )?;
        if updated == 0 {
            return Err(CoreError::NotFound(format!("member {member_id}")).into());
        }
        Ok(())
    }

    /// Remove a member with their messages and name history.
    pub fn delete_member(&self, member_id: i64) -> Result<()> {
        self.begin()?;
        let result = (|| -> Result<()> {
            self.conn
                .execute("DELETE FROM message WHERE sender_id = ?1", params![member_id])?;
            self.conn.execute(
                "DELETE FROM member_name_history WHERE member_id = ?1",
                params![member_id],
            )?;
            let deleted = self
                .conn
                .execute("DELETE FROM member WHERE id = ?1", params![member_id])?;
            if deleted == 0 {
                return Err(CoreError::NotFound(format!("member {member_id}")).into());
            }
            // the index no longer matches the message set
            self.clear_session_index_locked()?;
            Ok(())
        })();
        match result {
            Ok(()) => self.commit(),
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    pub fn update_member_names(
        &self,
        member_id: i64,
        account_name: &str,
        group_nickname: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE member SET
                 account_name = CASE WHEN ?1 != '' THEN ?1 ELSE account_name END,
                 group_nickname = COALESCE(?2, group_nickname)
             WHERE id = ?3",
            params![account_name, group_nickname, member_id],
        )?;
        Ok(())
    }

    // ─── Messages ───

    pub fn insert_message(&self, sender_id: i64, msg: &RawMessage) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO message (sender_id, sender_account_name, sender_group_nickname, ts, type, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            sender_id,
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

    pub fn member_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM member", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ─── Name history ───

    pub fn insert_name_history(
        &self,
        member_id: i64,
        name_type: &str,
        name: &str,
        start_ts: i64,
        end_ts: Option<i64>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO member_name_history (member_id, name_type, name, start_ts, end_ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![member_id, name_type, name, start_ts, end_ts])?;
        Ok(())
    }

    /// All history rows for a member, most recent first.
    pub fn name_history(&self, member_id: i64) -> Result<Vec<NameHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, member_id, name_type, name, start_ts, end_ts
             FROM member_name_history WHERE member_id = ?1
             ORDER BY start_ts DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![member_id], |row| {
            Ok(NameHistoryEntry {
                id: row.get(0)?,
                member_id: row.get(1)?,
                name_type: row.get(2)?,
                name: row.get(3)?,
                start_ts: row.get(4)?,
                end_ts: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ─── Session index ───

    pub fn clear_session_index(&self) -> Result<()> {
        self.begin()?;
        match self.clear_session_index_locked() {
            Ok(()) => self.commit(),
            Err(e) => {
                let _ = self.rollback();
                Err(e)
            }
        }
    }

    fn clear_session_index_locked(&self) -> Result<()> {
        self.conn.execute("DELETE FROM session_index", [])?;
        self.conn.execute("DELETE FROM session_index_meta", [])?;
        Ok(())
    }
}
