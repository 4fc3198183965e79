//! Per-session store schema.
//!
//! The schema version is carried in `PRAGMA user_version`. Fresh stores
//! are created at the latest version; older stores are upgraded by the
//! migrator (`store::migrate`). Secondary indexes are intentionally not
//! part of the base DDL — bulk import creates them after the last batch.

pub const SCHEMA_VERSION: u32 = 3;

pub const BASE_DDL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    name         TEXT NOT NULL,
    platform     TEXT NOT NULL,
    type         TEXT NOT NULL,
    imported_at  INTEGER NOT NULL,
    group_id     TEXT,
    group_avatar TEXT,
    owner_id     INTEGER
);

CREATE TABLE IF NOT EXISTS member (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    platform_id    TEXT NOT NULL UNIQUE,
    account_name   TEXT NOT NULL DEFAULT '',
    group_nickname TEXT,
    aliases        TEXT NOT NULL DEFAULT '[]',
    avatar         TEXT
);

CREATE TABLE IF NOT EXISTS member_name_history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    member_id INTEGER NOT NULL REFERENCES member(id) ON DELETE CASCADE,
    name_type TEXT NOT NULL CHECK (name_type IN ('account_name', 'group_nickname')),
    name      TEXT NOT NULL,
    start_ts  INTEGER NOT NULL,
    end_ts    INTEGER
);

CREATE TABLE IF NOT EXISTS message (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id             INTEGER NOT NULL REFERENCES member(id),
    sender_account_name   TEXT NOT NULL DEFAULT '',
    sender_group_nickname TEXT,
    ts                    INTEGER NOT NULL,
    type                  INTEGER NOT NULL,
    content               TEXT
);

CREATE TABLE IF NOT EXISTS session_index (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    start_ts         INTEGER NOT NULL,
    end_ts           INTEGER NOT NULL,
    message_count    INTEGER NOT NULL,
    first_message_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_index_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Secondary indexes, created after bulk import.
pub const INDEX_DDL: &str = "
CREATE INDEX IF NOT EXISTS idx_message_ts ON message(ts);
CREATE INDEX IF NOT EXISTS idx_message_sender ON message(sender_id);
CREATE INDEX IF NOT EXISTS idx_name_history_member ON member_name_history(member_id);
";

/// Staging stores hold one source's parsed output during merge: meta,
/// members keyed by platform id, and raw messages without the
/// normalized sender join.
pub const STAGING_DDL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    name         TEXT NOT NULL,
    platform     TEXT NOT NULL,
    type         TEXT NOT NULL,
    group_id     TEXT,
    group_avatar TEXT
);

CREATE TABLE IF NOT EXISTS member (
    platform_id    TEXT PRIMARY KEY,
    account_name   TEXT NOT NULL DEFAULT '',
    group_nickname TEXT,
    avatar         TEXT
);

CREATE TABLE IF NOT EXISTS message (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_platform_id TEXT NOT NULL,
    account_name       TEXT NOT NULL DEFAULT '',
    group_nickname     TEXT,
    ts                 INTEGER NOT NULL,
    type               INTEGER NOT NULL,
    content            TEXT
);
CREATE INDEX IF NOT EXISTS idx_staging_message_ts ON message(ts);
";
