//! Versioned schema migrations across session stores.
//!
//! Each store records its schema version in `PRAGMA user_version`.
//! Startup reports how many stores trail the latest version and which
//! migration steps are pending; `run_all` applies each store's chain in
//! a single transaction per store. The v2 column additions also run
//! lazily on first use per session (`ensure_member_columns`), so stores
//! written by old builds keep working before an explicit migration.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::paths::AppDirs;
use crate::store::schema::SCHEMA_VERSION;
use crate::store::SessionStore;

pub struct Migration {
    /// Version a store reaches after this step.
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        description: "add alias list and inline avatars to members",
        sql: "ALTER TABLE member ADD COLUMN aliases TEXT NOT NULL DEFAULT '[]';
              ALTER TABLE member ADD COLUMN avatar TEXT;",
    },
    Migration {
        version: 3,
        description: "add owner assignment to session meta",
        sql: "ALTER TABLE meta ADD COLUMN owner_id INTEGER;",
    },
];

pub fn store_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_store_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Migration steps a store at `version` still needs.
pub fn pending_for(version: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > version)
}

/// Upgrade one store to the latest version. Each step runs inside one
/// transaction together with the version bump.
pub fn migrate_store(conn: &Connection) -> Result<u32> {
    let mut applied = 0;
    let current = store_version(conn)?;
    if current > SCHEMA_VERSION {
        anyhow::bail!(
            "store schema version {current} is newer than this build ({SCHEMA_VERSION})"
        );
    }
    for migration in pending_for(current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .with_context(|| format!("migration to v{} failed", migration.version))?;
        set_store_version(&tx, migration.version)?;
        tx.commit()?;
        applied += 1;
    }
    Ok(applied)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMigration {
    pub version: u32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub latest_version: u32,
    pub store_count: usize,
    pub stores_behind: usize,
    pub pending: Vec<PendingMigration>,
}

/// Scan every session store and report pending work.
pub fn check_all(dirs: &AppDirs) -> Result<MigrationReport> {
    let sessions = dirs.list_sessions()?;
    let mut behind = 0;
    let mut oldest = SCHEMA_VERSION;
    for id in &sessions {
        let store = SessionStore::open_read(&dirs.session_db(id))?;
        let version = store_version(store.conn())?;
        if version < SCHEMA_VERSION {
            behind += 1;
            oldest = oldest.min(version);
        }
    }
    let pending = if behind > 0 {
        pending_for(oldest)
            .map(|m| PendingMigration {
                version: m.version,
                description: m.description.to_string(),
            })
            .collect()
    } else {
        Vec::new()
    };
    Ok(MigrationReport {
        latest_version: SCHEMA_VERSION,
        store_count: sessions.len(),
        stores_behind: behind,
        pending,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRunReport {
    pub stores_migrated: usize,
    pub steps_applied: u32,
}

/// Upgrade every store that trails the latest version.
pub fn run_all(dirs: &AppDirs) -> Result<MigrationRunReport> {
    let mut stores_migrated = 0;
    let mut steps_applied = 0;
    for id in dirs.list_sessions()? {
        let store = SessionStore::open(&dirs.session_db(&id))?;
        let applied = migrate_store(store.conn())?;
        if applied > 0 {
            info!(session = %id, steps = applied, "migrated session store");
            stores_migrated += 1;
            steps_applied += applied;
        }
    }
    Ok(MigrationRunReport {
        stores_migrated,
        steps_applied,
    })
}

/// Idempotent soft-migration: add the v2 member columns when absent.
/// Callers memoize per session for the process lifetime.
pub fn ensure_member_columns(conn: &Connection) -> Result<()> {
    let mut has_aliases = false;
    let mut has_avatar = false;
    let mut stmt = conn.prepare("PRAGMA table_info(member)")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        match name?.as_str() {
            "aliases" => has_aliases = true,
            "avatar" => has_avatar = true,
            _ => {}
        }
    }
    if !has_aliases {
        conn.execute_batch("ALTER TABLE member ADD COLUMN aliases TEXT NOT NULL DEFAULT '[]'")?;
    }
    if !has_avatar {
        conn.execute_batch("ALTER TABLE member ADD COLUMN avatar TEXT")?;
    }
    Ok(())
}
