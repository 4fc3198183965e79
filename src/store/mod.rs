//! Embedded relational stores: one per session, plus merge staging.

pub mod cache;
pub mod migrate;
pub mod schema;
pub mod session;
pub mod staging;

use anyhow::Result;
use rusqlite::Connection;

pub use cache::StoreCache;
pub use session::{NameHistoryEntry, SessionStore, StoredMeta};
pub use staging::StagingStore;

/// Import pragmas: write-ahead journal with relaxed (but safe) sync.
pub(crate) fn apply_write_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub(crate) fn apply_read_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
