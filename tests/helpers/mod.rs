#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use chatlab_core::import::{self, ImportOptions, ImportOutcome};
use chatlab_core::paths::AppDirs;
use chatlab_core::store::SessionStore;

/// Isolated app root for one test.
pub fn test_dirs() -> (TempDir, AppDirs) {
    let tmp = TempDir::new().unwrap();
    let dirs = AppDirs::new(tmp.path().join("ChatLab")).unwrap();
    (tmp, dirs)
}

/// A minimal canonical export with the given members/messages arrays.
pub fn chatlab_export(
    name: &str,
    platform: &str,
    members: serde_json::Value,
    messages: serde_json::Value,
) -> serde_json::Value {
    json!({
        "chatlab": {"version": "0.0.1", "exportedAt": 1},
        "meta": {"name": name, "platform": platform, "type": "group"},
        "members": members,
        "messages": messages,
    })
}

pub fn msg(sender: &str, name: &str, ts: i64, content: &str) -> serde_json::Value {
    json!({
        "sender": sender,
        "accountName": name,
        "timestamp": ts,
        "type": 0,
        "content": content,
    })
}

pub fn typed_msg(
    sender: &str,
    name: &str,
    ts: i64,
    msg_type: i64,
    content: &str,
) -> serde_json::Value {
    json!({
        "sender": sender,
        "accountName": name,
        "timestamp": ts,
        "type": msg_type,
        "content": content,
    })
}

pub fn member(platform_id: &str, name: &str) -> serde_json::Value {
    json!({"platformId": platform_id, "accountName": name})
}

pub fn write_json(dir: &Path, filename: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.join(filename);
    std::fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
    path
}

/// Import a file with default options, panicking on failure.
pub fn import_file(dirs: &AppDirs, source: &Path) -> ImportOutcome {
    import::import_file(dirs, source, &ImportOptions::default(), &mut |_| {}).unwrap()
}

pub fn open_session(dirs: &AppDirs, session_id: &str) -> SessionStore {
    SessionStore::open_read(&dirs.session_db(session_id)).unwrap()
}

/// Count helper for ad-hoc assertions against a store.
pub fn count(store: &SessionStore, sql: &str) -> i64 {
    store.conn().query_row(sql, [], |row| row.get(0)).unwrap()
}
