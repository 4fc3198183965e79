//! Bounded cache of open read handles, keyed by session id.
//!
//! The worker keeps recently used read connections alive between query
//! requests. Capacity is small; eviction is least-recently-used. Delete
//! operations must evict before removing files so no handle outlives
//! its store.

use anyhow::Result;

use crate::paths::AppDirs;
use crate::store::SessionStore;

pub struct StoreCache {
    capacity: usize,
    /// Most recently used first.
    entries: Vec<(String, SessionStore)>,
}

impl StoreCache {
    pub fn new(capacity: usize) -> Self {
        StoreCache {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    /// Fetch (or open) the read handle for a session.
    pub fn get(&mut self, dirs: &AppDirs, session_id: &str) -> Result<&SessionStore> {
        if let Some(at) = self.entries.iter().position(|(id, _)| id == session_id) {
            let entry = self.entries.remove(at);
            self.entries.insert(0, entry);
        } else {
            let store = SessionStore::open_read(&dirs.session_db(session_id))?;
            self.entries.insert(0, (session_id.to_string(), store));
            self.entries.truncate(self.capacity);
        }
        Ok(&self.entries[0].1)
    }

    pub fn evict(&mut self, session_id: &str) {
        self.entries.retain(|(id, _)| id != session_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
