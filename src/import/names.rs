//! In-memory name-history tracking during import.
//!
//! Comparing each message's names against persisted history would force
//! a read before every write, so the tracker keeps the observed change
//! sequence per (platform id, kind) in memory and flushes once at end
//! of import.

use std::collections::HashMap;

use anyhow::Result;

use crate::store::SessionStore;

pub const KIND_ACCOUNT: &str = "account_name";
pub const KIND_NICKNAME: &str = "group_nickname";

/// Observed names per platform id, consecutive duplicates collapsed at
/// observation time.
#[derive(Default)]
pub struct NameTracker {
    account: HashMap<String, Vec<(String, i64)>>,
    nickname: HashMap<String, Vec<(String, i64)>>,
}

impl NameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the names carried by one message.
    pub fn observe(
        &mut self,
        platform_id: &str,
        account_name: &str,
        group_nickname: Option<&str>,
        ts: i64,
    ) {
        if !account_name.is_empty() {
            observe_one(&mut self.account, platform_id, account_name, ts);
        }
        if let Some(nick) = group_nickname {
            if !nick.is_empty() {
                observe_one(&mut self.nickname, platform_id, nick, ts);
            }
        }
    }

    /// Flush: persist history for members with ≥2 distinct names, close
    /// every interval at the next start, leave the tail open, and point
    /// the member row at the latest names. Runs inside the caller's
    /// transaction.
    pub fn finalize(&self, store: &SessionStore) -> Result<()> {
        for (platform_id, entries) in &self.account {
            flush_member(store, platform_id, KIND_ACCOUNT, entries)?;
        }
        for (platform_id, entries) in &self.nickname {
            flush_member(store, platform_id, KIND_NICKNAME, entries)?;
        }

        // latest names onto the member rows
        let mut latest: HashMap<&str, (Option<&str>, Option<&str>)> = HashMap::new();
        for (pid, entries) in &self.account {
            latest.entry(pid).or_default().0 = entries.last().map(|(n, _)| n.as_str());
        }
        for (pid, entries) in &self.nickname {
            latest.entry(pid).or_default().1 = entries.last().map(|(n, _)| n.as_str());
        }
        for (pid, (account, nickname)) in latest {
            if let Some(member_id) = store.member_id(pid)? {
                store.update_member_names(member_id, account.unwrap_or(""), nickname)?;
            }
        }
        Ok(())
    }
}

fn observe_one(map: &mut HashMap<String, Vec<(String, i64)>>, pid: &str, name: &str, ts: i64) {
    let entries = map.entry(pid.to_string()).or_default();
    match entries.last() {
        Some((last, _)) if last == name => {}
        _ => entries.push((name.to_string(), ts)),
    }
}

fn flush_member(
    store: &SessionStore,
    platform_id: &str,
    kind: &str,
    entries: &[(String, i64)],
) -> Result<()> {
    let distinct = {
        let mut names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    };
    if distinct < 2 {
        return Ok(());
    }
    let member_id = match store.member_id(platform_id)? {
        Some(id) => id,
        None => return Ok(()),
    };
    for (i, (name, start)) in entries.iter().enumerate() {
        let end = entries.get(i + 1).map(|(_, next_start)| *next_start);
        store.insert_name_history(member_id, kind, name, *start, end)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_duplicates_collapse() {
        let mut tracker = NameTracker::new();
        tracker.observe("10", "A", None, 1);
        tracker.observe("10", "B", None, 2);
        tracker.observe("10", "B", None, 3);
        tracker.observe("10", "A", None, 4);
        let entries = &tracker.account["10"];
        assert_eq!(
            entries,
            &vec![("A".to_string(), 1), ("B".to_string(), 2), ("A".to_string(), 4)]
        );
    }

    #[test]
    fn single_name_produces_no_history() {
        let mut tracker = NameTracker::new();
        tracker.observe("10", "A", None, 1);
        tracker.observe("10", "A", None, 9);
        assert_eq!(tracker.account["10"].len(), 1);
    }
}
