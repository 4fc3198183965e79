//! Process settings loaded from `settings/core.json`.
//!
//! Unspecified fields fall back to defaults, so a partial settings file
//! keeps working across releases.

use serde::{Deserialize, Serialize};

use crate::paths::AppDirs;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Inter-message gap that splits session-index entries, in seconds.
    pub gap_threshold_seconds: i64,
    /// Messages per parser batch.
    pub message_batch_size: usize,
    /// Commit the import transaction every N messages.
    pub commit_every_messages: u64,
    /// Truncate the WAL every N messages during import.
    pub checkpoint_every_messages: u64,
    /// Row cap applied to raw SQL execution.
    pub sql_row_limit: usize,
    /// Wall-clock bound for raw SQL execution, in milliseconds.
    pub sql_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            gap_threshold_seconds: 1800,
            message_batch_size: 5000,
            commit_every_messages: 50_000,
            checkpoint_every_messages: 200_000,
            sql_row_limit: 1000,
            sql_timeout_ms: 5000,
        }
    }
}

const SETTINGS_FILENAME: &str = "core.json";

impl Settings {
    /// Load settings, falling back to defaults when the file is absent
    /// or unreadable.
    pub fn load(dirs: &AppDirs) -> Settings {
        let path = dirs.settings().join(SETTINGS_FILENAME);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Settings::default(),
        }
    }

    pub fn save(&self, dirs: &AppDirs) -> anyhow::Result<()> {
        let path = dirs.settings().join(SETTINGS_FILENAME);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_keep_defaults() {
        let parsed: Settings = serde_json::from_str(r#"{"gapThresholdSeconds": 600}"#).unwrap();
        assert_eq!(parsed.gap_threshold_seconds, 600);
        assert_eq!(parsed.message_batch_size, 5000);
        assert_eq!(parsed.commit_every_messages, 50_000);
    }
}
