//! Application directory layout.
//!
//! All on-disk locations derive from a single root passed in by the host
//! (`<documents>/<AppName>` in the desktop build, a temp dir in tests):
//!
//! - `databases/` — one store per session (`<sessionId>.db` + sidecars)
//! - `temp/`      — staging stores (`merge_*.db`) and preprocessed inputs
//! - `merged/`    — canonical exports produced by the merger
//! - `settings/`  — JSON settings files

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// SQLite sidecar suffixes that must be removed together with a store.
pub const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

#[derive(Debug, Clone)]
pub struct AppDirs {
    root: PathBuf,
}

impl AppDirs {
    /// Open (and create) the directory layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let dirs = Self { root: root.into() };
        for dir in [
            dirs.databases(),
            dirs.temp(),
            dirs.merged(),
            dirs.settings(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(dirs)
    }

    /// Default root under the user's documents directory.
    pub fn default_root() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Path::new(&home).join("Documents").join("ChatLab")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn databases(&self) -> PathBuf {
        self.root.join("databases")
    }

    pub fn temp(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn merged(&self) -> PathBuf {
        self.root.join("merged")
    }

    pub fn settings(&self) -> PathBuf {
        self.root.join("settings")
    }

    pub fn session_db(&self, session_id: &str) -> PathBuf {
        self.databases().join(format!("{session_id}.db"))
    }

    pub fn staging_db(&self, tag: &str) -> PathBuf {
        self.temp().join(format!("merge_{tag}.db"))
    }

    /// List session ids by scanning the databases directory.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let dir = self.databases();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("db") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove leftover staging stores. Called on worker construction and
    /// after a successful merge.
    pub fn sweep_staging(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.temp())? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if name.starts_with("merge_") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Delete a store file together with its WAL/SHM sidecars. Missing files
/// are ignored so cleanup after a failed create is safe.
pub fn remove_store_files(db_path: &Path) -> Result<()> {
    for path in store_file_set(db_path) {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", path.display()))
            }
        }
    }
    Ok(())
}

fn store_file_set(db_path: &Path) -> Vec<PathBuf> {
    let mut files = vec![db_path.to_path_buf()];
    if let Some(s) = db_path.to_str() {
        for suffix in SIDECAR_SUFFIXES {
            files.push(PathBuf::from(format!("{s}{suffix}")));
        }
    }
    files
}
