use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Pointer key naming the session currently considered active. Used to
/// clean up stale state when the activity identifier changes.
pub const ACTIVE_SESSION_KEY: &str = "active_session";

/// Storage key holding a session's start timestamp (RFC 3339 text).
pub fn start_time_key(session_key: &str) -> String {
    format!("{session_key}.start_time")
}

/// Storage key holding a session's integrity tag.
pub fn tag_key(session_key: &str) -> String {
    format!("{session_key}.integrity_tag")
}

/// Flat string key-value persistence for timer sessions.
///
/// Reads and writes are synchronous and local; there is no network I/O in
/// this layer.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store for tests and for hosts that manage durability
/// themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("session store mutex poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("session store mutex poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("session store mutex poisoned"))?;
        values.remove(key);
        Ok(())
    }
}

/// Durable store backed by a single JSON document on disk.
///
/// The document is re-read on every access so that out-of-band edits are
/// observed by the next validation pass, and written atomically (temp file
/// plus rename) so a crash never leaves a torn file behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("sessions.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session store: {}", self.path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse session store: {}", self.path.display()))
    }

    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(values).context("failed to serialize session store")?;

        atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("failed to write session store: {}", self.path.display()))
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

/// Write content to a temporary file in the same directory, sync it, then
/// rename over the target path.
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create storage directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("failed to create temporary file: {}", temp_path.display()))?;
        file.write_all(content)
            .context("failed to write temporary file")?;
        file.sync_all().context("failed to sync file to disk")?;
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
