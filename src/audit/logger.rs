use super::AuditEntry;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends [`AuditEntry`] records as JSON Lines.
///
/// Safe to share between concurrent notify tasks; each entry is written as a
/// single line under a lock.
#[derive(Debug)]
pub struct HookAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HookAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Failures are logged and swallowed.
    pub fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(path = %self.path.display(), "failed to write audit entry: {:#}", e);
        }
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("audit log lock poisoned"))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create audit directory: {}", parent.display())
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .context("Failed to append audit entry")?;
        Ok(())
    }

    /// Read every entry back, skipping lines that do not parse.
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read audit log: {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
