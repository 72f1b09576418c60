//! JSON snapshot file for the ledger.

use super::{LedgerError, LedgerSnapshot};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Reads and atomically rewrites the ledger snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<LedgerSnapshot>, LedgerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| self.error(e))?;
        let snapshot = serde_json::from_str(&raw).map_err(|e| self.error(e))?;
        Ok(Some(snapshot))
    }

    /// Replace the snapshot file.
    ///
    /// Writes a temp file in the same directory and renames it over the
    /// target, so readers never observe a half-written document.
    pub fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.error(e))?;

        let tmp = NamedTempFile::new_in(&dir).map_err(|e| self.error(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|e| self.error(e))?;
            writer.flush().map_err(|e| self.error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.error(e))?;
        tmp.persist(&self.path).map_err(|e| self.error(e.error))?;

        debug!(
            path = ?self.path,
            positions = snapshot.positions.len(),
            day_trades = snapshot.day_trades.len(),
            "Ledger snapshot written"
        );
        Ok(())
    }

    fn error(&self, reason: impl std::fmt::Display) -> LedgerError {
        LedgerError::Persistence {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}
