use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    indexed_files: Vec<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Append-only record of files whose fragments are fully embedded and
/// stored. Persisted after every append so a crash mid-run loses at most
/// the current file's entry, never prior progress. Cleared only by a full
/// reindex.
pub struct FileLedger {
    path: PathBuf,
    files: Vec<String>,
}

impl FileLedger {
    /// A missing or corrupt ledger degrades to an empty one; the worst case
    /// is re-embedding content the cache already holds.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let files = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<LedgerFile>(&raw) {
                Ok(ledger) => ledger.indexed_files,
                Err(error) => {
                    warn!(path = %path.display(), %error, "unreadable ledger, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        if !files.is_empty() {
            info!(path = %path.display(), count = files.len(), "ledger loaded");
        }

        Self { path, files }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.iter().any(|name| name == file_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file_names(&self) -> &[String] {
        &self.files
    }

    /// Appends and persists immediately. A name is recorded at most once.
    pub fn record(&mut self, file_name: &str) -> std::io::Result<()> {
        if self.contains(file_name) {
            return Ok(());
        }
        self.files.push(file_name.to_string());
        self.persist()
    }

    pub fn clear(&mut self) -> std::io::Result<()> {
        self.files.clear();
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        let ledger = LedgerFile {
            indexed_files: self.files.clone(),
            updated_at: Some(Utc::now()),
        };
        let encoded = serde_json::to_string_pretty(&ledger)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        fs::write(&self.path, encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_survive_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("indexed_files.json");

        let mut ledger = FileLedger::load(&path);
        ledger.record("a.pdf").expect("record");
        ledger.record("b.docx").expect("record");

        let reloaded = FileLedger::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("a.pdf"));
        assert!(reloaded.contains("b.docx"));
    }

    #[test]
    fn a_file_is_recorded_at_most_once() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("indexed_files.json");

        let mut ledger = FileLedger::load(&path);
        ledger.record("a.pdf").expect("record");
        ledger.record("a.pdf").expect("record");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn clear_empties_the_persisted_state() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("indexed_files.json");

        let mut ledger = FileLedger::load(&path);
        ledger.record("a.pdf").expect("record");
        ledger.clear().expect("clear");

        let reloaded = FileLedger::load(&path);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn corrupt_ledger_degrades_to_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("indexed_files.json");
        std::fs::write(&path, "{ broken").expect("write corrupt file");

        let ledger = FileLedger::load(&path);
        assert!(ledger.is_empty());
    }

    #[test]
    fn missing_ledger_is_empty() {
        let dir = tempdir().expect("tempdir");
        let ledger = FileLedger::load(dir.path().join("absent.json"));
        assert!(ledger.is_empty());
    }
}
