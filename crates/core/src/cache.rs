use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Content-addressed on-disk memoization of embedding vectors: one JSON file
/// per entry, keyed by the hash of the exact text. Embedding dominates
/// ingestion cost, so repeated indexing of unchanged content must be
/// near-free.
///
/// Entries are immutable once written; concurrent writers storing the same
/// key write the same value, so no locking is needed. A crash loses at most
/// the entry in flight, and a half-written file simply fails to parse and is
/// treated as a miss.
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, text: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let path = self.entry_path(text);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Vec<f32>>(&raw) {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(path = %path.display(), %error, "unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Write failures are logged and swallowed; the cache is an optimization,
    /// never a correctness requirement.
    pub fn put(&self, text: &str, vector: &[f32]) {
        let path = self.entry_path(text);
        match serde_json::to_string(vector) {
            Ok(encoded) => {
                if let Err(error) = fs::write(&path, encoded) {
                    warn!(path = %path.display(), %error, "failed to persist cache entry");
                } else {
                    debug!(path = %path.display(), "cache entry stored");
                }
            }
            Err(error) => warn!(%error, "failed to encode cache entry"),
        }
    }

    pub fn clear(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open cache");

        let vector = vec![0.25f32, -0.5, 1.0];
        cache.put("door controller wiring", &vector);
        assert_eq!(cache.get("door controller wiring"), Some(vector));
    }

    #[test]
    fn repeated_put_does_not_change_the_stored_value() {
        let dir = tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open cache");

        let vector = vec![0.1f32, 0.2];
        cache.put("same text", &vector);
        cache.put("same text", &vector);
        assert_eq!(cache.get("same text"), Some(vector));
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let dir = tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open cache");
        assert_eq!(cache.get("never stored"), None);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open cache");

        cache.put("text", &[1.0]);
        let path = cache.entry_path("text");
        std::fs::write(&path, "{ not json").expect("overwrite entry");
        assert_eq!(cache.get("text"), None);
    }

    #[test]
    fn clear_removes_all_entries() {
        let dir = tempdir().expect("tempdir");
        let cache = EmbeddingCache::open(dir.path()).expect("open cache");

        cache.put("a", &[1.0]);
        cache.put("b", &[2.0]);
        let removed = cache.clear().expect("clear");
        assert_eq!(removed, 2);
        assert_eq!(cache.get("a"), None);
    }
}
