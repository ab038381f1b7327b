use crate::cascade::ExtractionCascade;
use crate::chunking::fragment_pages;
use crate::config::ChunkingConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::IngestError;
use crate::ledger::FileLedger;
use crate::models::{FailedFile, IndexMode, IndexReport};
use crate::quality::QualityGate;
use crate::traits::VectorIndex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Cooperative cancellation handle, polled once per file boundary. A stop
/// request is accepted at any time; the run exits cleanly after the current
/// file, never mid-file.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Recursive discovery of indexable documents, in stable order.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                ext.eq_ignore_ascii_case("pdf") || ext.eq_ignore_ascii_case("docx")
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Drives ingestion end to end: extraction cascade, chunking, embedding,
/// vector upsert, ledger. One run at a time; a second start request is
/// rejected, not queued.
pub struct IndexManager<V: VectorIndex> {
    cascade: ExtractionCascade,
    provider: Arc<EmbeddingProvider>,
    index: Arc<V>,
    ledger: Mutex<FileLedger>,
    documents_dir: PathBuf,
    chunking: ChunkingConfig,
    gate: QualityGate,
    indexing: AtomicBool,
    cancel: CancelFlag,
}

/// Clears the in-progress flag on every exit path.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl<V: VectorIndex> IndexManager<V> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cascade: ExtractionCascade,
        provider: Arc<EmbeddingProvider>,
        index: Arc<V>,
        ledger: FileLedger,
        documents_dir: PathBuf,
        chunking: ChunkingConfig,
        gate: QualityGate,
    ) -> Self {
        Self {
            cascade,
            provider,
            index,
            ledger: Mutex::new(ledger),
            documents_dir,
            chunking,
            gate,
            indexing: AtomicBool::new(false),
            cancel: CancelFlag::new(),
        }
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn indexed_file_count(&self) -> usize {
        self.lock_ledger().len()
    }

    pub fn indexed_file_names(&self) -> Vec<String> {
        self.lock_ledger().file_names().to_vec()
    }

    fn lock_ledger(&self) -> MutexGuard<'_, FileLedger> {
        // A poisoned ledger lock only means another run panicked mid-append;
        // the on-disk state is still consistent.
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one indexing pass. Per-file parse failures are recorded and the
    /// run continues; backend failures abort the run (resumable later via
    /// incremental mode). Returns [`IngestError::IndexingActive`] if a run
    /// is already in flight.
    pub async fn index(&self, mode: IndexMode) -> Result<IndexReport, IngestError> {
        if self
            .indexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IngestError::IndexingActive);
        }
        let _guard = RunGuard {
            flag: &self.indexing,
        };
        self.cancel.reset();

        let started = Instant::now();

        if mode == IndexMode::Full {
            info!("full reindex: clearing collection and ledger");
            self.index.clear().await.map_err(IngestError::Backend)?;
            self.lock_ledger().clear()?;
        }

        let mut files = discover_documents(&self.documents_dir);
        let discovered = files.len();

        if mode == IndexMode::Incremental {
            let ledger = self.lock_ledger();
            files.retain(|path| match file_name_of(path) {
                Ok(name) => !ledger.contains(&name),
                Err(_) => true,
            });
        }

        info!(
            discovered,
            remaining = files.len(),
            folder = %self.documents_dir.display(),
            "indexing run starting"
        );

        let mut processed = 0usize;
        let mut fragments_total = 0usize;
        let mut failed: Vec<FailedFile> = Vec::new();
        let mut stopped = false;

        for (position, path) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(
                    after_files = processed,
                    "stop requested, ending run at file boundary"
                );
                stopped = true;
                break;
            }

            let file_name = match file_name_of(path) {
                Ok(name) => name,
                Err(error) => {
                    failed.push(FailedFile {
                        name: path.display().to_string(),
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            info!(
                file = %file_name,
                position = position + 1,
                total = files.len(),
                "processing file"
            );

            match self.index_file(path, &file_name).await {
                Ok(count) => {
                    self.lock_ledger().record(&file_name)?;
                    processed += 1;
                    fragments_total += count;
                    info!(file = %file_name, fragments = count, "file indexed");
                }
                Err(IngestError::Backend(error)) => {
                    // Backend outage: prior files are already ledgered, so
                    // the run can resume incrementally once it is back.
                    warn!(file = %file_name, %error, "backend failure, aborting run");
                    return Err(IngestError::Backend(error));
                }
                Err(error) => {
                    warn!(file = %file_name, %error, "file failed, continuing");
                    failed.push(FailedFile {
                        name: file_name,
                        reason: error.to_string(),
                    });
                }
            }
        }

        let elapsed_secs = started.elapsed().as_secs_f64();
        let fragments_per_sec = if elapsed_secs > 0.0 {
            fragments_total as f64 / elapsed_secs
        } else {
            0.0
        };

        info!(
            processed,
            failed = failed.len(),
            fragments = fragments_total,
            elapsed_secs = format!("{elapsed_secs:.1}"),
            throughput = format!("{fragments_per_sec:.1}/s"),
            stopped,
            "indexing run finished"
        );

        Ok(IndexReport {
            files_processed: processed,
            files_failed: failed,
            fragments_total,
            elapsed_secs,
            fragments_per_sec,
            stopped,
        })
    }

    async fn index_file(&self, path: &Path, file_name: &str) -> Result<usize, IngestError> {
        let pages = self.cascade.extract_file(path).await?;
        let fragments = fragment_pages(&pages, file_name, self.chunking, &self.gate);

        if fragments.is_empty() {
            return Err(IngestError::NoUsableText(file_name.to_string()));
        }

        let texts: Vec<String> = fragments
            .iter()
            .map(|fragment| fragment.content.clone())
            .collect();
        let vectors = self.provider.encode(&texts).await?;
        self.index.add(&fragments, &vectors).await?;

        Ok(fragments.len())
    }
}

fn file_name_of(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EmbeddingCache;
    use crate::config::{ExtractionConfig, QualityConfig};
    use crate::embeddings::{EmbeddingProvider, HashEmbedder};
    use crate::error::BackendError;
    use crate::extractor::test_support::write_docx;
    use crate::models::{Fragment, RetrievalResult};
    use crate::traits::{CollectionStats, VectorIndex};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{tempdir, TempDir};

    /// In-memory store that counts calls and can trip the cancel flag after
    /// a configured number of successful adds.
    #[derive(Default)]
    struct FakeIndex {
        adds: AtomicUsize,
        clears: AtomicUsize,
        cancel_after: Option<(usize, CancelFlag)>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn ensure_collection(&self, _dimension: usize) -> Result<(), BackendError> {
            Ok(())
        }

        async fn add(
            &self,
            _fragments: &[Fragment],
            _vectors: &[Vec<f32>],
        ) -> Result<(), BackendError> {
            let count = self.adds.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((threshold, flag)) = &self.cancel_after {
                if count == *threshold {
                    flag.cancel();
                }
            }
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<RetrievalResult>, BackendError> {
            Ok(Vec::new())
        }

        async fn clear(&self) -> Result<(), BackendError> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stats(&self) -> Result<CollectionStats, BackendError> {
            Ok(CollectionStats {
                count: self.adds.load(Ordering::SeqCst) as u64,
                dimension: 128,
            })
        }
    }

    fn gate() -> QualityGate {
        QualityGate::new(QualityConfig {
            min_chars: 20,
            min_alnum_ratio: 0.3,
        })
    }

    fn write_documents(dir: &Path, count: usize) {
        for index in 0..count {
            write_docx(
                &dir.join(format!("manual-{index}.docx")),
                &[&format!(
                    "Document {index}: check the governor rope tension every six months."
                )],
            );
        }
    }

    fn manager_with(
        docs: &TempDir,
        work: &TempDir,
        index: Arc<FakeIndex>,
    ) -> IndexManager<FakeIndex> {
        let cache = EmbeddingCache::open(work.path().join("cache")).expect("cache");
        let provider = Arc::new(EmbeddingProvider::with_backend(
            Box::new(HashEmbedder::default()),
            cache,
            32,
        ));
        let cascade =
            ExtractionCascade::from_config(&ExtractionConfig::default(), gate(), None)
                .expect("cascade");
        let ledger = FileLedger::load(work.path().join("indexed_files.json"));

        IndexManager::new(
            cascade,
            provider,
            index,
            ledger,
            docs.path().to_path_buf(),
            ChunkingConfig {
                chunk_size: 200,
                overlap: 20,
            },
            gate(),
        )
    }

    #[test]
    fn discovery_is_recursive_and_sorted() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).expect("mkdir");

        std::fs::write(dir.path().join("b.pdf"), b"%PDF-1.4").expect("write");
        std::fs::write(nested.join("a.docx"), b"zip").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write");

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn incremental_mode_skips_ledgered_files() {
        let docs = tempdir().expect("docs");
        let work = tempdir().expect("work");
        write_documents(docs.path(), 3);

        let index = Arc::new(FakeIndex::default());
        let manager = manager_with(&docs, &work, Arc::clone(&index));

        let first = manager.index(IndexMode::Incremental).await.expect("first run");
        assert_eq!(first.files_processed, 3);
        assert_eq!(index.adds.load(Ordering::SeqCst), 3);

        let second = manager
            .index(IndexMode::Incremental)
            .await
            .expect("second run");
        assert_eq!(second.files_processed, 0);
        // No file reached the store again.
        assert_eq!(index.adds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn full_mode_clears_collection_and_ledger_before_processing() {
        let docs = tempdir().expect("docs");
        let work = tempdir().expect("work");
        write_documents(docs.path(), 2);

        let index = Arc::new(FakeIndex::default());
        let manager = manager_with(&docs, &work, Arc::clone(&index));

        manager.index(IndexMode::Incremental).await.expect("seed run");
        assert_eq!(manager.indexed_file_count(), 2);

        let report = manager.index(IndexMode::Full).await.expect("full run");
        assert_eq!(index.clears.load(Ordering::SeqCst), 1);
        // Ledger was emptied and rebuilt from scratch.
        assert_eq!(report.files_processed, 2);
        assert_eq!(manager.indexed_file_count(), 2);
    }

    #[tokio::test]
    async fn stop_after_two_files_leaves_two_ledger_entries() {
        let docs = tempdir().expect("docs");
        let work = tempdir().expect("work");
        write_documents(docs.path(), 5);

        let manager = manager_with(&docs, &work, Arc::new(FakeIndex::default()));
        // Wire a store fake to request a stop right after the second add.
        let flag = manager.cancel_handle();
        let index_with_cancel = Arc::new(FakeIndex {
            adds: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            cancel_after: Some((2, flag)),
        });
        let manager = IndexManager {
            index: Arc::clone(&index_with_cancel),
            ..manager
        };

        let report = manager.index(IndexMode::Incremental).await.expect("run");
        assert!(report.stopped);
        assert_eq!(report.files_processed, 2);
        assert_eq!(manager.indexed_file_count(), 2);
        assert!(!manager.is_indexing());
    }

    #[tokio::test]
    async fn a_second_start_while_active_is_rejected() {
        let docs = tempdir().expect("docs");
        let work = tempdir().expect("work");
        let manager = manager_with(&docs, &work, Arc::new(FakeIndex::default()));

        manager.indexing.store(true, Ordering::SeqCst);
        let result = manager.index(IndexMode::Incremental).await;
        assert!(matches!(result, Err(IngestError::IndexingActive)));
    }

    #[tokio::test]
    async fn files_without_usable_text_are_failed_not_ledgered() {
        let docs = tempdir().expect("docs");
        let work = tempdir().expect("work");
        write_docx(&docs.path().join("thin.docx"), &["ok"]);

        let manager = manager_with(&docs, &work, Arc::new(FakeIndex::default()));
        let report = manager.index(IndexMode::Incremental).await.expect("run");

        assert_eq!(report.files_processed, 0);
        assert_eq!(report.files_failed.len(), 1);
        assert_eq!(report.files_failed[0].name, "thin.docx");
        assert_eq!(manager.indexed_file_count(), 0);
    }

    #[tokio::test]
    async fn unreadable_file_does_not_abort_the_run() {
        let docs = tempdir().expect("docs");
        let work = tempdir().expect("work");
        std::fs::write(docs.path().join("broken.pdf"), b"%PDF-1.4\n%broken").expect("write");
        write_documents(docs.path(), 1);

        let manager = manager_with(&docs, &work, Arc::new(FakeIndex::default()));
        let report = manager.index(IndexMode::Incremental).await.expect("run");

        assert_eq!(report.files_processed, 1);
        assert_eq!(report.files_failed.len(), 1);
        assert_eq!(report.files_failed[0].name, "broken.pdf");
    }
}
