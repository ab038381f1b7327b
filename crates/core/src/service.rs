use crate::cache::EmbeddingCache;
use crate::cascade::ExtractionCascade;
use crate::config::AssistantConfig;
use crate::embeddings::EmbeddingProvider;
use crate::error::{BackendError, IngestError};
use crate::ledger::FileLedger;
use crate::llm::{LanguageModel, OllamaClient, TextCleaner};
use crate::manager::IndexManager;
use crate::models::{
    BackendStatus, ConversationTurn, IndexMode, IndexReport, IndexStats, QueryResponse,
};
use crate::orchestrator::QueryOrchestrator;
use crate::quality::QualityGate;
use crate::stores::QdrantStore;
use crate::traits::VectorIndex;
use std::sync::Arc;
use tracing::info;

/// The one service object the transport layer talks to. Constructed once at
/// startup; everything it owns is shared by handle, so indexing can run as
/// a background task while queries are served concurrently.
pub struct ManualAssistant {
    provider: Arc<EmbeddingProvider>,
    store: Arc<QdrantStore>,
    llm: Arc<OllamaClient>,
    manager: Arc<IndexManager<QdrantStore>>,
    orchestrator: QueryOrchestrator<QdrantStore, OllamaClient>,
}

impl ManualAssistant {
    /// Validates configuration, picks the embedding backend (with the
    /// startup-only fallback), and opens the vector collection against the
    /// active dimensionality. A dimension mismatch surfaces here, before
    /// any request is served.
    pub async fn connect(config: AssistantConfig) -> Result<Self, IngestError> {
        config.validate()?;

        let cache = EmbeddingCache::open(&config.embedding.cache_dir)?;
        let provider = Arc::new(EmbeddingProvider::init(&config.embedding, cache).await);

        let store = Arc::new(
            QdrantStore::new(&config.qdrant, provider.dimensions())
                .map_err(IngestError::Backend)?,
        );
        store
            .ensure_collection(provider.dimensions())
            .await
            .map_err(IngestError::Backend)?;

        let llm = Arc::new(OllamaClient::new(&config.llm).map_err(IngestError::Backend)?);

        let gate = QualityGate::new(config.quality);
        let cleaner = config
            .extraction
            .enable_cleaning
            .then(|| TextCleaner::new(Arc::clone(&llm) as Arc<dyn LanguageModel>));
        let cascade = ExtractionCascade::from_config(&config.extraction, gate, cleaner)?;

        let ledger = FileLedger::load(&config.ledger_path);
        let manager = Arc::new(IndexManager::new(
            cascade,
            Arc::clone(&provider),
            Arc::clone(&store),
            ledger,
            config.documents_dir.clone(),
            config.chunking,
            gate,
        ));

        let orchestrator = QueryOrchestrator::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            Arc::clone(&llm),
            config.topics.clone(),
            config.clarification.clone(),
            config.top_k,
            config.max_history_chars,
            config.llm.max_tokens,
            config.llm.temperature,
        )?;

        info!(
            embedding_model = provider.model_name(),
            dimension = provider.dimensions(),
            collection = store.collection(),
            llm_model = llm.model(),
            "assistant ready"
        );

        Ok(Self {
            provider,
            store,
            llm,
            manager,
            orchestrator,
        })
    }

    /// Shared handle for running indexing as a background task.
    pub fn index_manager(&self) -> Arc<IndexManager<QdrantStore>> {
        Arc::clone(&self.manager)
    }

    pub async fn index(&self, mode: IndexMode) -> Result<IndexReport, IngestError> {
        self.manager.index(mode).await
    }

    pub fn stop_index(&self) {
        self.manager.request_stop();
    }

    pub fn is_indexing(&self) -> bool {
        self.manager.is_indexing()
    }

    pub async fn query(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryResponse, BackendError> {
        self.orchestrator.query(text, history).await
    }

    pub async fn clarification_questions(&self, text: &str) -> Vec<String> {
        self.orchestrator.clarification_questions(text).await
    }

    pub async fn stats(&self) -> Result<IndexStats, BackendError> {
        let collection = self.store.stats().await?;
        Ok(IndexStats {
            file_count: self.manager.indexed_file_count(),
            fragment_count: collection.count,
            vector_dimension: collection.dimension,
        })
    }

    /// Per-backend reachability report for the operator.
    pub async fn test_connectivity(&self) -> Vec<BackendStatus> {
        let mut report = Vec::new();

        match self.llm.test_connection().await {
            Ok(()) => report.push(BackendStatus {
                backend: "ollama".to_string(),
                ok: true,
                detail: format!("model {} available", self.llm.model()),
            }),
            Err(error) => report.push(BackendStatus {
                backend: "ollama".to_string(),
                ok: false,
                detail: error.to_string(),
            }),
        }

        match self.store.check().await {
            Ok(count) => report.push(BackendStatus {
                backend: "qdrant".to_string(),
                ok: true,
                detail: format!(
                    "collection {} reachable, {count} points",
                    self.store.collection()
                ),
            }),
            Err(error) => report.push(BackendStatus {
                backend: "qdrant".to_string(),
                ok: false,
                detail: error.to_string(),
            }),
        }

        let embedding_detail = if self.provider.model_name() == "hash-trigram" {
            format!(
                "fallback hash embedder active, dimension {}",
                self.provider.dimensions()
            )
        } else {
            format!(
                "model {}, dimension {}",
                self.provider.model_name(),
                self.provider.dimensions()
            )
        };
        report.push(BackendStatus {
            backend: "embedding".to_string(),
            ok: true,
            detail: embedding_detail,
        });

        report
    }
}
