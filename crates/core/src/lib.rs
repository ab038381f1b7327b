pub mod cache;
pub mod cascade;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod history;
pub mod ledger;
pub mod llm;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod quality;
pub mod service;
pub mod stores;
pub mod traits;

pub use cache::EmbeddingCache;
pub use cascade::{ExtractionCascade, LayoutExtractor, OcrEngine, PageExtract};
pub use chunking::{fragment_pages, split_text};
pub use config::{
    AssistantConfig, ChunkingConfig, ClarificationConfig, EmbeddingConfig, ExtractionConfig,
    LlmConfig, QdrantConfig, QualityConfig, TopicConfig,
};
pub use embeddings::{Embedder, EmbeddingProvider, HashEmbedder, OllamaEmbedder};
pub use error::{BackendError, IngestError};
pub use extractor::{DocxExtractor, PageText, PdfExtractor, PdfTextExtractor};
pub use history::{render_turns, truncate_turns};
pub use ledger::FileLedger;
pub use llm::{LanguageModel, OllamaClient, TextCleaner};
pub use manager::{discover_documents, CancelFlag, IndexManager};
pub use models::{
    BackendStatus, ConversationTurn, FailedFile, Fragment, FragmentKind, IndexMode, IndexReport,
    IndexStats, QueryResponse, RetrievalResult, Role, SourceRef,
};
pub use orchestrator::QueryOrchestrator;
pub use quality::QualityGate;
pub use service::ManualAssistant;
pub use stores::QdrantStore;
pub use traits::{CollectionStats, VectorIndex};
