use serde::{Deserialize, Serialize};

/// Which extraction stage produced a fragment's text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Text,
    Table,
    Ocr,
}

/// One retrievable unit of manual text. Created during ingestion, immutable
/// afterwards; destroyed only by a full-reindex collection clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub content: String,
    pub source_file: String,
    pub page: u32,
    pub kind: FragmentKind,
}

/// A search hit with its cosine score, clamped to [0, 1]. Never persisted.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub fragment: Fragment,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Clear the collection and the ledger, then process everything.
    Full,
    /// Skip files already recorded in the ledger.
    Incremental,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub name: String,
    pub reason: String,
}

/// Completion report of one indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub files_processed: usize,
    pub files_failed: Vec<FailedFile>,
    pub fragments_total: usize,
    pub elapsed_secs: f64,
    pub fragments_per_sec: f64,
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub file: String,
    pub page: u32,
    pub score: f32,
}

/// The orchestrator's answer contract.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Mean retrieval score as a percentage, one decimal.
    pub relevance: f32,
    pub clarification_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub file_count: usize,
    pub fragment_count: u64,
    pub vector_dimension: usize,
}

/// One line of the connectivity report, per backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub backend: String,
    pub ok: bool,
    pub detail: String,
}
