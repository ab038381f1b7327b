use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Thresholds for the text quality gate. Both are tunables, not logic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Minimum trimmed length before text is worth keeping.
    pub min_chars: usize,
    /// Minimum share of alphanumeric (Latin + Cyrillic + digit) characters.
    pub min_alnum_ratio: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_chars: 30,
            min_alnum_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            overlap: 150,
        }
    }
}

impl ChunkingConfig {
    /// Overlap >= chunk size would make the sliding window never advance.
    /// Checked once at startup, not per call.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "overlap {} must be strictly less than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Keyword lists for the coarse topic gate. Injectable so the heuristic can
/// be replaced by a learned classifier without touching orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub domain_keywords: Vec<String>,
    pub chitchat_keywords: Vec<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            domain_keywords: [
                "error", "fault", "code", "controller", "board", "relay", "sensor", "wiring",
                "diagram", "manual", "installation", "calibration", "drive", "inverter", "motor",
                "door", "specification", "torque", "maintenance", "adjustment", "parameter",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            chitchat_keywords: [
                "hello",
                "hi there",
                "hey",
                "thanks",
                "thank you",
                "good morning",
                "good evening",
                "how are you",
                "goodbye",
                "bye",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Phrases in a generated answer that signal the model lacked information
/// and a clarification round is worth offering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationConfig {
    pub trigger_phrases: Vec<String>,
    pub max_questions: usize,
    pub max_question_words: usize,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self {
            trigger_phrases: [
                "not found",
                "no information",
                "no exact information",
                "not present in the provided",
                "could not find",
                "please specify",
                "unclear",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_questions: 3,
            max_question_words: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Generation is the longest call in the system; tens of seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:3b".to_string(),
            temperature: 0.1,
            max_tokens: 512,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub cache_dir: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            batch_size: 32,
            timeout_secs: 60,
            cache_dir: PathBuf::from("embedding_cache"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub timeout_secs: u64,
    pub upsert_batch_size: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection: "tech_docs".to_string(),
            timeout_secs: 30,
            upsert_batch_size: 128,
        }
    }
}

/// Optional HTTP endpoint used by a fallback extraction stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub enable_tables: bool,
    pub enable_cleaning: bool,
    pub layout: EndpointConfig,
    pub ocr: EndpointConfig,
    /// Pages beyond this are not requested from the layout service.
    pub max_layout_pages: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enable_tables: true,
            enable_cleaning: false,
            layout: EndpointConfig {
                timeout_secs: 120,
                ..EndpointConfig::default()
            },
            ocr: EndpointConfig {
                timeout_secs: 120,
                ..EndpointConfig::default()
            },
            max_layout_pages: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub documents_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub top_k: usize,
    pub max_history_chars: usize,
    pub quality: QualityConfig,
    pub chunking: ChunkingConfig,
    pub topics: TopicConfig,
    pub clarification: ClarificationConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub qdrant: QdrantConfig,
    pub extraction: ExtractionConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("documents"),
            ledger_path: PathBuf::from("indexed_files.json"),
            top_k: 5,
            max_history_chars: 6_000,
            quality: QualityConfig::default(),
            chunking: ChunkingConfig::default(),
            topics: TopicConfig::default(),
            clarification: ClarificationConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            qdrant: QdrantConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl AssistantConfig {
    /// Startup invariants. Everything here is fatal before any work begins.
    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;

        if self.top_k == 0 {
            return Err(IngestError::InvalidConfig(
                "top_k must be positive".to_string(),
            ));
        }

        for (name, value) in [
            ("llm.base_url", &self.llm.base_url),
            ("embedding.base_url", &self.embedding.base_url),
            ("qdrant.url", &self.qdrant.url),
        ] {
            Url::parse(value).map_err(|error| {
                IngestError::InvalidConfig(format!("{name} is not a valid url: {error}"))
            })?;
        }

        for endpoint in [&self.extraction.layout.endpoint, &self.extraction.ocr.endpoint]
            .into_iter()
            .flatten()
        {
            Url::parse(endpoint).map_err(|error| {
                IngestError::InvalidConfig(format!("extraction endpoint is not a valid url: {error}"))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AssistantConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let chunking = ChunkingConfig {
            chunk_size: 100,
            overlap: 100,
        };
        assert!(chunking.validate().is_err());

        let chunking = ChunkingConfig {
            chunk_size: 100,
            overlap: 99,
        };
        assert!(chunking.validate().is_ok());
    }

    #[test]
    fn malformed_backend_url_is_rejected() {
        let mut config = AssistantConfig::default();
        config.qdrant.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
