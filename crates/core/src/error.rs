use thiserror::Error;

/// Failures on the ingestion side: file parsing, configuration, run state.
///
/// Backend failures are absorbed via [`BackendError`] when they must abort
/// an indexing run; per-file parse failures are recorded and skipped.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("docx parse error: {0}")]
    DocxParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no usable text extracted: {0}")]
    NoUsableText(String),

    #[error("an indexing run is already active")]
    IndexingActive,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Failures talking to the HTTP backends (embedding model, vector store,
/// language model). Connectivity kinds (`Http`, `Timeout`, `BackendResponse`)
/// are distinguishable from the schema kind (`DimensionMismatch`), which is
/// fatal until the operator reindexes.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} request timed out")]
    Timeout { backend: String },

    #[error("http error: {0}")]
    Http(reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collection dimension is {actual}, configured model produces {expected}; run a full reindex")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("backend not available: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Maps a reqwest error to the timeout kind when applicable, so callers
    /// can tell a slow backend from an unreachable one.
    pub fn from_reqwest(backend: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BackendError::Timeout {
                backend: backend.to_string(),
            }
        } else {
            BackendError::Http(error)
        }
    }

    pub fn response(backend: &str, details: impl Into<String>) -> Self {
        BackendError::BackendResponse {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
