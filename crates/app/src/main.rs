use chrono::Utc;
use clap::{Parser, Subcommand};
use manual_qa_core::{AssistantConfig, IndexMode, ManualAssistant};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "manual-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder that contains the PDF/DOCX manuals, scanned recursively.
    #[arg(long, default_value = "documents")]
    documents_folder: String,

    /// Path of the indexed-files ledger.
    #[arg(long, default_value = "indexed_files.json")]
    ledger_path: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "tech_docs")]
    qdrant_collection: String,

    /// Ollama base URL (used for generation and embeddings)
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Generation model name
    #[arg(long, env = "OLLAMA_MODEL", default_value = "qwen2.5:3b")]
    ollama_model: String,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Directory for the on-disk embedding cache.
    #[arg(long, default_value = "embedding_cache")]
    embedding_cache: String,

    /// Optional structured-layout conversion endpoint.
    #[arg(long, env = "LAYOUT_ENDPOINT")]
    layout_endpoint: Option<String>,

    /// Optional OCR endpoint for pages without a usable text layer.
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer token for the layout/OCR endpoints.
    #[arg(long, env = "OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// Run extracted text through an LLM cleaning pass before chunking.
    #[arg(long, default_value_t = false)]
    enable_cleaning: bool,

    /// Fragment size in characters.
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Overlap between consecutive fragments, in characters.
    #[arg(long, default_value = "150")]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Index the documents folder into the vector collection.
    Index {
        /// Clear the collection and the ledger first instead of continuing.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Ask a question grounded in the indexed manuals.
    Query {
        /// The question text.
        #[arg(long)]
        query: String,
        /// Number of fragments to retrieve.
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Print index statistics.
    Stats,
    /// Check connectivity of every backend.
    Check,
}

fn build_config(cli: &Cli, top_k: Option<usize>) -> AssistantConfig {
    let mut config = AssistantConfig::default();
    config.documents_dir = cli.documents_folder.clone().into();
    config.ledger_path = cli.ledger_path.clone().into();
    config.qdrant.url = cli.qdrant_url.clone();
    config.qdrant.collection = cli.qdrant_collection.clone();
    config.llm.base_url = cli.ollama_url.clone();
    config.llm.model = cli.ollama_model.clone();
    config.embedding.base_url = cli.ollama_url.clone();
    config.embedding.model = cli.embedding_model.clone();
    config.embedding.cache_dir = cli.embedding_cache.clone().into();
    config.extraction.enable_cleaning = cli.enable_cleaning;
    config.extraction.layout.endpoint = cli.layout_endpoint.clone();
    config.extraction.layout.api_key = cli.ocr_api_key.clone();
    config.extraction.ocr.endpoint = cli.ocr_endpoint.clone();
    config.extraction.ocr.api_key = cli.ocr_api_key.clone();
    config.chunking.chunk_size = cli.chunk_size;
    config.chunking.overlap = cli.chunk_overlap;
    if let Some(top_k) = top_k {
        config.top_k = top_k;
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "manual-qa boot"
    );

    match &cli.command {
        Command::Index { full } => {
            let config = build_config(&cli, None);
            let assistant = ManualAssistant::connect(config)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let mode = if *full {
                IndexMode::Full
            } else {
                IndexMode::Incremental
            };

            let report = assistant
                .index(mode)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "{} files indexed, {} fragments, {:.1}s ({:.1} fragments/s)",
                report.files_processed,
                report.fragments_total,
                report.elapsed_secs,
                report.fragments_per_sec
            );
            if report.stopped {
                println!("run was stopped before all files were processed");
            }
            for failed in &report.files_failed {
                println!("failed: {} ({})", failed.name, failed.reason);
            }
        }
        Command::Query { query, top_k } => {
            let config = build_config(&cli, Some(*top_k));
            let assistant = ManualAssistant::connect(config)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let response = assistant
                .query(query, &[])
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("{}", response.answer);
            println!();
            println!("relevance: {:.1}%", response.relevance);
            for source in &response.sources {
                println!(
                    "source: {} page {} (score {:.3})",
                    source.file, source.page, source.score
                );
            }
            if !response.clarification_questions.is_empty() {
                println!();
                println!("to narrow this down, you could specify:");
                for (index, question) in response.clarification_questions.iter().enumerate() {
                    println!("  {}. {}", index + 1, question);
                }
            }
        }
        Command::Stats => {
            let config = build_config(&cli, None);
            let assistant = ManualAssistant::connect(config)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let stats = assistant
                .stats()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("indexed files: {}", stats.file_count);
            println!("stored fragments: {}", stats.fragment_count);
            println!("vector dimension: {}", stats.vector_dimension);
        }
        Command::Check => {
            let config = build_config(&cli, None);
            let assistant = ManualAssistant::connect(config)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for status in assistant.test_connectivity().await {
                let marker = if status.ok { "ok" } else { "FAIL" };
                println!("[{marker}] {}: {}", status.backend, status.detail);
            }
        }
    }

    Ok(())
}
