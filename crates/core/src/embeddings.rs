use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FALLBACK_DIMENSIONS: usize = 128;

/// Uniform encode contract over an embedding backend. The dimensionality is
/// fixed for the lifetime of the value; every vector in a collection must
/// share it.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Deterministic character-trigram embedder, FNV-hashed into a fixed number
/// of buckets and L2-normalized. Not a semantic model; it is the
/// universally-available fallback when the configured backend cannot start.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: FALLBACK_DIMENSIONS,
        }
    }
}

impl HashEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash-trigram"
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Remote embedding backend over the Ollama embed API.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl OllamaEmbedder {
    /// Probes the model once to learn its dimensionality. Runs at startup
    /// only; a failure here triggers the provider-level fallback rather than
    /// a mid-session dimension change.
    pub async fn connect(config: &EmbeddingConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::from_reqwest("embedding", error))?;

        let embedder = Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: 0,
            client,
        };

        let probe = embedder.request(&["dimension probe".to_string()]).await?;
        let dimensions = probe
            .first()
            .map(Vec::len)
            .filter(|len| *len > 0)
            .ok_or_else(|| {
                BackendError::response("embedding", "probe returned no vector")
            })?;

        info!(model = %embedder.model, dimensions, "embedding backend ready");
        Ok(Self {
            dimensions,
            ..embedder
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("embedding", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "embedding",
                response.status().to_string(),
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("embedding", error))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(BackendError::response(
                "embedding",
                format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
            ));
        }

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        self.request(texts).await
    }
}

/// Cache-first encoding over whichever backend survived startup. Cache
/// misses are encoded in fixed-size batches to bound peak memory, written
/// back, and results are reassembled in input order.
pub struct EmbeddingProvider {
    backend: Box<dyn Embedder>,
    cache: EmbeddingCache,
    batch_size: usize,
}

impl EmbeddingProvider {
    /// Tries the configured remote backend; on any initialization failure
    /// falls back to [`HashEmbedder`] and keeps its dimensionality for the
    /// whole session. The fallback decision is made exactly once, at
    /// startup, because the collection's dimensionality cannot change
    /// afterwards.
    pub async fn init(config: &EmbeddingConfig, cache: EmbeddingCache) -> Self {
        let batch_size = config.batch_size.max(1);

        match OllamaEmbedder::connect(config).await {
            Ok(backend) => Self {
                backend: Box::new(backend),
                cache,
                batch_size,
            },
            Err(error) => {
                warn!(%error, model = %config.model, "embedding backend unavailable, falling back to hash embedder");
                Self {
                    backend: Box::new(HashEmbedder::default()),
                    cache,
                    batch_size,
                }
            }
        }
    }

    pub fn with_backend(
        backend: Box<dyn Embedder>,
        cache: EmbeddingCache,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.backend.dimensions()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_texts = Vec::new();
        let mut miss_indices = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(vector) => results[index] = Some(vector),
                None => {
                    miss_texts.push(text.clone());
                    miss_indices.push(index);
                }
            }
        }

        if !miss_texts.is_empty() {
            debug!(
                total = texts.len(),
                misses = miss_texts.len(),
                "encoding uncached texts"
            );

            let mut encoded = Vec::with_capacity(miss_texts.len());
            for batch in miss_texts.chunks(self.batch_size) {
                encoded.extend(self.backend.encode_batch(batch).await?);
            }

            for (text, vector) in miss_texts.iter().zip(encoded.iter()) {
                self.cache.put(text, vector);
            }
            for (index, vector) in miss_indices.into_iter().zip(encoded) {
                results[index] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|slot| slot.unwrap_or_default()).collect())
    }

    pub async fn encode_query(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vectors = self.encode(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.pop().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow");
        let second = embedder.embed("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn hash_embedder_outputs_expected_length() {
        let embedder = HashEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed("abc").len(), 32);
    }

    /// Encodes each text to a single-element vector derived from its length,
    /// and counts backend batch calls so cache behavior is observable.
    struct CountingEmbedder {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "counting"
        }

        async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn counting_provider(dir: &std::path::Path, batch_size: usize) -> (EmbeddingProvider, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = EmbeddingCache::open(dir).expect("open cache");
        let provider = EmbeddingProvider::with_backend(
            Box::new(CountingEmbedder {
                calls: Arc::clone(&calls),
            }),
            cache,
            batch_size,
        );
        (provider, calls)
    }

    #[tokio::test]
    async fn encode_preserves_input_order_across_cache_hits_and_misses() {
        let dir = tempdir().expect("tempdir");
        let (provider, _) = counting_provider(dir.path(), 16);
        provider.cache.put("bb", &[2.0]);

        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
        let vectors = provider.encode(&texts).await.expect("encode");

        assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[tokio::test]
    async fn second_encode_of_the_same_texts_never_reaches_the_backend() {
        let dir = tempdir().expect("tempdir");
        let (provider, calls) = counting_provider(dir.path(), 16);

        let texts = vec!["one".to_string(), "two".to_string()];
        provider.encode(&texts).await.expect("first encode");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        provider.encode(&texts).await.expect("second encode");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misses_are_encoded_in_bounded_batches() {
        let dir = tempdir().expect("tempdir");
        let (provider, calls) = counting_provider(dir.path(), 2);

        let texts: Vec<String> = (0..5).map(|i| format!("text-{i}")).collect();
        let vectors = provider.encode(&texts).await.expect("encode");
        assert_eq!(vectors.len(), 5);
        // Five misses at batch size two means three backend calls.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
