use crate::config::QdrantConfig;
use crate::error::BackendError;
use crate::models::{Fragment, FragmentKind, RetrievalResult};
use crate::traits::{CollectionStats, VectorIndex};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Vector index over the Qdrant HTTP API. One collection, cosine distance,
/// dimensionality fixed at creation.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    upsert_batch_size: usize,
}

impl QdrantStore {
    pub fn new(config: &QdrantConfig, vector_size: usize) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        Ok(Self {
            endpoint: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            client,
            vector_size,
            upsert_batch_size: config.upsert_batch_size.max(1),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    async fn create_collection(&self, dimension: usize) -> Result<(), BackendError> {
        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": dimension, "distance": "Cosine" },
            }))
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "qdrant",
                response.status().to_string(),
            ));
        }

        info!(collection = %self.collection, dimension, "collection created");
        Ok(())
    }

    fn stored_dimension(parsed: &Value) -> Option<usize> {
        parsed
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .map(|size| size as usize)
    }

    /// Lightweight reachability probe for the connectivity report.
    pub async fn check(&self) -> Result<u64, BackendError> {
        let stats = self.stats().await?;
        Ok(stats.count)
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<(), BackendError> {
        if dimension != self.vector_size {
            return Err(BackendError::DimensionMismatch {
                expected: dimension,
                actual: self.vector_size,
            });
        }

        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return self.create_collection(dimension).await;
        }

        if !response.status().is_success() {
            return Err(BackendError::response(
                "qdrant",
                response.status().to_string(),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        match Self::stored_dimension(&parsed) {
            Some(stored) if stored == dimension => Ok(()),
            Some(stored) => Err(BackendError::DimensionMismatch {
                expected: dimension,
                actual: stored,
            }),
            None => Err(BackendError::response(
                "qdrant",
                "collection info carried no vector size",
            )),
        }
    }

    async fn add(&self, fragments: &[Fragment], vectors: &[Vec<f32>]) -> Result<(), BackendError> {
        if fragments.len() != vectors.len() {
            return Err(BackendError::response(
                "qdrant",
                format!(
                    "vector count {} does not match fragment count {}",
                    vectors.len(),
                    fragments.len()
                ),
            ));
        }

        let points = fragments
            .iter()
            .zip(vectors.iter())
            .map(|(fragment, vector)| {
                if vector.len() != self.vector_size {
                    return Err(BackendError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: vector.len(),
                    });
                }

                Ok(json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": {
                        "content": fragment.content,
                        "file": fragment.source_file,
                        "page": fragment.page,
                        "kind": fragment.kind,
                    },
                }))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        let url = format!("{}/points?wait=true", self.collection_url());
        let total_batches = points.len().div_ceil(self.upsert_batch_size);

        // Best-effort bulk load: one bad batch must not abort the rest.
        for (index, batch) in points.chunks(self.upsert_batch_size).enumerate() {
            let outcome = self
                .client
                .put(&url)
                .json(&json!({ "points": batch }))
                .send()
                .await;

            match outcome {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    error!(
                        collection = %self.collection,
                        batch = index + 1,
                        total_batches,
                        status = %response.status(),
                        "upsert batch rejected, continuing"
                    );
                }
                Err(request_error) => {
                    error!(
                        collection = %self.collection,
                        batch = index + 1,
                        total_batches,
                        error = %request_error,
                        "upsert batch failed, continuing"
                    );
                }
            }
        }

        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, BackendError> {
        if query_vector.len() != self.vector_size {
            return Err(BackendError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "qdrant",
                response.status().to_string(),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::new();
        for hit in hits {
            let score = hit
                .pointer("/score")
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as f32;
            let content = hit
                .pointer("/payload/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let source_file = hit
                .pointer("/payload/file")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let page = hit
                .pointer("/payload/page")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            let kind = hit
                .pointer("/payload/kind")
                .and_then(Value::as_str)
                .map(|raw| match raw {
                    "table" => FragmentKind::Table,
                    "ocr" => FragmentKind::Ocr,
                    _ => FragmentKind::Text,
                })
                .unwrap_or(FragmentKind::Text);

            results.push(RetrievalResult {
                fragment: Fragment {
                    content,
                    source_file,
                    page,
                    kind,
                },
                score: score.clamp(0.0, 1.0),
            });
        }

        Ok(results)
    }

    async fn clear(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::response(
                "qdrant",
                response.status().to_string(),
            ));
        }

        self.create_collection(self.vector_size).await
    }

    async fn stats(&self) -> Result<CollectionStats, BackendError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        if !response.status().is_success() {
            return Err(BackendError::response(
                "qdrant",
                response.status().to_string(),
            ));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| BackendError::from_reqwest("qdrant", error))?;

        let count = parsed
            .pointer("/result/points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let dimension = Self::stored_dimension(&parsed).unwrap_or(self.vector_size);

        Ok(CollectionStats { count, dimension })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QdrantConfig;

    #[tokio::test]
    async fn mismatched_configured_dimension_is_rejected_up_front() {
        let store = QdrantStore::new(&QdrantConfig::default(), 384).expect("store");
        // The local dimension check fails before any request is made.
        let result = store.ensure_collection(768).await;
        assert!(matches!(
            result,
            Err(BackendError::DimensionMismatch {
                expected: 768,
                actual: 384
            })
        ));
    }

    #[test]
    fn stored_dimension_is_read_from_collection_info() {
        let parsed = serde_json::json!({
            "result": { "config": { "params": { "vectors": { "size": 384 } } } }
        });
        assert_eq!(QdrantStore::stored_dimension(&parsed), Some(384));
    }
}
