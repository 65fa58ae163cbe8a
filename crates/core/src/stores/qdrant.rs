use crate::models::{ChunkPayload, IndexedPoint, ScoredPoint};
use crate::traits::VectorIndex;
use crate::RagError;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "qdrant";

/// Qdrant over its REST API. One store instance targets one collection.
pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: usize,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<ChunkPayload>,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, RagError> {
        let endpoint = Url::parse(endpoint.trim())
            .map_err(|error| RagError::Configuration(format!("invalid qdrant url: {error}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| RagError::Configuration(format!("http client: {error}")))?;

        Ok(Self {
            endpoint,
            collection: collection.into(),
            client,
            vector_size,
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn collection_url(&self, suffix: &[&str]) -> Result<Url, RagError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| RagError::Configuration("qdrant url cannot be a base".to_string()))?
            .pop_if_empty()
            .push("collections")
            .push(&self.collection)
            .extend(suffix);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn check_dimensions(&self, actual: usize, what: &str) -> Result<(), RagError> {
        if actual != self.vector_size {
            return Err(RagError::Configuration(format!(
                "{what} dimension {actual} != collection dimension {}",
                self.vector_size
            )));
        }
        Ok(())
    }

    async fn create_collection(&self) -> Result<(), RagError> {
        let response = self
            .request(Method::PUT, self.collection_url(&[])?)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|error| RagError::index(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(backend_failure(response).await);
        }

        info!(collection = %self.collection, dimensions = self.vector_size, "created qdrant collection");
        Ok(())
    }
}

async fn backend_failure(response: reqwest::Response) -> RagError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    RagError::index(
        BACKEND,
        format!("{status}: {}", body.chars().take(300).collect::<String>()),
    )
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self, dimensions: usize) -> Result<(), RagError> {
        self.check_dimensions(dimensions, "embedder")?;

        let response = self
            .request(Method::GET, self.collection_url(&[])?)
            .send()
            .await
            .map_err(|error| RagError::index(BACKEND, error))?;

        match response.status() {
            StatusCode::NOT_FOUND => self.create_collection().await,
            status if status.is_success() => {
                let parsed: Value = response
                    .json()
                    .await
                    .map_err(|error| RagError::index(BACKEND, error))?;
                let size = parsed
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        RagError::Configuration(format!(
                            "collection {} has no single unnamed vector config",
                            self.collection
                        ))
                    })?;
                self.check_dimensions(size as usize, "existing collection")?;
                debug!(collection = %self.collection, "qdrant collection already exists");
                Ok(())
            }
            _ => Err(backend_failure(response).await),
        }
    }

    async fn upsert(&self, points: Vec<IndexedPoint>) -> Result<(), RagError> {
        if points.is_empty() {
            return Ok(());
        }

        let count = points.len();
        let body = points
            .into_iter()
            .map(|point| {
                self.check_dimensions(point.vector.len(), "point")?;
                Ok(json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": point.payload,
                }))
            })
            .collect::<Result<Vec<_>, RagError>>()?;

        let mut url = self.collection_url(&["points"])?;
        url.query_pairs_mut().append_pair("wait", "true");

        let response = self
            .request(Method::PUT, url)
            .json(&json!({ "points": body }))
            .send()
            .await
            .map_err(|error| RagError::index(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(backend_failure(response).await);
        }

        debug!(collection = %self.collection, count, "upserted points to qdrant");
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, RagError> {
        self.check_dimensions(vector.len(), "query vector")?;

        let response = self
            .request(Method::POST, self.collection_url(&["points", "search"])?)
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|error| RagError::index(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(backend_failure(response).await);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|error| RagError::index(BACKEND, format!("malformed search response: {error}")))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: point_id(&hit.id),
                score: hit.score,
                payload: hit.payload.unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn point(id: &str, vector: Vec<f32>) -> IndexedPoint {
        IndexedPoint {
            id: id.to_string(),
            vector,
            payload: ChunkPayload {
                text: "pump pressure".to_string(),
                document_id: "doc-1".to_string(),
                file_name: "manual.pdf".to_string(),
                page: Some(4),
                chunk_index: 0,
                uploaded_at: None,
                checksum: None,
            },
        }
    }

    #[tokio::test]
    async fn missing_collection_is_created_with_cosine_distance() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/documents"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/documents"))
            .and(body_partial_json(json!({"vectors": {"size": 3, "distance": "Cosine"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = QdrantStore::new(&server.uri(), "documents", 3)?;
        store.ensure_collection(3).await?;
        Ok(())
    }

    #[tokio::test]
    async fn existing_collection_with_other_size_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {"config": {"params": {"vectors": {"size": 768, "distance": "Cosine"}}}}
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(&server.uri(), "documents", 1536)?;
        let result = store.ensure_collection(1536).await;

        assert!(matches!(result, Err(RagError::Configuration(_))));
        Ok(())
    }

    #[tokio::test]
    async fn upsert_waits_for_durability_and_sends_camel_case_payload() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/documents/points"))
            .and(query_param("wait", "true"))
            .and(body_partial_json(json!({
                "points": [{"id": "p-1", "payload": {"fileName": "manual.pdf", "page": 4, "documentId": "doc-1"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "completed"}})))
            .expect(1)
            .mount(&server)
            .await;

        let store = QdrantStore::new(&server.uri(), "documents", 2)?;
        store.upsert(vec![point("p-1", vec![0.1, 0.2])]).await?;
        Ok(())
    }

    #[tokio::test]
    async fn upsert_rejection_is_an_index_error() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/collections/documents/points"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad point"))
            .mount(&server)
            .await;

        let store = QdrantStore::new(&server.uri(), "documents", 2)?;
        let result = store.upsert(vec![point("p-1", vec![0.1, 0.2])]).await;

        assert!(matches!(result, Err(RagError::Index { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn search_keeps_store_order() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/documents/points/search"))
            .and(body_partial_json(json!({"limit": 3, "with_payload": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [
                    {"id": "a", "score": 0.9, "payload": {"text": "first", "fileName": "x.pdf", "page": 1, "chunkIndex": 0, "documentId": "d"}},
                    {"id": 7, "score": 0.7, "payload": {"text": "second", "fileName": "x.pdf", "chunkIndex": 1, "documentId": "d"}}
                ]
            })))
            .mount(&server)
            .await;

        let store = QdrantStore::new(&server.uri(), "documents", 2)?;
        let hits = store.search(&[0.1, 0.2], 3).await?;

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].payload.text, "first");
        assert_eq!(hits[1].id, "7");
        assert_eq!(hits[1].payload.page, None);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_query_dimension_is_rejected_before_any_request() -> Result<(), Box<dyn std::error::Error>> {
        let store = QdrantStore::new("http://127.0.0.1:9", "documents", 2)?;
        let result = store.search(&[0.1], 3).await;
        assert!(matches!(result, Err(RagError::Configuration(_))));
        Ok(())
    }
}
