//! Text embeddings via the OpenAI embeddings endpoint.
//!
//! The same service embeds stored passages at ingestion time and user queries
//! at question time, so both sides of the cosine comparison come from one model.

use std::time::Duration;

use async_trait::async_trait;
use precedent_core::RetryPolicy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AiError;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Dimensionality every returned vector has.
    fn dim(&self) -> usize;

    /// Embed a batch of texts, one vector per input in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AiError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AiError::Other("embedding response was empty".into()))
    }
}

/// Embedding client for OpenAI's `text-embedding-*` models.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dim: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        dim: usize,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, AiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dim,
            retry,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AiError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::Server {
                provider: format!("embeddings-{}", self.model),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = resp.json().await?;
        into_vectors(parsed, texts.len(), self.dim)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AiError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        debug!(model = %self.model, count = texts.len(), "embedding batch");
        self.retry
            .run("embeddings", AiError::is_transient, || self.send(texts))
            .await
    }
}

/// Restore input order and check every vector against the configured dimension.
fn into_vectors(
    resp: EmbeddingResponse,
    expected_count: usize,
    dim: usize,
) -> Result<Vec<Vec<f32>>, AiError> {
    let mut data = resp.data;
    if data.len() != expected_count {
        return Err(AiError::Other(format!(
            "expected {expected_count} embeddings, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    data.into_iter()
        .map(|d| {
            if d.embedding.len() == dim {
                Ok(d.embedding)
            } else {
                Err(AiError::DimensionMismatch {
                    expected: dim,
                    actual: d.embedding.len(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(json: &str) -> EmbeddingResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn vectors_restored_to_input_order() {
        let resp = response(
            r#"{"object":"list","data":[
                {"object":"embedding","index":1,"embedding":[0.0,1.0,0.0]},
                {"object":"embedding","index":0,"embedding":[1.0,0.0,0.0]}
            ],"model":"text-embedding-3-small"}"#,
        );
        let vectors = into_vectors(resp, 2, 3).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn wrong_dimension_rejected() {
        let resp = response(r#"{"data":[{"index":0,"embedding":[0.5,0.5]}]}"#);
        let err = into_vectors(resp, 1, 1536).unwrap_err();
        assert!(matches!(
            err,
            AiError::DimensionMismatch {
                expected: 1536,
                actual: 2
            }
        ));
    }

    #[test]
    fn missing_vectors_rejected() {
        let resp = response(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#);
        assert!(into_vectors(resp, 2, 1).is_err());
    }

    #[test]
    fn request_shape() {
        let input = ["breach of contract", "adverse possession"];
        let json = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
        })
        .unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][1], "adverse possession");
    }

    #[tokio::test]
    async fn empty_batch_skips_network() {
        let embedder = OpenAiEmbedder::new(
            "sk-test",
            "text-embedding-3-small",
            1536,
            Duration::from_secs(1),
            RetryPolicy::none(),
        )
        .unwrap()
        .with_endpoint("http://127.0.0.1:9/unreachable");
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
        assert_eq!(embedder.dim(), 1536);
    }

    fn served_by(server: &MockServer, dim: usize) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            "sk-test",
            "text-embedding-3-small",
            dim,
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
        )
        .unwrap()
        .with_endpoint(format!("{}/v1/embeddings", server.uri()))
    }

    #[tokio::test]
    async fn embed_batch_posts_inputs_and_restores_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "text-embedding-3-small",
                "input": ["breach of contract", "adverse possession"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = served_by(&server, 2)
            .embed_batch(&["breach of contract", "adverse possession"])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn unavailable_then_ok_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.6, 0.8]}]
            })))
            .mount(&server)
            .await;

        let vector = served_by(&server, 2).embed("consideration").await.unwrap();
        assert_eq!(vector, vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn unauthorized_names_the_embedding_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = served_by(&server, 2).embed("q").await.unwrap_err();
        assert!(matches!(
            err,
            AiError::Server { ref provider, status: 401, .. }
                if provider == "embeddings-text-embedding-3-small"
        ));
    }
}
