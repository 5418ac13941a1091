//! Pinecone data-plane client.
//!
//! Talks to one serverless index over its REST API. The host is either given
//! directly or looked up once from the control plane by index name; ingestion
//! can also have the control plane create the index first.

use std::time::Duration;

use async_trait::async_trait;
use precedent_core::{PassageMetadata, RetryPolicy};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{IndexStats, MetadataFilter, StoreError, VectorIndex, VectorMatch, VectorRecord};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

pub struct PineconeIndex {
    client: Client,
    host: String,
    api_key: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    metadata: Option<RawMetadata>,
}

/// Stored metadata as Pinecone returns it: numbers come back as floats and
/// records written by older ingesters may lack fields.
#[derive(Deserialize, Default)]
struct RawMetadata {
    #[serde(default)]
    case_name: String,
    #[serde(default)]
    court: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    citation: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    chunk_id: f64,
    #[serde(default)]
    total_chunks: f64,
    #[serde(default)]
    text: String,
}

impl From<RawMetadata> for PassageMetadata {
    fn from(raw: RawMetadata) -> Self {
        Self {
            case_name: raw.case_name,
            court: raw.court,
            date: raw.date,
            citation: raw.citation,
            topic: raw.topic.filter(|t| !t.is_empty()),
            chunk_index: raw.chunk_id.max(0.0) as u32,
            total_chunks: raw.total_chunks.max(0.0) as u32,
            text: raw.text,
        }
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a PassageMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    index_fullness: f64,
    #[serde(default)]
    total_vector_count: u64,
}

#[derive(Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Deserialize)]
struct IndexModel {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Deserialize, Default)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'static str,
    spec: CreateIndexSpec<'a>,
}

#[derive(Serialize)]
struct CreateIndexSpec<'a> {
    serverless: &'a ServerlessSpec,
}

/// Cloud placement for an index created on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerlessSpec {
    pub cloud: String,
    pub region: String,
}

impl ServerlessSpec {
    /// Split a legacy environment name such as `us-east-1-aws` into region
    /// and cloud. A name without a known cloud suffix is taken as an AWS region.
    pub fn from_environment(environment: &str) -> Self {
        let environment = environment.trim();
        for cloud in ["aws", "gcp", "azure"] {
            if let Some(region) = environment.strip_suffix(&format!("-{cloud}")) {
                return Self {
                    cloud: cloud.to_string(),
                    region: region.to_string(),
                };
            }
        }
        Self {
            cloud: "aws".to_string(),
            region: environment.to_string(),
        }
    }
}

/// Pinecone control plane: lists, describes, and creates indexes.
pub struct PineconeControlPlane {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl PineconeControlPlane {
    pub fn new(
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: CONTROL_PLANE_URL.to_string(),
            api_key: api_key.into(),
            retry,
            poll_interval: Duration::from_secs(5),
            poll_attempts: 60,
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = normalize_host(url);
        self
    }

    /// How often and how many times to check a new index for readiness.
    pub fn with_readiness_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts.max(1);
        self
    }

    async fn get<T: DeserializeOwned + Send>(&self, path: &str) -> Result<T, StoreError> {
        let url = format!("{}{path}", self.base_url);
        self.retry
            .run(path, StoreError::is_transient, || {
                send(self.client.get(&url), &self.api_key)
            })
            .await
    }

    async fn list_indexes(&self) -> Result<Vec<IndexModel>, StoreError> {
        let list: IndexList = self.get("/indexes").await?;
        Ok(list.indexes)
    }

    async fn describe_index(&self, name: &str) -> Result<IndexModel, StoreError> {
        self.get(&format!("/indexes/{name}")).await
    }

    async fn create_index(
        &self,
        name: &str,
        dimension: usize,
        spec: &ServerlessSpec,
    ) -> Result<(), StoreError> {
        let url = format!("{}/indexes", self.base_url);
        let body = CreateIndexRequest {
            name,
            dimension,
            metric: "cosine",
            spec: CreateIndexSpec { serverless: spec },
        };
        let created: Result<IndexModel, StoreError> = self
            .retry
            .run("/indexes", StoreError::is_transient, || {
                send(self.client.post(&url).json(&body), &self.api_key)
            })
            .await;
        match created {
            Ok(_) => Ok(()),
            // Lost a race with another ingester.
            Err(StoreError::Server { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Connect to an existing index by name.
    pub async fn connect(&self, index_name: &str) -> Result<PineconeIndex, StoreError> {
        let described = self.describe_index(index_name).await?;
        let index = self.index_at(&described.host);
        info!(index = index_name, host = %index.host, "resolved pinecone index host");
        Ok(index)
    }

    /// Create `index_name` as a cosine serverless index when the project has
    /// none by that name, wait until it reports ready, and connect to it.
    pub async fn ensure_index(
        &self,
        index_name: &str,
        dimension: usize,
        spec: &ServerlessSpec,
    ) -> Result<PineconeIndex, StoreError> {
        let existing = self.list_indexes().await?;
        match existing.iter().find(|i| i.name == index_name) {
            Some(found) => {
                if let Some(actual) = found.dimension.filter(|d| *d != dimension) {
                    return Err(StoreError::DimensionMismatch {
                        expected: dimension,
                        actual,
                    });
                }
                debug!(index = index_name, "pinecone index exists");
            }
            None => {
                info!(
                    index = index_name,
                    dimension,
                    cloud = %spec.cloud,
                    region = %spec.region,
                    "creating pinecone index"
                );
                self.create_index(index_name, dimension, spec).await?;
            }
        }

        for attempt in 1..=self.poll_attempts {
            let described = self.describe_index(index_name).await?;
            if described.status.ready && !described.host.is_empty() {
                let index = self.index_at(&described.host);
                info!(index = index_name, host = %index.host, "pinecone index ready");
                return Ok(index);
            }
            debug!(
                index = index_name,
                attempt,
                state = %described.status.state,
                "waiting for pinecone index"
            );
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(StoreError::Other(format!(
            "pinecone index {index_name} not ready after {} checks",
            self.poll_attempts
        )))
    }

    fn index_at(&self, host: &str) -> PineconeIndex {
        PineconeIndex {
            client: self.client.clone(),
            host: normalize_host(host),
            api_key: self.api_key.clone(),
            retry: self.retry,
        }
    }
}

impl PineconeIndex {
    /// Client for the index served at `host` (with or without scheme).
    pub fn new(
        host: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: normalize_host(host),
            api_key: api_key.into(),
            retry,
        })
    }

    /// Resolve the data-plane host for `index_name` and connect to it.
    pub async fn connect(
        api_key: impl Into<String>,
        index_name: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, StoreError> {
        PineconeControlPlane::new(api_key, timeout, retry)?
            .connect(index_name)
            .await
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned + Send>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let url = format!("{}{path}", self.host);
        self.retry
            .run(path, StoreError::is_transient, || {
                send(self.client.post(&url).json(body), &self.api_key)
            })
            .await
    }
}

async fn send<T: DeserializeOwned + Send>(req: RequestBuilder, api_key: &str) -> Result<T, StoreError> {
    let resp = req
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StoreError::Server {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let body = UpsertRequest {
            vectors: records
                .iter()
                .map(|r| UpsertVector {
                    id: &r.id,
                    values: &r.values,
                    metadata: &r.metadata,
                })
                .collect(),
        };
        let resp: UpsertResponse = self.post("/vectors/upsert", &body).await?;
        debug!(upserted = resp.upserted_count, "pinecone upsert");
        Ok(resp.upserted_count)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            filter: filter.filter(|f| !f.is_empty()).map(MetadataFilter::to_pinecone),
        };
        let resp: QueryResponse = self.post("/query", &body).await?;
        Ok(into_matches(resp))
    }

    async fn describe_stats(&self) -> Result<IndexStats, StoreError> {
        let resp: StatsResponse = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .await?;
        Ok(IndexStats {
            total_vectors: resp.total_vector_count,
            dimension: resp.dimension,
            fullness: resp.index_fullness,
        })
    }
}

fn into_matches(resp: QueryResponse) -> Vec<VectorMatch> {
    resp.matches
        .into_iter()
        .map(|m| VectorMatch {
            id: m.id,
            score: m.score.clamp(0.0, 1.0),
            metadata: m.metadata.unwrap_or_default().into(),
        })
        .collect()
}

/// Ensure a scheme and strip any trailing slash.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}
