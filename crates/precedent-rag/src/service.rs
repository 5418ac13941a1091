//! Request validation and panic isolation around the workflow.

use std::collections::BTreeMap;
use std::sync::Arc;

use precedent_core::{Role, Turn};
use precedent_store::{MetadataFilter, StoreError};
use serde::Deserialize;
use tracing::{error, warn};

use crate::{IndexHealth, QueryResponse, QueryWorkflow, ServiceError};

/// One caller-supplied history message, in the `{role, content}` wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryMessage>,
    /// Equality constraints on passage metadata, e.g. `{"court": "..."}`.
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            conversation_history: Vec::new(),
            filter: BTreeMap::new(),
        }
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.query.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("query must not be empty".into()));
        }
        if self.session_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("session_id must not be empty".into()));
        }
        Ok(())
    }

    /// History as typed turns. Messages with unrecognised roles are dropped.
    fn turns(&self) -> Vec<Turn> {
        self.conversation_history
            .iter()
            .filter_map(|m| match Role::parse(&m.role) {
                Some(role) => Some(Turn {
                    role,
                    text: m.content.clone(),
                }),
                None => {
                    warn!(role = %m.role, "ignoring history message with unknown role");
                    None
                }
            })
            .collect()
    }

    fn metadata_filter(&self) -> Option<MetadataFilter> {
        if self.filter.is_empty() {
            return None;
        }
        Some(
            self.filter
                .iter()
                .fold(MetadataFilter::new(), |f, (k, v)| f.eq(k.as_str(), v.as_str())),
        )
    }
}

/// Entry point for callers: validates, then runs the workflow on its own task.
#[derive(Clone)]
pub struct QueryService {
    workflow: Arc<QueryWorkflow>,
}

impl QueryService {
    pub fn new(workflow: QueryWorkflow) -> Self {
        Self {
            workflow: Arc::new(workflow),
        }
    }

    pub fn workflow(&self) -> &QueryWorkflow {
        &self.workflow
    }

    pub async fn ask(&self, request: QueryRequest) -> Result<QueryResponse, ServiceError> {
        request.validate()?;

        let workflow = self.workflow.clone();
        let handle = tokio::spawn(async move {
            let history = request.turns();
            let filter = request.metadata_filter();
            workflow
                .answer_query_filtered(
                    request.query.trim(),
                    &request.session_id,
                    &history,
                    filter.as_ref(),
                )
                .await
        });

        handle.await.map_err(|e| {
            error!(error = %e, "query task failed");
            ServiceError::Internal(e.to_string())
        })
    }

    pub async fn reset(&self, session_id: &str) -> Result<(), StoreError> {
        self.workflow.reset_session(session_id).await
    }

    pub async fn health(&self) -> IndexHealth {
        self.workflow.retriever().health_check().await
    }
}
