//! Query workflow: rewrite, retrieve, assess retrieval, generate, assess confidence.

mod error;
mod lanes;
pub mod prompts;
mod retriever;
mod service;
mod workflow;

pub use error::{RetrievalError, ServiceError};
pub use lanes::SessionLanes;
pub use retriever::{IndexHealth, PassageRetriever, Retrieval, Retriever};
pub use service::{HistoryMessage, QueryRequest, QueryService};
pub use workflow::{
    NoteSeverity, QueryResponse, QueryState, QueryWorkflow, Stage, StageNote, WorkflowOptions,
};
