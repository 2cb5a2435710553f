//! Error taxonomy for the gap-analysis pipeline.
//!
//! "No matches" from a retrieval call is never an error: it is an empty
//! result. The variants here are reserved for the backend actually failing.

use thiserror::Error;

use crate::models::Collection;

/// The vector index could not be reached or rejected the query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("collection '{0}' is not indexed")]
    UnknownCollection(Collection),

    #[error("query failed on '{collection}': {message}")]
    Query {
        collection: Collection,
        message: String,
    },
}

/// The model backend failed outright or returned output that does not
/// match the requested structured shape.
#[derive(Debug, Error)]
pub enum ModelInvocationError {
    #[error("model backend is disabled")]
    Disabled,

    #[error("model request failed: {0}")]
    Request(String),

    #[error("model backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("model output did not match the expected shape: {0}")]
    Malformed(String),
}

/// The run result could not be written to durable storage.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write results to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A pipeline run stopped before completing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("run aborted at requirement {requirement_id}: {source}")]
    Aborted {
        requirement_id: String,
        #[source]
        source: StageError,
    },
}

/// The stage-level failure that caused an abort.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("rubric '{rubric}' question {question_index}: {source}")]
    Model {
        rubric: String,
        question_index: usize,
        #[source]
        source: ModelInvocationError,
    },
}
