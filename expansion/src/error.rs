use crate::fetch::FetchError;
use ingestion::DocumentError;
use storage::StoreError;
use thiserror::Error;
use unfurl_core::audit::AuditError;
use unfurl_core::error::{ErrorCode, UnfurlError};
use unfurl_core::model::NodeId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("remote fetch failed: {0}")]
    RemoteFetchFailure(#[from] FetchError),
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {0} is not in the view")]
    NodeNotVisible(NodeId),
    #[error("node {node} has no value in join column '{column}'")]
    MissingJoinValue { node: NodeId, column: String },
    #[error("node {0} has no parent to collapse into")]
    NotCollapsible(NodeId),
    #[error("network has no '{0}' source metadata")]
    MissingSourceMetadata(&'static str),
    #[error("invalid source metadata: {0}")]
    InvalidSourceMetadata(String),
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),
}

impl UnfurlError for EngineError {
    fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::RemoteFetchFailure(_) => ErrorCode::Unavailable,
            EngineError::Document(e) => e.error_code(),
            EngineError::Store(e) => e.error_code(),
            EngineError::UnknownNode(_) => ErrorCode::NotFound,
            EngineError::NodeNotVisible(_)
            | EngineError::MissingJoinValue { .. }
            | EngineError::NotCollapsible(_)
            | EngineError::MissingSourceMetadata(_) => ErrorCode::FailedPrecondition,
            EngineError::InvalidSourceMetadata(_) => ErrorCode::InvalidArgument,
            EngineError::Audit(_) => ErrorCode::Internal,
        }
    }
}
