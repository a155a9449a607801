use thiserror::Error;
use unfurl_core::error::{ErrorCode, UnfurlError};
use unfurl_core::model::{EdgeId, EntityKind, Namespace, NodeId, ValueKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(
        "type mismatch on {entity} column '{column}' ({namespace} table): column has type {expected} but value has type {actual}"
    )]
    TypeConflict {
        namespace: Namespace,
        entity: EntityKind,
        column: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("unknown edge {0}")]
    UnknownEdge(EdgeId),
    #[error("edge {edge} cannot be shown: endpoint {node} is not visible")]
    EndpointNotVisible { edge: EdgeId, node: NodeId },
}

impl UnfurlError for StoreError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::TypeConflict { .. } => ErrorCode::InvalidArgument,
            StoreError::UnknownNode(_) | StoreError::UnknownEdge(_) => ErrorCode::NotFound,
            StoreError::EndpointNotVisible { .. } => ErrorCode::FailedPrecondition,
        }
    }
}
