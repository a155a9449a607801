use crate::reader::ReadSummary;
use crate::source::Position;
use serde_json::error::Category;
use std::fmt;
use std::io;
use storage::StoreError;
use thiserror::Error;
use unfurl_core::error::{ErrorCode, UnfurlError};
use unfurl_core::model::ValueKind;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    /// Malformed JSON; nothing after it can be read.
    #[error("invalid JSON: {message} at {position}")]
    Syntax { position: Position, message: String },
    #[error("{message} at {position}")]
    Parse { position: Position, message: String },
    #[error(
        "column '{column}' row {row}: value has type {seen} but column type is {expected} at {position}"
    )]
    ColumnTypeConflict {
        column: String,
        row: usize,
        seen: ValueKind,
        expected: ValueKind,
        position: Position,
    },
    #[error("row {row}: {source}")]
    TypeConflict { row: usize, source: StoreError },
    #[error("join column '{column}' is not in header {header:?}")]
    MissingJoinColumn { column: String, header: Vec<String> },
    #[error("header {header:?} has no \"primary-key\" column")]
    MissingPrimaryKey { header: Vec<String> },
    #[error(
        "edge row {row}: node index {index} is out of range, must be between 0 and {}",
        node_count.saturating_sub(1)
    )]
    InvalidEdgeEndpoint {
        row: usize,
        index: i64,
        node_count: usize,
    },
}

impl ReadError {
    pub(crate) fn parse(position: Position, message: impl Into<String>) -> Self {
        ReadError::Parse {
            position,
            message: message.into(),
        }
    }

    /// Positions come from serde_json; data errors raised while walking the
    /// document structure become [`ReadError::Parse`].
    pub(crate) fn from_json(err: serde_json::Error) -> Self {
        let position = Position {
            line: err.line(),
            column: err.column(),
        };
        let text = err.to_string();
        let suffix = format!(" at line {} column {}", err.line(), err.column());
        let message = text.strip_suffix(suffix.as_str()).unwrap_or(&text).to_string();
        match err.classify() {
            Category::Io => ReadError::Io(err.into()),
            Category::Syntax | Category::Eof => ReadError::Syntax { position, message },
            Category::Data => ReadError::Parse { position, message },
        }
    }
}

impl UnfurlError for ReadError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ReadError::Io(_) => ErrorCode::Unavailable,
            _ => ErrorCode::InvalidArgument,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Nodes,
    Edges,
    Network,
}

impl TableKind {
    pub const KEYS: &'static [&'static str] = &["nodes", "edges", "network"];

    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Nodes => "nodes",
            TableKind::Edges => "edges",
            TableKind::Network => "network",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "nodes" => Some(TableKind::Nodes),
            "edges" => Some(TableKind::Edges),
            "network" => Some(TableKind::Network),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("{table} table: {error}")]
pub struct TableFailure {
    pub table: TableKind,
    pub error: ReadError,
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("malformed document: {0}")]
    Read(#[from] ReadError),
    #[error("{}", describe_failures(.failures))]
    Tables {
        failures: Vec<TableFailure>,
        summary: ReadSummary,
    },
}

fn describe_failures(failures: &[TableFailure]) -> String {
    let parts: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
    format!("{} table(s) failed: {}", failures.len(), parts.join("; "))
}

impl DocumentError {
    /// Whatever was committed before the failure, if the document got that far.
    pub fn partial_summary(&self) -> Option<&ReadSummary> {
        match self {
            DocumentError::Read(_) => None,
            DocumentError::Tables { summary, .. } => Some(summary),
        }
    }
}

impl UnfurlError for DocumentError {
    fn error_code(&self) -> ErrorCode {
        match self {
            DocumentError::Read(e) => e.error_code(),
            DocumentError::Tables { .. } => ErrorCode::InvalidArgument,
        }
    }
}
