use crate::model::{NetworkId, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// The operation an event reports on, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum AuditOperation {
    Load { source_url: String },
    Expand { node_id: NodeId },
    Collapse { node_id: NodeId, clear: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Assigned by the sink.
    pub sequence: u64,
    pub network_id: NetworkId,
    #[serde(flatten)]
    pub operation: AuditOperation,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    fn succeeded(network_id: NetworkId, operation: AuditOperation) -> Self {
        Self {
            sequence: 0,
            network_id,
            operation,
            outcome: AuditOutcome::Succeeded,
            error: None,
            details: BTreeMap::new(),
        }
    }

    pub fn load(network_id: NetworkId, source_url: impl Into<String>) -> Self {
        Self::succeeded(
            network_id,
            AuditOperation::Load {
                source_url: source_url.into(),
            },
        )
    }

    pub fn expand(network_id: NetworkId, node_id: NodeId) -> Self {
        Self::succeeded(network_id, AuditOperation::Expand { node_id })
    }

    pub fn collapse(network_id: NetworkId, node_id: NodeId, clear: bool) -> Self {
        Self::succeeded(network_id, AuditOperation::Collapse { node_id, clear })
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn failed(mut self, error: &impl fmt::Display) -> Self {
        self.outcome = AuditOutcome::Failed;
        self.error = Some(error.to_string());
        self
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self.operation {
            AuditOperation::Load { .. } => None,
            AuditOperation::Expand { node_id } | AuditOperation::Collapse { node_id, .. } => {
                Some(node_id)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink lock poisoned")]
    LockPoisoned,
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Numbers events from 1 in the order the sink sees them.
#[derive(Debug, Default)]
struct Sequencer(AtomicU64);

impl Sequencer {
    fn stamp(&self, mut event: AuditEvent) -> AuditEvent {
        event.sequence = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        event
    }
}

#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    sequencer: Sequencer,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.events.lock().map_err(|_| AuditError::LockPoisoned)?;
        Ok(events.clone())
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.lock().map_err(|_| AuditError::LockPoisoned)?;
        events.push(self.sequencer.stamp(event));
        Ok(())
    }
}

/// Appends one JSON object per line; each record is flushed before returning.
pub struct JsonlAuditSink {
    writer: Mutex<BufWriter<File>>,
    sequencer: Sequencer,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            sequencer: Sequencer::default(),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().map_err(|_| AuditError::LockPoisoned)?;
        let event = self.sequencer.stamp(event);
        serde_json::to_writer(&mut *writer, &event)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_sink_numbers_events() {
        let sink = InMemoryAuditSink::default();
        sink.record(AuditEvent::expand(1, 4)).unwrap();
        sink.record(AuditEvent::collapse(1, 4, true).failed(&"node 4 is not collapsible"))
            .unwrap();

        let events = sink.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
        assert_eq!(events[1].outcome, AuditOutcome::Failed);
        assert_eq!(events[1].node_id(), Some(4));
    }

    #[test]
    fn jsonl_sink_flattens_operation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit").join("events.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();

        sink.record(AuditEvent::expand(3, 17).failed(&"remote fetch failed"))
            .unwrap();
        sink.record(AuditEvent::load(3, "http://source.test/graph").with_detail("nodes", 2))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0]["operation"], "expand");
        assert_eq!(lines[0]["node_id"], 17);
        assert_eq!(lines[0]["outcome"], "failed");
        assert!(lines[0].get("details").is_none());
        assert_eq!(lines[1]["source_url"], "http://source.test/graph");
        assert_eq!(lines[1]["details"]["nodes"], "2");

        let back: AuditEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(back.operation, AuditOperation::Expand { node_id: 17 });
        assert_eq!(back.sequence, 1);
    }
}
