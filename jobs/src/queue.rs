use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use unfurl_core::model::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Expand { node: NodeId },
    Collapse { node: NodeId, clear: bool },
}

impl Command {
    pub fn node(&self) -> NodeId {
        match self {
            Command::Expand { node } | Command::Collapse { node, .. } => *node,
        }
    }
}

#[async_trait::async_trait]
pub trait CommandQueue: Send + Sync {
    async fn enqueue(&self, command: Command) -> anyhow::Result<()>;
}

/// In-memory queue over a Tokio channel; commands are handled in send order.
pub struct ChannelCommandQueue {
    sender: mpsc::Sender<Command>,
}

impl ChannelCommandQueue {
    pub fn new(sender: mpsc::Sender<Command>) -> Self {
        Self { sender }
    }

    /// Queue plus the receiving end for a [`crate::Worker`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

#[async_trait::async_trait]
impl CommandQueue for ChannelCommandQueue {
    async fn enqueue(&self, command: Command) -> anyhow::Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|e| anyhow::anyhow!("Queue send error: {}", e))
    }
}
