use crate::queue::Command;
use expansion::{CollapseOutcome, ExpandOutcome, ExpansionEngine};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewChange {
    Expanded(ExpandOutcome),
    Collapsed(CollapseOutcome),
}

/// Hook for whatever lays out and styles the view after it changes.
pub trait ViewListener: Send + Sync {
    fn view_changed(&self, change: &ViewChange);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    /// Commands dropped because the node was not ready for them.
    pub skipped: usize,
    pub failed: usize,
}

/// Applies queued commands to one engine, one at a time.
pub struct Worker {
    receiver: mpsc::Receiver<Command>,
    engine: Arc<ExpansionEngine>,
    listener: Option<Arc<dyn ViewListener>>,
}

impl Worker {
    pub fn new(receiver: mpsc::Receiver<Command>, engine: Arc<ExpansionEngine>) -> Self {
        Self {
            receiver,
            engine,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ViewListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Runs until every queue handle is dropped.
    pub async fn run(mut self) -> WorkerReport {
        info!("Worker started");
        let mut report = WorkerReport::default();
        while let Some(command) = self.receiver.recv().await {
            match self.process(command).await {
                Ok(Some(change)) => {
                    report.processed += 1;
                    if let Some(listener) = &self.listener {
                        listener.view_changed(&change);
                    }
                }
                Ok(None) => {
                    report.skipped += 1;
                    info!("Skipping {:?}: node {} is not ready", command, command.node());
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to process {:?}: {}", command, e);
                }
            }
        }
        info!("Worker stopped");
        report
    }

    async fn process(&self, command: Command) -> anyhow::Result<Option<ViewChange>> {
        match command {
            Command::Expand { node } => {
                if !self.engine.is_expand_ready(node).await? {
                    return Ok(None);
                }
                let outcome = self.engine.expand(node).await?;
                Ok(Some(ViewChange::Expanded(outcome)))
            }
            Command::Collapse { node, clear } => {
                if !self.engine.is_collapse_ready(node).await? {
                    return Ok(None);
                }
                let outcome = self.engine.collapse(node, clear).await?;
                Ok(Some(ViewChange::Collapsed(outcome)))
            }
        }
    }
}
