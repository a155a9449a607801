use crate::error::EngineError;
use crate::fetch::{ExpansionRequest, FetchClient, HttpFetchClient};
use crate::metadata::{
    children_of, hidden_parents, id_value, is_expanded, parent_of, set_expanded,
    set_hidden_parents, ExpansionAction, SourceMetadata, EXPANDABLE, PARENT,
};
use ingestion::{
    BasicEdgeFactory, DocumentReader, Materialized, NodeFactory, NonDuplicating, ReadError,
    ReadSummary, Row,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use storage::Network;
use tokio::sync::{Mutex, RwLock};
use unfurl_core::audit::{AuditEvent, AuditSink, JsonlAuditSink};
use unfurl_core::config::AppConfig;
use unfurl_core::metrics::{MetricsCollector, MetricsSnapshot};
use unfurl_core::model::{EntityKind, Namespace, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpandSource {
    /// Children were already in the root graph.
    Cache,
    Remote,
}

impl fmt::Display for ExpandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpandSource::Cache => write!(f, "cache"),
            ExpandSource::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandOutcome {
    pub node: NodeId,
    pub source: ExpandSource,
    /// Children visible after the expansion.
    pub revealed: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseOutcome {
    pub parent: NodeId,
    pub hidden: Vec<NodeId>,
    pub deleted: Vec<NodeId>,
    pub restored_parent: bool,
}

/// Node factory for expansion documents: new nodes are tagged as children
/// of the node being expanded.
struct ChildNodeFactory {
    parent: NodeId,
}

impl NodeFactory for ChildNodeFactory {
    fn create(&mut self, network: &mut Network, row: &Row<'_>) -> Result<Materialized, ReadError> {
        let id = network.add_node();
        network
            .attributes_mut()
            .set(Namespace::Default, EntityKind::Node, id, PARENT, id_value(self.parent))
            .map_err(|source| ReadError::TypeConflict {
                row: row.index,
                source,
            })?;
        Ok(Materialized::Created(id))
    }
}

enum ExpandPlan {
    Cache(Vec<NodeId>),
    Remote {
        metadata: SourceMetadata,
        request: ExpansionRequest,
    },
}

/// Drives expand/collapse over one network.
///
/// Operations are serialized by `tx_lock`; the network itself sits behind a
/// read/write lock so renderers can read between operations. The remote
/// fetch runs with no network lock held.
pub struct ExpansionEngine {
    network: Arc<RwLock<Network>>,
    tx_lock: Mutex<()>,
    fetcher: Arc<dyn FetchClient>,
    config: AppConfig,
    metrics: MetricsCollector,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl ExpansionEngine {
    pub fn new(fetcher: Arc<dyn FetchClient>, config: AppConfig) -> Self {
        Self {
            network: Arc::new(RwLock::new(Network::new())),
            tx_lock: Mutex::new(()),
            fetcher,
            config,
            metrics: MetricsCollector::default(),
            audit_sink: None,
        }
    }

    /// HTTP fetcher and, when configured, a JSONL audit log.
    pub fn from_config(config: AppConfig) -> Result<Self, EngineError> {
        let fetcher = Arc::new(HttpFetchClient::new(&config.fetch)?);
        let audit_path = config.audit.jsonl_path.clone();
        let mut engine = Self::new(fetcher, config);
        if let Some(path) = audit_path {
            engine = engine.with_audit_sink(Arc::new(JsonlAuditSink::open(path)?));
        }
        Ok(engine)
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Arc::new(RwLock::new(network));
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    /// Shared handle for rendering reads.
    pub fn network(&self) -> Arc<RwLock<Network>> {
        self.network.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Initial load
    // -----------------------------------------------------------------------

    /// GET `url`, take the expansion action and join column from the
    /// response headers, and load the body.
    pub async fn open(&self, url: &str) -> Result<ReadSummary, EngineError> {
        let _guard = self.tx_lock.lock().await;
        tracing::info!("opening {}", url);
        let result = self.open_locked(url).await;
        self.finish_load(url, result).await
    }

    async fn open_locked(&self, url: &str) -> Result<ReadSummary, EngineError> {
        let response = self.fetcher.open(url).await?;
        let source = &self.config.source;
        let action = response
            .header(&source.action_header)
            .unwrap_or(source.default_action.as_str())
            .parse::<ExpansionAction>()?;
        let join_column = response
            .header(&source.join_column_header)
            .ok_or(EngineError::MissingSourceMetadata("source-join-column"))?;
        let metadata = SourceMetadata::new(url, action, join_column);
        self.load_locked(&response.body[..], &metadata).await
    }

    /// Load a document from a local reader with explicit source metadata.
    pub async fn load<R: Read>(
        &self,
        input: R,
        metadata: SourceMetadata,
    ) -> Result<ReadSummary, EngineError> {
        let _guard = self.tx_lock.lock().await;
        tracing::info!("loading local document for {}", metadata.url);
        let result = self.load_locked(input, &metadata).await;
        self.finish_load(&metadata.url, result).await
    }

    async fn load_locked<R: Read>(
        &self,
        input: R,
        metadata: &SourceMetadata,
    ) -> Result<ReadSummary, EngineError> {
        let mut network = self.network.write().await;
        metadata.record(&mut network)?;
        let summary = DocumentReader::basic(&self.config.reader).read(input, &mut network)?;
        Ok(summary)
    }

    async fn finish_load(
        &self,
        url: &str,
        result: Result<ReadSummary, EngineError>,
    ) -> Result<ReadSummary, EngineError> {
        let event = AuditEvent::load(self.network.read().await.id(), url);
        let event = match &result {
            Ok(summary) => {
                tracing::info!(
                    "loaded {}: {} nodes, {} edges",
                    url,
                    summary.nodes.len(),
                    summary.edges.len()
                );
                event
                    .with_detail("nodes", summary.nodes.len())
                    .with_detail("edges", summary.edges.len())
            }
            Err(e) => {
                tracing::warn!("loading {} failed: {}", url, e);
                event.failed(e)
            }
        };
        self.emit_audit_event(event);
        result
    }

    // -----------------------------------------------------------------------
    // Expand
    // -----------------------------------------------------------------------

    pub async fn expand(&self, node: NodeId) -> Result<ExpandOutcome, EngineError> {
        let _guard = self.tx_lock.lock().await;
        let start = Instant::now();
        tracing::info!("expanding node {}", node);

        let result = self.expand_locked(node).await;
        let latency_us = start.elapsed().as_micros() as u64;

        let event = AuditEvent::expand(self.network.read().await.id(), node);
        let event = match &result {
            Ok(outcome) => {
                self.metrics
                    .record_expand(latency_us, outcome.source == ExpandSource::Cache);
                tracing::info!(
                    "expanded node {} from {}: {} children visible",
                    node,
                    outcome.source,
                    outcome.revealed.len()
                );
                event
                    .with_detail("source", outcome.source)
                    .with_detail("revealed", outcome.revealed.len())
            }
            Err(e) => {
                self.metrics.record_failed_expand();
                tracing::warn!("expanding node {} failed: {}", node, e);
                event.failed(e)
            }
        };
        self.emit_audit_event(event);
        result
    }

    async fn expand_locked(&self, node: NodeId) -> Result<ExpandOutcome, EngineError> {
        let (plan, action) = {
            let network = self.network.read().await;
            if !network.contains_node(node) {
                return Err(EngineError::UnknownNode(node));
            }
            if !network.is_visible(node) {
                return Err(EngineError::NodeNotVisible(node));
            }
            let metadata = SourceMetadata::load(&network)?;
            let action = metadata.action;
            let children = children_of(&network, node)?;
            let plan = if children.is_empty() {
                let request = self.build_request(&network, node, &metadata.join_column)?;
                ExpandPlan::Remote { metadata, request }
            } else {
                ExpandPlan::Cache(children)
            };
            (plan, action)
        };

        let (source, mut network, children) = match plan {
            ExpandPlan::Cache(children) => {
                let mut network = self.network.write().await;
                self.expand_from_cache(&mut network, &children)?;
                (ExpandSource::Cache, network, children)
            }
            ExpandPlan::Remote { metadata, request } => {
                let body = self.fetcher.expand(&metadata.url, &request).await?;
                let mut network = self.network.write().await;
                let children =
                    self.expand_from_remote(&mut network, node, &metadata, &body[..])?;
                (ExpandSource::Remote, network, children)
            }
        };

        set_expanded(&mut network, node, true)?;

        // A replaced node with nothing to replace it stays put.
        if action == ExpansionAction::Replace && !children.is_empty() {
            network.hide_nodes(&BTreeSet::from([node]));
            let mut hidden = hidden_parents(&network)?;
            if !hidden.contains(&node) {
                hidden.push(node);
            }
            set_hidden_parents(&mut network, &hidden)?;
        }

        let revealed = children
            .into_iter()
            .filter(|id| network.is_visible(*id))
            .collect();
        Ok(ExpandOutcome {
            node,
            source,
            revealed,
        })
    }

    fn expand_from_cache(&self, network: &mut Network, children: &[NodeId]) -> Result<(), EngineError> {
        tracing::debug!("revealing {} cached children", children.len());
        for child in children {
            network.show_node(*child)?;
        }
        for child in children {
            network.show_adjacent_edges(*child);
        }
        Ok(())
    }

    /// Merge a fetched document; returns the children it produced or matched.
    fn expand_from_remote<R: Read>(
        &self,
        network: &mut Network,
        node: NodeId,
        metadata: &SourceMetadata,
        body: R,
    ) -> Result<Vec<NodeId>, EngineError> {
        let reader_config = &self.config.reader;
        let mut reader = DocumentReader::new(
            NonDuplicating::new(ChildNodeFactory { parent: node }, metadata.join_column.as_str()),
            BasicEdgeFactory::new(reader_config.directed_edges, reader_config.duplicate_edges),
        );
        let summary = match reader.read(body, network) {
            Ok(summary) => summary,
            Err(e) => {
                // Anything tagged as a child of `node` came from this attempt;
                // leaving it would turn the retry into a cache hit.
                let partial: BTreeSet<NodeId> = children_of(network, node)?.into_iter().collect();
                if !partial.is_empty() {
                    tracing::warn!(
                        "discarding {} nodes from failed merge into node {}",
                        partial.len(),
                        node
                    );
                    network.delete_nodes(&partial);
                }
                return Err(e.into());
            }
        };
        tracing::debug!(
            "merged {} nodes ({} new) and {} edges",
            summary.nodes.len(),
            summary.created_nodes,
            summary.edges.len()
        );

        let mut seen = BTreeSet::new();
        Ok(summary
            .nodes
            .into_iter()
            .filter(|id| *id != node && seen.insert(*id))
            .collect())
    }

    fn build_request(
        &self,
        network: &Network,
        node: NodeId,
        join_column: &str,
    ) -> Result<ExpansionRequest, EngineError> {
        let join_value = |id: NodeId| {
            network
                .attributes()
                .raw(Namespace::Default, EntityKind::Node, id, join_column)
                .map(|v| v.to_string())
        };

        let target = join_value(node).ok_or_else(|| EngineError::MissingJoinValue {
            node,
            column: join_column.to_string(),
        })?;

        let mut extant_nodes = Vec::new();
        if self.config.fetch.include_extant_nodes {
            extant_nodes.extend(
                network
                    .view()
                    .node_ids()
                    .filter(|id| *id != node)
                    .filter_map(join_value),
            );
            extant_nodes.extend(
                hidden_parents(network)?
                    .into_iter()
                    .filter(|id| *id != node)
                    .filter_map(join_value),
            );
        }

        Ok(ExpansionRequest {
            target,
            extant_nodes,
        })
    }

    // -----------------------------------------------------------------------
    // Collapse
    // -----------------------------------------------------------------------

    pub async fn collapse(&self, node: NodeId, clear: bool) -> Result<CollapseOutcome, EngineError> {
        let _guard = self.tx_lock.lock().await;
        tracing::info!("collapsing node {} (clear={})", node, clear);

        let mut network = self.network.write().await;
        let result = Self::collapse_locked(&mut network, node, clear);

        let event = AuditEvent::collapse(network.id(), node, clear);
        let event = match &result {
            Ok(outcome) => {
                self.metrics
                    .record_collapse(outcome.hidden.len(), outcome.deleted.len(), clear);
                tracing::info!(
                    "collapsed into node {}: {} hidden, {} deleted",
                    outcome.parent,
                    outcome.hidden.len(),
                    outcome.deleted.len()
                );
                event
                    .with_detail("hidden", outcome.hidden.len())
                    .with_detail("deleted", outcome.deleted.len())
            }
            Err(e) => {
                tracing::warn!("collapsing node {} failed: {}", node, e);
                event.failed(e)
            }
        };
        self.emit_audit_event(event);
        result
    }

    fn collapse_locked(
        network: &mut Network,
        node: NodeId,
        clear: bool,
    ) -> Result<CollapseOutcome, EngineError> {
        if !network.contains_node(node) {
            return Err(EngineError::UnknownNode(node));
        }
        let action = SourceMetadata::load(network)?.action;

        let parent = match action {
            ExpansionAction::Replace => {
                parent_of(network, node)?.ok_or(EngineError::NotCollapsible(node))?
            }
            ExpansionAction::Augment => node,
        };

        // Siblings (or direct children) plus everything expanded below them.
        let mut targets: BTreeSet<NodeId> = children_of(network, parent)?.into_iter().collect();
        let mut frontier: Vec<NodeId> = targets.iter().copied().collect();
        while let Some(current) = frontier.pop() {
            for child in children_of(network, current)? {
                if child != parent && targets.insert(child) {
                    frontier.push(child);
                }
            }
        }

        let hidden = network.hide_nodes(&targets);
        for id in &targets {
            if is_expanded(network, *id)? {
                set_expanded(network, *id, false)?;
            }
        }

        let mut hidden_list = hidden_parents(network)?;
        hidden_list.retain(|id| !targets.contains(id) && *id != parent);

        let deleted = if clear {
            network.delete_nodes(&targets)
        } else {
            Vec::new()
        };

        let restored_parent = match action {
            ExpansionAction::Replace if network.contains_node(parent) => {
                let shown = network.show_node(parent)?;
                network.show_adjacent_edges(parent);
                shown
            }
            _ => false,
        };
        set_hidden_parents(network, &hidden_list)?;
        if network.contains_node(parent) {
            set_expanded(network, parent, false)?;
        }

        Ok(CollapseOutcome {
            parent,
            hidden,
            deleted,
            restored_parent,
        })
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    pub async fn is_expand_ready(&self, node: NodeId) -> Result<bool, EngineError> {
        let network = self.network.read().await;
        if !network.contains_node(node) {
            return Err(EngineError::UnknownNode(node));
        }
        if is_expanded(&network, node)? {
            return Ok(false);
        }
        let attrs = network.attributes();
        if !attrs.has_column(Namespace::Default, EntityKind::Node, EXPANDABLE) {
            return Ok(true);
        }
        Ok(attrs.get_bool(Namespace::Default, EntityKind::Node, node, EXPANDABLE, false)?)
    }

    pub async fn is_collapse_ready(&self, node: NodeId) -> Result<bool, EngineError> {
        let network = self.network.read().await;
        if !network.contains_node(node) {
            return Err(EngineError::UnknownNode(node));
        }
        match SourceMetadata::load(&network)?.action {
            ExpansionAction::Replace => Ok(parent_of(&network, node)?.is_some()),
            ExpansionAction::Augment => Ok(is_expanded(&network, node)?),
        }
    }

    fn emit_audit_event(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit_sink {
            if let Err(e) = sink.record(event) {
                tracing::warn!("audit sink rejected event: {}", e);
            }
        }
    }
}
