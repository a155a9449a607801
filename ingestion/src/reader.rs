use crate::error::{DocumentError, ReadError, TableFailure, TableKind};
use crate::source::{Cursor, Position, Tracked};
use crate::table::{Row, TableSeed, TableSink};
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fmt;
use std::io::Read;
use storage::{AttributeStore, Network};
use unfurl_core::config::ReaderConfig;
use unfurl_core::model::{EdgeId, EntityId, EntityKind, Namespace, NodeId, Value, ValueKind};

pub const PRIMARY_KEY: &str = "primary-key";

/// Whether a factory made a new entity or matched one already in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Created(EntityId),
    Reused(EntityId),
}

impl Materialized {
    pub fn id(self) -> EntityId {
        match self {
            Materialized::Created(id) | Materialized::Reused(id) => id,
        }
    }
}

pub trait NodeFactory {
    fn header(&mut self, _columns: &[String], _position: Position) -> Result<(), ReadError> {
        Ok(())
    }

    fn create(&mut self, network: &mut Network, row: &Row<'_>) -> Result<Materialized, ReadError>;
}

/// Always makes a fresh node, shown in the view.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicNodeFactory;

impl NodeFactory for BasicNodeFactory {
    fn create(&mut self, network: &mut Network, _row: &Row<'_>) -> Result<Materialized, ReadError> {
        Ok(Materialized::Created(network.add_node()))
    }
}

/// Reuses a root-graph node whose join column already holds the row's
/// value, delegating to `inner` otherwise.
pub struct NonDuplicating<F> {
    inner: F,
    join_column: String,
    join_index: usize,
}

impl<F: NodeFactory> NonDuplicating<F> {
    pub fn new(inner: F, join_column: impl Into<String>) -> Self {
        Self {
            inner,
            join_column: join_column.into(),
            join_index: 0,
        }
    }

    pub fn join_column(&self) -> &str {
        &self.join_column
    }

    fn existing(&self, network: &Network, row: &Row<'_>) -> Result<Option<NodeId>, ReadError> {
        let Some(value) = row.value(self.join_index) else {
            return Ok(None);
        };
        let matches = network
            .attributes()
            .find_entities_with_value(Namespace::Default, EntityKind::Node, &self.join_column, value)
            .map_err(|source| ReadError::TypeConflict {
                row: row.index,
                source,
            })?;
        Ok(matches.into_iter().find(|id| network.contains_node(*id)))
    }
}

impl<F: NodeFactory> NodeFactory for NonDuplicating<F> {
    fn header(&mut self, columns: &[String], position: Position) -> Result<(), ReadError> {
        self.join_index = columns
            .iter()
            .position(|c| *c == self.join_column)
            .ok_or_else(|| ReadError::MissingJoinColumn {
                column: self.join_column.clone(),
                header: columns.to_vec(),
            })?;
        self.inner.header(columns, position)
    }

    fn create(&mut self, network: &mut Network, row: &Row<'_>) -> Result<Materialized, ReadError> {
        if let Some(id) = self.existing(network, row)? {
            return Ok(Materialized::Reused(id));
        }
        self.inner.create(network, row)
    }
}

pub trait EdgeFactory {
    fn header(&mut self, columns: &[String], position: Position) -> Result<(), ReadError>;

    fn create(
        &mut self,
        network: &mut Network,
        nodes: &[NodeId],
        row: &Row<'_>,
    ) -> Result<Materialized, ReadError>;
}

/// Joins the nodes at the row indices in the first two columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicEdgeFactory {
    pub directed: bool,
    pub duplicates: bool,
}

impl BasicEdgeFactory {
    pub fn new(directed: bool, duplicates: bool) -> Self {
        Self {
            directed,
            duplicates,
        }
    }

    fn endpoint(&self, nodes: &[NodeId], row: &Row<'_>, column: usize) -> Result<NodeId, ReadError> {
        if row.types[column] != Some(ValueKind::Long) {
            let found = row.types[column].map_or("null".to_string(), |k| k.to_string());
            return Err(ReadError::parse(
                row.position,
                format!("edge row {}: endpoint column {} must hold long values, found {}", row.index, column, found),
            ));
        }
        let Some(index) = row.value(column).and_then(Value::as_long) else {
            return Err(ReadError::parse(
                row.position,
                format!("edge row {}: endpoint column {} is null", row.index, column),
            ));
        };
        usize::try_from(index)
            .ok()
            .and_then(|i| nodes.get(i).copied())
            .ok_or(ReadError::InvalidEdgeEndpoint {
                row: row.index,
                index,
                node_count: nodes.len(),
            })
    }
}

impl EdgeFactory for BasicEdgeFactory {
    fn header(&mut self, columns: &[String], position: Position) -> Result<(), ReadError> {
        if columns.len() < 2 {
            return Err(ReadError::parse(
                position,
                format!("edge header {:?} needs source and target columns", columns),
            ));
        }
        Ok(())
    }

    fn create(
        &mut self,
        network: &mut Network,
        nodes: &[NodeId],
        row: &Row<'_>,
    ) -> Result<Materialized, ReadError> {
        let source = self.endpoint(nodes, row, 0)?;
        let target = self.endpoint(nodes, row, 1)?;

        if !self.duplicates {
            if let Some(existing) = network.connecting_edges(source, target, self.directed).first() {
                return Ok(Materialized::Reused(*existing));
            }
        }

        let id = network
            .add_edge(source, target, self.directed)
            .map_err(|source| ReadError::TypeConflict {
                row: row.index,
                source,
            })?;
        Ok(Materialized::Created(id))
    }
}

/// Writes the cells of a row from column `start` onward as attributes.
struct AttrWriter {
    entity: EntityKind,
    start: usize,
    skip: Option<usize>,
    columns: Vec<String>,
}

impl AttrWriter {
    fn new(entity: EntityKind, start: usize) -> Self {
        Self {
            entity,
            start,
            skip: None,
            columns: Vec::new(),
        }
    }

    fn header(&mut self, columns: &[String], skip: Option<usize>) {
        self.columns = columns.to_vec();
        self.skip = skip;
    }

    fn write(&self, store: &mut AttributeStore, id: EntityId, row: &Row<'_>) -> Result<(), ReadError> {
        for (index, name) in self.columns.iter().enumerate().skip(self.start) {
            if Some(index) == self.skip {
                continue;
            }
            let Some(value) = row.value(index) else {
                continue;
            };
            store
                .set(Namespace::Default, self.entity, id, name, value.clone())
                .map_err(|source| ReadError::TypeConflict {
                    row: row.index,
                    source,
                })?;
        }
        Ok(())
    }
}

/// What a read committed to the network.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadSummary {
    /// Node per node-table row, in row order.
    pub nodes: Vec<NodeId>,
    pub created_nodes: usize,
    pub reused_nodes: usize,
    pub edges: Vec<EdgeId>,
    pub created_edges: usize,
    pub reused_edges: usize,
    pub network_rows: usize,
}

struct NodeSink<'a, N> {
    factory: &'a mut N,
    attrs: AttrWriter,
    network: &'a mut Network,
    summary: &'a mut ReadSummary,
}

impl<N: NodeFactory> TableSink for NodeSink<'_, N> {
    fn on_header(&mut self, columns: &[String], position: Position) -> Result<(), ReadError> {
        self.factory.header(columns, position)?;
        self.attrs.header(columns, None);
        Ok(())
    }

    fn on_row(&mut self, row: &Row<'_>) -> Result<(), ReadError> {
        let node = self.factory.create(self.network, row)?;
        self.attrs.write(self.network.attributes_mut(), node.id(), row)?;
        match node {
            Materialized::Created(_) => self.summary.created_nodes += 1,
            Materialized::Reused(_) => self.summary.reused_nodes += 1,
        }
        self.summary.nodes.push(node.id());
        Ok(())
    }
}

struct EdgeSink<'a, E> {
    factory: &'a mut E,
    attrs: AttrWriter,
    network: &'a mut Network,
    summary: &'a mut ReadSummary,
}

impl<E: EdgeFactory> TableSink for EdgeSink<'_, E> {
    fn on_header(&mut self, columns: &[String], position: Position) -> Result<(), ReadError> {
        self.factory.header(columns, position)?;
        self.attrs.header(columns, None);
        Ok(())
    }

    fn on_row(&mut self, row: &Row<'_>) -> Result<(), ReadError> {
        let edge = self.factory.create(self.network, &self.summary.nodes, row)?;
        self.attrs.write(self.network.attributes_mut(), edge.id(), row)?;
        match edge {
            Materialized::Created(_) => self.summary.created_edges += 1,
            Materialized::Reused(_) => self.summary.reused_edges += 1,
        }
        self.summary.edges.push(edge.id());
        Ok(())
    }
}

struct NetworkSink<'a> {
    attrs: AttrWriter,
    key_index: usize,
    network: &'a mut Network,
    summary: &'a mut ReadSummary,
}

impl TableSink for NetworkSink<'_> {
    fn on_header(&mut self, columns: &[String], _position: Position) -> Result<(), ReadError> {
        self.key_index = columns
            .iter()
            .position(|c| c == PRIMARY_KEY)
            .ok_or_else(|| ReadError::MissingPrimaryKey {
                header: columns.to_vec(),
            })?;
        self.attrs.header(columns, Some(self.key_index));
        Ok(())
    }

    fn on_row(&mut self, row: &Row<'_>) -> Result<(), ReadError> {
        let key = match row.value(self.key_index) {
            Some(value) => value.promote(ValueKind::Long).and_then(|v| v.as_long()),
            None => {
                return Err(ReadError::parse(
                    row.position,
                    format!("network row {}: {} is null", row.index, PRIMARY_KEY),
                ))
            }
        };
        let Some(key) = key.and_then(|k| u64::try_from(k).ok()) else {
            return Err(ReadError::parse(
                row.position,
                format!("network row {}: {} must be a non-negative integer", row.index, PRIMARY_KEY),
            ));
        };
        self.attrs.write(self.network.attributes_mut(), key, row)?;
        self.summary.network_rows += 1;
        Ok(())
    }
}

/// Reads a graph document (nodes, edges and network tables) into a network.
pub struct DocumentReader<N, E> {
    node_factory: N,
    edge_factory: E,
}

impl DocumentReader<BasicNodeFactory, BasicEdgeFactory> {
    pub fn basic(config: &ReaderConfig) -> Self {
        Self::new(
            BasicNodeFactory,
            BasicEdgeFactory::new(config.directed_edges, config.duplicate_edges),
        )
    }
}

impl DocumentReader<NonDuplicating<BasicNodeFactory>, BasicEdgeFactory> {
    /// Reader that matches nodes on `join_column` instead of duplicating them.
    pub fn joined(join_column: impl Into<String>, config: &ReaderConfig) -> Self {
        Self::new(
            NonDuplicating::new(BasicNodeFactory, join_column),
            BasicEdgeFactory::new(config.directed_edges, config.duplicate_edges),
        )
    }
}

impl<N: NodeFactory, E: EdgeFactory> DocumentReader<N, E> {
    pub fn new(node_factory: N, edge_factory: E) -> Self {
        Self {
            node_factory,
            edge_factory,
        }
    }

    pub fn read<R: Read>(&mut self, input: R, network: &mut Network) -> Result<ReadSummary, DocumentError> {
        let mut source = Tracked::new(input);
        let mut summary = ReadSummary::default();
        if !source.skip_whitespace().map_err(ReadError::from)? {
            tracing::debug!("empty document");
            return Ok(summary);
        }

        let mut failures = Vec::new();
        let cursor = source.cursor();
        let mut deserializer = serde_json::Deserializer::from_reader(source);
        let visitor = DocumentVisitor {
            reader: self,
            network,
            summary: &mut summary,
            failures: &mut failures,
            cursor,
        };
        de::Deserializer::deserialize_any(&mut deserializer, visitor).map_err(ReadError::from_json)?;
        deserializer.end().map_err(ReadError::from_json)?;

        tracing::debug!(
            "read {} nodes ({} new), {} edges ({} new), {} network rows",
            summary.nodes.len(),
            summary.created_nodes,
            summary.edges.len(),
            summary.created_edges,
            summary.network_rows
        );

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(DocumentError::Tables { failures, summary })
        }
    }
}

/// Walks the top level of a document, in either of its two shapes.
struct DocumentVisitor<'a, N, E> {
    reader: &'a mut DocumentReader<N, E>,
    network: &'a mut Network,
    summary: &'a mut ReadSummary,
    failures: &'a mut Vec<TableFailure>,
    cursor: Cursor,
}

impl<N: NodeFactory, E: EdgeFactory> DocumentVisitor<'_, N, E> {
    fn slot(&mut self, table: TableKind) -> SlotSeed<'_, N, E> {
        SlotSeed {
            table,
            node_factory: &mut self.reader.node_factory,
            edge_factory: &mut self.reader.edge_factory,
            network: &mut *self.network,
            summary: &mut *self.summary,
            cursor: self.cursor.clone(),
        }
    }

    /// A failed table has already been skipped; the following tables still load.
    fn record(&mut self, table: TableKind, result: Result<usize, ReadError>) {
        match result {
            Ok(rows) => tracing::debug!("{} table: {} rows", table, rows),
            Err(error) => {
                tracing::warn!("skipping rest of {} table: {}", table, error);
                self.failures.push(TableFailure { table, error });
            }
        }
    }
}

impl<'de, N: NodeFactory, E: EdgeFactory> Visitor<'de> for DocumentVisitor<'_, N, E> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of up to three tables or an object keyed by nodes, edges and network")
    }

    fn visit_seq<A: SeqAccess<'de>>(mut self, mut seq: A) -> Result<(), A::Error> {
        for table in [TableKind::Nodes, TableKind::Edges, TableKind::Network] {
            let Some(result) = seq.next_element_seed(self.slot(table))? else {
                return Ok(());
            };
            self.record(table, result);
        }
        if seq.next_element::<IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &"at most three tables"));
        }
        Ok(())
    }

    fn visit_map<A: MapAccess<'de>>(mut self, mut map: A) -> Result<(), A::Error> {
        let mut seen: Vec<TableKind> = Vec::new();
        while let Some(key) = map.next_key::<String>()? {
            let Some(table) = TableKind::from_key(&key) else {
                return Err(de::Error::unknown_field(&key, TableKind::KEYS));
            };
            if seen.contains(&table) {
                return Err(de::Error::duplicate_field(table.as_str()));
            }
            seen.push(table);
            let result = map.next_value_seed(self.slot(table))?;
            self.record(table, result);
        }
        Ok(())
    }
}

/// Reads one table of a document through the sink for its kind.
struct SlotSeed<'a, N, E> {
    table: TableKind,
    node_factory: &'a mut N,
    edge_factory: &'a mut E,
    network: &'a mut Network,
    summary: &'a mut ReadSummary,
    cursor: Cursor,
}

impl<'de, N: NodeFactory, E: EdgeFactory> DeserializeSeed<'de> for SlotSeed<'_, N, E> {
    type Value = Result<usize, ReadError>;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        match self.table {
            TableKind::Nodes => {
                let mut sink = NodeSink {
                    factory: self.node_factory,
                    attrs: AttrWriter::new(EntityKind::Node, 0),
                    network: self.network,
                    summary: self.summary,
                };
                TableSeed::new(&mut sink, self.cursor).deserialize(deserializer)
            }
            TableKind::Edges => {
                let mut sink = EdgeSink {
                    factory: self.edge_factory,
                    attrs: AttrWriter::new(EntityKind::Edge, 2),
                    network: self.network,
                    summary: self.summary,
                };
                TableSeed::new(&mut sink, self.cursor).deserialize(deserializer)
            }
            TableKind::Network => {
                let mut sink = NetworkSink {
                    attrs: AttrWriter::new(EntityKind::Network, 0),
                    key_index: 0,
                    network: self.network,
                    summary: self.summary,
                };
                TableSeed::new(&mut sink, self.cursor).deserialize(deserializer)
            }
        }
    }
}
