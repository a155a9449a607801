use crate::error::StoreError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use unfurl_core::model::{EdgeId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub directed: bool,
}

impl EdgeRecord {
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.source == node {
            self.target
        } else {
            self.source
        }
    }

    fn connects(&self, source: NodeId, target: NodeId, directed: bool) -> bool {
        if directed {
            self.source == source && self.target == target
        } else {
            (self.source == source && self.target == target)
                || (self.source == target && self.target == source)
        }
    }
}

/// One layer of nodes and edges with an adjacency index.
///
/// Ids are allocated monotonically, so ordered sets iterate in creation order.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    nodes: BTreeSet<NodeId>,
    edges: BTreeMap<EdgeId, EdgeRecord>,
    adjacency: HashMap<NodeId, BTreeSet<EdgeId>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, id: NodeId) -> bool {
        self.nodes.insert(id)
    }

    pub fn insert_edge(&mut self, edge: EdgeRecord) -> Result<bool, StoreError> {
        for endpoint in [edge.source, edge.target] {
            if !self.nodes.contains(&endpoint) {
                return Err(StoreError::UnknownNode(endpoint));
            }
        }
        if self.edges.insert(edge.id, edge).is_some() {
            return Ok(false);
        }
        self.adjacency.entry(edge.source).or_default().insert(edge.id);
        self.adjacency.entry(edge.target).or_default().insert(edge.id);
        Ok(true)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<EdgeRecord> {
        let edge = self.edges.remove(&id)?;
        for endpoint in [edge.source, edge.target] {
            if let Some(ids) = self.adjacency.get_mut(&endpoint) {
                ids.remove(&id);
            }
        }
        Some(edge)
    }

    /// Remove a node and every adjacent edge; returns the removed edges.
    pub fn remove_node(&mut self, id: NodeId) -> Vec<EdgeRecord> {
        if !self.nodes.remove(&id) {
            return Vec::new();
        }
        let adjacent = self.adjacency.remove(&id).unwrap_or_default();
        adjacent
            .into_iter()
            .filter_map(|edge_id| self.remove_edge(edge_id))
            .collect()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&EdgeRecord> {
        self.edges.get(&id)
    }

    pub fn adjacent_edges(&self, id: NodeId) -> Vec<&EdgeRecord> {
        self.adjacency
            .get(&id)
            .map(|ids| ids.iter().filter_map(|e| self.edges.get(e)).collect())
            .unwrap_or_default()
    }

    /// Edges joining `source` and `target`, in creation order. Undirected
    /// lookups ignore orientation.
    pub fn connecting_edges(&self, source: NodeId, target: NodeId, directed: bool) -> Vec<EdgeId> {
        self.adjacency
            .get(&source)
            .map(|ids| {
                ids.iter()
                    .filter_map(|e| self.edges.get(e))
                    .filter(|edge| edge.connects(source, target, directed))
                    .map(|edge| edge.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = &EdgeRecord> + '_ {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
