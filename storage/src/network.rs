use crate::attributes::AttributeStore;
use crate::error::StoreError;
use crate::graph::{EdgeRecord, Graph};
use std::collections::BTreeSet;
use unfurl_core::model::{next_entity_id, EdgeId, EntityKind, NetworkId, NodeId};

/// A root graph holding everything ever materialized, plus the view: the
/// subset currently shown. Every view node and edge is also in the root.
pub struct Network {
    id: NetworkId,
    root: Graph,
    view: Graph,
    attributes: AttributeStore,
}

impl Network {
    pub fn new() -> Self {
        Self {
            id: next_entity_id(),
            root: Graph::new(),
            view: Graph::new(),
            attributes: AttributeStore::new(),
        }
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn root(&self) -> &Graph {
        &self.root
    }

    pub fn view(&self) -> &Graph {
        &self.view
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeStore {
        &mut self.attributes
    }

    /// Create a node in the root graph and show it.
    pub fn add_node(&mut self) -> NodeId {
        let id = next_entity_id();
        self.root.insert_node(id);
        self.view.insert_node(id);
        id
    }

    /// Create an edge in the root graph; it is shown when both endpoints are.
    pub fn add_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        directed: bool,
    ) -> Result<EdgeId, StoreError> {
        let edge = EdgeRecord {
            id: next_entity_id(),
            source,
            target,
            directed,
        };
        self.root.insert_edge(edge)?;
        if self.is_visible(source) && self.is_visible(target) {
            self.view.insert_edge(edge)?;
        }
        Ok(edge.id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.root.contains_node(id)
    }

    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.root.contains_edge(id)
    }

    pub fn is_visible(&self, id: NodeId) -> bool {
        self.view.contains_node(id)
    }

    pub fn is_edge_visible(&self, id: EdgeId) -> bool {
        self.view.contains_edge(id)
    }

    pub fn adjacent_edges(&self, id: NodeId) -> Vec<&EdgeRecord> {
        self.root.adjacent_edges(id)
    }

    pub fn connecting_edges(&self, source: NodeId, target: NodeId, directed: bool) -> Vec<EdgeId> {
        self.root.connecting_edges(source, target, directed)
    }

    /// Put a root node back into the view. Returns false if already shown.
    pub fn show_node(&mut self, id: NodeId) -> Result<bool, StoreError> {
        if !self.root.contains_node(id) {
            return Err(StoreError::UnknownNode(id));
        }
        Ok(self.view.insert_node(id))
    }

    pub fn show_edge(&mut self, id: EdgeId) -> Result<bool, StoreError> {
        let edge = *self.root.edge(id).ok_or(StoreError::UnknownEdge(id))?;
        for endpoint in [edge.source, edge.target] {
            if !self.view.contains_node(endpoint) {
                return Err(StoreError::EndpointNotVisible { edge: id, node: endpoint });
            }
        }
        self.view.insert_edge(edge)
    }

    /// Show every root edge of `id` whose endpoints are both visible.
    pub fn show_adjacent_edges(&mut self, id: NodeId) -> Vec<EdgeId> {
        let candidates: Vec<EdgeRecord> = self
            .root
            .adjacent_edges(id)
            .into_iter()
            .filter(|edge| {
                self.view.contains_node(edge.source) && self.view.contains_node(edge.target)
            })
            .copied()
            .collect();

        let mut shown = Vec::new();
        for edge in candidates {
            if let Ok(true) = self.view.insert_edge(edge) {
                shown.push(edge.id);
            }
        }
        shown
    }

    /// Remove nodes (and their edges) from the view only. Returns the nodes
    /// that were actually visible.
    pub fn hide_nodes(&mut self, ids: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut hidden = Vec::new();
        for id in ids {
            if self.view.contains_node(*id) {
                self.view.remove_node(*id);
                hidden.push(*id);
            }
        }
        hidden
    }

    pub fn hide_edges(&mut self, ids: &BTreeSet<EdgeId>) -> usize {
        ids.iter()
            .filter(|id| self.view.remove_edge(**id).is_some())
            .count()
    }

    /// Remove nodes from both layers and drop their attribute rows, along with
    /// the rows of every edge removed with them. Returns the deleted nodes.
    pub fn delete_nodes(&mut self, ids: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let mut deleted = Vec::new();
        let mut removed_edges = BTreeSet::new();
        for id in ids {
            if !self.root.contains_node(*id) {
                continue;
            }
            self.view.remove_node(*id);
            for edge in self.root.remove_node(*id) {
                removed_edges.insert(edge.id);
            }
            deleted.push(*id);
        }

        let deleted_set: BTreeSet<NodeId> = deleted.iter().copied().collect();
        self.attributes.delete_rows(EntityKind::Node, &deleted_set);
        self.attributes.delete_rows(EntityKind::Edge, &removed_edges);
        deleted
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}
