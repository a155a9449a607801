use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storage::{Network, StoreError};
use unfurl_core::model::{EntityKind, Namespace, NodeId, Value};

/// Node: id of the node whose expansion produced this one.
pub const PARENT: &str = "parent";
/// Node: set once the node's children have been revealed.
pub const EXPANDED: &str = "expanded";
/// Node: optional flag supplied by documents, consulted by readiness.
pub const EXPANDABLE: &str = "expandable";
/// Network: ids hidden by a replace expansion, oldest first.
pub const HIDDEN_PARENTS: &str = "hidden-parents";
pub const SOURCE_URL: &str = "source-url";
pub const SOURCE_ACTION: &str = "source-action";
pub const SOURCE_JOIN_COLUMN: &str = "source-join-column";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionAction {
    /// Expanded node leaves the view and its children take its place.
    Replace,
    /// Expanded node stays; children are added next to it.
    Augment,
}

impl FromStr for ExpansionAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(ExpansionAction::Replace),
            "augment" => Ok(ExpansionAction::Augment),
            other => Err(EngineError::InvalidSourceMetadata(format!(
                "unknown expansion action '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExpansionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpansionAction::Replace => write!(f, "replace"),
            ExpansionAction::Augment => write!(f, "augment"),
        }
    }
}

/// Where a network came from and how its nodes expand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMetadata {
    pub url: String,
    pub action: ExpansionAction,
    pub join_column: String,
}

impl SourceMetadata {
    pub fn new(url: impl Into<String>, action: ExpansionAction, join_column: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            action,
            join_column: join_column.into(),
        }
    }

    /// Store on the network row and start an empty hidden-parents list.
    pub fn record(&self, network: &mut Network) -> Result<(), StoreError> {
        let id = network.id();
        let attrs = network.attributes_mut();
        attrs.set(Namespace::Default, EntityKind::Network, id, SOURCE_URL, self.url.as_str())?;
        attrs.set(
            Namespace::Default,
            EntityKind::Network,
            id,
            SOURCE_ACTION,
            self.action.to_string(),
        )?;
        attrs.set(
            Namespace::Default,
            EntityKind::Network,
            id,
            SOURCE_JOIN_COLUMN,
            self.join_column.as_str(),
        )?;
        attrs.set(
            Namespace::Default,
            EntityKind::Network,
            id,
            HIDDEN_PARENTS,
            Vec::<i64>::new(),
        )?;
        Ok(())
    }

    pub fn load(network: &Network) -> Result<Self, EngineError> {
        let id = network.id();
        let attrs = network.attributes();
        let read = |name: &'static str| -> Result<String, EngineError> {
            attrs
                .get_string(Namespace::Default, EntityKind::Network, id, name)?
                .ok_or(EngineError::MissingSourceMetadata(name))
        };

        Ok(Self {
            url: read(SOURCE_URL)?,
            action: read(SOURCE_ACTION)?.parse()?,
            join_column: read(SOURCE_JOIN_COLUMN)?,
        })
    }
}

pub fn id_value(id: NodeId) -> Value {
    Value::Long(id as i64)
}

pub fn hidden_parents(network: &Network) -> Result<Vec<NodeId>, StoreError> {
    let list = network.attributes().get_long_list(
        Namespace::Default,
        EntityKind::Network,
        network.id(),
        HIDDEN_PARENTS,
    )?;
    Ok(list.into_iter().map(|id| id as NodeId).collect())
}

pub fn set_hidden_parents(network: &mut Network, ids: &[NodeId]) -> Result<(), StoreError> {
    let id = network.id();
    let list: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
    network
        .attributes_mut()
        .set(Namespace::Default, EntityKind::Network, id, HIDDEN_PARENTS, list)
}

pub fn parent_of(network: &Network, node: NodeId) -> Result<Option<NodeId>, StoreError> {
    let parent = network
        .attributes()
        .get_long(Namespace::Default, EntityKind::Node, node, PARENT)?;
    Ok(parent.map(|id| id as NodeId))
}

/// Root-graph nodes tagged with `parent = node`, in creation order.
pub fn children_of(network: &Network, node: NodeId) -> Result<Vec<NodeId>, StoreError> {
    let tagged = network.attributes().find_entities_with_value(
        Namespace::Default,
        EntityKind::Node,
        PARENT,
        &id_value(node),
    )?;
    Ok(tagged
        .into_iter()
        .filter(|id| network.contains_node(*id))
        .collect())
}

pub fn is_expanded(network: &Network, node: NodeId) -> Result<bool, StoreError> {
    network
        .attributes()
        .get_bool(Namespace::Default, EntityKind::Node, node, EXPANDED, false)
}

pub fn set_expanded(network: &mut Network, node: NodeId, expanded: bool) -> Result<(), StoreError> {
    network
        .attributes_mut()
        .set(Namespace::Default, EntityKind::Node, node, EXPANDED, expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing_ignores_case() {
        assert_eq!("Replace".parse::<ExpansionAction>().unwrap(), ExpansionAction::Replace);
        assert_eq!(" AUGMENT ".parse::<ExpansionAction>().unwrap(), ExpansionAction::Augment);
        assert!("merge".parse::<ExpansionAction>().is_err());
    }

    #[test]
    fn test_record_then_load() {
        let mut net = Network::new();
        assert!(matches!(
            SourceMetadata::load(&net),
            Err(EngineError::MissingSourceMetadata(SOURCE_URL))
        ));

        let metadata = SourceMetadata::new("http://example.test/graph", ExpansionAction::Augment, "name");
        metadata.record(&mut net).unwrap();

        assert_eq!(SourceMetadata::load(&net).unwrap(), metadata);
        assert!(hidden_parents(&net).unwrap().is_empty());
    }

    #[test]
    fn test_children_only_counts_root_nodes() {
        let mut net = Network::new();
        let parent = net.add_node();
        let a = net.add_node();
        let b = net.add_node();
        for child in [a, b] {
            net.attributes_mut()
                .set(Namespace::Default, EntityKind::Node, child, PARENT, id_value(parent))
                .unwrap();
        }
        assert_eq!(children_of(&net, parent).unwrap(), vec![a, b]);

        net.delete_nodes(&[b].into_iter().collect());
        assert_eq!(children_of(&net, parent).unwrap(), vec![a]);
        assert_eq!(parent_of(&net, a).unwrap(), Some(parent));
    }
}
