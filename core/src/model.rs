use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier shared by nodes, edges and networks.
pub type EntityId = u64;
pub type NodeId = EntityId;
pub type EdgeId = EntityId;
pub type NetworkId = EntityId;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh identifier. Identifiers are never reused within a process.
pub fn next_entity_id() -> EntityId {
    NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Edge,
    Network,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Node => "node",
            EntityKind::Edge => "edge",
            EntityKind::Network => "network",
        };
        write!(f, "{}", s)
    }
}

/// Independent attribute tables per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    #[default]
    Default,
    Hidden,
    Local,
    Shared,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Default,
        Namespace::Hidden,
        Namespace::Local,
        Namespace::Shared,
    ];
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Namespace::Default => "default",
            Namespace::Hidden => "hidden",
            Namespace::Local => "local",
            Namespace::Shared => "shared",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Int,
    Long,
    Double,
    String,
    LongList,
}

impl ValueKind {
    /// Whether a value of `self` may be compared against a column of `column`.
    /// Only integer widening is allowed.
    pub fn promotes_to(self, column: ValueKind) -> bool {
        self == column || (self == ValueKind::Int && column == ValueKind::Long)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::String => "string",
            ValueKind::LongList => "list<long>",
        };
        write!(f, "{}", s)
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    LongList(Vec<i64>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Long(_) => ValueKind::Long,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::LongList(_) => ValueKind::LongList,
        }
    }

    /// Widen to `kind` if allowed. Used when matching join keys.
    pub fn promote(&self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (Value::Int(v), ValueKind::Long) => Some(Value::Long(i64::from(*v))),
            (value, kind) if value.kind() == kind => Some(value.clone()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::LongList(v) => {
                let items: Vec<String> = v.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<i64>> for Value {
    fn from(value: Vec<i64>) -> Self {
        Value::LongList(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ids_are_unique() {
        let a = next_entity_id();
        let b = next_entity_id();
        assert!(b > a);
    }

    #[test]
    fn test_int_promotes_to_long_only() {
        assert!(ValueKind::Int.promotes_to(ValueKind::Long));
        assert!(!ValueKind::Long.promotes_to(ValueKind::Int));
        assert!(!ValueKind::Long.promotes_to(ValueKind::Double));
        assert_eq!(Value::Int(7).promote(ValueKind::Long), Some(Value::Long(7)));
        assert_eq!(Value::Long(7).promote(ValueKind::Int), None);
    }

    #[test]
    fn test_value_display_matches_wire_rendering() {
        assert_eq!(Value::from("A").to_string(), "A");
        assert_eq!(Value::Long(42).to_string(), "42");
        assert_eq!(Value::LongList(vec![1, 2]).to_string(), "[1, 2]");
    }
}
