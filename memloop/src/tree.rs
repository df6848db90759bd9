//! Document tree shared by the working and persistent tiers.
//!
//! A [`Node`] is either a scalar [`Leaf`](Node::Leaf) or a
//! [`Container`](Node::Container) of uniquely keyed children. Container keys keep
//! insertion order for display; lookups never depend on it.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Children of a container node, in insertion order.
pub type Children = IndexMap<String, Node>;

/// Scalar payload stored at a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl fmt::Display for Scalar {
    /// Render the string form used by search matching and prompt encoding.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Number(value) => write!(f, "{value}"),
            Scalar::String(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Node {
    Leaf(Scalar),
    Container(Children),
}

impl Node {
    pub fn empty_container() -> Self {
        Node::Container(Children::new())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Node::Leaf(Scalar::String(value.into()))
    }

    pub fn number(value: impl Into<Number>) -> Self {
        Node::Leaf(Scalar::Number(value.into()))
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Node::Container(_))
    }

    pub fn as_container(&self) -> Option<&Children> {
        match self {
            Node::Container(children) => Some(children),
            Node::Leaf(_) => None,
        }
    }

    pub fn as_container_mut(&mut self) -> Option<&mut Children> {
        match self {
            Node::Container(children) => Some(children),
            Node::Leaf(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Leaf(Scalar::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Node::Leaf(Scalar::Number(value)) => value.as_u64(),
            _ => None,
        }
    }

    /// Number of nested containers, counting this one. Leaves have depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Container(children) => 1 + children.values().map(Node::depth).max().unwrap_or(0),
        }
    }

    /// Serialized character length (compact JSON).
    pub fn size_chars(&self) -> usize {
        Value::from(self.clone()).to_string().chars().count()
    }
}

impl From<Value> for Node {
    /// Arrays have no counterpart in the document model; they become containers
    /// keyed by element index.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Leaf(Scalar::Null),
            Value::Bool(value) => Node::Leaf(Scalar::Bool(value)),
            Value::Number(value) => Node::Leaf(Scalar::Number(value)),
            Value::String(value) => Node::Leaf(Scalar::String(value)),
            Value::Array(items) => Node::Container(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, item)| (idx.to_string(), Node::from(item)))
                    .collect(),
            ),
            Value::Object(map) => Node::Container(
                map.into_iter()
                    .map(|(key, item)| (key, Node::from(item)))
                    .collect(),
            ),
        }
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        match node {
            Node::Leaf(Scalar::Null) => Value::Null,
            Node::Leaf(Scalar::Bool(value)) => Value::Bool(value),
            Node::Leaf(Scalar::Number(value)) => Value::Number(value),
            Node::Leaf(Scalar::String(value)) => Value::String(value),
            Node::Container(children) => Value::Object(
                children
                    .into_iter()
                    .map(|(key, child)| (key, Value::from(child)))
                    .collect(),
            ),
        }
    }
}

/// Empty skeleton used when no persisted document exists yet.
pub fn default_document() -> Node {
    Node::empty_container()
}
