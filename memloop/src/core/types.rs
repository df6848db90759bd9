//! Shared deterministic types for the action pipeline.
//!
//! These define the contracts between codec, executor, and orchestration. They
//! carry no I/O and serialize into the working document's reserved subtree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::codec::encode;
use crate::core::path::MAX_DEPTH;
use crate::tree::{Children, Node};

/// Top-level key of the working document that holds result records.
pub const RESULTS_KEY: &str = "results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Set,
    Get,
    Remove,
    Move,
    List,
    Search,
    Mkdir,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Set => "set",
            ActionKind::Get => "get",
            ActionKind::Remove => "remove",
            ActionKind::Move => "move",
            ActionKind::List => "list",
            ActionKind::Search => "search",
            ActionKind::Mkdir => "mkdir",
        }
    }

    /// Whether the action writes to a store.
    pub fn mutates(self) -> bool {
        matches!(
            self,
            ActionKind::Set | ActionKind::Remove | ActionKind::Move | ActionKind::Mkdir
        )
    }
}

impl FromStr for ActionKind {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "set" => Ok(ActionKind::Set),
            "get" => Ok(ActionKind::Get),
            "remove" => Ok(ActionKind::Remove),
            "move" => Ok(ActionKind::Move),
            "list" => Ok(ActionKind::List),
            "search" => Ok(ActionKind::Search),
            "mkdir" => Ok(ActionKind::Mkdir),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated request decoded from model output. Paths are still raw wire
/// strings; the executor resolves them.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub target_path: String,
    pub source_path: Option<String>,
    pub content: Option<Node>,
}

/// What a result record describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Action(ActionKind),
    /// A block whose `<kind>` named no known action.
    Unknown(String),
    /// A block that could not be attributed to any kind.
    Decode,
    /// A collaborator failure caught at the iteration boundary.
    Fatal,
    Thinking,
    Evaluation,
}

impl RecordKind {
    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::Action(kind) => kind.as_str(),
            RecordKind::Unknown(raw) => raw,
            RecordKind::Decode => "decode",
            RecordKind::Fatal => "fatal",
            RecordKind::Thinking => "thinking",
            RecordKind::Evaluation => "evaluation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "error",
        }
    }
}

/// Recorded outcome of one action, note, or caught failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub sequence_index: u64,
    pub timestamp: String,
    pub kind: RecordKind,
    pub target_path: Option<String>,
    pub source_path: Option<String>,
    pub status: Status,
    pub error_message: Option<String>,
    pub payload: Option<Node>,
}

impl ResultRecord {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Key under the reserved subtree. Zero padding keeps key order aligned
    /// with sequence order for readers of the raw document.
    pub fn entry_key(&self) -> String {
        format!("{:06}", self.sequence_index)
    }

    pub fn to_node(&self) -> Node {
        let mut fields = Children::new();
        fields.insert(
            "sequence_index".to_string(),
            Node::number(self.sequence_index),
        );
        fields.insert("timestamp".to_string(), Node::string(&self.timestamp));
        fields.insert("kind".to_string(), Node::string(self.kind.as_str()));
        if let Some(target) = &self.target_path {
            fields.insert("target_path".to_string(), Node::string(target));
        }
        if let Some(source) = &self.source_path {
            fields.insert("source_path".to_string(), Node::string(source));
        }
        fields.insert("status".to_string(), Node::string(self.status.as_str()));
        if let Some(message) = &self.error_message {
            fields.insert("error_message".to_string(), Node::string(message));
        }
        if let Some(payload) = &self.payload {
            fields.insert("payload".to_string(), stored_payload(payload));
        }
        Node::Container(fields)
    }
}

/// Containers above a payload once stored: working root, reserved subtree, record.
const RECORD_NESTING: usize = 3;

/// Payloads that would push the reserved subtree past [`MAX_DEPTH`] are kept in
/// their encoded text form.
fn stored_payload(payload: &Node) -> Node {
    if payload.depth() + RECORD_NESTING > MAX_DEPTH {
        Node::string(encode(payload))
    } else {
        payload.clone()
    }
}

/// Serializable digest of a record for iteration artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub sequence_index: u64,
    pub kind: String,
    pub target_path: Option<String>,
    pub status: Status,
    pub error_message: Option<String>,
}

impl From<&ResultRecord> for RecordSummary {
    fn from(record: &ResultRecord) -> Self {
        Self {
            sequence_index: record.sequence_index,
            kind: record.kind.as_str().to_string(),
            target_path: record.target_path.clone(),
            status: record.status,
            error_message: record.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(depth: usize) -> Node {
        (0..depth).fold(Node::string("end"), |child, _| {
            let mut children = Children::new();
            children.insert("a".to_string(), child);
            Node::Container(children)
        })
    }

    fn record_with(payload: Node) -> ResultRecord {
        ResultRecord {
            sequence_index: 7,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            kind: RecordKind::Action(ActionKind::Get),
            target_path: Some("/working".to_string()),
            source_path: None,
            status: Status::Ok,
            error_message: None,
            payload: Some(payload),
        }
    }

    #[test]
    fn deep_payloads_are_stored_as_encoded_text() {
        let shallow = chain(MAX_DEPTH - RECORD_NESTING);
        let node = record_with(shallow.clone()).to_node();
        assert_eq!(node.as_container().expect("record")["payload"], shallow);

        let deep = chain(MAX_DEPTH);
        let node = record_with(deep.clone()).to_node();
        let stored = &node.as_container().expect("record")["payload"];
        assert_eq!(stored.as_str(), Some(encode(&deep).as_str()));
        assert!(node.depth() + 2 <= MAX_DEPTH);
    }

    #[test]
    fn action_kind_parses_wire_names() {
        for kind in [
            ActionKind::Set,
            ActionKind::Get,
            ActionKind::Remove,
            ActionKind::Move,
            ActionKind::List,
            ActionKind::Search,
            ActionKind::Mkdir,
        ] {
            assert_eq!(kind.as_str().parse::<ActionKind>(), Ok(kind));
        }
        assert!("delete".parse::<ActionKind>().is_err());
    }

    #[test]
    fn record_node_omits_absent_fields() {
        let record = ResultRecord {
            sequence_index: 7,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            kind: RecordKind::Action(ActionKind::Get),
            target_path: Some("/working/a".to_string()),
            source_path: None,
            status: Status::Ok,
            error_message: None,
            payload: Some(Node::string("v")),
        };
        assert_eq!(record.entry_key(), "000007");

        let node = record.to_node();
        let fields = node.as_container().expect("fields");
        assert_eq!(fields["sequence_index"].as_u64(), Some(7));
        assert_eq!(fields["kind"].as_str(), Some("get"));
        assert_eq!(fields["status"].as_str(), Some("ok"));
        assert!(!fields.contains_key("source_path"));
        assert!(!fields.contains_key("error_message"));
    }
}
