//! Applies decoded actions to the two document tiers.
//!
//! Every failure is folded into the returned [`ResultRecord`]; nothing here
//! returns an error to the caller. A failing action leaves both stores exactly
//! as they were.

use tracing::debug;

use crate::core::codec::Rejected;
use crate::core::error::{ActionError, StoreError};
use crate::core::path::{DocPath, MAX_DEPTH, Tier};
use crate::core::store::DocumentStore;
use crate::core::types::{
    Action, ActionKind, RESULTS_KEY, RecordKind, ResultRecord, Status,
};
use crate::tree::{Children, Node};

/// The working and persistent documents. They never share state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stores {
    pub working: DocumentStore,
    pub persistent: DocumentStore,
}

impl Stores {
    pub fn new(working: DocumentStore, persistent: DocumentStore) -> Self {
        Self {
            working,
            persistent,
        }
    }

    pub fn tier(&self, tier: Tier) -> &DocumentStore {
        match tier {
            Tier::Working => &self.working,
            Tier::Persistent => &self.persistent,
        }
    }

    pub fn tier_mut(&mut self, tier: Tier) -> &mut DocumentStore {
        match tier {
            Tier::Working => &mut self.working,
            Tier::Persistent => &mut self.persistent,
        }
    }
}

/// Sequence number and time assigned to the record being produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStamp {
    pub sequence_index: u64,
    pub timestamp: String,
}

/// Execute one action and describe the outcome.
pub fn apply(action: &Action, stores: &mut Stores, stamp: RecordStamp) -> ResultRecord {
    let outcome = execute(action, stores);
    let (status, error_message, payload) = match outcome {
        Ok(payload) => (Status::Ok, None, payload),
        Err(err) => {
            debug!(kind = %action.kind, target = %action.target_path, error = %err, "action failed");
            (Status::Error, Some(err.to_string()), None)
        }
    };
    ResultRecord {
        sequence_index: stamp.sequence_index,
        timestamp: stamp.timestamp,
        kind: RecordKind::Action(action.kind),
        target_path: Some(action.target_path.clone()),
        source_path: action.source_path.clone(),
        status,
        error_message,
        payload,
    }
}

/// Record a block the codec could not turn into an action.
pub fn reject(rejected: &Rejected, stamp: RecordStamp) -> ResultRecord {
    let kind = match (&rejected.error, &rejected.kind) {
        (ActionError::UnknownKind { kind }, _) => RecordKind::Unknown(kind.clone()),
        (_, Some(raw)) => match raw.parse::<ActionKind>() {
            Ok(kind) => RecordKind::Action(kind),
            Err(()) => RecordKind::Unknown(raw.clone()),
        },
        (_, None) => RecordKind::Decode,
    };
    ResultRecord {
        sequence_index: stamp.sequence_index,
        timestamp: stamp.timestamp,
        kind,
        target_path: rejected.target_path.clone(),
        source_path: rejected.source_path.clone(),
        status: Status::Error,
        error_message: Some(rejected.error.to_string()),
        payload: None,
    }
}

fn execute(action: &Action, stores: &mut Stores) -> Result<Option<Node>, ActionError> {
    let target = DocPath::parse(&action.target_path)?;
    if action.kind.mutates() {
        guard_reserved(&target, action.kind)?;
    }

    match action.kind {
        ActionKind::Get => Ok(Some(stores.tier(target.tier).get(&target.segments)?.clone())),
        ActionKind::Set => {
            let value = action.content.clone().unwrap_or_else(|| Node::string(""));
            guard_depth(&target, value.depth())?;
            let previous = stores.tier_mut(target.tier).set(&target.segments, value)?;
            Ok(previous)
        }
        ActionKind::Remove => Ok(Some(stores.tier_mut(target.tier).remove(&target.segments)?)),
        ActionKind::Mkdir => {
            stores.tier_mut(target.tier).mkdir(&target.segments)?;
            Ok(None)
        }
        ActionKind::List => {
            let entries = stores.tier(target.tier).list(&target.segments)?;
            let listing: Children = entries
                .into_iter()
                .map(|entry| {
                    let label = if entry.is_container { "container" } else { "leaf" };
                    (entry.name, Node::string(label))
                })
                .collect();
            Ok(Some(Node::Container(listing)))
        }
        ActionKind::Search => {
            let query = action
                .content
                .as_ref()
                .and_then(Node::as_str)
                .unwrap_or_default();
            let matches = stores.tier(target.tier).search(&target.segments, query)?;
            let hits: Children = matches
                .into_iter()
                .enumerate()
                .map(|(idx, (path, value))| {
                    let mut hit = Children::new();
                    hit.insert(
                        "path".to_string(),
                        Node::string(qualify(target.tier, &path)),
                    );
                    hit.insert("value".to_string(), Node::Leaf(value));
                    (idx.to_string(), Node::Container(hit))
                })
                .collect();
            Ok(Some(Node::Container(hits)))
        }
        ActionKind::Move => {
            let raw_source = action.source_path.as_deref().ok_or_else(|| {
                ActionError::MissingField {
                    kind: ActionKind::Move.to_string(),
                    field: "source_path",
                }
            })?;
            let source = DocPath::parse(raw_source)?;
            guard_reserved(&source, ActionKind::Move)?;
            if let Ok(node) = stores.tier(source.tier).get(&source.segments) {
                guard_depth(&target, node.depth())?;
            }
            move_between(stores, &source, &target)?;
            Ok(None)
        }
    }
}

/// Move a node, possibly across tiers, without partial mutation on failure.
fn move_between(stores: &mut Stores, source: &DocPath, target: &DocPath) -> Result<(), StoreError> {
    if source.tier == target.tier {
        return stores
            .tier_mut(source.tier)
            .move_node(&source.segments, &target.segments);
    }

    let value = stores.tier(source.tier).get(&source.segments)?.clone();
    if source.is_root() {
        return Err(StoreError::invalid(source.to_string(), "the root cannot be moved"));
    }
    let previous = stores.tier_mut(target.tier).set(&target.segments, value)?;
    if let Err(err) = stores.tier_mut(source.tier).remove(&source.segments) {
        // Undo the write so neither tier changes.
        let target_store = stores.tier_mut(target.tier);
        match previous {
            Some(node) => {
                let _ = target_store.set(&target.segments, node);
            }
            None => {
                let _ = target_store.remove(&target.segments);
            }
        }
        return Err(err);
    }
    Ok(())
}

/// Mutations may not reach into, or replace, the reserved results subtree.
fn guard_reserved(path: &DocPath, kind: ActionKind) -> Result<(), StoreError> {
    let reserved = DocPath::root(Tier::Working).join(RESULTS_KEY);
    let inside = path.starts_with(&reserved);
    let replaces = reserved.starts_with(path) && kind != ActionKind::Mkdir;
    if inside || replaces {
        return Err(StoreError::invalid(
            path.to_string(),
            format!("{reserved} is reserved for result records"),
        ));
    }
    Ok(())
}

/// Writing a node of `depth` at `target` must keep the document within [`MAX_DEPTH`].
fn guard_depth(target: &DocPath, depth: usize) -> Result<(), StoreError> {
    if target.segments.len() + depth > MAX_DEPTH {
        return Err(StoreError::invalid(
            target.to_string(),
            format!("document nesting would exceed {MAX_DEPTH} levels"),
        ));
    }
    Ok(())
}

fn qualify(tier: Tier, store_path: &str) -> String {
    if store_path == "/" {
        return DocPath::root(tier).to_string();
    }
    format!("/{}{store_path}", tier.marker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::decode;
    use serde_json::json;

    fn stores(working: serde_json::Value, persistent: serde_json::Value) -> Stores {
        Stores::new(
            DocumentStore::new(Node::from(working)).expect("working"),
            DocumentStore::new(Node::from(persistent)).expect("persistent"),
        )
    }

    fn stamp(n: u64) -> RecordStamp {
        RecordStamp {
            sequence_index: n,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn action(kind: ActionKind, target: &str) -> Action {
        Action {
            kind,
            target_path: target.to_string(),
            source_path: None,
            content: None,
        }
    }

    fn path(raw: &str) -> Vec<String> {
        DocPath::parse(raw).expect("path").segments
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut s = Stores::default();
        let mut set = action(ActionKind::Set, "/working/todo");
        set.content = Some(Node::string("buy milk"));
        assert!(apply(&set, &mut s, stamp(1)).is_ok());

        let got = apply(&action(ActionKind::Get, "/working/todo"), &mut s, stamp(2));
        assert!(got.is_ok());
        assert_eq!(got.payload, Some(Node::string("buy milk")));
        assert_eq!(got.sequence_index, 2);
    }

    #[test]
    fn invalid_tier_touches_no_store() {
        let mut s = stores(json!({"a": 1}), json!({"b": 2}));
        let before = s.clone();
        let mut set = action(ActionKind::Set, "/scratch/a");
        set.content = Some(Node::string("x"));
        let record = apply(&set, &mut s, stamp(1));
        assert_eq!(record.status, Status::Error);
        assert!(
            record
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("unknown tier"))
        );
        assert_eq!(s, before);
    }

    #[test]
    fn move_across_tiers_archives_entry() {
        let mut s = stores(json!({"note": {"text": "keep"}}), json!({}));
        let mut mv = action(ActionKind::Move, "/persistent/archive/note");
        mv.source_path = Some("/working/note".to_string());
        let record = apply(&mv, &mut s, stamp(1));
        assert!(record.is_ok(), "{record:?}");
        assert!(!s.working.contains(&path("/working/note")));
        assert_eq!(
            s.persistent.get(&path("/persistent/archive/note/text")).expect("moved"),
            &Node::string("keep")
        );
    }

    #[test]
    fn failed_cross_tier_move_changes_nothing() {
        let mut s = stores(json!({"note": "x"}), json!({"blocker": "leaf"}));
        let before = s.clone();
        let mut mv = action(ActionKind::Move, "/persistent/blocker/inner");
        mv.source_path = Some("/working/note".to_string());
        let record = apply(&mv, &mut s, stamp(1));
        assert_eq!(record.status, Status::Error);
        assert_eq!(s, before);
    }

    #[test]
    fn writes_past_the_nesting_cap_are_rejected() {
        let deep = format!("/working{}", "/a".repeat(MAX_DEPTH - 1));
        let mut s = Stores::default();
        let mut set = action(ActionKind::Set, &deep);
        set.content = Some(Node::string("leaf"));
        assert!(apply(&set, &mut s, stamp(1)).is_ok());

        let before = s.clone();
        set.content = Some(Node::from(json!({"x": {"y": 1}})));
        let record = apply(&set, &mut s, stamp(2));
        assert_eq!(record.status, Status::Error);
        assert!(record.error_message.unwrap_or_default().contains("nesting"));
        assert_eq!(s, before);

        // The chain below /working/a is 98 containers deep.
        let mut mv = action(ActionKind::Move, "/persistent/b/c/d");
        mv.source_path = Some("/working/a".to_string());
        assert_eq!(apply(&mv, &mut s, stamp(3)).status, Status::Error);
        assert_eq!(s, before);
    }

    #[test]
    fn reserved_subtree_rejects_mutation_but_allows_reads() {
        let mut s = stores(json!({"results": {"000001": {"status": "ok"}}}), json!({}));
        let before = s.clone();
        for target in ["/working/results/000001", "/working/results", "/working"] {
            let record = apply(&action(ActionKind::Remove, target), &mut s, stamp(1));
            assert_eq!(record.status, Status::Error, "{target}");
        }
        assert_eq!(s, before);

        let record = apply(
            &action(ActionKind::Get, "/working/results/000001/status"),
            &mut s,
            stamp(2),
        );
        assert_eq!(record.payload, Some(Node::string("ok")));
    }

    #[test]
    fn list_labels_children() {
        let mut s = stores(json!({"dir": {}, "file": "x"}), json!({}));
        let record = apply(&action(ActionKind::List, "/working"), &mut s, stamp(1));
        assert_eq!(
            record.payload,
            Some(Node::from(json!({"dir": "container", "file": "leaf"})))
        );
    }

    #[test]
    fn search_reports_tier_qualified_paths() {
        let mut s = stores(json!({}), json!({"a": {"b": "hello world"}}));
        let mut search = action(ActionKind::Search, "/persistent");
        search.content = Some(Node::string("WORLD"));
        let record = apply(&search, &mut s, stamp(1));
        assert_eq!(
            record.payload,
            Some(Node::from(json!({"0": {"path": "/persistent/a/b", "value": "hello world"}})))
        );
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut s = Stores::default();
        let record = apply(&action(ActionKind::Remove, "/working/nope"), &mut s, stamp(1));
        assert_eq!(record.status, Status::Error);
        assert!(
            record
                .error_message
                .as_deref()
                .is_some_and(|m| m.starts_with("not found"))
        );
    }

    #[test]
    fn rejected_blocks_become_error_records() {
        let batch = decode(
            "<action><kind>move</kind><source_path>/working/x</source_path></action>\
             <action><target_path>/working/y</target_path></action>\
             <action><kind>explode</kind></action>",
        );
        let records: Vec<ResultRecord> = batch
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| reject(entry.as_ref().unwrap_err(), stamp(idx as u64)))
            .collect();
        assert_eq!(records[0].kind, RecordKind::Action(ActionKind::Move));
        assert_eq!(records[0].source_path.as_deref(), Some("/working/x"));
        assert_eq!(records[1].kind, RecordKind::Decode);
        assert_eq!(records[2].kind, RecordKind::Unknown("explode".to_string()));
        assert!(records.iter().all(|r| r.status == Status::Error));
    }
}
