//! Decode-then-execute scenarios over in-memory stores.
//!
//! Each test feeds raw model output through the codec and the executor the
//! same way an iteration does, without a model or persistence.

use memloop::core::codec::decode;
use memloop::core::eviction::EvictionPolicy;
use memloop::core::executor::{RecordStamp, Stores, apply, reject};
use memloop::core::store::DocumentStore;
use memloop::core::types::{RESULTS_KEY, ResultRecord, Status};
use memloop::test_support::doc;
use memloop::tree::Node;
use serde_json::json;

fn stores(working: serde_json::Value, persistent: serde_json::Value) -> Stores {
    Stores::new(
        DocumentStore::new(doc(working)).expect("working"),
        DocumentStore::new(doc(persistent)).expect("persistent"),
    )
}

/// Run every block of `response` in order, numbering records from zero.
fn run(response: &str, stores: &mut Stores) -> Vec<ResultRecord> {
    let batch = decode(response);
    batch
        .entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let stamp = RecordStamp {
                sequence_index: index as u64,
                timestamp: "2026-01-01T00:00:00Z".to_string(),
            };
            match entry {
                Ok(action) => apply(action, stores, stamp),
                Err(rejected) => reject(rejected, stamp),
            }
        })
        .collect()
}

#[test]
fn set_todo_inside_actions_wrapper() {
    let mut stores = stores(json!({}), json!({}));
    let records = run(
        "<actions><action><kind>set</kind><target_path>/working/todo</target_path>\
         <content>buy milk</content></action></actions>",
        &mut stores,
    );

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Status::Ok);
    assert_eq!(
        stores.working.get(&["todo".to_string()]).expect("todo"),
        &Node::string("buy milk")
    );
    assert_eq!(stores.persistent.root(), &Node::empty_container());
}

#[test]
fn search_defaults_to_persistent_root() {
    let mut stores = stores(json!({}), json!({"a": {"b": "hello world"}}));
    let records = run(
        "<action><kind>search</kind><content>world</content></action>",
        &mut stores,
    );

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Status::Ok);
    let expected = doc(json!({
        "0": {"path": "/persistent/a/b", "value": "hello world"}
    }));
    assert_eq!(records[0].payload.as_ref(), Some(&expected));
}

#[test]
fn move_without_target_is_rejected_without_mutation() {
    let mut stores = stores(json!({"x": "keep me"}), json!({"y": 1}));
    let before = stores.clone();
    let records = run(
        "<action><kind>move</kind><source_path>/working/x</source_path></action>",
        &mut stores,
    );

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, Status::Error);
    assert_eq!(records[0].kind.as_str(), "move");
    let message = records[0].error_message.as_deref().unwrap_or_default();
    assert!(message.contains("target_path"), "message: {message}");
    assert_eq!(stores, before);
}

#[test]
fn malformed_block_does_not_affect_siblings() {
    let mut stores = stores(json!({}), json!({}));
    let response = "\
        <action><kind>set</kind><target_path>/working/a</target_path><content>1</content></action>\n\
        <action><kind>teleport</kind><target_path>/working/b</target_path></action>\n\
        <action><kind>set</kind><target_path>/persistent/c</target_path><content>3</content></action>";
    let records = run(response, &mut stores);

    let statuses: Vec<Status> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![Status::Ok, Status::Error, Status::Ok]);
    assert_eq!(records[1].kind.as_str(), "teleport");
    assert!(stores.working.get(&["a".to_string()]).is_ok());
    assert!(stores.working.get(&["b".to_string()]).is_err());
    assert!(stores.persistent.get(&["c".to_string()]).is_ok());
}

#[test]
fn unclosed_block_between_complete_ones_is_isolated() {
    let mut stores = stores(json!({}), json!({}));
    let response = "\
        <action><kind>set</kind><target_path>/working/a</target_path><content>1</content></action>\n\
        <action><kind>get</kind><target_path>/working/a</target_path>\n\
        <action><kind>set</kind><target_path>/working/b</target_path><content>2</content></action>";
    let records = run(response, &mut stores);

    let statuses: Vec<Status> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![Status::Ok, Status::Error, Status::Ok]);
    assert_eq!(records[1].kind.as_str(), "get");
    assert_eq!(
        stores.working.get(&["b".to_string()]).expect("b"),
        &Node::string("2")
    );
}

#[test]
fn nested_content_is_stored_as_container() {
    let mut stores = stores(json!({}), json!({}));
    let records = run(
        "<action><kind>set</kind><target_path>/persistent/notes</target_path>\
         <content><topic>rust</topic><detail><level>deep</level></detail></content></action>",
        &mut stores,
    );

    assert_eq!(records[0].status, Status::Ok);
    assert_eq!(
        stores.persistent.root(),
        &doc(json!({"notes": {"topic": "rust", "detail": {"level": "deep"}}}))
    );
}

#[test]
fn cross_tier_archive_then_list() {
    let mut stores = stores(json!({"draft": {"title": "plan"}}), json!({}));
    let records = run(
        "<action><kind>mkdir</kind><target_path>/persistent/archive</target_path></action>\
         <action><kind>move</kind><source_path>/working/draft</source_path>\
         <target_path>/persistent/archive/plan</target_path></action>\
         <action><kind>list</kind><target_path>/persistent/archive</target_path></action>",
        &mut stores,
    );

    assert!(records.iter().all(|r| r.status == Status::Ok));
    assert!(stores.working.get(&["draft".to_string()]).is_err());
    assert_eq!(
        records[2].payload.as_ref(),
        Some(&doc(json!({"plan": "container"})))
    );
}

#[test]
fn oldest_reserved_entries_are_evicted_first() {
    let entry = |i: u64| json!({"sequence_index": i, "kind": "get", "status": "ok", "payload": "x".repeat(40)});
    let working = json!({
        "task": "keep",
        "results": {"0": entry(0), "1": entry(1), "2": entry(2), "3": entry(3)}
    });
    let mut store = DocumentStore::new(doc(working)).expect("store");
    let full = store.size_bytes();

    let mut expected = store.clone();
    expected
        .remove(&[RESULTS_KEY.to_string(), "0".to_string()])
        .expect("remove 0");
    expected
        .remove(&[RESULTS_KEY.to_string(), "1".to_string()])
        .expect("remove 1");
    let budget = expected.size_bytes();
    assert!(budget < full);

    let report = EvictionPolicy::new(budget).enforce(&mut store);
    assert_eq!(report.removed, vec!["0".to_string(), "1".to_string()]);
    assert_eq!(store, expected);
    assert_eq!(
        store.get(&["task".to_string()]).expect("task"),
        &Node::string("keep")
    );
}
