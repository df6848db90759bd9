//! Path-addressed document store backing one tier.
//!
//! Paths here are store-relative segment lists; tier routing happens in the
//! executor. Only [`DocumentStore::set`] and [`DocumentStore::mkdir`] create
//! intermediate containers.

use indexmap::IndexMap;

use crate::core::error::StoreError;
use crate::core::path::{render_segments, resolve, resolve_mut, resolve_parent};
use crate::tree::{Children, Node, Scalar};

/// One child reported by [`DocumentStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_container: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentStore {
    root: Node,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self {
            root: Node::empty_container(),
        }
    }
}

impl DocumentStore {
    /// Wrap a loaded document. The root must be a container.
    pub fn new(root: Node) -> Result<Self, StoreError> {
        if !root.is_container() {
            return Err(StoreError::NotContainer {
                path: "/".to_string(),
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    pub fn get(&self, path: &[String]) -> Result<&Node, StoreError> {
        resolve(&self.root, path)
    }

    pub fn contains(&self, path: &[String]) -> bool {
        self.get(path).is_ok()
    }

    /// Write `value` at `path`, creating missing intermediate containers.
    ///
    /// Returns the node previously stored there, if any.
    pub fn set(&mut self, path: &[String], value: Node) -> Result<Option<Node>, StoreError> {
        let Some((last, parents)) = path.split_last() else {
            if !value.is_container() {
                return Err(StoreError::invalid("/", "the root must stay a container"));
            }
            return Ok(Some(std::mem::replace(&mut self.root, value)));
        };
        let parent = self.ensure_container(parents)?;
        Ok(parent.insert(last.clone(), value))
    }

    /// Ensure a container exists at `path`. An existing container is left untouched.
    pub fn mkdir(&mut self, path: &[String]) -> Result<bool, StoreError> {
        match self.get(path) {
            Ok(Node::Container(_)) => return Ok(false),
            Ok(Node::Leaf(_)) => {
                return Err(StoreError::NotContainer {
                    path: render_segments(path),
                });
            }
            Err(_) => {}
        }
        self.ensure_container(path)?;
        Ok(true)
    }

    /// Delete the node at `path` together with its subtree.
    pub fn remove(&mut self, path: &[String]) -> Result<Node, StoreError> {
        if path.is_empty() {
            return Err(StoreError::invalid("/", "the root cannot be removed"));
        }
        let (parent, last) = resolve_parent(&mut self.root, path)?;
        parent.shift_remove(last).ok_or_else(|| StoreError::NotFound {
            path: render_segments(path),
        })
    }

    /// Move a node within this store. On failure the source is left intact.
    pub fn move_node(&mut self, source: &[String], target: &[String]) -> Result<(), StoreError> {
        if source == target {
            self.get(source)?;
            return Ok(());
        }
        if source.is_empty() {
            return Err(StoreError::invalid("/", "the root cannot be moved"));
        }
        if target.starts_with(source) {
            return Err(StoreError::invalid(
                render_segments(target),
                format!("cannot move {} into itself", render_segments(source)),
            ));
        }
        self.get(source)?;
        self.check_settable(target)?;

        let value = self.remove(source)?;
        if let Err(err) = self.set(target, value.clone()) {
            // Restore the source; its parent still exists because only the node itself was taken.
            if let Ok((parent, last)) = resolve_parent(&mut self.root, source) {
                parent.insert(last.to_string(), value);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Immediate children of the container at `path`.
    pub fn list(&self, path: &[String]) -> Result<Vec<ListEntry>, StoreError> {
        let children = self
            .get(path)?
            .as_container()
            .ok_or_else(|| StoreError::NotContainer {
                path: render_segments(path),
            })?;
        Ok(children
            .iter()
            .map(|(name, child)| ListEntry {
                name: name.clone(),
                is_container: child.is_container(),
            })
            .collect())
    }

    /// Case-insensitive substring search over leaf values beneath `path`.
    ///
    /// Keys of the returned map are store-relative leaf paths (`/a/b`).
    pub fn search(
        &self,
        path: &[String],
        query: &str,
    ) -> Result<IndexMap<String, Scalar>, StoreError> {
        let start = self.get(path)?;
        let needle = query.to_lowercase();
        let mut matches = IndexMap::new();
        let mut prefix = path.to_vec();
        collect_matches(start, &needle, &mut prefix, &mut matches);
        Ok(matches)
    }

    /// Serialized character length of the whole tree.
    pub fn size_bytes(&self) -> usize {
        self.root.size_chars()
    }

    /// Walk `path`, creating containers for missing segments.
    fn ensure_container(&mut self, path: &[String]) -> Result<&mut Children, StoreError> {
        let mut current = &mut self.root;
        for (depth, segment) in path.iter().enumerate() {
            let children = current
                .as_container_mut()
                .ok_or_else(|| StoreError::NotContainer {
                    path: render_segments(&path[..depth]),
                })?;
            current = children
                .entry(segment.clone())
                .or_insert_with(Node::empty_container);
        }
        current
            .as_container_mut()
            .ok_or_else(|| StoreError::NotContainer {
                path: render_segments(path),
            })
    }

    /// Fail if a `set` at `path` would hit a leaf on the way down.
    fn check_settable(&self, path: &[String]) -> Result<(), StoreError> {
        let Some((_, parents)) = path.split_last() else {
            return Ok(());
        };
        let mut current = &self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let children = current.as_container().ok_or_else(|| StoreError::NotContainer {
                path: render_segments(&parents[..depth]),
            })?;
            match children.get(segment) {
                Some(child) => current = child,
                None => return Ok(()),
            }
        }
        if current.is_container() {
            Ok(())
        } else {
            Err(StoreError::NotContainer {
                path: render_segments(parents),
            })
        }
    }
}

fn collect_matches(
    node: &Node,
    needle: &str,
    prefix: &mut Vec<String>,
    out: &mut IndexMap<String, Scalar>,
) {
    match node {
        Node::Leaf(scalar) => {
            if scalar.to_string().to_lowercase().contains(needle) {
                out.insert(render_segments(prefix), scalar.clone());
            }
        }
        Node::Container(children) => {
            for (name, child) in children {
                prefix.push(name.clone());
                collect_matches(child, needle, prefix, out);
                prefix.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::split_segments;
    use serde_json::json;

    fn store(value: serde_json::Value) -> DocumentStore {
        DocumentStore::new(Node::from(value)).expect("store")
    }

    fn p(raw: &str) -> Vec<String> {
        split_segments(raw)
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut doc = DocumentStore::default();
        let previous = doc.set(&p("/a/b/c"), Node::string("v")).expect("set");
        assert_eq!(previous, None);
        assert_eq!(doc.get(&p("/a/b/c")).expect("get"), &Node::string("v"));
        assert!(doc.get(&p("/a/b")).expect("b").is_container());
    }

    #[test]
    fn set_replaces_leaf_and_can_change_kind() {
        let mut doc = store(json!({"k": "old"}));
        let previous = doc
            .set(&p("/k"), Node::from(json!({"inner": 1})))
            .expect("set");
        assert_eq!(previous, Some(Node::string("old")));
        assert!(doc.get(&p("/k")).expect("k").is_container());
    }

    #[test]
    fn set_through_leaf_is_not_container() {
        let mut doc = store(json!({"k": "leaf"}));
        let err = doc.set(&p("/k/child"), Node::string("v")).unwrap_err();
        assert_eq!(
            err,
            StoreError::NotContainer {
                path: "/k".to_string()
            }
        );
        assert_eq!(doc.get(&p("/k")).expect("k"), &Node::string("leaf"));
    }

    #[test]
    fn root_set_only_accepts_containers() {
        let mut doc = store(json!({"k": 1}));
        assert!(doc.set(&[], Node::string("x")).is_err());
        doc.set(&[], Node::from(json!({"fresh": true}))).expect("replace");
        assert!(doc.contains(&p("/fresh")));
    }

    #[test]
    fn remove_deletes_subtree() {
        let mut doc = store(json!({"a": {"b": {"c": 1}}, "keep": 2}));
        let removed = doc.remove(&p("/a")).expect("remove");
        assert!(removed.is_container());
        assert!(matches!(
            doc.get(&p("/a/b/c")),
            Err(StoreError::NotFound { .. })
        ));
        assert!(doc.contains(&p("/keep")));
        assert!(matches!(
            doc.remove(&p("/a")),
            Err(StoreError::NotFound { .. })
        ));
        assert!(doc.remove(&[]).is_err());
    }

    #[test]
    fn move_node_relocates_value() {
        let mut doc = store(json!({"a": {"x": 1}}));
        doc.move_node(&p("/a/x"), &p("/b/y")).expect("move");
        assert_eq!(doc.get(&p("/b/y")).expect("y"), &Node::number(1));
        assert!(!doc.contains(&p("/a/x")));
    }

    #[test]
    fn move_node_failure_leaves_source_intact() {
        let mut doc = store(json!({"a": "value", "blocker": "leaf"}));
        let err = doc.move_node(&p("/a"), &p("/blocker/inner")).unwrap_err();
        assert!(matches!(err, StoreError::NotContainer { .. }));
        assert_eq!(doc.get(&p("/a")).expect("a"), &Node::string("value"));
    }

    #[test]
    fn move_node_into_own_subtree_is_rejected() {
        let mut doc = store(json!({"a": {"b": 1}}));
        let err = doc.move_node(&p("/a"), &p("/a/b/c")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
        assert!(doc.contains(&p("/a/b")));
    }

    #[test]
    fn list_tags_containers() {
        let doc = store(json!({"dir": {}, "file": "x"}));
        let entries = doc.list(&[]).expect("list");
        assert_eq!(
            entries,
            vec![
                ListEntry {
                    name: "dir".to_string(),
                    is_container: true
                },
                ListEntry {
                    name: "file".to_string(),
                    is_container: false
                },
            ]
        );
        assert!(matches!(
            doc.list(&p("/file")),
            Err(StoreError::NotContainer { .. })
        ));
    }

    #[test]
    fn search_matches_case_insensitive_substrings() {
        let doc = store(json!({"a": {"b": "hello world"}}));
        let found = doc.search(&[], "world").expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(
            found.get("/a/b"),
            Some(&Scalar::String("hello world".to_string()))
        );

        let found = doc.search(&p("/a"), "HELLO").expect("search");
        assert!(found.contains_key("/a/b"));
    }

    #[test]
    fn search_uses_string_form_of_scalars() {
        let doc = store(json!({"n": 1234, "flag": true, "none": null}));
        assert!(doc.search(&[], "23").expect("n").contains_key("/n"));
        assert!(doc.search(&[], "TRUE").expect("flag").contains_key("/flag"));
        assert!(doc.search(&[], "null").expect("none").contains_key("/none"));
    }

    #[test]
    fn mkdir_is_idempotent_for_containers() {
        let mut doc = store(json!({"leaf": 1}));
        assert!(doc.mkdir(&p("/x/y")).expect("mkdir"));
        assert!(!doc.mkdir(&p("/x/y")).expect("mkdir again"));
        assert!(matches!(
            doc.mkdir(&p("/leaf")),
            Err(StoreError::NotContainer { .. })
        ));
    }

    #[test]
    fn size_bytes_tracks_serialized_length() {
        let doc = store(json!({"k": "v"}));
        assert_eq!(doc.size_bytes(), r#"{"k":"v"}"#.len());
    }

    #[test]
    fn new_rejects_leaf_root() {
        assert!(DocumentStore::new(Node::string("x")).is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn key_path() -> impl Strategy<Value = Vec<String>> {
            proptest::collection::vec("[a-c]", 1..4)
        }

        fn seeded(seeds: &[(Vec<String>, String)]) -> DocumentStore {
            let mut doc = DocumentStore::default();
            for (path, value) in seeds {
                // Seeds colliding with an existing leaf are skipped.
                let _ = doc.set(path, Node::string(value.clone()));
            }
            doc
        }

        proptest! {
            #[test]
            fn set_then_get_returns_value(
                seeds in proptest::collection::vec((key_path(), "[a-z]{0,6}"), 0..8),
                path in key_path(),
                value in "[a-z ]{0,12}",
            ) {
                let mut doc = seeded(&seeds);
                if doc.set(&path, Node::string(value.clone())).is_ok() {
                    prop_assert_eq!(doc.get(&path).expect("get"), &Node::string(value));
                }
            }

            #[test]
            fn removed_path_is_not_found(
                seeds in proptest::collection::vec((key_path(), "[a-z]{0,6}"), 0..8),
                path in key_path(),
            ) {
                let mut doc = seeded(&seeds);
                let _ = doc.remove(&path);
                prop_assert!(doc.get(&path).is_err());
            }

            #[test]
            fn move_relocates_node(
                seeds in proptest::collection::vec((key_path(), "[a-z]{0,6}"), 1..8),
                source in key_path(),
                target in key_path(),
            ) {
                prop_assume!(!source.starts_with(&target) && !target.starts_with(&source));
                let mut doc = seeded(&seeds);
                let Ok(original) = doc.get(&source).cloned() else {
                    return Ok(());
                };
                let before = doc.clone();
                match doc.move_node(&source, &target) {
                    Ok(()) => {
                        prop_assert_eq!(doc.get(&target).expect("target"), &original);
                        prop_assert!(doc.get(&source).is_err());
                    }
                    Err(_) => prop_assert_eq!(doc, before),
                }
            }
        }
    }
}
