//! Slash-delimited document paths and tree traversal.
//!
//! Wire paths are rooted at a tier marker (`/working/...` or `/persistent/...`).
//! Parsing strips the marker into a [`Tier`]; the remaining segments are
//! resolved against that tier's document root.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::StoreError;
use crate::tree::{Children, Node};

pub const WORKING_MARKER: &str = "working";
pub const PERSISTENT_MARKER: &str = "persistent";

/// Deepest container nesting a document may reach through actions. Result
/// records add three levels on top, and stored documents are reparsed with
/// serde_json's nesting limit of 128.
pub const MAX_DEPTH: usize = 100;

/// Which document a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Working,
    Persistent,
}

impl Tier {
    pub fn marker(self) -> &'static str {
        match self {
            Tier::Working => WORKING_MARKER,
            Tier::Persistent => PERSISTENT_MARKER,
        }
    }

    fn from_marker(segment: &str) -> Option<Self> {
        match segment {
            WORKING_MARKER => Some(Tier::Working),
            PERSISTENT_MARKER => Some(Tier::Persistent),
            _ => None,
        }
    }
}

/// A validated, tier-qualified path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub tier: Tier,
    pub segments: Vec<String>,
}

impl DocPath {
    /// Parse a wire path, rejecting anything not rooted at a tier marker.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if !raw.starts_with('/') {
            return Err(StoreError::invalid(raw, "path must start with '/'"));
        }
        let mut segments = split_segments(raw);
        if segments.is_empty() {
            return Err(StoreError::invalid(
                raw,
                "path must name a tier (/working or /persistent)",
            ));
        }
        if segments.len() > MAX_DEPTH {
            return Err(StoreError::invalid(
                raw,
                format!("path is deeper than {MAX_DEPTH} segments"),
            ));
        }
        let marker = segments.remove(0);
        let tier = Tier::from_marker(&marker).ok_or_else(|| {
            StoreError::invalid(raw, format!("unknown tier '{marker}'"))
        })?;
        Ok(Self { tier, segments })
    }

    pub fn root(tier: Tier) -> Self {
        Self {
            tier,
            segments: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &DocPath) -> bool {
        self.tier == other.tier && self.segments.starts_with(&other.segments)
    }

    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self {
            tier: self.tier,
            segments,
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.tier.marker())?;
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Split on `/`, collapsing repeated separators and ignoring a trailing one.
pub fn split_segments(raw: &str) -> Vec<String> {
    raw.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render store-relative segments as `/a/b` (`/` for the root).
pub fn render_segments(segments: &[String]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    segments.iter().map(|s| format!("/{s}")).collect()
}

/// Resolve `segments` against `root`. The empty path yields the whole tree.
pub fn resolve<'a>(root: &'a Node, segments: &[String]) -> Result<&'a Node, StoreError> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        let children = current.as_container().ok_or_else(|| StoreError::NotContainer {
            path: render_segments(&segments[..depth]),
        })?;
        current = children.get(segment).ok_or_else(|| StoreError::NotFound {
            path: render_segments(&segments[..=depth]),
        })?;
    }
    Ok(current)
}

pub fn resolve_mut<'a>(
    root: &'a mut Node,
    segments: &[String],
) -> Result<&'a mut Node, StoreError> {
    let mut current = root;
    for (depth, segment) in segments.iter().enumerate() {
        let children = current
            .as_container_mut()
            .ok_or_else(|| StoreError::NotContainer {
                path: render_segments(&segments[..depth]),
            })?;
        current = children.get_mut(segment).ok_or_else(|| StoreError::NotFound {
            path: render_segments(&segments[..=depth]),
        })?;
    }
    Ok(current)
}

/// Resolve the container holding the final segment, returning it with that segment.
pub fn resolve_parent<'a>(
    root: &'a mut Node,
    segments: &'a [String],
) -> Result<(&'a mut Children, &'a str), StoreError> {
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| StoreError::invalid("/", "the root has no parent"))?;
    let parent = resolve_mut(root, parents)?;
    let children = parent
        .as_container_mut()
        .ok_or_else(|| StoreError::NotContainer {
            path: render_segments(parents),
        })?;
    Ok((children, last.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segs(raw: &str) -> Vec<String> {
        split_segments(raw)
    }

    #[test]
    fn parse_routes_tier_markers() {
        let path = DocPath::parse("/working/todo").expect("parse");
        assert_eq!(path.tier, Tier::Working);
        assert_eq!(path.segments, vec!["todo".to_string()]);

        let path = DocPath::parse("/persistent/a/b").expect("parse");
        assert_eq!(path.tier, Tier::Persistent);
        assert_eq!(path.to_string(), "/persistent/a/b");
    }

    #[test]
    fn parse_collapses_separators_and_trailing_slash() {
        let path = DocPath::parse("//working///notes//today/").expect("parse");
        assert_eq!(path.segments, vec!["notes".to_string(), "today".to_string()]);

        let root = DocPath::parse("/working/").expect("parse");
        assert!(root.is_root());
    }

    #[test]
    fn parse_rejects_unknown_or_missing_tier() {
        for raw in ["/", "", "working/x", "/scratch/x", "/Working/x"] {
            let err = DocPath::parse(raw).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidPath { .. }),
                "expected invalid path for {raw:?}"
            );
        }
    }

    #[test]
    fn parse_rejects_over_deep_paths() {
        let at_cap = format!("/working{}", "/a".repeat(MAX_DEPTH - 1));
        assert_eq!(DocPath::parse(&at_cap).expect("at cap").segments.len(), MAX_DEPTH - 1);

        let too_deep = format!("/working{}", "/a".repeat(MAX_DEPTH));
        assert!(matches!(
            DocPath::parse(&too_deep),
            Err(StoreError::InvalidPath { .. })
        ));
    }

    #[test]
    fn resolve_reports_not_found_and_not_container() {
        let root = Node::from(json!({"a": {"b": "leaf"}}));

        assert_eq!(resolve(&root, &segs("/a/b")).expect("b"), &Node::string("leaf"));
        assert_eq!(resolve(&root, &[]).expect("root"), &root);
        assert_eq!(
            resolve(&root, &segs("/a/c")).unwrap_err(),
            StoreError::NotFound {
                path: "/a/c".to_string()
            }
        );
        assert_eq!(
            resolve(&root, &segs("/a/b/c")).unwrap_err(),
            StoreError::NotContainer {
                path: "/a/b".to_string()
            }
        );
    }

    #[test]
    fn resolve_parent_returns_final_segment() {
        let mut root = Node::from(json!({"a": {"b": 1}}));
        let path = segs("/a/b");
        let (parent, last) = resolve_parent(&mut root, &path).expect("parent");
        assert_eq!(last, "b");
        assert!(parent.contains_key("b"));
    }

    #[test]
    fn starts_with_requires_same_tier() {
        let a = DocPath::parse("/working/a").expect("a");
        let ab = DocPath::parse("/working/a/b").expect("ab");
        let other = DocPath::parse("/persistent/a/b").expect("other");
        assert!(ab.starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!other.starts_with(&a));
    }
}
