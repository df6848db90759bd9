//! Tagged-text action protocol.
//!
//! Decoding pulls `<action>...</action>` blocks out of free-form model output.
//! Every block is decoded independently: a malformed block becomes a
//! [`Rejected`] entry and never affects its siblings; a block missing its
//! `</action>` ends where the next `<action>` begins. Text between blocks is
//! ignored except for the optional `<next_state>`, `<thinking_log>` and
//! `<evaluation_log>` hints.
//!
//! # Nested content
//!
//! A `<content>` whose trimmed text is a sequence of `<tag>value</tag>` pairs
//! decodes into a container. If the nesting is malformed or ambiguous
//! (unbalanced tags, stray text between pairs, duplicate keys) the whole content
//! is kept as a plain string instead. Model output is not guaranteed to be
//! well-formed, so this fallback is part of the contract rather than an error.
//!
//! Encoding writes a subtree in the same nested form, escaping the five XML
//! entities so that decoding an encoded leaf string returns it unchanged.

use crate::core::error::ActionError;
use crate::core::path::{DocPath, MAX_DEPTH, Tier};
use crate::core::types::{Action, ActionKind};
use crate::tree::{Children, Node};

const ACTION_OPEN: &str = "<action>";
const ACTION_CLOSE: &str = "</action>";
const CONTENT_OPEN: &str = "<content>";
const CONTENT_CLOSE: &str = "</content>";
const CONTENT_EMPTY: &str = "<content/>";
const REASONING_CLOSE: &str = "</think>";

/// A block that failed decoding or validation, with whatever fields were readable.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub kind: Option<String>,
    pub target_path: Option<String>,
    pub source_path: Option<String>,
    pub error: ActionError,
}

/// One decoded block, in the order it appeared.
pub type Decoded = Result<Action, Rejected>;

/// Everything extracted from one model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    pub entries: Vec<Decoded>,
    pub next_state: Option<String>,
    pub thinking_log: Option<String>,
    pub evaluation_log: Option<String>,
}

impl DecodedBatch {
    pub fn has_actions(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn rejected_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_err()).count()
    }
}

/// Decode a model response. Never fails; malformed blocks become rejected entries.
pub fn decode(text: &str) -> DecodedBatch {
    let body = strip_reasoning(text);
    let mut batch = DecodedBatch::default();
    let mut outside = String::new();
    let mut rest = body;

    while let Some(open) = rest.find(ACTION_OPEN) {
        outside.push_str(&rest[..open]);
        let after = &rest[open + ACTION_OPEN.len()..];
        match block_end(after) {
            BlockEnd::Closed(close) => {
                batch.entries.push(decode_block(&after[..close]));
                rest = &after[close + ACTION_CLOSE.len()..];
            }
            BlockEnd::Unterminated(cut) => {
                let fields = RawFields::extract(&after[..cut]);
                batch.entries.push(Err(fields.reject(ActionError::Unterminated)));
                rest = &after[cut..];
            }
        }
    }
    outside.push_str(rest);

    batch.next_state = hint(&outside, "next_state");
    batch.thinking_log = hint(&outside, "thinking_log");
    batch.evaluation_log = hint(&outside, "evaluation_log");
    batch
}

enum BlockEnd {
    /// Offset of the block's own `</action>`.
    Closed(usize),
    /// The block runs up to the next `<action>` (or the end) without closing.
    Unterminated(usize),
}

fn block_end(after_open: &str) -> BlockEnd {
    let close = after_open.find(ACTION_CLOSE);
    let next_open = after_open.find(ACTION_OPEN);
    match (close, next_open) {
        (Some(close), Some(next)) if next < close => BlockEnd::Unterminated(next),
        (Some(close), _) => BlockEnd::Closed(close),
        (None, Some(next)) => BlockEnd::Unterminated(next),
        (None, None) => BlockEnd::Unterminated(after_open.len()),
    }
}

/// Only text after the last `</think>` is considered.
fn strip_reasoning(text: &str) -> &str {
    match text.rfind(REASONING_CLOSE) {
        Some(pos) => &text[pos + REASONING_CLOSE.len()..],
        None => text,
    }
}

fn hint(text: &str, name: &str) -> Option<String> {
    first_field(text, name)
        .map(|value| unescape(value.trim()))
        .filter(|value| !value.is_empty())
}

fn decode_block(block: &str) -> Decoded {
    let fields = RawFields::extract(block);
    fields.validate()
}

/// Raw strings pulled from one block, already unescaped (content excepted).
#[derive(Debug, Default)]
struct RawFields {
    kind: Option<String>,
    target_path: Option<String>,
    source_path: Option<String>,
    content: Option<RawContent>,
}

/// `<content>` as written in a block.
#[derive(Debug)]
enum RawContent {
    Text(String),
    /// The self-closing `<content/>` form.
    Empty,
}

impl RawFields {
    fn extract(block: &str) -> Self {
        // Content may itself contain tags named like sibling fields, so cut it
        // out before looking for the others.
        let (content, remainder) = split_content(block);
        Self {
            kind: scalar_field(&remainder, "kind"),
            target_path: scalar_field(&remainder, "target_path"),
            source_path: scalar_field(&remainder, "source_path"),
            content,
        }
    }

    fn reject(self, error: ActionError) -> Rejected {
        Rejected {
            kind: self.kind,
            target_path: self.target_path,
            source_path: self.source_path,
            error,
        }
    }

    fn validate(self) -> Decoded {
        let Some(raw_kind) = self.kind.clone() else {
            return Err(self.reject(ActionError::MissingKind));
        };
        let Ok(kind) = raw_kind.parse::<ActionKind>() else {
            return Err(self.reject(ActionError::UnknownKind { kind: raw_kind }));
        };

        let missing = |field: &'static str| ActionError::MissingField {
            kind: kind.to_string(),
            field,
        };
        let needs_target = kind != ActionKind::Search;
        let needs_source = kind == ActionKind::Move;
        let needs_content = matches!(kind, ActionKind::Set | ActionKind::Search);

        if needs_source && self.source_path.is_none() {
            return Err(self.reject(missing("source_path")));
        }
        if needs_target && self.target_path.is_none() {
            return Err(self.reject(missing("target_path")));
        }
        if needs_content && self.content.is_none() {
            return Err(self.reject(missing("content")));
        }

        let target_path = self
            .target_path
            .unwrap_or_else(|| DocPath::root(Tier::Persistent).to_string());
        let content = self.content.map(|raw| match (kind, raw) {
            // Queries are matched as text, never as structure.
            (ActionKind::Search, RawContent::Text(raw)) => Node::string(unescape(raw.trim())),
            (ActionKind::Search, RawContent::Empty) => Node::string(""),
            (_, RawContent::Text(raw)) => decode_content(&raw),
            (_, RawContent::Empty) => Node::empty_container(),
        });
        Ok(Action {
            kind,
            target_path,
            source_path: if needs_source { self.source_path } else { None },
            content,
        })
    }
}

fn split_content(block: &str) -> (Option<RawContent>, String) {
    if let (Some(start), Some(end)) = (block.find(CONTENT_OPEN), block.rfind(CONTENT_CLOSE))
        && end >= start + CONTENT_OPEN.len()
    {
        let inner = &block[start + CONTENT_OPEN.len()..end];
        let remainder = format!("{}{}", &block[..start], &block[end + CONTENT_CLOSE.len()..]);
        return (Some(RawContent::Text(inner.to_string())), remainder);
    }
    if let Some(start) = block.find(CONTENT_EMPTY) {
        let remainder = format!("{}{}", &block[..start], &block[start + CONTENT_EMPTY.len()..]);
        return (Some(RawContent::Empty), remainder);
    }
    (None, block.to_string())
}

/// Trimmed, unescaped text of the first `<name>` field; empty counts as absent.
fn scalar_field(text: &str, name: &str) -> Option<String> {
    first_field(text, name)
        .map(|value| unescape(value.trim()))
        .filter(|value| !value.is_empty())
}

fn first_field<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

/// Decode `<content>` text into a container when it is well-formed nesting,
/// otherwise into a plain string leaf. Elements nested deeper than
/// [`MAX_DEPTH`] keep their inner text as a string.
pub fn decode_content(raw: &str) -> Node {
    match parse_nested(raw, MAX_DEPTH) {
        Some(children) => Node::Container(children),
        None => Node::string(unescape(raw)),
    }
}

/// `levels` is how many containers this text may still open, itself included.
fn parse_nested(raw: &str, levels: usize) -> Option<Children> {
    let mut rest = raw.trim();
    if levels == 0 || !rest.starts_with('<') {
        return None;
    }
    let mut children = Children::new();
    while !rest.is_empty() {
        let element = next_element(rest)?;
        let value = if element.self_closing {
            Node::empty_container()
        } else {
            match parse_nested(element.inner, levels - 1) {
                Some(nested) => Node::Container(nested),
                None => Node::string(unescape(element.inner)),
            }
        };
        if children.insert(unescape(element.name), value).is_some() {
            return None;
        }
        rest = element.rest.trim_start();
    }
    Some(children)
}

struct Element<'a> {
    name: &'a str,
    inner: &'a str,
    rest: &'a str,
    self_closing: bool,
}

/// Read one `<name>inner</name>` or `<name/>` element from the start of `text`.
fn next_element(text: &str) -> Option<Element<'_>> {
    if !text.starts_with('<') {
        return None;
    }
    let tag_end = text.find('>')?;
    let tag = &text[1..tag_end];

    if let Some(name) = tag.strip_suffix('/') {
        let name = name.trim_end();
        if !valid_tag_name(name) {
            return None;
        }
        return Some(Element {
            name,
            inner: "",
            rest: &text[tag_end + 1..],
            self_closing: true,
        });
    }
    if !valid_tag_name(tag) {
        return None;
    }

    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let body_start = tag_end + 1;
    let mut depth = 1usize;
    let mut cursor = body_start;
    loop {
        let next_close = text[cursor..].find(&close)? + cursor;
        match text[cursor..].find(&open).map(|pos| pos + cursor) {
            Some(next_open) if next_open < next_close => {
                depth += 1;
                cursor = next_open + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(Element {
                        name: tag,
                        inner: &text[body_start..next_close],
                        rest: &text[next_close + close.len()..],
                        self_closing: false,
                    });
                }
                cursor = next_close + close.len();
            }
        }
    }
}

fn valid_tag_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(['!', '?'])
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '/'))
}

/// Escape the five XML entities.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`] in a single pass. Unrecognized `&` sequences are kept verbatim.
pub fn unescape(text: &str) -> String {
    const ENTITIES: [(&str, char); 5] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
    ];
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match ENTITIES
            .iter()
            .find(|(entity, _)| rest.starts_with(entity))
        {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Encode a subtree as nested tagged text. A leaf encodes to its escaped string form.
pub fn encode(node: &Node) -> String {
    match node {
        Node::Leaf(scalar) => escape(&scalar.to_string()),
        Node::Container(children) => {
            let mut out = String::new();
            write_children(children, 0, &mut out);
            out
        }
    }
}

/// Encode `node` wrapped in a `<name>` element, for prompt embedding.
pub fn encode_document(name: &str, node: &Node) -> String {
    let tag = escape(name);
    match node {
        Node::Container(children) if children.is_empty() => format!("<{tag}/>"),
        Node::Container(children) => {
            let mut out = format!("<{tag}>\n");
            write_children(children, 1, &mut out);
            out.push_str(&format!("\n</{tag}>"));
            out
        }
        Node::Leaf(_) => format!("<{tag}>{}</{tag}>", encode(node)),
    }
}

fn write_children(children: &Children, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (idx, (name, child)) in children.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let tag = escape(name);
        out.push_str(&indent);
        match child {
            Node::Leaf(scalar) => {
                out.push_str(&format!("<{tag}>{}</{tag}>", escape(&scalar.to_string())));
            }
            Node::Container(grandchildren) if grandchildren.is_empty() => {
                out.push_str(&format!("<{tag}/>"));
            }
            Node::Container(grandchildren) => {
                out.push_str(&format!("<{tag}>\n"));
                write_children(grandchildren, depth + 1, out);
                out.push_str(&format!("\n{indent}</{tag}>"));
            }
        }
    }
}
