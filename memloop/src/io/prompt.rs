//! Prompt builder for model input.
//!
//! The template is rendered with minijinja, then split into sections marked
//! `<!-- section:KEY required|droppable -->`. When the rendered prompt exceeds
//! the byte budget, droppable sections are removed first and the last section
//! is truncated as a final resort.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::codec::encode_document;
use crate::core::state::AgentState;
use crate::core::types::RESULTS_KEY;
use crate::tree::Node;

const AGENT_TEMPLATE: &str = include_str!("prompts/agent.md");
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Everything a prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub iteration: u64,
    pub state: AgentState,
    /// The whole working document, reserved subtree included.
    pub working: &'a Node,
    pub persistent: &'a Node,
}

/// Template engine wrapper around minijinja.
struct PromptEngine<'source> {
    env: Environment<'source>,
}

impl<'source> PromptEngine<'source> {
    fn new(template: &'source str) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("agent", template)
            .context("compile prompt template")?;
        Ok(Self { env })
    }

    fn render(&self, input: &PromptInputs<'_>) -> Result<String> {
        let (working, results) = split_results(input.working);
        let template = self.env.get_template("agent")?;
        let rendered = template
            .render(context! {
                iteration => input.iteration,
                state => input.state.as_str(),
                working => encode_document("working", &working),
                results => results.map(|node| encode_document(RESULTS_KEY, node)),
                storage_index => storage_index(input.persistent),
            })
            .context("render prompt template")?;
        Ok(rendered)
    }
}

/// Working document without the reserved subtree, plus that subtree if non-empty.
fn split_results(working: &Node) -> (Node, Option<&Node>) {
    let mut user = working.clone();
    if let Some(children) = user.as_container_mut() {
        children.shift_remove(RESULTS_KEY);
    }
    let results = working
        .as_container()
        .and_then(|children| children.get(RESULTS_KEY))
        .filter(|node| node.as_container().is_none_or(|entries| !entries.is_empty()));
    (user, results)
}

/// One line per top-level persistent entry, or `None` when empty.
fn storage_index(persistent: &Node) -> Option<String> {
    let children = persistent.as_container()?;
    if children.is_empty() {
        return None;
    }
    let lines: Vec<String> = children
        .iter()
        .map(|(name, child)| match child.as_container() {
            Some(entries) => format!("- /persistent/{name} ({} entries)", entries.len()),
            None => format!("- /persistent/{name}"),
        })
        .collect();
    Some(lines.join("\n"))
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "working").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Section content after the marker.
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker pattern is valid")
    });

    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());

        let content = rendered[marker.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
///
/// Drop order: storage_index -> results
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in ["storage_index", "results"] {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, others)) = sections.split_last_mut() else {
        return;
    };
    let other_len: usize = others.iter().map(|s| s.content.len()).sum();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    if before_len > allowed {
        if allowed > TRUNCATION_MARKER.len() {
            truncate_on_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
            last.content.push_str(TRUNCATION_MARKER);
        } else {
            truncate_on_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_on_char_boundary(text: &mut String, max_len: usize) {
    let mut cut = max_len.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds a prompt within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    template: Option<String>,
}

impl PromptBuilder {
    /// Create a builder using the embedded template.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            template: None,
        }
    }

    /// Use `template` instead of the embedded one.
    pub fn with_template(mut self, template: String) -> Self {
        self.template = Some(template);
        self
    }

    pub fn build(&self, input: &PromptInputs<'_>) -> Result<PromptPack> {
        let source = self.template.as_deref().unwrap_or(AGENT_TEMPLATE);
        let rendered = PromptEngine::new(source)?.render(input)?;

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);

        Ok(PromptPack {
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready to send to the model.
#[derive(Debug, Clone)]
pub struct PromptPack {
    content: String,
}

impl PromptPack {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn into_string(self) -> String {
        self.content
    }
}
