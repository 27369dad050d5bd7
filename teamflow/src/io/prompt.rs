//! Prompt rendering for oracle consultations.
//!
//! Each [`OracleTask`] has one minijinja template split into sections with
//! `<!-- section:KEY required|droppable -->` markers. The builder keeps the
//! rendered prompt within a byte budget: droppable sections go first, then the
//! oldest conversation messages, and as a last resort content is cut from the
//! end.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{Destination, Message};
use crate::io::oracle::OracleTask;

const SUPERVISOR_TEMPLATE: &str = include_str!("prompts/supervisor.md");
const ANALYST_TEMPLATE: &str = include_str!("prompts/analyst.md");
const STRATEGIST_TEMPLATE: &str = include_str!("prompts/strategist.md");

const TRUNCATED_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// Conversation entry as exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct MessageContext<'a> {
    author: &'a str,
    content: &'a str,
}

/// Everything a prompt can draw on.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub query: &'a str,
    /// Windowed conversation, oldest first.
    pub conversation: &'a [Message],
    pub destinations: &'a [Destination],
    pub allowed_modules: &'a [String],
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders task prompts within a byte budget.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(template_name(OracleTask::Route), SUPERVISOR_TEMPLATE)
            .context("load supervisor template")?;
        env.add_template(template_name(OracleTask::Analyze), ANALYST_TEMPLATE)
            .context("load analyst template")?;
        env.add_template(template_name(OracleTask::Strategize), STRATEGIST_TEMPLATE)
            .context("load strategist template")?;
        Ok(Self { env, budget_bytes })
    }

    pub fn build(&self, task: OracleTask, inputs: &PromptInputs<'_>) -> Result<String> {
        let mut dropped = Vec::new();
        let mut skip = 0;
        loop {
            let rendered = self.render(task, inputs, &inputs.conversation[skip..])?;
            let mut sections = parse_sections(&rendered);
            drop_droppable_sections(&mut sections, &mut dropped, self.budget_bytes);
            if total_len(&sections) <= self.budget_bytes || skip == inputs.conversation.len() {
                truncate_from_end(&mut sections, self.budget_bytes);
                if skip > 0 {
                    debug!(
                        task = task.as_str(),
                        messages_dropped = skip,
                        "trimmed conversation for budget"
                    );
                }
                return Ok(render_sections(&sections));
            }
            skip += 1;
        }
    }

    fn render(&self, task: OracleTask, inputs: &PromptInputs<'_>, conversation: &[Message]) -> Result<String> {
        let conversation: Vec<MessageContext<'_>> = conversation
            .iter()
            .map(|m| MessageContext {
                author: &m.author,
                content: m.content.trim(),
            })
            .collect();
        let destinations: Vec<&str> = inputs.destinations.iter().map(|d| d.as_str()).collect();
        let template = self.env.get_template(template_name(task))?;
        let rendered = template
            .render(context! {
                query => inputs.query.trim(),
                conversation => conversation,
                destinations => destinations,
                allowed_modules => inputs.allowed_modules,
            })
            .with_context(|| format!("render {} prompt", task.as_str()))?;
        Ok(rendered)
    }
}

fn template_name(task: OracleTask) -> &'static str {
    match task {
        OracleTask::Route => "supervisor",
        OracleTask::Analyze => "analyst",
        OracleTask::Strategize => "strategist",
    }
}

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
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

fn total_len(sections: &[ParsedSection]) -> usize {
    let separators = sections.len().saturating_sub(1) * 2;
    sections.iter().map(|s| s.content.len()).sum::<usize>() + separators
}

/// Drop droppable sections (last first) until within budget. Sections dropped in an
/// earlier pass stay dropped so conversation trimming never brings them back.
fn drop_droppable_sections(
    sections: &mut Vec<ParsedSection>,
    dropped: &mut Vec<String>,
    budget: usize,
) {
    sections.retain(|s| s.required || !dropped.contains(&s.key));
    while total_len(sections) > budget {
        let Some(idx) = sections.iter().rposition(|s| !s.required) else {
            return;
        };
        let section = sections.remove(idx);
        debug!(section = %section.key, bytes_dropped = section.content.len(), "dropped section for budget");
        dropped.push(section.key);
    }
}

/// Last resort: cut content from the end until the prompt fits.
fn truncate_from_end(sections: &mut Vec<ParsedSection>, budget: usize) {
    while total_len(sections) > budget {
        let excess = total_len(sections) - budget;
        let Some(last) = sections.last_mut() else {
            return;
        };
        if last.content.len() <= excess {
            if let Some(removed) = sections.pop() {
                debug!(section = %removed.key, "removed section for budget");
            }
            continue;
        }
        let before_len = last.content.len();
        let keep = before_len - excess;
        if keep > TRUNCATED_MARKER.len() {
            let cut = floor_char_boundary(&last.content, keep - TRUNCATED_MARKER.len());
            last.content.truncate(cut);
            last.content.push_str(TRUNCATED_MARKER);
        } else {
            let cut = floor_char_boundary(&last.content, keep);
            last.content.truncate(cut);
        }
        debug!(section = %last.key, before_len, after_len = last.content.len(), "truncated section for budget");
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::SharedState;
    use crate::core::types::WorkerId;

    fn state_with_history(entries: usize) -> SharedState {
        let mut state = SharedState::new("Analyze Q1 and Q2 revenue", 10, 50);
        for i in 0..entries {
            state.record_worker_output(WorkerId::DataAnalyst, format!("ANALYSIS: entry {i} {}", "x".repeat(80)));
        }
        state
    }

    fn inputs<'a>(state: &'a SharedState, modules: &'a [String]) -> PromptInputs<'a> {
        PromptInputs {
            query: state.query(),
            conversation: state.window(),
            destinations: &Destination::ALL,
            allowed_modules: modules,
        }
    }

    /// Sections render in template order with the conversation last.
    #[test]
    fn supervisor_prompt_orders_sections() {
        let state = state_with_history(1);
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder.build(OracleTask::Route, &inputs(&state, &[])).expect("build");

        let contract = prompt.find("### Supervisor Contract").expect("contract");
        let destinations = prompt.find("- Business_Strategist").expect("destinations");
        let query = prompt.find("<query>").expect("query");
        let conversation = prompt.find("[Data_Analyst] ANALYSIS: entry 0").expect("conversation");
        assert!(contract < destinations);
        assert!(destinations < query);
        assert!(query < conversation);
        assert!(!prompt.contains("<!-- section:"));
    }

    #[test]
    fn analyst_prompt_lists_allowed_modules() {
        let state = state_with_history(0);
        let modules = vec!["pandas".to_string(), "math".to_string()];
        let builder = PromptBuilder::new(100_000).expect("builder");
        let prompt = builder.build(OracleTask::Analyze, &inputs(&state, &modules)).expect("build");
        assert!(prompt.contains("- pandas"));
        assert!(prompt.contains("Analyze Q1 and Q2 revenue"));
    }

    /// Over budget, droppable sections go first, then the oldest messages.
    #[test]
    fn budget_drops_guidance_then_oldest_messages() {
        let state = state_with_history(20);
        let builder = PromptBuilder::new(1_500).expect("builder");
        let prompt = builder.build(OracleTask::Route, &inputs(&state, &[])).expect("build");

        assert!(prompt.len() <= 1_500);
        assert!(!prompt.contains("### Guidance"));
        assert!(prompt.contains("### Supervisor Contract"));
        assert!(prompt.contains("entry 19"), "newest message kept");
        assert!(!prompt.contains("entry 0 "), "oldest message dropped");
    }

    #[test]
    fn tiny_budget_truncates_on_char_boundary() {
        let mut state = SharedState::new("é".repeat(400).as_str(), 10, 8);
        state.record_worker_output(WorkerId::DataAnalyst, "ANALYSIS: ü".repeat(50));
        let builder = PromptBuilder::new(300).expect("builder");
        let prompt = builder.build(OracleTask::Strategize, &inputs(&state, &[])).expect("build");
        assert!(prompt.len() <= 300);
    }
}
