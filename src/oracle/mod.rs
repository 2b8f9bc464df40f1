//! Change-proposal oracles.
//!
//! Code generation and debugging share one capability: turn a text context
//! into a [`ChangeProposal`]. Oracle failures never abort a run; callers go
//! through [`propose_or_degrade`] and receive an unavailable proposal instead.

pub mod client;

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::errors::Result;

pub use client::HttpCompletionProvider;

pub const CODEGEN_TEMPLATE: &str = include_str!("../../prompts/codegen.md");
pub const DEBUGGER_TEMPLATE: &str = include_str!("../../prompts/debugger.md");

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("{0}")]
    Unavailable(String),

    #[error("Malformed oracle response: {0}")]
    Malformed(String),
}

/// A proposed change plus the material to check it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProposal {
    #[serde(default)]
    pub patch: String,
    #[serde(default, alias = "snippet")]
    pub probe_snippet: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tests_added: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(skip_deserializing, default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl ChangeProposal {
    /// Empty proposal standing in for an oracle that could not answer
    pub fn degraded(note: impl Into<String>) -> Self {
        Self {
            patch: String::new(),
            probe_snippet: String::new(),
            tests_added: Vec::new(),
            notes: note.into(),
            available: false,
        }
    }

    pub fn has_patch(&self) -> bool {
        !self.patch.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(line)) if line.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(line)) => vec![line],
        Some(OneOrMany::Many(lines)) => lines,
    })
}

pub trait ChangeOracle {
    fn propose(&self, context: &str) -> std::result::Result<ChangeProposal, OracleError>;
}

/// Ask `oracle` for a proposal; any failure becomes an unavailable proposal.
pub fn propose_or_degrade(oracle: &dyn ChangeOracle, context: &str) -> ChangeProposal {
    match oracle.propose(context) {
        Ok(proposal) => proposal,
        Err(e) => {
            warn!("Oracle degraded: {}", e);
            ChangeProposal::degraded(e.to_string())
        }
    }
}

/// Opaque text completion service
pub trait CompletionProvider {
    fn complete(&self, prompt: &str) -> std::result::Result<String, OracleError>;
}

/// Oracle built from a prompt template and a completion provider
pub struct PromptedOracle<P> {
    template: String,
    provider: P,
}

impl<P: CompletionProvider> PromptedOracle<P> {
    pub fn new(template: impl Into<String>, provider: P) -> Self {
        Self {
            template: template.into(),
            provider,
        }
    }

    pub fn prompt_for(&self, context: &str) -> String {
        format!("{}\n\n{}", self.template, context)
    }
}

impl<P: CompletionProvider> ChangeOracle for PromptedOracle<P> {
    fn propose(&self, context: &str) -> std::result::Result<ChangeProposal, OracleError> {
        let reply = self.provider.complete(&self.prompt_for(context))?;
        debug!("Oracle replied with {} chars", reply.len());
        parse_proposal(&reply)
    }
}

/// Template text from `path`, or the bundled one when no path is configured.
pub fn load_template(path: Option<&Path>, bundled: &str) -> Result<String> {
    match path {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(bundled.to_string()),
    }
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start <= end).then(|| &text[start..=end])
}

/// Parse an oracle reply: a JSON object, possibly fenced or wrapped in prose.
pub fn parse_proposal(reply: &str) -> std::result::Result<ChangeProposal, OracleError> {
    let clean = strip_markdown_fences(reply);
    let json = extract_json_object(clean)
        .ok_or_else(|| OracleError::Malformed("no JSON object in reply".to_string()))?;
    serde_json::from_str(json).map_err(|e| OracleError::Malformed(e.to_string()))
}
