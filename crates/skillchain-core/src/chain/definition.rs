//! YAML chain files.
//!
//! A chain file is a friendlier shape of `ChainRecord`: positions default to
//! list order, budgets fall back to `EngineConfig`, and transitions default
//! to `next_link` / `retry`.
//!
//! ```yaml
//! name: support-flow
//! max_total_failures: 4
//! links:
//!   - id: triage
//!     skill: ticket-triage
//!     max_retries: 2
//!   - id: draft
//!     skill: reply-draft
//!     on_failure: go_to_link
//!     on_failure_target: fallback
//!   - id: fallback
//!     skill: canned-reply
//!     on_failure: escalate
//!     escalation_reason: no reply could be produced
//! ```

use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use skillchain_types::chain::{ChainId, ChainRecord, FailureKind, LinkRecord, SuccessKind};
use skillchain_types::config::EngineConfig;
use skillchain_types::error::DefinitionError;

use super::compile::compile_chain;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChainFile {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    published: bool,
    #[serde(default)]
    max_total_failures: Option<u32>,
    links: Vec<LinkFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    position: Option<u32>,
    skill: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default = "default_on_success")]
    on_success: SuccessKind,
    #[serde(default)]
    on_success_target: Option<String>,
    #[serde(default = "default_on_failure")]
    on_failure: FailureKind,
    #[serde(default)]
    on_failure_target: Option<String>,
    #[serde(default)]
    escalation_reason: Option<String>,
}

fn default_on_success() -> SuccessKind {
    SuccessKind::NextLink
}

fn default_on_failure() -> FailureKind {
    FailureKind::Retry
}

/// Parse a YAML chain file into a `ChainRecord`, filling defaults from
/// `config`, and validate it with `compile_chain`.
///
/// The returned record has a fresh id; callers importing over an existing
/// chain should carry the stored id across.
pub fn parse_chain_yaml(yaml: &str, config: &EngineConfig) -> Result<ChainRecord, DefinitionError> {
    let file: ChainFile =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;

    let links = file
        .links
        .into_iter()
        .enumerate()
        .map(|(index, link)| LinkRecord {
            name: link.name.unwrap_or_else(|| link.id.clone()),
            id: link.id,
            position: link.position.unwrap_or(index as u32),
            skill: link.skill,
            agent: link.agent,
            max_retries: link.max_retries.unwrap_or(config.default_max_retries),
            on_success_transition: link.on_success,
            on_success_target_link_id: link.on_success_target,
            on_failure_transition: link.on_failure,
            on_failure_target_link_id: link.on_failure_target,
            escalation_reason: link.escalation_reason,
        })
        .collect();

    let now = Utc::now();
    let record = ChainRecord {
        id: ChainId::new(),
        name: file.name,
        description: file.description,
        published: file.published,
        max_total_failures: file
            .max_total_failures
            .unwrap_or(config.default_max_total_failures),
        links,
        created_at: now,
        updated_at: now,
    };

    compile_chain(&record)?;
    Ok(record)
}

/// Read and parse a chain file from disk.
pub fn load_chain_file(path: &Path, config: &EngineConfig) -> Result<ChainRecord, DefinitionError> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| DefinitionError::Parse(format!("{}: {e}", path.display())))?;
    parse_chain_yaml(&yaml, config)
}
