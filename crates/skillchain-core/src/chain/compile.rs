//! Conversion of a flat `ChainRecord` into a validated `CompiledChain`.
//!
//! All structural checks happen here, once, before an execution is created.
//! Once compiled, a chain cannot hold a `GoToLink` without a target or a
//! target that does not resolve, so the engine never re-validates at
//! transition time.

use std::collections::{HashMap, HashSet};

use skillchain_types::chain::{
    ChainRecord, FailureKind, FailureTransition, Link, LinkRecord, SuccessKind, SuccessTransition,
};
use skillchain_types::error::DefinitionError;
use skillchain_types::execution::ChainSnapshot;

/// A validated chain with links indexed by id and by position.
#[derive(Debug, Clone)]
pub struct CompiledChain {
    snapshot: ChainSnapshot,
    by_id: HashMap<String, usize>,
    by_position: HashMap<u32, usize>,
}

impl CompiledChain {
    /// Rebuild the indexes for a snapshot that was compiled earlier.
    ///
    /// Snapshots are only ever produced by `compile_chain`, so no validation
    /// is repeated here.
    pub fn from_snapshot(snapshot: ChainSnapshot) -> Self {
        let by_id = snapshot
            .links
            .iter()
            .enumerate()
            .map(|(i, link)| (link.id.clone(), i))
            .collect();
        let by_position = snapshot
            .links
            .iter()
            .enumerate()
            .map(|(i, link)| (link.position, i))
            .collect();
        Self {
            snapshot,
            by_id,
            by_position,
        }
    }

    pub fn snapshot(&self) -> &ChainSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> ChainSnapshot {
        self.snapshot
    }

    pub fn name(&self) -> &str {
        &self.snapshot.name
    }

    pub fn max_total_failures(&self) -> u32 {
        self.snapshot.max_total_failures
    }

    pub fn links(&self) -> &[Link] {
        &self.snapshot.links
    }

    pub fn link(&self, link_id: &str) -> Option<&Link> {
        self.by_id.get(link_id).map(|&i| &self.snapshot.links[i])
    }

    /// The link at position 0.
    pub fn first_link(&self) -> Option<&Link> {
        self.link_at(0)
    }

    pub fn link_at(&self, position: u32) -> Option<&Link> {
        self.by_position
            .get(&position)
            .map(|&i| &self.snapshot.links[i])
    }

    /// The link in the default ordering after `link`, if any.
    pub fn link_after(&self, link: &Link) -> Option<&Link> {
        link.position.checked_add(1).and_then(|p| self.link_at(p))
    }
}

/// Validate a stored chain and convert it into a `CompiledChain`.
///
/// Checks:
/// - Name is non-empty and contains only alphanumerics, hyphens, underscores
/// - At least one link exists
/// - Link ids and positions are unique, positions are contiguous from 0
/// - `max_retries >= 1` per link, `max_total_failures >= 1` per chain
/// - `GoToLink` transitions carry a target naming a link of this chain
/// - Non-`GoToLink` transitions carry no target
///
/// The published flag is not checked; starting an unpublished chain is an
/// engine-level error. Cycles are allowed.
pub fn compile_chain(record: &ChainRecord) -> Result<CompiledChain, DefinitionError> {
    validate_name(&record.name)?;

    if record.links.is_empty() {
        return Err(DefinitionError::NoLinks);
    }
    if record.max_total_failures == 0 {
        return Err(DefinitionError::InvalidFailureBudget);
    }

    let mut ids = HashSet::new();
    let mut positions = HashSet::new();
    for link in &record.links {
        if !ids.insert(link.id.as_str()) {
            return Err(DefinitionError::DuplicateLinkId(link.id.clone()));
        }
        if !positions.insert(link.position) {
            return Err(DefinitionError::DuplicatePosition(link.position));
        }
        if link.max_retries == 0 {
            return Err(DefinitionError::InvalidRetryBudget(link.id.clone()));
        }
    }

    let mut sorted: Vec<&LinkRecord> = record.links.iter().collect();
    sorted.sort_by_key(|l| l.position);
    for (expected, link) in sorted.iter().enumerate() {
        let expected = expected as u32;
        if link.position != expected {
            return Err(DefinitionError::NonContiguousPositions {
                expected,
                found: link.position,
            });
        }
    }

    let links = sorted
        .into_iter()
        .map(|link| compile_link(link, &ids))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompiledChain::from_snapshot(ChainSnapshot {
        chain_id: record.id,
        name: record.name.clone(),
        max_total_failures: record.max_total_failures,
        links,
    }))
}

fn validate_name(name: &str) -> Result<(), DefinitionError> {
    if name.is_empty() {
        return Err(DefinitionError::InvalidName(
            "chain name must not be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DefinitionError::InvalidName(format!(
            "'{name}' contains invalid characters (only alphanumerics, hyphens and underscores allowed)"
        )));
    }
    Ok(())
}

fn compile_link(link: &LinkRecord, ids: &HashSet<&str>) -> Result<Link, DefinitionError> {
    let on_success = match link.on_success_transition {
        SuccessKind::GoToLink => SuccessTransition::GoToLink(resolve_target(
            link,
            link.on_success_target_link_id.as_deref(),
            "on_success",
            ids,
        )?),
        kind => {
            reject_target(link, link.on_success_target_link_id.as_deref(), "on_success")?;
            match kind {
                SuccessKind::NextLink => SuccessTransition::NextLink,
                _ => SuccessTransition::Complete,
            }
        }
    };

    let on_failure = match link.on_failure_transition {
        FailureKind::GoToLink => FailureTransition::GoToLink(resolve_target(
            link,
            link.on_failure_target_link_id.as_deref(),
            "on_failure",
            ids,
        )?),
        kind => {
            reject_target(link, link.on_failure_target_link_id.as_deref(), "on_failure")?;
            match kind {
                FailureKind::Retry => FailureTransition::Retry,
                _ => FailureTransition::Escalate,
            }
        }
    };

    Ok(Link {
        id: link.id.clone(),
        name: link.name.clone(),
        position: link.position,
        skill: link.skill.clone(),
        agent: link.agent.clone(),
        max_retries: link.max_retries,
        on_success,
        on_failure,
        escalation_reason: link.escalation_reason.clone(),
    })
}

fn resolve_target(
    link: &LinkRecord,
    target: Option<&str>,
    transition: &str,
    ids: &HashSet<&str>,
) -> Result<String, DefinitionError> {
    let target = target.ok_or_else(|| DefinitionError::MissingTarget {
        link_id: link.id.clone(),
        transition: transition.to_string(),
    })?;
    if !ids.contains(target) {
        return Err(DefinitionError::UnknownTarget {
            link_id: link.id.clone(),
            target: target.to_string(),
        });
    }
    Ok(target.to_string())
}

fn reject_target(
    link: &LinkRecord,
    target: Option<&str>,
    transition: &str,
) -> Result<(), DefinitionError> {
    match target {
        Some(_) => Err(DefinitionError::UnexpectedTarget {
            link_id: link.id.clone(),
            transition: transition.to_string(),
        }),
        None => Ok(()),
    }
}
