//! Structural model derivation from a bank's mission.
//!
//! A mission is hashed after whitespace and case normalization; when the hash
//! matches the bank's stored marker the existing structural set is returned
//! untouched and the reasoner is never called.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::StructuralConfig;
use crate::error::ReflectResult;
use crate::llm::{Reasoner, StructuralProposal};
use crate::model::{MentalModel, ModelFilter, ModelSubtype, is_pinned_id, slugify};
use crate::provenance::stable_hash;
use crate::store::ModelStore;

/// Single words too broad to be a structural topic on their own.
const GENERIC_TOPICS: &[&str] = &[
    "information", "knowledge", "data", "notes", "things", "stuff", "topics", "general",
    "misc", "miscellaneous", "other", "details", "context", "overview", "summary", "updates",
    "work", "tasks", "people", "team", "project", "projects", "goals", "items",
];

/// One structural model to be present after a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralSpec {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Result of a derivation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralOutcome {
    /// Replacement set, at most `StructuralConfig::effective_max()` entries.
    pub models: Vec<StructuralSpec>,
    /// The mission was unchanged and the stored set was reused.
    pub cache_hit: bool,
    /// Hash to store as the bank's marker; `None` without a mission, in which
    /// case `models` is the existing set.
    pub mission_hash: Option<u64>,
}

/// Hash of a mission, insensitive to case and whitespace layout.
pub fn mission_hash(mission: &str) -> u64 {
    let normalized = mission
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    stable_hash([normalized.as_bytes()])
}

fn normalized_words(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Why a proposal was rejected, `None` if it is acceptable.
fn rejection(proposal: &StructuralProposal, mission: &str) -> Option<&'static str> {
    let name = proposal.name.trim();
    match slugify(name) {
        Err(_) => return Some("empty name"),
        Ok(slug) if is_pinned_id(&slug) => return Some("reserved pinned id"),
        Ok(_) => {}
    }
    if proposal.description.trim().is_empty() {
        return Some("empty description");
    }
    let words = normalized_words(name);
    if words == normalized_words(mission) || normalized_words(&proposal.description) == normalized_words(mission) {
        return Some("restates the mission");
    }
    if !words.contains(' ') && GENERIC_TOPICS.contains(&words.as_str()) {
        return Some("single generic word");
    }
    None
}

/// Validate, dedupe by slug and cap a reasoner's proposals.
pub fn accept_proposals(
    proposals: Vec<StructuralProposal>,
    mission: &str,
    config: &StructuralConfig,
) -> Vec<StructuralSpec> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for p in proposals {
        if out.len() >= config.effective_max() {
            break;
        }
        if let Some(reason) = rejection(&p, mission) {
            tracing::debug!(name = %p.name, reason, "structural proposal rejected");
            continue;
        }
        let Ok(id) = slugify(&p.name) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        out.push(StructuralSpec {
            id,
            name: p.name.trim().to_string(),
            description: p.description.trim().to_string(),
        });
    }
    out
}

fn to_spec(model: &MentalModel) -> StructuralSpec {
    StructuralSpec {
        id: model.id.clone(),
        name: model.name.clone(),
        description: model.description.clone(),
    }
}

/// Derive the structural set for `bank_id`.
///
/// Reasoner failures propagate; the caller keeps the existing set in that case.
pub fn derive(
    store: &dyn ModelStore,
    reasoner: &dyn Reasoner,
    bank_id: &str,
    mission: Option<&str>,
    config: &StructuralConfig,
) -> ReflectResult<StructuralOutcome> {
    let existing = store.list(
        bank_id,
        &ModelFilter::all().with_subtype(ModelSubtype::Structural),
    )?;

    // Without a mission there is nothing to derive from; keep what exists.
    let Some(mission) = mission.map(str::trim).filter(|m| !m.is_empty()) else {
        return Ok(StructuralOutcome {
            models: existing.iter().map(to_spec).collect(),
            cache_hit: false,
            mission_hash: None,
        });
    };

    let hash = mission_hash(mission);
    if store.mission_marker(bank_id)? == Some(hash) {
        tracing::debug!(bank_id, "mission unchanged, reusing structural set");
        return Ok(StructuralOutcome {
            models: existing.iter().map(to_spec).collect(),
            cache_hit: true,
            mission_hash: Some(hash),
        });
    }

    let current: Vec<StructuralProposal> = existing
        .iter()
        .map(|m| StructuralProposal {
            name: m.name.clone(),
            description: m.description.clone(),
        })
        .collect();
    let proposals = reasoner.derive_structural(mission, &current)?;
    let proposed = proposals.len();
    let models = accept_proposals(proposals, mission, config);
    tracing::info!(bank_id, proposed, accepted = models.len(), "structural set derived");
    Ok(StructuralOutcome {
        models,
        cache_hit: false,
        mission_hash: Some(hash),
    })
}
