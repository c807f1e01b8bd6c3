//! The audit trail of one loop invocation.
//!
//! Every executed (or rejected) action is appended as a [`TraceEntry`]. The
//! trace also indexes which fact and model ids actually appeared in tool
//! results, since those are the only ids a final answer may cite.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::facts::RecalledFact;
use crate::model::{MentalModel, ModelSummary};
use crate::provenance::FactId;

/// One step of the loop: the action taken and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEntry {
    /// 1-based iteration the entry belongs to.
    pub iteration: usize,
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
}

/// A fact that appeared in a recall result.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenFact {
    pub text: String,
    pub fact_type: String,
    /// Order of first appearance.
    pub rank: usize,
}

/// A model that appeared in a list or get result.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenModel {
    pub name: String,
    pub description: String,
    /// Facts its observations were grounded on, as returned by `get`.
    pub grounding: BTreeSet<FactId>,
}

/// A citation removed because its id never appeared in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedCitation {
    pub id: String,
    pub kind: CitationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationKind {
    Fact,
    Model,
}

/// Citations restricted to ids seen in the trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Citations {
    pub fact_ids: Vec<FactId>,
    pub model_ids: Vec<String>,
    pub dropped: Vec<DroppedCitation>,
}

/// Trace entries plus the index of ids they exposed.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: Vec<TraceEntry>,
    facts: BTreeMap<FactId, SeenFact>,
    models: BTreeMap<String, SeenModel>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn record_facts(&mut self, facts: &[RecalledFact]) {
        for f in facts {
            let rank = self.facts.len();
            self.facts.entry(f.id.clone()).or_insert_with(|| SeenFact {
                text: f.text.clone(),
                fact_type: f.fact_type.clone(),
                rank,
            });
        }
    }

    pub fn record_summaries(&mut self, summaries: &[ModelSummary]) {
        for s in summaries {
            self.models.entry(s.id.clone()).or_insert_with(|| SeenModel {
                name: s.name.clone(),
                description: s.description.clone(),
                grounding: BTreeSet::new(),
            });
        }
    }

    pub fn record_model(&mut self, model: &MentalModel) {
        let seen = self.models.entry(model.id.clone()).or_insert_with(|| SeenModel {
            name: model.name.clone(),
            description: model.description.clone(),
            grounding: BTreeSet::new(),
        });
        seen.grounding.extend(
            model
                .observations
                .iter()
                .flat_map(|o| o.based_on().fact_ids().cloned()),
        );
    }

    /// Whether any fact or model id has appeared yet.
    pub fn has_evidence(&self) -> bool {
        !self.facts.is_empty() || !self.models.is_empty()
    }

    pub fn fact(&self, id: &FactId) -> Option<&SeenFact> {
        self.facts.get(id)
    }

    pub fn model(&self, id: &str) -> Option<&SeenModel> {
        self.models.get(id)
    }

    /// Seen facts in order of first appearance.
    pub fn facts_by_rank(&self) -> Vec<(&FactId, &SeenFact)> {
        let mut facts: Vec<_> = self.facts.iter().collect();
        facts.sort_by_key(|(_, f)| f.rank);
        facts
    }

    /// Seen models, sorted by id.
    pub fn models(&self) -> impl Iterator<Item = (&String, &SeenModel)> {
        self.models.iter()
    }

    /// Keep only citations whose ids appeared in this trace. Duplicates are
    /// collapsed, order is preserved.
    pub fn filter_citations(&self, fact_ids: &[FactId], model_ids: &[String]) -> Citations {
        let mut out = Citations::default();
        for id in fact_ids {
            if out.fact_ids.contains(id) {
                continue;
            }
            if self.facts.contains_key(id) {
                out.fact_ids.push(id.clone());
            } else {
                out.dropped.push(DroppedCitation {
                    id: id.to_string(),
                    kind: CitationKind::Fact,
                });
            }
        }
        for id in model_ids {
            if out.model_ids.contains(id) {
                continue;
            }
            if self.models.contains_key(id) {
                out.model_ids.push(id.clone());
            } else {
                out.dropped.push(DroppedCitation {
                    id: id.clone(),
                    kind: CitationKind::Model,
                });
            }
        }
        out
    }

    /// Independent facts behind a set of (already filtered) citations: the
    /// cited facts together with the facts grounding each cited model that
    /// was read with `get`, counted once each.
    pub fn corroboration(&self, citations: &Citations) -> usize {
        let mut facts: BTreeSet<&FactId> = citations.fact_ids.iter().collect();
        for id in &citations.model_ids {
            if let Some(model) = self.models.get(id) {
                facts.extend(model.grounding.iter());
            }
        }
        facts.len()
    }
}
