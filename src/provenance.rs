//! Provenance: how synthesized knowledge is tied back to source facts.
//!
//! Observations are never built from free text alone. A synthesis step
//! proposes [`DraftObservation`]s whose claims cite fact ids; an
//! [`EvidenceSet`] built from the actual retrieval result is the only way to
//! turn those drafts into [`Observation`]s. Claims whose citations are not in
//! the evidence set are dropped, so an observation with an empty `based_on`
//! cannot be constructed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::facts::RecalledFact;

/// Identifier of a fact in the external fact store. A weak reference: the
/// fact itself is never copied or owned by a model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Non-empty set of fact ids supporting an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FactId>", into = "Vec<FactId>")]
pub struct Attribution(BTreeSet<FactId>);

impl Attribution {
    /// Supporting fact ids, sorted.
    pub fn fact_ids(&self) -> impl Iterator<Item = &FactId> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &FactId) -> bool {
        self.0.contains(id)
    }
}

impl TryFrom<Vec<FactId>> for Attribution {
    type Error = String;

    fn try_from(ids: Vec<FactId>) -> Result<Self, Self::Error> {
        if ids.is_empty() {
            return Err("an observation must be based on at least one fact".into());
        }
        Ok(Self(ids.into_iter().collect()))
    }
}

impl From<Attribution> for Vec<FactId> {
    fn from(a: Attribution) -> Self {
        a.0.into_iter().collect()
    }
}

/// One attributed paragraph within a mental model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    title: String,
    text: String,
    based_on: Attribution,
}

impl Observation {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn based_on(&self) -> &Attribution {
        &self.based_on
    }
}

/// A claim proposed by the synthesis step, with the fact ids it cites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftClaim {
    pub text: String,
    #[serde(default, alias = "memory_ids")]
    pub fact_ids: Vec<FactId>,
}

/// An observation proposed by the synthesis step, before grounding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftObservation {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub claims: Vec<DraftClaim>,
}

/// Result of grounding a batch of drafts.
#[derive(Debug, Clone, Default)]
pub struct Grounded {
    pub observations: Vec<Observation>,
    /// Claims dropped because none of their citations were retrieved.
    pub dropped_claims: usize,
}

/// The set of facts a retrieval actually returned; the only source of
/// attribution for synthesized claims.
#[derive(Debug, Clone, Default)]
pub struct EvidenceSet {
    facts: BTreeMap<FactId, RecalledFact>,
}

impl EvidenceSet {
    /// Index a retrieval result.
    pub fn from_recalled(facts: &[RecalledFact]) -> Self {
        Self {
            facts: facts.iter().map(|f| (f.id.clone(), f.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains(&self, id: &FactId) -> bool {
        self.facts.contains_key(id)
    }

    pub fn get(&self, id: &FactId) -> Option<&RecalledFact> {
        self.facts.get(id)
    }

    /// Stable hash of the retrieved fact ids, independent of ranking order.
    pub fn fingerprint(&self) -> u64 {
        stable_hash(self.facts.keys().map(|id| id.as_str().as_bytes()))
    }

    /// Restrict `cited` to retrieved ids. `None` if nothing survives.
    pub fn attribute<'a, I>(&self, cited: I) -> Option<Attribution>
    where
        I: IntoIterator<Item = &'a FactId>,
    {
        let kept: BTreeSet<FactId> = cited
            .into_iter()
            .filter(|id| self.contains(id))
            .cloned()
            .collect();
        if kept.is_empty() { None } else { Some(Attribution(kept)) }
    }

    /// Turn drafts into observations, keeping only grounded claims.
    pub fn ground(&self, drafts: Vec<DraftObservation>) -> Grounded {
        let mut out = Grounded::default();
        for draft in drafts {
            let mut texts = Vec::new();
            let mut support = BTreeSet::new();
            for claim in draft.claims {
                let text = claim.text.trim();
                if text.is_empty() {
                    continue;
                }
                match self.attribute(&claim.fact_ids) {
                    Some(attribution) => {
                        texts.push(text.to_string());
                        support.extend(attribution.0);
                    }
                    None => out.dropped_claims += 1,
                }
            }
            if support.is_empty() {
                continue;
            }
            out.observations.push(Observation {
                title: draft.title.trim().to_string(),
                text: texts.join(" "),
                based_on: Attribution(support),
            });
        }
        out
    }
}

/// SHA-256 of length-prefixed `parts`, truncated to 64 bits. Persisted
/// values (fingerprints, mission markers) depend on it, so it must not vary
/// across builds.
pub fn stable_hash<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(id: &str) -> RecalledFact {
        RecalledFact {
            id: FactId::new(id),
            text: format!("fact {id}"),
            fact_type: "world".into(),
            score: 1.0,
            tags: Vec::new(),
        }
    }

    fn claim(text: &str, ids: &[&str]) -> DraftClaim {
        DraftClaim {
            text: text.into(),
            fact_ids: ids.iter().map(|s| FactId::new(*s)).collect(),
        }
    }

    #[test]
    fn ungrounded_claims_are_dropped() {
        let evidence = EvidenceSet::from_recalled(&[fact("f1"), fact("f2")]);
        let grounded = evidence.ground(vec![DraftObservation {
            title: "Team".into(),
            claims: vec![
                claim("Alice leads the team.", &["f1"]),
                claim("Bob is the CEO.", &["f9"]),
                claim("Nobody cited anything.", &[]),
            ],
        }]);
        assert_eq!(grounded.observations.len(), 1);
        assert_eq!(grounded.dropped_claims, 2);
        let obs = &grounded.observations[0];
        assert_eq!(obs.text(), "Alice leads the team.");
        assert_eq!(obs.based_on().len(), 1);
    }

    #[test]
    fn partially_valid_citations_keep_only_retrieved_ids() {
        let evidence = EvidenceSet::from_recalled(&[fact("f1")]);
        let grounded = evidence.ground(vec![DraftObservation {
            title: String::new(),
            claims: vec![claim("Alice ships weekly.", &["f1", "ghost"])],
        }]);
        let ids: Vec<_> = grounded.observations[0].based_on().fact_ids().collect();
        assert_eq!(ids, vec![&FactId::new("f1")]);
    }

    #[test]
    fn observation_with_no_surviving_claim_is_omitted() {
        let evidence = EvidenceSet::from_recalled(&[fact("f1")]);
        let grounded = evidence.ground(vec![DraftObservation {
            title: "Rumours".into(),
            claims: vec![claim("Invented.", &["nope"])],
        }]);
        assert!(grounded.observations.is_empty());
        assert_eq!(grounded.dropped_claims, 1);
    }

    #[test]
    fn fingerprint_ignores_ranking_order() {
        let a = EvidenceSet::from_recalled(&[fact("f1"), fact("f2")]);
        let b = EvidenceSet::from_recalled(&[fact("f2"), fact("f1")]);
        let c = EvidenceSet::from_recalled(&[fact("f1")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint(), 1968662508519222669);
    }

    #[test]
    fn empty_attribution_cannot_be_deserialized() {
        let json = r#"{"title":"t","text":"x","based_on":[]}"#;
        assert!(serde_json::from_str::<Observation>(json).is_err());
        let json = r#"{"title":"t","text":"x","based_on":["f1"]}"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert!(obs.based_on().contains(&FactId::new("f1")));
    }
}
