//! Emergent candidate detection.
//!
//! Ranks named-entity mentions by frequency and keeps the specific, nameable
//! ones. Pure: the result depends only on the current mentions, the config
//! and the classifier's answers.
//!
//! Order of filters:
//! 1. aggregate mentions per slug (surface forms differing only in case,
//!    spacing or accents are one entity)
//! 2. drop candidates below `min_mentions`
//! 3. ask the [`EntityClassifier`]; any classifier error aborts detection
//! 4. keep the classifier survivors whose count reaches the `top_percentile`
//!    threshold, inclusive at ties

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::EmergentConfig;
use crate::error::DetectError;
use crate::facts::{EntityMention, FactSource};
use crate::llm::{EntityCandidate, EntityClassifier};
use crate::model::slugify;
use crate::provenance::FactId;

/// A detected entity that qualifies as an emergent model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmergentCandidate {
    /// Most frequent surface form.
    pub name: String,
    pub slug: String,
    pub mention_count: usize,
    pub supporting_fact_ids: Vec<FactId>,
}

#[derive(Default)]
struct Tally {
    count: usize,
    forms: BTreeMap<String, usize>,
    fact_ids: BTreeSet<FactId>,
    contexts: Vec<String>,
}

impl Tally {
    /// Most common surface form; ties go to the lexicographically smallest.
    fn name(&self) -> String {
        self.forms
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(form, _)| form.clone())
            .unwrap_or_default()
    }
}

/// Count threshold keeping the top `fraction` of `sorted_desc` (at least one).
fn percentile_threshold(sorted_desc: &[usize], fraction: f64) -> Option<usize> {
    if sorted_desc.is_empty() {
        return None;
    }
    let k = ((sorted_desc.len() as f64 * fraction) - 1e-9).ceil().max(1.0) as usize;
    Some(sorted_desc[k.min(sorted_desc.len()) - 1])
}

/// Run detection over a set of mentions.
pub fn detect(
    mentions: &[EntityMention],
    config: &EmergentConfig,
    classifier: &dyn EntityClassifier,
) -> Result<Vec<EmergentCandidate>, DetectError> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for m in mentions {
        let name = m.name.trim();
        let Ok(slug) = slugify(name) else {
            continue;
        };
        let t = tallies.entry(slug).or_default();
        t.count += 1;
        *t.forms.entry(name.to_string()).or_default() += 1;
        t.fact_ids.insert(m.fact_id.clone());
        if t.contexts.len() < config.max_examples && !t.contexts.contains(&m.context) {
            t.contexts.push(m.context.clone());
        }
    }

    let mut frequent: Vec<(String, Tally)> = tallies
        .into_iter()
        .filter(|(_, t)| t.count >= config.min_mentions)
        .collect();
    frequent.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(&b.0)));

    let mut nameable = Vec::new();
    for (slug, tally) in frequent {
        let candidate = EntityCandidate {
            name: tally.name(),
            mention_count: tally.count,
            contexts: tally.contexts.clone(),
        };
        let keep = classifier
            .is_nameable(&candidate)
            .map_err(|source| DetectError::ClassifierUnavailable {
                candidate: candidate.name.clone(),
                source,
            })?;
        if keep {
            nameable.push(EmergentCandidate {
                name: candidate.name,
                slug,
                mention_count: tally.count,
                supporting_fact_ids: tally.fact_ids.into_iter().collect(),
            });
        } else {
            tracing::debug!(candidate = %candidate.name, count = tally.count, "rejected as not nameable");
        }
    }

    let counts: Vec<usize> = nameable.iter().map(|c| c.mention_count).collect();
    let Some(threshold) = percentile_threshold(&counts, config.top_percentile) else {
        return Ok(Vec::new());
    };
    nameable.retain(|c| c.mention_count >= threshold);
    Ok(nameable)
}

/// Fetch the bank's mentions and run [`detect`].
pub fn detect_for_bank(
    facts: &dyn FactSource,
    bank_id: &str,
    config: &EmergentConfig,
    classifier: &dyn EntityClassifier,
) -> Result<Vec<EmergentCandidate>, DetectError> {
    let mentions = facts
        .entity_mentions(bank_id)
        .map_err(|source| DetectError::Mentions { source })?;
    let candidates = detect(&mentions, config, classifier)?;
    tracing::debug!(
        bank_id,
        mentions = mentions.len(),
        candidates = candidates.len(),
        "emergent detection finished"
    );
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, RuleClassifier};

    fn mentions(counts: &[(&str, usize)]) -> Vec<EntityMention> {
        let mut out = Vec::new();
        for (name, n) in counts {
            for i in 0..*n {
                out.push(EntityMention {
                    name: name.to_string(),
                    fact_id: FactId::new(format!("{name}-{i}")),
                    context: format!("{name} was mentioned ({i})"),
                });
            }
        }
        out
    }

    struct Unreachable;

    impl EntityClassifier for Unreachable {
        fn is_nameable(&self, _: &EntityCandidate) -> Result<bool, LlmError> {
            Err(LlmError::Unavailable {
                url: "http://127.0.0.1:1".into(),
            })
        }
    }

    #[test]
    fn generic_word_is_rejected_and_percentile_uses_survivors() {
        let m = mentions(&[("Alice", 47), ("Bob", 32), ("React", 28), ("the", 900)]);
        let out = detect(&m, &EmergentConfig::default(), &RuleClassifier::new()).unwrap();
        // 3 nameable survivors, top 20% → ceil(0.6) = 1 slot, threshold 47.
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alice"]);
        assert_eq!(out[0].mention_count, 47);
        assert_eq!(out[0].supporting_fact_ids.len(), 47);
    }

    #[test]
    fn ties_at_the_threshold_are_included() {
        let m = mentions(&[("Alice", 10), ("Bob", 10), ("Carol", 6), ("Dave", 6), ("Erin", 5)]);
        let config = EmergentConfig {
            top_percentile: 0.2,
            ..Default::default()
        };
        let out = detect(&m, &config, &RuleClassifier::new()).unwrap();
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn min_mentions_applies_before_ranking() {
        let m = mentions(&[("Alice", 4), ("Bob", 3)]);
        let out = detect(&m, &EmergentConfig::default(), &RuleClassifier::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn surface_forms_merge_by_slug() {
        let mut m = mentions(&[("Acme Corp", 3)]);
        m.extend(mentions(&[("acme corp", 2)]));
        let config = EmergentConfig {
            top_percentile: 1.0,
            ..Default::default()
        };
        let out = detect(&m, &config, &RuleClassifier::new()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "Acme Corp");
        assert_eq!(out[0].slug, "acme-corp");
        assert_eq!(out[0].mention_count, 5);
    }

    #[test]
    fn classifier_failure_fails_closed() {
        let m = mentions(&[("Alice", 47)]);
        let err = detect(&m, &EmergentConfig::default(), &Unreachable).unwrap_err();
        assert!(matches!(err, DetectError::ClassifierUnavailable { .. }));
    }

    #[test]
    fn threshold_keeps_at_least_one() {
        assert_eq!(percentile_threshold(&[9], 0.2), Some(9));
        assert_eq!(percentile_threshold(&[10, 9, 8, 7, 6], 0.2), Some(10));
        assert_eq!(percentile_threshold(&[10, 9, 8, 7, 6, 5, 4, 3, 2, 1], 0.2), Some(9));
        assert_eq!(percentile_threshold(&[], 0.2), None);
    }
}
