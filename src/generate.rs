//! Content generation for one mental model.
//!
//! The model's name and description together are the retrieval query. The
//! retrieved facts form an [`EvidenceSet`]; drafts from the reasoner are
//! grounded against it, so an observation can only carry fact ids that were
//! actually retrieved. Observations are replaced wholesale through the
//! store's compare-and-set commit, stamped with the time generation *started*.

use serde::Serialize;

use crate::clock::MonotonicClock;
use crate::error::{GenerationError, StoreError};
use crate::facts::{FactSource, RecallQuery};
use crate::llm::{Reasoner, SynthesisRequest};
use crate::model::TagsMatch;
use crate::provenance::EvidenceSet;
use crate::store::{CommitOutcome, ModelStore};

/// What a successful generation call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Generated {
    /// New observations were committed.
    Committed {
        observations: usize,
        dropped_claims: usize,
    },
    /// The retrieved fact set matched the stored fingerprint; nothing was written.
    Unchanged,
    /// A newer generation committed first; nothing was written.
    Superseded,
}

/// Regenerates model observations from recalled facts.
#[derive(Clone, Copy)]
pub struct ContentGenerator<'a> {
    store: &'a dyn ModelStore,
    facts: &'a dyn FactSource,
    reasoner: &'a dyn Reasoner,
    clock: &'a MonotonicClock,
    recall_max_tokens: usize,
}

impl<'a> ContentGenerator<'a> {
    pub fn new(
        store: &'a dyn ModelStore,
        facts: &'a dyn FactSource,
        reasoner: &'a dyn Reasoner,
        clock: &'a MonotonicClock,
        recall_max_tokens: usize,
    ) -> Self {
        Self {
            store,
            facts,
            reasoner,
            clock,
            recall_max_tokens,
        }
    }

    /// Regenerate `model_id`. On any error the stored record is untouched.
    pub fn generate(&self, bank_id: &str, model_id: &str) -> Result<Generated, GenerationError> {
        let started_at = self.clock.now();
        let model = self
            .store
            .get(bank_id, model_id)?
            .ok_or_else(|| StoreError::NotFound {
                bank_id: bank_id.to_string(),
                id: model_id.to_string(),
            })?;

        let query_text = format!("{} {}", model.name, model.description);
        let query = RecallQuery::new(query_text, self.recall_max_tokens)
            .with_tags(model.tags.iter().cloned().collect(), TagsMatch::Any);
        let recalled = self
            .facts
            .recall(bank_id, &query)
            .map_err(|source| GenerationError::Retrieval {
                model_id: model_id.to_string(),
                source,
            })?;
        if recalled.is_empty() {
            return Err(GenerationError::EmptyRetrieval {
                model_id: model_id.to_string(),
            });
        }

        let evidence = EvidenceSet::from_recalled(&recalled);
        let fingerprint = evidence.fingerprint();
        if !model.observations.is_empty() && model.source_fingerprint == Some(fingerprint) {
            tracing::debug!(bank_id, model_id, "retrieved facts unchanged, skipping synthesis");
            return Ok(Generated::Unchanged);
        }

        let drafts = self
            .reasoner
            .synthesize(&SynthesisRequest {
                model_name: &model.name,
                description: &model.description,
                facts: &recalled,
            })
            .map_err(|source| GenerationError::Synthesis {
                model_id: model_id.to_string(),
                source,
            })?;

        let grounded = evidence.ground(drafts);
        if grounded.dropped_claims > 0 {
            tracing::warn!(
                bank_id,
                model_id,
                dropped = grounded.dropped_claims,
                "dropped claims citing facts outside the retrieval"
            );
        }
        if grounded.observations.is_empty() {
            return Err(GenerationError::NoGroundedClaims {
                model_id: model_id.to_string(),
                dropped: grounded.dropped_claims,
            });
        }

        let count = grounded.observations.len();
        let outcome = self.store.commit_observations(
            bank_id,
            model_id,
            grounded.observations,
            fingerprint,
            started_at,
        )?;
        Ok(match outcome {
            CommitOutcome::Committed => {
                tracing::debug!(bank_id, model_id, observations = count, facts = evidence.len(), "observations committed");
                Generated::Committed {
                    observations: count,
                    dropped_claims: grounded.dropped_claims,
                }
            }
            CommitOutcome::Superseded => {
                tracing::debug!(bank_id, model_id, "newer generation already committed");
                Generated::Superseded
            }
        })
    }
}
