//! Response shapes of the two loop variants.

use serde::Serialize;

use crate::provenance::FactId;

use super::reflect::{LlmCallRecord, LoopOutcome, LoopResult};
use super::trace::{DroppedCitation, TraceEntry};

/// A cited source in a reflect response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasedOn {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One titled finding of an observations-mode answer. `fact_ids` only holds
/// ids seen during the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectObservation {
    pub title: String,
    pub text: String,
    pub fact_ids: Vec<FactId>,
}

/// Result of a reflect request.
#[derive(Debug, Clone, Serialize)]
pub struct ReflectResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<TraceEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_calls: Option<Vec<LlmCallRecord>>,
    pub based_on: Vec<BasedOn>,
    pub mental_models_created: Vec<String>,
    pub iterations: usize,
    pub outcome: LoopOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_citations: Vec<DroppedCitation>,
    /// Present when observations were requested and the loop ended with `done`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<ReflectObservation>>,
}

impl ReflectResponse {
    pub fn from_loop(result: LoopResult, include_trace: bool) -> Self {
        let mut based_on = Vec::new();
        for id in &result.citations.fact_ids {
            if let Some(f) = result.trace.fact(id) {
                based_on.push(BasedOn {
                    id: id.to_string(),
                    text: f.text.clone(),
                    kind: f.fact_type.clone(),
                });
            }
        }
        for id in &result.citations.model_ids {
            if let Some(m) = result.trace.model(id) {
                based_on.push(BasedOn {
                    id: id.clone(),
                    text: format!("{}: {}", m.name, m.description),
                    kind: "mental_model".into(),
                });
            }
        }

        let (tool_calls, llm_calls) = if include_trace {
            (
                Some(result.trace.entries().to_vec()),
                Some(result.llm_calls),
            )
        } else {
            (None, None)
        };
        let observations = (!result.observations.is_empty()).then_some(result.observations);

        Self {
            text: result.answer,
            tool_calls,
            llm_calls,
            based_on,
            mental_models_created: result.models_created,
            iterations: result.iterations,
            outcome: result.outcome,
            dropped_citations: result.citations.dropped,
            observations,
        }
    }
}

/// Result of a research request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchResponse {
    pub answer: String,
    pub mental_models_used: Vec<String>,
    /// Text of each cited fact.
    pub facts_used: Vec<String>,
}

impl ResearchResponse {
    pub fn from_loop(result: LoopResult) -> Self {
        let facts_used = result
            .citations
            .fact_ids
            .iter()
            .filter_map(|id| result.trace.fact(id).map(|f| f.text.clone()))
            .collect();
        Self {
            answer: result.answer,
            mental_models_used: result.citations.model_ids,
            facts_used,
        }
    }
}
