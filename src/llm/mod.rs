//! The protocol between the orchestrator and a language model.
//!
//! The engine never formats prompts or counts tokens itself. It hands typed
//! requests to a [`Reasoner`] and gets typed answers back:
//!
//! - the next [`Action`] of a reflect/research loop
//! - a final answer with citations
//! - structural topic proposals for a mission
//! - draft observations whose claims cite fact ids
//!
//! [`EntityClassifier`] is the separate yes/no judgment used by emergent
//! detection. [`OllamaClient`] implements both traits over HTTP;
//! [`RuleClassifier`] is a deterministic classifier needing no model at all.

pub mod ollama;
pub mod rules;

use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::action::Action;
use crate::agent::disposition::ReasoningPolicy;
use crate::agent::tool::ToolSignature;
use crate::agent::trace::TraceEntry;
use crate::facts::RecalledFact;
use crate::provenance::{DraftObservation, FactId};

pub use ollama::{OllamaClient, OllamaConfig};
pub use rules::RuleClassifier;

/// Errors from the reasoning backend.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("reasoning backend is not available at {url}")]
    #[diagnostic(
        code(akh::llm::unavailable),
        help("Start Ollama with `ollama serve`, or point `llm.base_url` / AKH_REFLECT_LLM_URL at a running instance.")
    )]
    Unavailable { url: String },

    #[error("reasoning request failed: {message}")]
    #[diagnostic(
        code(akh::llm::request_failed),
        help("Check that Ollama is running and the model is pulled.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse reasoning response: {message}")]
    #[diagnostic(
        code(akh::llm::parse_error),
        help("The model returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("reasoning request timed out after {timeout_secs}s")]
    #[diagnostic(
        code(akh::llm::timeout),
        help("Increase `agent.timeout_secs` / `llm.timeout_secs`, or use a smaller model.")
    )]
    Timeout { timeout_secs: u64 },
}

/// Input for choosing the next loop action.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub query: &'a str,
    pub mission: Option<&'a str>,
    pub policy: &'a ReasoningPolicy,
    /// Tools the reasoner may pick from at this step.
    pub tools: &'a [ToolSignature],
    pub trace: &'a [TraceEntry],
    /// 1-based.
    pub iteration: usize,
    pub max_iterations: usize,
    /// Wall-clock budget left for the whole loop.
    pub remaining: Duration,
}

impl StepRequest<'_> {
    /// Whether this is the final step the loop will take.
    pub fn is_last(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}

/// Input for synthesizing a loop's final answer from its trace.
#[derive(Debug, Clone, Copy)]
pub struct FinalRequest<'a> {
    pub query: &'a str,
    pub policy: &'a ReasoningPolicy,
    pub trace: &'a [TraceEntry],
    pub remaining: Duration,
}

/// A final answer as proposed by the reasoner. Citations are unchecked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    #[serde(default, alias = "memory_ids")]
    pub fact_ids: Vec<FactId>,
    #[serde(default)]
    pub model_ids: Vec<String>,
}

/// Input for synthesizing a model's observations.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub model_name: &'a str,
    pub description: &'a str,
    pub facts: &'a [RecalledFact],
}

/// A proposed structural topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralProposal {
    pub name: String,
    pub description: String,
}

/// An emergent-entity candidate to classify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    pub mention_count: usize,
    /// Example sentences the entity occurs in.
    pub contexts: Vec<String>,
}

/// The orchestrator's side of the language-model protocol.
pub trait Reasoner: Send + Sync {
    /// Choose the next action of an agent loop.
    fn next_step(&self, req: &StepRequest<'_>) -> Result<Action, LlmError>;

    /// Compose the final answer from a trace.
    fn final_answer(&self, req: &FinalRequest<'_>) -> Result<FinalAnswer, LlmError>;

    /// Propose up to three topics an agent fulfilling `mission` must track.
    fn derive_structural(
        &self,
        mission: &str,
        existing: &[StructuralProposal],
    ) -> Result<Vec<StructuralProposal>, LlmError>;

    /// Draft observations about a model from retrieved facts.
    fn synthesize(&self, req: &SynthesisRequest<'_>) -> Result<Vec<DraftObservation>, LlmError>;
}

/// Decides whether a frequently mentioned name is a specific, nameable entity
/// (person, organization, place, project) rather than a generic noun.
pub trait EntityClassifier: Send + Sync {
    fn is_nameable(&self, candidate: &EntityCandidate) -> Result<bool, LlmError>;
}

/// Pull the first JSON object out of a model response that may carry prose
/// around it.
pub(crate) fn extract_json_object(text: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = text.trim();
    let json_str = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => {
            return Err(LlmError::ParseError {
                message: "no JSON object found in response".into(),
            });
        }
    };
    serde_json::from_str(json_str).map_err(|e| LlmError::ParseError {
        message: format!("JSON parse error: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let v = extract_json_object("Sure! {\"tool\": \"done\"} hope that helps").unwrap();
        assert_eq!(v["tool"], "done");
        assert!(extract_json_object("no json here").is_err());
    }

    #[test]
    fn final_answer_accepts_memory_ids_alias() {
        let a: FinalAnswer =
            serde_json::from_str(r#"{"answer":"x","memory_ids":["f1"]}"#).unwrap();
        assert_eq!(a.fact_ids, vec![FactId::new("f1")]);
        assert!(a.model_ids.is_empty());
    }
}
