//! Ollama client implementing the reasoning protocol.
//!
//! Every call is one `/api/chat` request with `format: "json"`: a short system
//! instruction naming the JSON shape to return, and a user message carrying
//! the typed request serialized as JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::action::Action;
use crate::provenance::DraftObservation;

use super::{
    EntityCandidate, EntityClassifier, FinalAnswer, FinalRequest, LlmError, Reasoner,
    StepRequest, StructuralProposal, SynthesisRequest, extract_json_object,
};

const STEP_SYSTEM: &str = "You answer a question by calling tools. Reply with exactly one JSON object \
    {\"tool\": <tool name>, \"arguments\": {...}} using only the tools listed. \
    Call done when the trace holds enough evidence; cite only ids that appear in the trace.";

const FINAL_SYSTEM: &str = "Answer the question from the trace only. Reply with JSON \
    {\"answer\": string, \"fact_ids\": [string], \"model_ids\": [string]} citing ids from the trace.";

const STRUCTURAL_SYSTEM: &str = "Given a mission, name at most 3 specific topics an agent fulfilling it \
    must track. Never restate the mission; never use a single generic word. Reply with JSON \
    {\"models\": [{\"name\": string, \"description\": string}]}.";

const SYNTHESIS_SYSTEM: &str = "Write observations about the subject using only the given facts. \
    Every claim must cite the ids of the facts it is based on. Reply with JSON \
    {\"observations\": [{\"title\": string, \"claims\": [{\"text\": string, \"fact_ids\": [string]}]}]}.";

const CLASSIFY_SYSTEM: &str = "Decide whether the name denotes one specific person, organization, place \
    or project (not a generic noun, abstract concept or category). Reply with JSON {\"nameable\": bool}.";

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name to use.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3.2".into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Client for the Ollama REST API.
pub struct OllamaClient {
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    /// Check that the server answers `/api/tags`.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        matches!(agent.get(&url).call(), Ok(resp) if resp.status() == 200)
    }

    /// Get the model name being used.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Per-request timeout: the configured one, clamped to `budget` if given.
    fn timeout_for(&self, budget: Option<Duration>) -> Result<Duration, LlmError> {
        let configured = Duration::from_secs(self.config.timeout_secs);
        match budget {
            Some(b) if b.is_zero() => Err(LlmError::Timeout { timeout_secs: 0 }),
            Some(b) => Ok(configured.min(b)),
            None => Ok(configured),
        }
    }

    /// One JSON-mode chat round trip.
    fn chat_json(
        &self,
        system: &str,
        user: &serde_json::Value,
        budget: Option<Duration>,
    ) -> Result<serde_json::Value, LlmError> {
        let timeout = self.timeout_for(budget)?;
        let url = format!("{}/api/chat", self.config.base_url);
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user.to_string() },
            ],
            "format": "json",
            "stream": false,
        });

        let resp = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::Transport(t)
                    if matches!(t.kind(), ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns) =>
                {
                    LlmError::Unavailable {
                        url: self.config.base_url.clone(),
                    }
                }
                ureq::Error::Transport(t) if matches!(t.kind(), ureq::ErrorKind::Io) => LlmError::Timeout {
                    timeout_secs: timeout.as_secs(),
                },
                other => LlmError::RequestFailed {
                    message: other.to_string(),
                },
            })?;

        let json: serde_json::Value = resp.into_json().map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })?;
        let content = json["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::ParseError {
                message: "missing 'message.content' field".into(),
            })?;
        extract_json_object(content)
    }
}

fn parse_field<T: serde::de::DeserializeOwned>(
    value: &serde_json::Value,
    field: &str,
) -> Result<T, LlmError> {
    serde_json::from_value(value[field].clone()).map_err(|e| LlmError::ParseError {
        message: format!("field '{field}': {e}"),
    })
}

impl Reasoner for OllamaClient {
    fn next_step(&self, req: &StepRequest<'_>) -> Result<Action, LlmError> {
        let user = json!({
            "query": req.query,
            "mission": req.mission,
            "policy": req.policy,
            "tools": req.tools,
            "trace": req.trace,
            "iteration": req.iteration,
            "max_iterations": req.max_iterations,
            "final_step": req.is_last(),
        });
        let reply = self.chat_json(STEP_SYSTEM, &user, Some(req.remaining))?;
        let tool = reply["tool"].as_str().ok_or_else(|| LlmError::ParseError {
            message: "missing 'tool' field".into(),
        })?;
        Action::from_tool_call(tool, reply["arguments"].clone()).map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })
    }

    fn final_answer(&self, req: &FinalRequest<'_>) -> Result<FinalAnswer, LlmError> {
        let user = json!({
            "query": req.query,
            "policy": req.policy,
            "trace": req.trace,
        });
        let reply = self.chat_json(FINAL_SYSTEM, &user, Some(req.remaining))?;
        serde_json::from_value(reply).map_err(|e| LlmError::ParseError {
            message: e.to_string(),
        })
    }

    fn derive_structural(
        &self,
        mission: &str,
        existing: &[StructuralProposal],
    ) -> Result<Vec<StructuralProposal>, LlmError> {
        let user = json!({ "mission": mission, "existing": existing });
        let reply = self.chat_json(STRUCTURAL_SYSTEM, &user, None)?;
        parse_field(&reply, "models")
    }

    fn synthesize(&self, req: &SynthesisRequest<'_>) -> Result<Vec<DraftObservation>, LlmError> {
        let facts: Vec<_> = req
            .facts
            .iter()
            .map(|f| json!({ "id": f.id, "text": f.text }))
            .collect();
        let user = json!({
            "subject": req.model_name,
            "description": req.description,
            "facts": facts,
        });
        let reply = self.chat_json(SYNTHESIS_SYSTEM, &user, None)?;
        parse_field(&reply, "observations")
    }
}

impl EntityClassifier for OllamaClient {
    fn is_nameable(&self, candidate: &EntityCandidate) -> Result<bool, LlmError> {
        let user = serde_json::to_value(candidate).map_err(|e| LlmError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;
        let reply = self.chat_json(CLASSIFY_SYSTEM, &user, None)?;
        reply["nameable"].as_bool().ok_or_else(|| LlmError::ParseError {
            message: "missing 'nameable' field".into(),
        })
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
