//! The fixed action set of the reflect/research loop.
//!
//! Each action is one variant with a fixed payload. On the wire an action is
//! `{"tool": "<name>", "arguments": {...}}`.

use serde::{Deserialize, Serialize};

use crate::facts::ExpandDepth;
use crate::provenance::FactId;

use super::error::{AgentError, AgentResult};

pub const LIST_MENTAL_MODELS: &str = "list_mental_models";
pub const GET_MENTAL_MODEL: &str = "get_mental_model";
pub const RECALL: &str = "recall";
pub const EXPAND: &str = "expand";
pub const LEARN: &str = "learn";
pub const DONE: &str = "done";

/// One step chosen by the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum Action {
    ListMentalModels {
        #[serde(default)]
        tags: Vec<String>,
    },
    GetMentalModel {
        model_id: String,
    },
    Recall {
        query: String,
        #[serde(default)]
        max_tokens: Option<usize>,
    },
    Expand {
        #[serde(alias = "memory_ids")]
        fact_ids: Vec<FactId>,
        #[serde(default)]
        depth: ExpandDepth,
    },
    Learn {
        name: String,
        description: String,
    },
    Done {
        #[serde(default)]
        answer: String,
        #[serde(default, alias = "memory_ids")]
        fact_ids: Vec<FactId>,
        #[serde(default)]
        model_ids: Vec<String>,
        /// Set instead of `answer` when the caller asked for observations.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        observations: Vec<DoneObservation>,
    },
}

/// One titled finding proposed by `done` in observations mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneObservation {
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default, alias = "memory_ids")]
    pub fact_ids: Vec<FactId>,
}

impl Action {
    /// Build an action from a tool name and its JSON arguments.
    pub fn from_tool_call(name: &str, arguments: serde_json::Value) -> AgentResult<Self> {
        let arguments = match arguments {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        serde_json::from_value(serde_json::json!({ "tool": name, "arguments": arguments }))
            .map_err(|e| AgentError::InvalidAction {
                message: format!("{name}: {e}"),
            })
    }

    /// Wire name of the tool.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::ListMentalModels { .. } => LIST_MENTAL_MODELS,
            Self::GetMentalModel { .. } => GET_MENTAL_MODEL,
            Self::Recall { .. } => RECALL,
            Self::Expand { .. } => EXPAND,
            Self::Learn { .. } => LEARN,
            Self::Done { .. } => DONE,
        }
    }

    /// The `arguments` half of the wire form.
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("arguments").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls() {
        let a = Action::from_tool_call(
            "recall",
            serde_json::json!({"query": "who leads the platform team"}),
        )
        .unwrap();
        assert_eq!(
            a,
            Action::Recall {
                query: "who leads the platform team".into(),
                max_tokens: None
            }
        );

        let a = Action::from_tool_call("list_mental_models", serde_json::Value::Null).unwrap();
        assert_eq!(a, Action::ListMentalModels { tags: Vec::new() });
    }

    #[test]
    fn done_accepts_memory_ids_alias() {
        let a = Action::from_tool_call(
            "done",
            serde_json::json!({"answer": "Alice", "memory_ids": ["f1"]}),
        )
        .unwrap();
        match a {
            Action::Done { fact_ids, model_ids, .. } => {
                assert_eq!(fact_ids, vec![FactId::new("f1")]);
                assert!(model_ids.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn done_carries_observations_without_an_answer() {
        let a = Action::from_tool_call(
            "done",
            serde_json::json!({"observations": [
                {"title": "Ownership", "text": "Alice owns the platform.", "memory_ids": ["f1"]}
            ]}),
        )
        .unwrap();
        match a {
            Action::Done {
                answer,
                observations,
                ..
            } => {
                assert!(answer.is_empty());
                assert_eq!(observations.len(), 1);
                assert_eq!(observations[0].fact_ids, vec![FactId::new("f1")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_is_invalid() {
        let err = Action::from_tool_call("shell_exec", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, AgentError::InvalidAction { .. }));
    }

    #[test]
    fn arguments_strip_the_tag() {
        let a = Action::GetMentalModel {
            model_id: "team-members".into(),
        };
        assert_eq!(a.tool_name(), GET_MENTAL_MODEL);
        assert_eq!(a.arguments(), serde_json::json!({"model_id": "team-members"}));
    }
}
