//! Tool schemas offered to the reasoner.
//!
//! The set of tools is fixed; a [`Toolset`] selects which of them a loop
//! variant may use. Signatures are what the reasoning backend sees, while
//! execution lives in [`super::dispatch`].

use serde::Serialize;

use super::OutputMode;
use super::action::{DONE, EXPAND, GET_MENTAL_MODEL, LEARN, LIST_MENTAL_MODELS, RECALL};

/// Description of a tool's interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSignature {
    /// Unique name of the tool.
    pub name: &'static str,
    /// What this tool does.
    pub description: &'static str,
    /// Parameters the tool accepts.
    pub parameters: Vec<ToolParam>,
}

/// A single parameter in a tool's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolParam {
    /// Parameter name.
    pub name: &'static str,
    /// What this parameter controls.
    pub description: &'static str,
    /// Whether this parameter must be provided.
    pub required: bool,
}

impl ToolParam {
    fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
        }
    }

    fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: false,
        }
    }
}

fn signature(name: &str, mode: OutputMode) -> Option<ToolSignature> {
    let (name, description, parameters) = match name {
        LIST_MENTAL_MODELS => (
            LIST_MENTAL_MODELS,
            "List available mental models (id, name, description).",
            vec![ToolParam::optional("tags", "Only models carrying these tags.")],
        ),
        GET_MENTAL_MODEL => (
            GET_MENTAL_MODEL,
            "Fetch one mental model including its attributed observations.",
            vec![ToolParam::required("model_id", "Id returned by list_mental_models.")],
        ),
        RECALL => (
            RECALL,
            "Search the bank's facts. Returns ranked fact snippets with ids.",
            vec![
                ToolParam::required("query", "What to search for."),
                ToolParam::optional("max_tokens", "Token budget for returned facts."),
            ],
        ),
        EXPAND => (
            EXPAND,
            "Fetch the surrounding chunk or document of recalled facts.",
            vec![
                ToolParam::required("fact_ids", "Ids returned by recall."),
                ToolParam::optional("depth", "\"chunk\" (default) or \"document\"."),
            ],
        ),
        LEARN => (
            LEARN,
            "Create a mental model placeholder to be populated by the next refresh.",
            vec![
                ToolParam::required("name", "Short name; the id is derived from it."),
                ToolParam::required("description", "What the model should track."),
            ],
        ),
        DONE if mode == OutputMode::Observations => (
            DONE,
            "Finish with titled observations, each citing the fact ids seen in this session that support it.",
            vec![
                ToolParam::required(
                    "observations",
                    "List of {title, text, fact_ids}; title and text are required.",
                ),
                ToolParam::optional("model_ids", "Ids of mental models supporting the observations."),
            ],
        ),
        DONE => (
            DONE,
            "Finish with an answer, citing fact and model ids seen in this session.",
            vec![
                ToolParam::required("answer", "The answer text."),
                ToolParam::optional("fact_ids", "Ids of facts supporting the answer."),
                ToolParam::optional("model_ids", "Ids of mental models supporting the answer."),
            ],
        ),
        _ => return None,
    };
    Some(ToolSignature {
        name,
        description,
        parameters,
    })
}

/// Which tools a loop variant may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolset {
    /// Every tool, including `learn`.
    Reflect,
    /// Model browsing and recall only.
    Research,
}

impl Toolset {
    pub fn tool_names(self) -> &'static [&'static str] {
        match self {
            Self::Reflect => &[LIST_MENTAL_MODELS, GET_MENTAL_MODEL, RECALL, EXPAND, LEARN, DONE],
            Self::Research => &[LIST_MENTAL_MODELS, GET_MENTAL_MODEL, RECALL, DONE],
        }
    }

    pub fn permits(self, tool: &str) -> bool {
        self.tool_names().contains(&tool)
    }

    pub fn signatures(self, mode: OutputMode) -> Vec<ToolSignature> {
        self.tool_names().iter().filter_map(|n| signature(n, mode)).collect()
    }

    /// Only the `done` tool; offered on the last allowed step.
    pub fn finish_only(mode: OutputMode) -> Vec<ToolSignature> {
        signature(DONE, mode).into_iter().collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Reflect => "reflect",
            Self::Research => "research",
        }
    }
}
