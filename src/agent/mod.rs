//! Reflect/research agent loop.
//!
//! A bounded, strictly sequential tool-calling process: each iteration asks the
//! [`Reasoner`](crate::llm::Reasoner) for exactly one [`Action`](action::Action),
//! executes it, and appends the result to the [`Trace`](trace::Trace). The loop
//! ends on an accepted `done`, on the iteration cap, or on the wall-clock
//! deadline; the last two still produce a best-effort answer.
//!
//! All loop state lives in one invocation; the only shared resource is the
//! model store, written by `learn`.

pub mod action;
pub mod dispatch;
pub mod disposition;
pub mod error;
pub mod reflect;
pub mod response;
pub mod tool;
pub mod trace;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::model::TagsMatch;

pub use dispatch::{AgentDeps, learn_placeholder};
pub use disposition::{Disposition, ReasoningPolicy};
pub use error::{AgentError, AgentResult};
pub use reflect::{LoopLimits, LoopOutcome, LoopResult, ReflectLoop};
pub use response::{BasedOn, ReflectObservation, ReflectResponse, ResearchResponse};
pub use tool::Toolset;

/// Effort level of a reflect request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Low,
    #[default]
    Mid,
    High,
}

impl Budget {
    /// Iteration cap before applying the configured ceiling.
    pub fn iterations(self) -> usize {
        match self {
            Self::Low => 5,
            Self::Mid => 8,
            Self::High => 10,
        }
    }

    /// Default recall token budget.
    pub fn recall_tokens(self) -> usize {
        match self {
            Self::Low => 1024,
            Self::Mid => 2048,
            Self::High => 4096,
        }
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
        })
    }
}

impl FromStr for Budget {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "mid" => Ok(Self::Mid),
            "high" => Ok(Self::High),
            other => Err(ModelError::UnknownVariant {
                kind: "budget".into(),
                value: other.into(),
            }),
        }
    }
}

/// Shape of a reflect answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One answer text.
    #[default]
    Answer,
    /// Titled observations, each citing its own facts.
    Observations,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Answer => "answer",
            Self::Observations => "observations",
        })
    }
}

impl FromStr for OutputMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "answer" => Ok(Self::Answer),
            "observations" => Ok(Self::Observations),
            other => Err(ModelError::UnknownVariant {
                kind: "output mode".into(),
                value: other.into(),
            }),
        }
    }
}

/// Explicit per-invocation context. Nothing about the bank or session is
/// ambient; every component receives this.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub bank_id: String,
    pub mission: Option<String>,
    pub disposition: Disposition,
    pub budget: Budget,
    /// Visibility scope for models and facts.
    pub tags: Vec<String>,
    pub tags_match: TagsMatch,
    /// Overrides the budget's default recall token budget.
    pub max_tokens: Option<usize>,
    pub output_mode: OutputMode,
}

impl AgentContext {
    pub fn new(bank_id: impl Into<String>) -> Self {
        Self {
            bank_id: bank_id.into(),
            mission: None,
            disposition: Disposition::default(),
            budget: Budget::default(),
            tags: Vec::new(),
            tags_match: TagsMatch::default(),
            max_tokens: None,
            output_mode: OutputMode::default(),
        }
    }

    /// Token budget for `recall` calls that do not name one.
    pub fn recall_max_tokens(&self) -> usize {
        self.max_tokens.unwrap_or_else(|| self.budget.recall_tokens())
    }
}
