//! Agent-loop error types with miette diagnostics.
//!
//! Tool failures inside a running loop are absorbed into its trace; these
//! errors surface only when a loop cannot be started or a tool call has to be
//! reported back to the reasoner as an error result.

use miette::Diagnostic;
use thiserror::Error;

use crate::error::{ModelError, StoreError};
use crate::facts::FactError;
use crate::llm::LlmError;

/// Errors specific to the reflect/research loop.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("invalid action: {message}")]
    #[diagnostic(
        code(akh::agent::invalid_action),
        help("Actions are JSON objects of the form {{\"tool\": <name>, \"arguments\": {{...}}}}.")
    )]
    InvalidAction { message: String },

    #[error("tool \"{tool_name}\" is not available in the {toolset} toolset")]
    #[diagnostic(
        code(akh::agent::tool_not_available),
        help("Research loops can browse models and recall facts but cannot `learn`.")
    )]
    ToolNotAvailable { tool_name: String, toolset: String },

    #[error("empty query")]
    #[diagnostic(
        code(akh::agent::empty_query),
        help("Reflect and research need a non-empty question.")
    )]
    EmptyQuery,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Facts(#[from] FactError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),
}

/// Convenience alias for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;
