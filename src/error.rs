//! Rich diagnostic error types for the akh-reflect engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::facts::FactError;
use crate::llm::LlmError;

/// Top-level error type for the akh-reflect engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ReflectError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Facts(#[from] FactError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] crate::paths::PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] crate::agent::AgentError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("mental model not found: \"{id}\" in bank \"{bank_id}\"")]
    #[diagnostic(
        code(akh::store::not_found),
        help("List the bank's models with `akh-reflect models list` to find a valid id.")
    )]
    NotFound { bank_id: String, id: String },

    #[error("mental model \"{id}\" already exists in bank \"{bank_id}\"")]
    #[diagnostic(
        code(akh::store::conflict),
        help("Ids are derived from the model name. Pick a different name or delete the existing model first.")
    )]
    Conflict { bank_id: String, id: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(akh::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(akh::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             If the problem persists, try a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(akh::store::serde),
        help(
            "Failed to serialize or deserialize a stored model. \
             This usually means the record format changed between versions."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Model validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("invalid {field}: {message}")]
    #[diagnostic(
        code(akh::model::validation),
        help("Names must contain at least one letter or digit; descriptions must not be empty.")
    )]
    Validation { field: String, message: String },

    #[error("unknown {kind}: \"{value}\"")]
    #[diagnostic(
        code(akh::model::unknown_variant),
        help("Valid types are entity|concept|event; valid subtypes are structural|emergent|learned|pinned; tags_match is any|all.")
    )]
    UnknownVariant { kind: String, value: String },
}

// ---------------------------------------------------------------------------
// Content generation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GenerationError {
    #[error("no facts retrieved for model \"{model_id}\"")]
    #[diagnostic(
        code(akh::generate::empty_retrieval),
        help("The model's description matched no facts in this bank. Broaden the description or ingest more facts.")
    )]
    EmptyRetrieval { model_id: String },

    #[error("synthesis for model \"{model_id}\" produced no grounded claims ({dropped} dropped)")]
    #[diagnostic(
        code(akh::generate::ungrounded),
        help("Every claim cited facts that were not part of the retrieval result. Prior observations were kept.")
    )]
    NoGroundedClaims { model_id: String, dropped: usize },

    #[error("synthesis failed for model \"{model_id}\"")]
    #[diagnostic(code(akh::generate::synthesis))]
    Synthesis {
        model_id: String,
        #[source]
        #[diagnostic_source]
        source: LlmError,
    },

    #[error("fact retrieval failed for model \"{model_id}\"")]
    #[diagnostic(code(akh::generate::retrieval))]
    Retrieval {
        model_id: String,
        #[source]
        #[diagnostic_source]
        source: FactError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Refresh errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RefreshError {
    #[error("a refresh is already running for bank \"{bank_id}\" (operation {operation_id})")]
    #[diagnostic(
        code(akh::refresh::conflict),
        help("Poll the running operation until it finishes, or cancel it, before submitting another refresh.")
    )]
    Conflict {
        bank_id: String,
        operation_id: String,
    },

    #[error("operation not found: \"{operation_id}\"")]
    #[diagnostic(
        code(akh::refresh::operation_not_found),
        help("Operation ids are only tracked for the lifetime of the engine process.")
    )]
    OperationNotFound { operation_id: String },

    #[error("operation {operation_id} failed: {message}")]
    #[diagnostic(
        code(akh::refresh::operation_failed),
        help("Per-model generation failures are reported in the operation result; this means the run itself could not complete.")
    )]
    OperationFailed {
        operation_id: String,
        message: String,
    },

    #[error("failed to spawn background worker: {message}")]
    #[diagnostic(
        code(akh::refresh::spawn),
        help("The operating system refused to create a thread. Lower `refresh.parallelism`.")
    )]
    Spawn { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),
}

// ---------------------------------------------------------------------------
// Emergent detection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DetectError {
    #[error("entity classifier unavailable while checking \"{candidate}\"")]
    #[diagnostic(
        code(akh::emergent::classifier_unavailable),
        help("Emergent detection fails closed: no candidates are promoted until the classifier is reachable.")
    )]
    ClassifierUnavailable {
        candidate: String,
        #[source]
        #[diagnostic_source]
        source: LlmError,
    },

    #[error("could not read entity mentions")]
    #[diagnostic(
        code(akh::emergent::mentions),
        help("Emergent detection needs the fact source's entity mentions; it produces nothing without them.")
    )]
    Mentions {
        #[source]
        #[diagnostic_source]
        source: FactError,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(akh::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(akh::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(akh::config::invalid),
        help("Check the config fields against `akh-reflect config show`.")
    )]
    Invalid { message: String },
}

/// Convenience alias for functions returning akh-reflect results.
pub type ReflectResult<T> = std::result::Result<T, ReflectError>;
