//! Engine configuration.
//!
//! Resolution order: `AKH_REFLECT_*` environment variables, then the TOML file
//! (`--config` or `$XDG_CONFIG_HOME/akh-reflect/config.toml`), then defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::OllamaConfig;

/// Structural models are capped at three per bank regardless of config.
pub const STRUCTURAL_HARD_CAP: usize = 3;

/// Emergent candidate detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergentConfig {
    /// Minimum mentions for a candidate to qualify.
    #[serde(default = "default_min_mentions")]
    pub min_mentions: usize,
    /// Fraction of top-ranked candidates kept, in (0, 1].
    #[serde(default = "default_top_percentile")]
    pub top_percentile: f64,
    /// Example contexts handed to the classifier per candidate.
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
}

fn default_min_mentions() -> usize {
    5
}
fn default_top_percentile() -> f64 {
    0.20
}
fn default_max_examples() -> usize {
    3
}

impl Default for EmergentConfig {
    fn default() -> Self {
        Self {
            min_mentions: default_min_mentions(),
            top_percentile: default_top_percentile(),
            max_examples: default_max_examples(),
        }
    }
}

/// Structural derivation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralConfig {
    #[serde(default = "default_max_models")]
    pub max_models: usize,
}

fn default_max_models() -> usize {
    STRUCTURAL_HARD_CAP
}

impl Default for StructuralConfig {
    fn default() -> Self {
        Self {
            max_models: default_max_models(),
        }
    }
}

impl StructuralConfig {
    /// Configured cap, never above the hard cap.
    pub fn effective_max(&self) -> usize {
        self.max_models.min(STRUCTURAL_HARD_CAP)
    }
}

/// Refresh pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Worker threads for content generation.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Token budget of the retrieval behind each model.
    #[serde(default = "default_refresh_recall_tokens")]
    pub recall_max_tokens: usize,
    /// Finished operations kept queryable; older ones are forgotten.
    #[serde(default = "default_operation_retention")]
    pub operation_retention: usize,
}

fn default_parallelism() -> usize {
    4
}
fn default_refresh_recall_tokens() -> usize {
    4096
}
fn default_operation_retention() -> usize {
    256
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            recall_max_tokens: default_refresh_recall_tokens(),
            operation_retention: default_operation_retention(),
        }
    }
}

/// Agent loop limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Wall-clock bound on one loop.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// Ceiling on the recall token budget of one invocation.
    #[serde(default = "default_agent_recall_tokens")]
    pub recall_max_tokens: usize,
}

fn default_max_iterations() -> usize {
    10
}
fn default_agent_timeout_secs() -> u64 {
    120
}
fn default_agent_recall_tokens() -> usize {
    4096
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_secs: default_agent_timeout_secs(),
            recall_max_tokens: default_agent_recall_tokens(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectConfig {
    #[serde(default)]
    pub emergent: EmergentConfig,
    #[serde(default)]
    pub structural: StructuralConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub llm: OllamaConfig,
}

impl ReflectConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Full resolution: explicit file, else the XDG default file if present,
    /// else defaults; then environment overrides; then validation.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match crate::paths::ReflectPaths::resolve() {
                Ok(paths) if paths.config_file().is_file() => Self::load(&paths.config_file())?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AKH_REFLECT_*` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("AKH_REFLECT_LLM_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("AKH_REFLECT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("AKH_REFLECT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("AKH_REFLECT_LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("AKH_REFLECT_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_env("AKH_REFLECT_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("AKH_REFLECT_TIMEOUT_SECS") {
            self.agent.timeout_secs = parse_env("AKH_REFLECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("AKH_REFLECT_PARALLELISM") {
            self.refresh.parallelism = parse_env("AKH_REFLECT_PARALLELISM", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.emergent.top_percentile;
        if !(p > 0.0 && p <= 1.0) {
            return Err(ConfigError::Invalid {
                message: format!("emergent.top_percentile must be in (0, 1], got {p}"),
            });
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "agent.max_iterations must be at least 1".into(),
            });
        }
        if self.refresh.parallelism == 0 {
            return Err(ConfigError::Invalid {
                message: "refresh.parallelism must be at least 1".into(),
            });
        }
        if self.refresh.operation_retention == 0 {
            return Err(ConfigError::Invalid {
                message: "refresh.operation_retention must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("cannot serialize config: {e}"),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        message: format!("{key}={value}: {e}"),
    })
}
