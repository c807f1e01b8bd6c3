//! Disposition traits and the reasoning policy they imply.
//!
//! A bank's disposition (skepticism, literalism, empathy; each 1–5) is not
//! cosmetic: it is turned into a [`ReasoningPolicy`] that the loop enforces
//! and that is handed to the reasoner with every step.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Per-bank trait vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposition {
    #[serde(default = "neutral")]
    pub skepticism: u8,
    #[serde(default = "neutral")]
    pub literalism: u8,
    #[serde(default = "neutral")]
    pub empathy: u8,
}

fn neutral() -> u8 {
    3
}

impl Default for Disposition {
    fn default() -> Self {
        Self {
            skepticism: 3,
            literalism: 3,
            empathy: 3,
        }
    }
}

impl Disposition {
    pub fn new(skepticism: u8, literalism: u8, empathy: u8) -> Result<Self, ModelError> {
        let d = Self {
            skepticism,
            literalism,
            empathy,
        };
        d.validate()?;
        Ok(d)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for (field, value) in [
            ("skepticism", self.skepticism),
            ("literalism", self.literalism),
            ("empathy", self.empathy),
        ] {
            if !(1..=5).contains(&value) {
                return Err(ModelError::Validation {
                    field: field.into(),
                    message: format!("{value} is outside 1..=5"),
                });
            }
        }
        Ok(())
    }

    /// Derive the enforced reasoning policy.
    pub fn policy(&self) -> ReasoningPolicy {
        ReasoningPolicy {
            min_corroboration: if self.skepticism >= 4 { 2 } else { 1 },
            allow_paraphrase: self.literalism < 4,
            include_emotional_context: self.empathy > 2,
            keep_emotional_context: self.empathy >= 4,
        }
    }
}

/// Behavior switches derived from a [`Disposition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReasoningPolicy {
    /// Distinct supporting facts/models an answer must cite before `done` is
    /// accepted (waived on the last step).
    pub min_corroboration: usize,
    /// When false, best-effort answers quote fact text verbatim and the
    /// reasoner is told not to infer beyond the source text.
    pub allow_paraphrase: bool,
    /// When false, emotionally framed facts are withheld from recall results.
    pub include_emotional_context: bool,
    /// Ask the reasoner to preserve emotional context in its answer.
    pub keep_emotional_context: bool,
}

impl Default for ReasoningPolicy {
    fn default() -> Self {
        Disposition::default().policy()
    }
}

static EMOTIONAL_FRAMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(feel|feels|felt|feeling|upset|angry|furious|frustrat\w*|sad|happy|thrilled|excited|anxious|worried|stressed|afraid|scared|hurt|disappoint\w*|love[sd]?|hate[sd]?|annoy\w*|overwhelm\w*|heartbroken|devastated|lonely|grateful)\b",
    )
    .unwrap()
});

/// Whether a fact is framed in emotional terms.
pub fn is_emotionally_framed(text: &str) -> bool {
    EMOTIONAL_FRAMING.is_match(text)
}
