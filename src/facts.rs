//! The fact-recall collaborator.
//!
//! Facts are produced and owned by an external ingestion pipeline; this crate
//! only reads them through [`FactSource`]. [`FactCorpus`] is a small in-memory
//! implementation loadable from JSON, used by the CLI and the tests.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use dashmap::DashMap;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{TagsMatch, tags_match};
use crate::provenance::FactId;

/// Approximate characters per token for budget accounting.
const CHARS_PER_TOKEN: usize = 4;

/// Errors from the fact source.
#[derive(Debug, Error, Diagnostic)]
pub enum FactError {
    #[error("failed to read fact file: {path}")]
    #[diagnostic(
        code(akh::facts::read),
        help("Pass a readable JSON file with `--facts`.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fact file: {path}: {message}")]
    #[diagnostic(
        code(akh::facts::parse),
        help("The file must be a JSON array of {{bank_id, id, text, ...}} records.")
    )]
    Parse { path: String, message: String },

    #[error("fact source unavailable: {message}")]
    #[diagnostic(
        code(akh::facts::unavailable),
        help("The external fact store did not answer. Retry once it is reachable.")
    )]
    Unavailable { message: String },
}

pub type FactResult<T> = std::result::Result<T, FactError>;

/// A ranked recall hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledFact {
    pub id: FactId,
    pub text: String,
    #[serde(rename = "type")]
    pub fact_type: String,
    pub score: f32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A recall request.
#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub query: String,
    pub max_tokens: usize,
    pub tags: Vec<String>,
    pub tags_match: TagsMatch,
}

impl RecallQuery {
    pub fn new(query: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            query: query.into(),
            max_tokens,
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>, mode: TagsMatch) -> Self {
        self.tags = tags;
        self.tags_match = mode;
        self
    }
}

/// How much surrounding context `expand` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpandDepth {
    #[default]
    Chunk,
    Document,
}

/// Surrounding context of one fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedContext {
    pub fact_id: FactId,
    pub depth: ExpandDepth,
    pub text: String,
}

/// One named-entity mention attached to a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    pub fact_id: FactId,
    /// The sentence the mention occurred in.
    pub context: String,
}

/// Read access to a bank's facts.
pub trait FactSource: Send + Sync {
    /// Ranked facts relevant to `query`, trimmed to its token budget.
    fn recall(&self, bank_id: &str, query: &RecallQuery) -> FactResult<Vec<RecalledFact>>;

    /// Surrounding context for the given facts. Unknown ids are skipped.
    fn expand(
        &self,
        bank_id: &str,
        fact_ids: &[FactId],
        depth: ExpandDepth,
    ) -> FactResult<Vec<ExpandedContext>>;

    /// Every named-entity mention in the bank.
    fn entity_mentions(&self, bank_id: &str) -> FactResult<Vec<EntityMention>>;
}

/// A fact as loaded into [`FactCorpus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub bank_id: String,
    pub id: FactId,
    pub text: String,
    #[serde(rename = "type", default = "default_fact_type")]
    pub fact_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Named entities mentioned in `text`.
    #[serde(default)]
    pub entities: Vec<String>,
    /// Enclosing chunk text; defaults to `text`.
    #[serde(default)]
    pub chunk: Option<String>,
    /// Enclosing document text; defaults to the chunk.
    #[serde(default)]
    pub document: Option<String>,
}

fn default_fact_type() -> String {
    "world".into()
}

impl FactRecord {
    pub fn new(bank_id: &str, id: &str, text: &str) -> Self {
        Self {
            bank_id: bank_id.into(),
            id: FactId::new(id),
            text: text.into(),
            fact_type: default_fact_type(),
            tags: Vec::new(),
            entities: Vec::new(),
            chunk: None,
            document: None,
        }
    }

    pub fn with_entities(mut self, entities: &[&str]) -> Self {
        self.entities = entities.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// In-memory [`FactSource`] with token-overlap ranking.
#[derive(Debug, Default)]
pub struct FactCorpus {
    banks: DashMap<String, Vec<FactRecord>>,
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "what", "which",
    "who", "with",
];

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl FactCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: FactRecord) {
        self.banks
            .entry(record.bank_id.clone())
            .or_default()
            .push(record);
    }

    /// Load records from a JSON array.
    pub fn load_json(&self, json: &str, origin: &str) -> FactResult<usize> {
        let records: Vec<FactRecord> = serde_json::from_str(json).map_err(|e| FactError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        let n = records.len();
        for r in records {
            self.insert(r);
        }
        Ok(n)
    }

    pub fn from_json_file(path: &Path) -> FactResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| FactError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let corpus = Self::new();
        let n = corpus.load_json(&json, &path.display().to_string())?;
        tracing::info!(path = %path.display(), facts = n, "loaded fact corpus");
        Ok(corpus)
    }

    pub fn len(&self, bank_id: &str) -> usize {
        self.banks.get(bank_id).map(|f| f.len()).unwrap_or(0)
    }
}

impl FactSource for FactCorpus {
    fn recall(&self, bank_id: &str, query: &RecallQuery) -> FactResult<Vec<RecalledFact>> {
        let Some(facts) = self.banks.get(bank_id) else {
            return Ok(Vec::new());
        };
        let wanted = tokens(&query.query);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &FactRecord)> = facts
            .iter()
            .filter(|f| tags_match(&f.tags, &query.tags, query.tags_match))
            .filter_map(|f| {
                let have = tokens(&f.text);
                let overlap = wanted.intersection(&have).count();
                (overlap > 0).then(|| (overlap as f32 / wanted.len() as f32, f))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let mut budget = query.max_tokens.saturating_mul(CHARS_PER_TOKEN);
        let mut out = Vec::new();
        for (score, f) in scored {
            let cost = f.text.chars().count();
            // Always return at least the best hit.
            if cost > budget && !out.is_empty() {
                break;
            }
            budget = budget.saturating_sub(cost);
            out.push(RecalledFact {
                id: f.id.clone(),
                text: f.text.clone(),
                fact_type: f.fact_type.clone(),
                score,
                tags: f.tags.clone(),
            });
        }
        Ok(out)
    }

    fn expand(
        &self,
        bank_id: &str,
        fact_ids: &[FactId],
        depth: ExpandDepth,
    ) -> FactResult<Vec<ExpandedContext>> {
        let Some(facts) = self.banks.get(bank_id) else {
            return Ok(Vec::new());
        };
        let by_id: BTreeMap<&FactId, &FactRecord> = facts.iter().map(|f| (&f.id, f)).collect();
        Ok(fact_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|f| {
                let chunk = f.chunk.as_deref().unwrap_or(&f.text);
                let text = match depth {
                    ExpandDepth::Chunk => chunk,
                    ExpandDepth::Document => f.document.as_deref().unwrap_or(chunk),
                };
                ExpandedContext {
                    fact_id: f.id.clone(),
                    depth,
                    text: text.to_string(),
                }
            })
            .collect())
    }

    fn entity_mentions(&self, bank_id: &str) -> FactResult<Vec<EntityMention>> {
        let Some(facts) = self.banks.get(bank_id) else {
            return Ok(Vec::new());
        };
        Ok(facts
            .iter()
            .flat_map(|f| {
                f.entities.iter().map(|name| EntityMention {
                    name: name.clone(),
                    fact_id: f.id.clone(),
                    context: f.text.clone(),
                })
            })
            .collect())
    }
}
