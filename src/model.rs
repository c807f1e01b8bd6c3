//! Mental-model records: identity, classification, and visibility filtering.
//!
//! A [`MentalModel`] is a synthesized, attributed summary about an entity,
//! concept or event. Its `id` is a deterministic slug of its `name`, so the
//! same name always lands on the same record across regenerations.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::ModelError;
use crate::provenance::Observation;

/// Prefix applied to the slug of user-created pinned models.
pub const PINNED_PREFIX: &str = "pinned-";

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// What a model represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Entity,
    Concept,
    Event,
}

/// How a model was created. Determines regeneration and deletion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSubtype {
    /// Derived from the bank mission; at most three per bank.
    Structural,
    /// Promoted from frequently mentioned named entities.
    Emergent,
    /// Created by the agent loop's `learn` action.
    Learned,
    /// Created directly by a user; never touched by refresh.
    Pinned,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Entity => "entity",
            Self::Concept => "concept",
            Self::Event => "event",
        })
    }
}

impl fmt::Display for ModelSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Structural => "structural",
            Self::Emergent => "emergent",
            Self::Learned => "learned",
            Self::Pinned => "pinned",
        })
    }
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entity" => Ok(Self::Entity),
            "concept" => Ok(Self::Concept),
            "event" => Ok(Self::Event),
            other => Err(ModelError::UnknownVariant {
                kind: "model type".into(),
                value: other.into(),
            }),
        }
    }
}

impl FromStr for ModelSubtype {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural" => Ok(Self::Structural),
            "emergent" => Ok(Self::Emergent),
            "learned" => Ok(Self::Learned),
            "pinned" => Ok(Self::Pinned),
            other => Err(ModelError::UnknownVariant {
                kind: "model subtype".into(),
                value: other.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Slugs
// ---------------------------------------------------------------------------

/// Normalize a model name into its stable id.
///
/// NFKD-decomposes, drops combining marks, lower-cases, and collapses every run
/// of non-alphanumeric characters into a single `-`.
pub fn slugify(name: &str) -> Result<String, ModelError> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        return Err(ModelError::Validation {
            field: "name".into(),
            message: format!("\"{name}\" has no letters or digits to build an id from"),
        });
    }
    Ok(slug)
}

/// Id for a user-pinned model: `pinned-<slug>`.
pub fn pinned_id(name: &str) -> Result<String, ModelError> {
    Ok(format!("{PINNED_PREFIX}{}", slugify(name)?))
}

/// Whether `id` lies in the namespace reserved for pinned models.
pub fn is_pinned_id(id: &str) -> bool {
    id.starts_with(PINNED_PREFIX)
}

/// Slug for a model that is not pinned. Names whose slug lands in the pinned
/// namespace are rejected.
fn unpinned_slug(name: &str) -> Result<String, ModelError> {
    let slug = slugify(name)?;
    if is_pinned_id(&slug) {
        return Err(ModelError::Validation {
            field: "name".into(),
            message: format!("\"{name}\" maps to id \"{slug}\", which is reserved for pinned models"),
        });
    }
    Ok(slug)
}

// ---------------------------------------------------------------------------
// Tag visibility
// ---------------------------------------------------------------------------

/// How request tags are matched against a record's tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagsMatch {
    /// At least one request tag is present (overlap).
    #[default]
    Any,
    /// Every request tag is present (containment).
    All,
}

impl FromStr for TagsMatch {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "all" => Ok(Self::All),
            other => Err(ModelError::UnknownVariant {
                kind: "tags_match".into(),
                value: other.into(),
            }),
        }
    }
}

/// Whether `tags` satisfy the `requested` tags under `mode`.
///
/// An empty request never filters anything out.
pub fn tags_match<'a, I>(tags: I, requested: &[String], mode: TagsMatch) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    if requested.is_empty() {
        return true;
    }
    let present: BTreeSet<&str> = tags.into_iter().map(String::as_str).collect();
    match mode {
        TagsMatch::Any => requested.iter().any(|t| present.contains(t.as_str())),
        TagsMatch::All => requested.iter().all(|t| present.contains(t.as_str())),
    }
}

/// Validate user-supplied tags: trimmed, non-empty, no whitespace inside.
pub fn validate_tags(tags: &[String]) -> Result<BTreeSet<String>, ModelError> {
    let mut out = BTreeSet::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(ModelError::Validation {
                field: "tags".into(),
                message: format!("malformed tag \"{tag}\": tags must be non-empty and contain no whitespace"),
            });
        }
        out.insert(tag.to_string());
    }
    Ok(out)
}

/// List filter for mental models.
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub subtype: Option<ModelSubtype>,
    pub model_type: Option<ModelType>,
    pub tags: Vec<String>,
    pub tags_match: TagsMatch,
}

impl ModelFilter {
    /// A filter that matches every model.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one subtype.
    pub fn with_subtype(mut self, subtype: ModelSubtype) -> Self {
        self.subtype = Some(subtype);
        self
    }

    /// Restrict by tags.
    pub fn with_tags(mut self, tags: Vec<String>, mode: TagsMatch) -> Self {
        self.tags = tags;
        self.tags_match = mode;
        self
    }

    /// Whether a model passes this filter.
    pub fn matches(&self, model: &MentalModel) -> bool {
        self.subtype.is_none_or(|s| s == model.subtype)
            && self.model_type.is_none_or(|t| t == model.model_type)
            && tags_match(&model.tags, &self.tags, self.tags_match)
    }
}

// ---------------------------------------------------------------------------
// Mental model record
// ---------------------------------------------------------------------------

/// A synthesized, attributed summary about an entity, concept or event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentalModel {
    /// Stable slug of `name` (`pinned-` prefixed for pinned models).
    pub id: String,
    /// Isolation scope.
    pub bank_id: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub subtype: ModelSubtype,
    pub name: String,
    /// One-line summary; doubles as the retrieval query for content generation.
    pub description: String,
    pub observations: Vec<Observation>,
    /// Weak reference into an external entity registry.
    pub entity_id: Option<String>,
    /// Weak references to other model ids in the same bank.
    pub links: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    /// Milliseconds since the UNIX epoch.
    pub created_at: u64,
    /// `None` until content generation has committed at least once.
    pub last_updated: Option<u64>,
    /// Hash of the fact ids the current observations were generated from.
    pub source_fingerprint: Option<u64>,
}

impl MentalModel {
    fn build(
        id: String,
        bank_id: &str,
        model_type: ModelType,
        subtype: ModelSubtype,
        name: &str,
        description: &str,
        created_at: u64,
    ) -> Result<Self, ModelError> {
        let name = name.trim();
        let description = description.trim();
        if description.is_empty() {
            return Err(ModelError::Validation {
                field: "description".into(),
                message: format!("model \"{name}\" needs a description to generate content from"),
            });
        }
        Ok(Self {
            id,
            bank_id: bank_id.to_string(),
            model_type,
            subtype,
            name: name.to_string(),
            description: description.to_string(),
            observations: Vec::new(),
            entity_id: None,
            links: BTreeSet::new(),
            tags: BTreeSet::new(),
            created_at,
            last_updated: None,
            source_fingerprint: None,
        })
    }

    /// A mission-derived model.
    pub fn structural(
        bank_id: &str,
        name: &str,
        description: &str,
        created_at: u64,
    ) -> Result<Self, ModelError> {
        Self::build(
            unpinned_slug(name)?,
            bank_id,
            ModelType::Concept,
            ModelSubtype::Structural,
            name,
            description,
            created_at,
        )
    }

    /// A model promoted from a frequently mentioned named entity.
    pub fn emergent(
        bank_id: &str,
        name: &str,
        description: &str,
        created_at: u64,
    ) -> Result<Self, ModelError> {
        Self::build(
            unpinned_slug(name)?,
            bank_id,
            ModelType::Entity,
            ModelSubtype::Emergent,
            name,
            description,
            created_at,
        )
    }

    /// An empty placeholder created by the agent loop.
    pub fn learned(
        bank_id: &str,
        name: &str,
        description: &str,
        created_at: u64,
    ) -> Result<Self, ModelError> {
        Self::build(
            unpinned_slug(name)?,
            bank_id,
            ModelType::Concept,
            ModelSubtype::Learned,
            name,
            description,
            created_at,
        )
    }

    /// A user-pinned model.
    pub fn pinned(
        bank_id: &str,
        name: &str,
        description: &str,
        tags: BTreeSet<String>,
        created_at: u64,
    ) -> Result<Self, ModelError> {
        let mut model = Self::build(
            pinned_id(name)?,
            bank_id,
            ModelType::Concept,
            ModelSubtype::Pinned,
            name,
            description,
            created_at,
        )?;
        model.tags = tags;
        Ok(model)
    }

    /// Whether content generation has never produced observations for this model.
    pub fn is_placeholder(&self) -> bool {
        self.observations.is_empty()
    }

    /// `{id, name, description}` view used by `list_mental_models`.
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Compact listing view of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_normalizes_case_spacing_and_accents() {
        assert_eq!(slugify("Kubernetes Strategy").unwrap(), "kubernetes-strategy");
        assert_eq!(slugify("  Team_Members  ").unwrap(), "team-members");
        assert_eq!(slugify("Café Décor!").unwrap(), "cafe-decor");
        assert_eq!(slugify("Q3 -- Roadmap").unwrap(), "q3-roadmap");
    }

    #[test]
    fn slugify_rejects_punctuation_only_names() {
        assert!(matches!(
            slugify("  --- "),
            Err(ModelError::Validation { .. })
        ));
    }

    #[test]
    fn pinned_ids_share_the_slug() {
        assert_eq!(pinned_id("Product Roadmap").unwrap(), "pinned-product-roadmap");
    }

    #[test]
    fn only_pinned_models_use_the_pinned_namespace() {
        assert!(MentalModel::learned("b", "Pinned Roadmap", "r", 1).is_err());
        assert!(MentalModel::structural("b", "pinned: roadmap", "r", 1).is_err());
        assert!(MentalModel::learned("b", "Pinnedroadmap", "r", 1).is_ok());
        let pinned = MentalModel::pinned("b", "Roadmap", "r", BTreeSet::new(), 1).unwrap();
        assert!(is_pinned_id(&pinned.id));
    }

    #[test]
    fn any_and_all_tag_matching() {
        let tags: BTreeSet<String> = ["user_a".to_string(), "team".to_string()].into();
        let req_one = vec!["user_a".to_string()];
        let req_two = vec!["user_a".to_string(), "user_b".to_string()];
        assert!(tags_match(&tags, &req_one, TagsMatch::Any));
        assert!(tags_match(&tags, &req_two, TagsMatch::Any));
        assert!(tags_match(&tags, &req_one, TagsMatch::All));
        assert!(!tags_match(&tags, &req_two, TagsMatch::All));
        assert!(tags_match(&tags, &[], TagsMatch::All));
    }

    #[test]
    fn malformed_tags_are_rejected() {
        assert!(validate_tags(&["ok".into(), "not ok".into()]).is_err());
        assert!(validate_tags(&["".into()]).is_err());
        assert_eq!(validate_tags(&[" a ".into()]).unwrap().len(), 1);
    }

    #[test]
    fn filter_by_subtype_and_tags() {
        let pinned = MentalModel::pinned(
            "b",
            "Roadmap",
            "The roadmap",
            BTreeSet::from(["exec".to_string()]),
            1,
        )
        .unwrap();
        let learned = MentalModel::learned("b", "Kubernetes Strategy", "k8s plans", 2).unwrap();

        let f = ModelFilter::all().with_subtype(ModelSubtype::Pinned);
        assert!(f.matches(&pinned));
        assert!(!f.matches(&learned));

        let f = ModelFilter::all().with_tags(vec!["exec".into()], TagsMatch::Any);
        assert!(f.matches(&pinned));
        assert!(!f.matches(&learned));
    }

    #[test]
    fn new_models_start_as_placeholders() {
        let m = MentalModel::learned("b", "Kubernetes Strategy", "k8s plans", 7).unwrap();
        assert_eq!(m.id, "kubernetes-strategy");
        assert!(m.is_placeholder());
        assert_eq!(m.last_updated, None);
        assert_eq!(m.created_at, 7);
    }

    #[test]
    fn empty_description_is_a_validation_error() {
        assert!(MentalModel::learned("b", "X", "   ", 1).is_err());
    }

    #[test]
    fn subtype_round_trips_through_strings() {
        for s in ["structural", "emergent", "learned", "pinned"] {
            let parsed: ModelSubtype = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("directive".parse::<ModelSubtype>().is_err());
    }
}
