//! Deterministic entity classifier.
//!
//! Rejects stop words, generic category nouns and names that never appear
//! capitalized. Needs no model and never fails, which makes it the default
//! when no reasoning backend is configured.

use super::{EntityCandidate, EntityClassifier, LlmError};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "he", "her", "him",
    "his", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or", "our", "she", "that",
    "the", "their", "them", "they", "this", "to", "us", "was", "we", "were", "with", "you",
];

/// Common categories and abstract nouns that are never specific entities.
const GENERIC_TERMS: &[&str] = &[
    "team", "teams", "company", "companies", "project", "projects", "product", "products",
    "customer", "customers", "user", "users", "people", "person", "meeting", "meetings",
    "manager", "managers", "engineer", "engineers", "employee", "employees", "client",
    "clients", "system", "systems", "process", "processes", "data", "status", "issue",
    "issues", "task", "tasks", "goal", "goals", "plan", "plans", "strategy", "work", "time",
    "today", "yesterday", "tomorrow", "week", "month", "year", "monday", "tuesday",
    "wednesday", "thursday", "friday", "saturday", "sunday", "city", "country", "office",
    "department", "organization", "group", "market", "budget", "deadline", "release",
];

/// Rule-based [`EntityClassifier`].
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    fn is_generic(name: &str) -> bool {
        let lower = name.trim().to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        match words.as_slice() {
            [] => true,
            [w] => STOPWORDS.contains(w) || GENERIC_TERMS.contains(w),
            // "the team", "our customers"
            [first, rest @ ..] => {
                STOPWORDS.contains(first)
                    && rest.iter().all(|w| STOPWORDS.contains(w) || GENERIC_TERMS.contains(w))
            }
        }
    }

    /// Proper nouns carry an uppercase letter somewhere ("Alice", "iOS").
    fn looks_proper(name: &str) -> bool {
        name.chars().any(char::is_uppercase)
    }
}

impl EntityClassifier for RuleClassifier {
    fn is_nameable(&self, candidate: &EntityCandidate) -> Result<bool, LlmError> {
        let name = candidate.name.trim();
        if name.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
            return Ok(false);
        }
        if name.chars().all(|c| c.is_numeric() || !c.is_alphanumeric()) {
            return Ok(false);
        }
        if Self::is_generic(name) {
            return Ok(false);
        }
        // A lowercase surface form still counts when the contexts show it capitalized.
        let capitalized = Self::looks_proper(name)
            || candidate.contexts.iter().any(|c| {
                c.split(|ch: char| !ch.is_alphanumeric())
                    .any(|w| w.eq_ignore_ascii_case(name) && Self::looks_proper(w))
            });
        Ok(capitalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(name: &str, contexts: &[&str]) -> EntityCandidate {
        EntityCandidate {
            name: name.into(),
            mention_count: 10,
            contexts: contexts.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn named_entities_qualify() {
        let c = RuleClassifier::new();
        assert!(c.is_nameable(&cand("Alice", &[])).unwrap());
        assert!(c.is_nameable(&cand("React", &[])).unwrap());
        assert!(c.is_nameable(&cand("Project Falcon", &[])).unwrap());
        assert!(c.is_nameable(&cand("acme", &["We signed with Acme today"])).unwrap());
    }

    #[test]
    fn generic_terms_are_rejected() {
        let c = RuleClassifier::new();
        assert!(!c.is_nameable(&cand("the", &[])).unwrap());
        assert!(!c.is_nameable(&cand("The", &[])).unwrap());
        assert!(!c.is_nameable(&cand("Team", &[])).unwrap());
        assert!(!c.is_nameable(&cand("the customers", &[])).unwrap());
        assert!(!c.is_nameable(&cand("2024", &[])).unwrap());
        assert!(!c.is_nameable(&cand("budget", &["the budget grew"])).unwrap());
    }
}
