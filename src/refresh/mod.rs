//! Refresh orchestration: one consistent mental-model set per bank per run.
//!
//! A run derives the structural set and detects emergent candidates
//! concurrently, diffs the target set against the store, then regenerates
//! content on a bounded rayon pool. Pinned and learned models are never
//! created or deleted here; learned placeholders only get content.
//!
//! Background execution (operation ids, polling, cancellation, per-bank
//! serialization) lives in [`operation`].

pub mod operation;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::bank::BankProfile;
use crate::clock::MonotonicClock;
use crate::config::ReflectConfig;
use crate::emergent::{EmergentCandidate, detect_for_bank};
use crate::error::{GenerationError, RefreshError, StoreError};
use crate::facts::FactSource;
use crate::generate::{ContentGenerator, Generated};
use crate::llm::{EntityClassifier, Reasoner};
use crate::model::{MentalModel, ModelFilter, ModelSubtype, is_pinned_id};
use crate::store::ModelStore;
use crate::structural::{StructuralOutcome, derive};

pub use operation::{
    GenerateReport, OperationKind, OperationReport, OperationStatus, OperationTracker,
};

/// Per-model result of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    Generated {
        observations: usize,
        dropped_claims: usize,
    },
    Unchanged,
    Superseded,
    Failed {
        reason: String,
    },
    /// The operation was cancelled before this model's turn.
    NotStarted,
}

impl GenerationStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl From<Result<Generated, GenerationError>> for GenerationStatus {
    fn from(result: Result<Generated, GenerationError>) -> Self {
        match result {
            Ok(Generated::Committed {
                observations,
                dropped_claims,
            }) => Self::Generated {
                observations,
                dropped_claims,
            },
            Ok(Generated::Unchanged) => Self::Unchanged,
            Ok(Generated::Superseded) => Self::Superseded,
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelOutcome {
    pub model_id: String,
    #[serde(flatten)]
    pub status: GenerationStatus,
}

/// How the structural phase went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StructuralStatus {
    Derived { models: usize },
    /// Mission unchanged; existing set reused.
    CacheHit { models: usize },
    /// No mission; existing set kept.
    NoMission,
    /// Existing set kept.
    Failed { reason: String },
}

/// How the emergent phase went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmergentStatus {
    Detected { candidates: usize },
    /// No candidates promoted, no emergent model pruned.
    Failed { reason: String },
}

/// Result of one refresh run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub bank_id: String,
    pub structural: StructuralStatus,
    pub emergent: EmergentStatus,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
    /// Ids not created because another model holds them.
    pub skipped_collisions: Vec<String>,
    /// Models the store failed to create.
    pub create_failures: Vec<ModelOutcome>,
    pub generations: Vec<ModelOutcome>,
    pub cancelled: bool,
}

impl RefreshReport {
    /// Number of models whose generation failed.
    pub fn failures(&self) -> usize {
        self.generations
            .iter()
            .filter(|g| g.status.is_failure())
            .count()
    }

    pub fn status_of(&self, model_id: &str) -> Option<&GenerationStatus> {
        self.generations
            .iter()
            .find(|g| g.model_id == model_id)
            .map(|g| &g.status)
    }
}

enum Creation {
    Created,
    /// Another model claimed the id first.
    Taken,
    Failed,
}

fn emergent_description(name: &str) -> String {
    format!("What is known about {name}: who or what it is, its role, and recent events involving it")
}

/// Runs refreshes for one set of collaborators.
#[derive(Clone, Copy)]
pub struct Refresher<'a> {
    pub store: &'a dyn ModelStore,
    pub facts: &'a dyn FactSource,
    pub reasoner: &'a dyn Reasoner,
    pub classifier: &'a dyn EntityClassifier,
    pub clock: &'a MonotonicClock,
    pub config: &'a ReflectConfig,
}

impl Refresher<'_> {
    fn generator(&self) -> ContentGenerator<'_> {
        ContentGenerator::new(
            self.store,
            self.facts,
            self.reasoner,
            self.clock,
            self.config.refresh.recall_max_tokens,
        )
    }

    /// Regenerate a single model.
    pub fn generate_one(&self, bank_id: &str, model_id: &str) -> GenerationStatus {
        let result = self.generator().generate(bank_id, model_id);
        if let Err(e) = &result {
            tracing::warn!(bank_id, model_id, error = %e, "generation failed");
        }
        result.into()
    }

    /// Run a full refresh. `cancel` stops new generation calls; in-flight
    /// ones finish.
    pub fn run(&self, profile: &BankProfile, cancel: &AtomicBool) -> Result<RefreshReport, RefreshError> {
        let bank_id = profile.bank_id.as_str();
        tracing::info!(bank_id, "refresh started");

        let (structural, emergent) = rayon::join(
            || {
                derive(
                    self.store,
                    self.reasoner,
                    bank_id,
                    profile.mission(),
                    &self.config.structural,
                )
                .map_err(|e| e.to_string())
            },
            || {
                detect_for_bank(self.facts, bank_id, &self.config.emergent, self.classifier)
                    .map_err(|e| e.to_string())
            },
        );

        let mut report = RefreshReport {
            bank_id: bank_id.to_string(),
            structural: StructuralStatus::NoMission,
            emergent: EmergentStatus::Detected { candidates: 0 },
            created: Vec::new(),
            deleted: Vec::new(),
            retained: Vec::new(),
            skipped_collisions: Vec::new(),
            create_failures: Vec::new(),
            generations: Vec::new(),
            cancelled: false,
        };

        let existing: BTreeMap<String, MentalModel> = self
            .store
            .list(bank_id, &ModelFilter::all())?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let structural_targets = self.apply_structural(bank_id, &existing, structural, &mut report)?;
        let emergent_targets =
            self.apply_emergent(bank_id, &existing, &structural_targets, emergent, &mut report)?;

        for (id, model) in &existing {
            let kept = match model.subtype {
                ModelSubtype::Structural => structural_targets.contains(id),
                ModelSubtype::Emergent => emergent_targets.contains(id),
                ModelSubtype::Learned | ModelSubtype::Pinned => true,
            };
            if kept {
                report.retained.push(id.clone());
            }
        }

        // Learned placeholders get content; populated learned models are left alone.
        let placeholders: BTreeSet<String> = self
            .store
            .list(bank_id, &ModelFilter::all().with_subtype(ModelSubtype::Learned))?
            .into_iter()
            .filter(MentalModel::is_placeholder)
            .map(|m| m.id)
            .collect();

        let queue: Vec<String> = structural_targets
            .into_iter()
            .chain(emergent_targets)
            .chain(placeholders)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        report.generations = self.generate_all(bank_id, &queue, cancel)?;
        report.cancelled = cancel.load(Ordering::SeqCst);

        tracing::info!(
            bank_id,
            created = report.created.len(),
            deleted = report.deleted.len(),
            generated = report.generations.len(),
            failures = report.failures(),
            cancelled = report.cancelled,
            "refresh finished"
        );
        Ok(report)
    }

    /// Bring the stored structural set in line with the derivation. Returns
    /// the structural ids that should exist afterwards.
    fn apply_structural(
        &self,
        bank_id: &str,
        existing: &BTreeMap<String, MentalModel>,
        derived: Result<StructuralOutcome, String>,
        report: &mut RefreshReport,
    ) -> Result<BTreeSet<String>, RefreshError> {
        let current: BTreeSet<String> = existing
            .values()
            .filter(|m| m.subtype == ModelSubtype::Structural)
            .map(|m| m.id.clone())
            .collect();

        let outcome = match derived {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::warn!(bank_id, %reason, "structural derivation failed, keeping existing set");
                report.structural = StructuralStatus::Failed { reason };
                return Ok(current);
            }
        };

        let Some(hash) = outcome.mission_hash else {
            report.structural = StructuralStatus::NoMission;
            return Ok(current);
        };
        if outcome.cache_hit {
            report.structural = StructuralStatus::CacheHit {
                models: outcome.models.len(),
            };
            return Ok(current);
        }

        // Ids the derivation keeps, split into existing structural rows and new ones.
        let mut targets = BTreeSet::new();
        let mut to_create = Vec::new();
        for spec in &outcome.models {
            match existing.get(&spec.id) {
                None => to_create.push(spec),
                Some(m) if m.subtype == ModelSubtype::Structural => {
                    if m.description != spec.description || m.name != spec.name {
                        self.store
                            .update_identity(bank_id, &spec.id, &spec.name, &spec.description)?;
                    }
                    targets.insert(spec.id.clone());
                }
                Some(other) => {
                    tracing::debug!(bank_id, id = %spec.id, subtype = %other.subtype, "structural id taken, skipping");
                    report.skipped_collisions.push(spec.id.clone());
                }
            }
        }

        // Prune before creating so the bank never holds more structural
        // models than one derivation allows.
        for id in current.difference(&targets) {
            if self.store.delete(bank_id, id)? {
                report.deleted.push(id.clone());
            }
        }

        let mut complete = true;
        for spec in to_create {
            let model =
                MentalModel::structural(bank_id, &spec.name, &spec.description, self.clock.now())?;
            match self.create_or_note(model, report) {
                Creation::Created => {
                    targets.insert(spec.id.clone());
                }
                Creation::Taken => {}
                Creation::Failed => complete = false,
            }
        }

        // A partial set is retried by the next refresh instead of being cached.
        if complete {
            self.store.set_mission_marker(bank_id, hash)?;
        }
        report.structural = StructuralStatus::Derived {
            models: targets.len(),
        };
        Ok(targets)
    }

    /// Create `model`, recording a lost id race or a store failure in the
    /// report instead of failing the run.
    fn create_or_note(&self, model: MentalModel, report: &mut RefreshReport) -> Creation {
        let id = model.id.clone();
        match self.store.create(model) {
            Ok(()) => {
                report.created.push(id);
                Creation::Created
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(bank_id = %report.bank_id, %id, "id taken concurrently, skipping");
                report.skipped_collisions.push(id);
                Creation::Taken
            }
            Err(e) => {
                tracing::warn!(bank_id = %report.bank_id, %id, error = %e, "model creation failed");
                report.create_failures.push(ModelOutcome {
                    model_id: id,
                    status: GenerationStatus::Failed {
                        reason: e.to_string(),
                    },
                });
                Creation::Failed
            }
        }
    }

    /// Create newly detected emergent models and prune stale ones. Returns the
    /// emergent ids that should exist afterwards.
    fn apply_emergent(
        &self,
        bank_id: &str,
        existing: &BTreeMap<String, MentalModel>,
        structural_targets: &BTreeSet<String>,
        detected: Result<Vec<EmergentCandidate>, String>,
        report: &mut RefreshReport,
    ) -> Result<BTreeSet<String>, RefreshError> {
        let current: BTreeSet<String> = existing
            .values()
            .filter(|m| m.subtype == ModelSubtype::Emergent)
            .map(|m| m.id.clone())
            .collect();

        let candidates = match detected {
            Ok(c) => c,
            Err(reason) => {
                tracing::warn!(bank_id, %reason, "emergent detection failed, keeping existing set");
                report.emergent = EmergentStatus::Failed { reason };
                return Ok(current);
            }
        };
        report.emergent = EmergentStatus::Detected {
            candidates: candidates.len(),
        };

        let mut targets = BTreeSet::new();
        for c in &candidates {
            let taken_elsewhere = is_pinned_id(&c.slug)
                || structural_targets.contains(&c.slug)
                || existing
                    .get(&c.slug)
                    .is_some_and(|m| m.subtype != ModelSubtype::Emergent);
            if taken_elsewhere {
                report.skipped_collisions.push(c.slug.clone());
                continue;
            }
            if !current.contains(&c.slug) {
                let description = emergent_description(&c.name);
                let model =
                    MentalModel::emergent(bank_id, &c.name, &description, self.clock.now())?;
                if !matches!(self.create_or_note(model, report), Creation::Created) {
                    continue;
                }
            }
            targets.insert(c.slug.clone());
        }

        for id in current.difference(&targets) {
            if self.store.delete(bank_id, id)? {
                report.deleted.push(id.clone());
            }
        }
        Ok(targets)
    }

    fn generate_all(
        &self,
        bank_id: &str,
        queue: &[String],
        cancel: &AtomicBool,
    ) -> Result<Vec<ModelOutcome>, RefreshError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.refresh.parallelism)
            .thread_name(|i| format!("akh-refresh-{i}"))
            .build()
            .map_err(|e| RefreshError::Spawn {
                message: e.to_string(),
            })?;

        Ok(pool.install(|| {
            queue
                .par_iter()
                .map(|model_id| {
                    let status = if cancel.load(Ordering::SeqCst) {
                        GenerationStatus::NotStarted
                    } else {
                        self.generate_one(bank_id, model_id)
                    };
                    ModelOutcome {
                        model_id: model_id.clone(),
                        status,
                    }
                })
                .collect()
        }))
    }
}
