//! Mental-model persistence, scoped per bank.
//!
//! Two backends implement [`ModelStore`]:
//!
//! - [`mem::MemStore`] — concurrent in-memory map (DashMap); lost on exit
//! - [`durable::DurableStore`] — ACID records in redb; survives restarts
//!
//! Every operation is single-row: a model's consistency never depends on
//! another model's, so no multi-row transactions exist.

pub mod durable;
pub mod mem;

use crate::error::StoreError;
use crate::model::{MentalModel, ModelFilter};
use crate::provenance::Observation;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a compare-and-set observation commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The observations replaced the previous ones.
    Committed,
    /// A newer generation already committed; nothing was written.
    Superseded,
}

/// Keyed persistence for mental models.
///
/// Keys are `(bank_id, id)`; exactly one record exists per key.
pub trait ModelStore: Send + Sync {
    /// Fetch one model, `None` if absent.
    fn get(&self, bank_id: &str, id: &str) -> StoreResult<Option<MentalModel>>;

    /// All models in a bank passing `filter`, sorted by id.
    fn list(&self, bank_id: &str, filter: &ModelFilter) -> StoreResult<Vec<MentalModel>>;

    /// Insert a new model; [`StoreError::Conflict`] if the id is taken.
    fn create(&self, model: MentalModel) -> StoreResult<()>;

    /// Insert `model` unless its id exists. Returns the stored record and
    /// whether it was created by this call.
    fn create_if_absent(&self, model: MentalModel) -> StoreResult<(MentalModel, bool)>;

    /// Rename and redescribe a model in place, clearing its source
    /// fingerprint so the next generation runs against the new description.
    /// Observations and `last_updated` are left as stored. Returns whether the
    /// model existed.
    fn update_identity(
        &self,
        bank_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> StoreResult<bool>;

    /// Remove a model. Returns whether it existed.
    fn delete(&self, bank_id: &str, id: &str) -> StoreResult<bool>;

    /// Replace a model's observations wholesale, but only if `generated_at`
    /// is strictly newer than the record's `last_updated`.
    fn commit_observations(
        &self,
        bank_id: &str,
        id: &str,
        observations: Vec<Observation>,
        fingerprint: u64,
        generated_at: u64,
    ) -> StoreResult<CommitOutcome>;

    /// Hash of the mission the current structural set was derived from.
    fn mission_marker(&self, bank_id: &str) -> StoreResult<Option<u64>>;

    fn set_mission_marker(&self, bank_id: &str, hash: u64) -> StoreResult<()>;
}

/// Apply the compare-and-set rule to a record in place.
pub(crate) fn apply_commit(
    model: &mut MentalModel,
    observations: Vec<Observation>,
    fingerprint: u64,
    generated_at: u64,
) -> CommitOutcome {
    if model.last_updated.is_some_and(|last| generated_at <= last) {
        return CommitOutcome::Superseded;
    }
    model.observations = observations;
    model.source_fingerprint = Some(fingerprint);
    model.last_updated = Some(generated_at);
    CommitOutcome::Committed
}

pub(crate) fn apply_identity(model: &mut MentalModel, name: &str, description: &str) {
    model.name = name.to_string();
    model.description = description.to_string();
    model.source_fingerprint = None;
}
