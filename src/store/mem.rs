//! In-memory model store backed by DashMap.
//!
//! Fastest backend; all data is lost on process exit. Used by tests and by the
//! CLI when no data directory is given.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;
use crate::model::{MentalModel, ModelFilter};
use crate::provenance::Observation;

use super::{CommitOutcome, ModelStore, StoreResult, apply_commit, apply_identity};

/// Concurrent in-memory store keyed by `(bank_id, id)`.
#[derive(Debug, Default)]
pub struct MemStore {
    models: DashMap<(String, String), MentalModel>,
    markers: DashMap<String, u64>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of models across all banks.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn key(bank_id: &str, id: &str) -> (String, String) {
    (bank_id.to_string(), id.to_string())
}

impl ModelStore for MemStore {
    fn get(&self, bank_id: &str, id: &str) -> StoreResult<Option<MentalModel>> {
        Ok(self.models.get(&key(bank_id, id)).map(|m| m.value().clone()))
    }

    fn list(&self, bank_id: &str, filter: &ModelFilter) -> StoreResult<Vec<MentalModel>> {
        let mut out: Vec<MentalModel> = self
            .models
            .iter()
            .filter(|e| e.key().0 == bank_id && filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn create(&self, model: MentalModel) -> StoreResult<()> {
        match self.models.entry(key(&model.bank_id, &model.id)) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                bank_id: model.bank_id,
                id: model.id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(model);
                Ok(())
            }
        }
    }

    fn create_if_absent(&self, model: MentalModel) -> StoreResult<(MentalModel, bool)> {
        match self.models.entry(key(&model.bank_id, &model.id)) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                slot.insert(model.clone());
                Ok((model, true))
            }
        }
    }

    fn update_identity(
        &self,
        bank_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> StoreResult<bool> {
        match self.models.get_mut(&key(bank_id, id)) {
            Some(mut model) => {
                apply_identity(model.value_mut(), name, description);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, bank_id: &str, id: &str) -> StoreResult<bool> {
        Ok(self.models.remove(&key(bank_id, id)).is_some())
    }

    fn commit_observations(
        &self,
        bank_id: &str,
        id: &str,
        observations: Vec<Observation>,
        fingerprint: u64,
        generated_at: u64,
    ) -> StoreResult<CommitOutcome> {
        // The shard write lock is held for the whole compare-and-set.
        match self.models.get_mut(&key(bank_id, id)) {
            Some(mut model) => Ok(apply_commit(
                model.value_mut(),
                observations,
                fingerprint,
                generated_at,
            )),
            None => Err(StoreError::NotFound {
                bank_id: bank_id.to_string(),
                id: id.to_string(),
            }),
        }
    }

    fn mission_marker(&self, bank_id: &str) -> StoreResult<Option<u64>> {
        Ok(self.markers.get(bank_id).map(|m| *m.value()))
    }

    fn set_mission_marker(&self, bank_id: &str, hash: u64) -> StoreResult<()> {
        self.markers.insert(bank_id.to_string(), hash);
        Ok(())
    }
}
