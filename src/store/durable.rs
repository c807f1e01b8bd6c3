//! ACID-durable model store backed by redb.
//!
//! Each model is one bincode-encoded row in `mental_models`, keyed by
//! `bank_id \0 id` so a bank's rows form one contiguous key range. The
//! structural mission marker lives in `bank_meta`. Every row operation is a
//! single write transaction, which also makes the observation
//! compare-and-set atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::model::{MentalModel, ModelFilter};
use crate::provenance::Observation;

use super::{CommitOutcome, ModelStore, StoreResult, apply_commit, apply_identity};

/// Mental-model records (`bank\0id` → bincode).
const MODELS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mental_models");

/// Per-bank metadata (`bank_id` → mission hash).
const BANK_META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("bank_meta");

const DB_FILE: &str = "akh-reflect.redb";

fn redb_err<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{op} failed: {e}"),
    }
}

fn row_key(bank_id: &str, id: &str) -> String {
    format!("{bank_id}\0{id}")
}

fn encode(model: &MentalModel) -> StoreResult<Vec<u8>> {
    bincode::serialize(model).map_err(|e| StoreError::Serialization {
        message: format!("encode model \"{}\": {e}", model.id),
    })
}

fn decode(bytes: &[u8]) -> StoreResult<MentalModel> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("decode model: {e}"),
    })
}

/// redb-backed [`ModelStore`].
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create both tables up front so read transactions never miss them.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        txn.open_table(MODELS_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(BANK_META_TABLE).map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        tracing::debug!(path = %db_path.display(), "opened durable model store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Run `f` against the models table inside one write transaction,
    /// committing only if it returns `Ok`.
    fn write<T>(
        &self,
        f: impl FnOnce(&mut redb::Table<'_, &'static str, &'static [u8]>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let out = {
            let mut table = txn.open_table(MODELS_TABLE).map_err(redb_err("open_table"))?;
            f(&mut table)?
        };
        txn.commit().map_err(redb_err("commit"))?;
        Ok(out)
    }
}

impl ModelStore for DurableStore {
    fn get(&self, bank_id: &str, id: &str) -> StoreResult<Option<MentalModel>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(MODELS_TABLE).map_err(redb_err("open_table"))?;
        let key = row_key(bank_id, id);
        let row = table.get(key.as_str()).map_err(redb_err("get"))?;
        row.map(|guard| decode(guard.value())).transpose()
    }

    fn list(&self, bank_id: &str, filter: &ModelFilter) -> StoreResult<Vec<MentalModel>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn.open_table(MODELS_TABLE).map_err(redb_err("open_table"))?;
        let lo = format!("{bank_id}\0");
        let hi = format!("{bank_id}\u{1}");
        let mut out = Vec::new();
        for row in table.range(lo.as_str()..hi.as_str()).map_err(redb_err("range"))? {
            let (_, value) = row.map_err(redb_err("range"))?;
            let model = decode(value.value())?;
            if filter.matches(&model) {
                out.push(model);
            }
        }
        Ok(out)
    }

    fn create(&self, model: MentalModel) -> StoreResult<()> {
        let key = row_key(&model.bank_id, &model.id);
        let bytes = encode(&model)?;
        self.write(|table| {
            if table.get(key.as_str()).map_err(redb_err("get"))?.is_some() {
                return Err(StoreError::Conflict {
                    bank_id: model.bank_id.clone(),
                    id: model.id.clone(),
                });
            }
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(redb_err("insert"))?;
            Ok(())
        })
    }

    fn create_if_absent(&self, model: MentalModel) -> StoreResult<(MentalModel, bool)> {
        let key = row_key(&model.bank_id, &model.id);
        let bytes = encode(&model)?;
        self.write(|table| {
            let existing = table
                .get(key.as_str())
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec());
            match existing {
                Some(raw) => Ok((decode(&raw)?, false)),
                None => {
                    table
                        .insert(key.as_str(), bytes.as_slice())
                        .map_err(redb_err("insert"))?;
                    Ok((model, true))
                }
            }
        })
    }

    fn update_identity(
        &self,
        bank_id: &str,
        id: &str,
        name: &str,
        description: &str,
    ) -> StoreResult<bool> {
        let key = row_key(bank_id, id);
        self.write(|table| {
            let raw = table
                .get(key.as_str())
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec());
            let Some(raw) = raw else {
                return Ok(false);
            };
            let mut model = decode(&raw)?;
            apply_identity(&mut model, name, description);
            let bytes = encode(&model)?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(redb_err("insert"))?;
            Ok(true)
        })
    }

    fn delete(&self, bank_id: &str, id: &str) -> StoreResult<bool> {
        let key = row_key(bank_id, id);
        self.write(|table| {
            let removed = table.remove(key.as_str()).map_err(redb_err("remove"))?;
            Ok(removed.is_some())
        })
    }

    fn commit_observations(
        &self,
        bank_id: &str,
        id: &str,
        observations: Vec<Observation>,
        fingerprint: u64,
        generated_at: u64,
    ) -> StoreResult<CommitOutcome> {
        let key = row_key(bank_id, id);
        self.write(|table| {
            let raw = table
                .get(key.as_str())
                .map_err(redb_err("get"))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StoreError::NotFound {
                    bank_id: bank_id.to_string(),
                    id: id.to_string(),
                })?;
            let mut model = decode(&raw)?;
            let outcome = apply_commit(&mut model, observations, fingerprint, generated_at);
            if outcome == CommitOutcome::Committed {
                let bytes = encode(&model)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(redb_err("insert"))?;
            }
            Ok(outcome)
        })
    }

    fn mission_marker(&self, bank_id: &str) -> StoreResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let table = txn
            .open_table(BANK_META_TABLE)
            .map_err(redb_err("open_table"))?;
        let row = table.get(bank_id).map_err(redb_err("get"))?;
        Ok(row.map(|guard| guard.value()))
    }

    fn set_mission_marker(&self, bank_id: &str, hash: u64) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        {
            let mut table = txn
                .open_table(BANK_META_TABLE)
                .map_err(redb_err("open_table"))?;
            table.insert(bank_id, hash).map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;
        Ok(())
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}
