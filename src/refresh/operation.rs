//! Background operations: submit → operation id → poll.
//!
//! Each operation runs on its own named thread. Refreshes are serialized per
//! bank: a second submission while one is pending or running is a
//! [`RefreshError::Conflict`]. Cancelling sets a flag the job checks before
//! each generation call; work already in flight completes.
//!
//! Finished operations stay queryable until `retention` newer ones have
//! finished after them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use super::{GenerationStatus, RefreshReport};
use crate::error::RefreshError;

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Refresh,
    Generate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Refresh => "refresh",
            Self::Generate => "generate",
        })
    }
}

/// Result of a single-model generate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateReport {
    pub bank_id: String,
    pub model_id: String,
    #[serde(flatten)]
    pub status: GenerationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OperationReport {
    Refresh(RefreshReport),
    Generate(GenerateReport),
}

/// Lifecycle of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed { report: OperationReport },
    Failed { message: String },
    Cancelled { report: Option<OperationReport> },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

struct OperationEntry {
    bank_id: String,
    kind: OperationKind,
    status: OperationStatus,
    cancel: Arc<AtomicBool>,
}

/// Finished operations kept by [`OperationTracker::new`].
pub const DEFAULT_RETENTION: usize = 256;

/// Registry of background operations for one engine.
pub struct OperationTracker {
    ops: DashMap<String, OperationEntry>,
    /// bank id → id of its pending or running refresh.
    running_refresh: DashMap<String, String>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Terminal operation ids, oldest first.
    finished: Mutex<VecDeque<String>>,
    retention: usize,
    counter: AtomicU64,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker that forgets finished operations beyond the newest `retention`.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            ops: DashMap::new(),
            running_refresh: DashMap::new(),
            handles: Mutex::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
            counter: AtomicU64::new(0),
        }
    }

    /// Start `job` in the background and return its operation id.
    pub fn submit<F>(
        self: &Arc<Self>,
        bank_id: &str,
        kind: OperationKind,
        job: F,
    ) -> Result<String, RefreshError>
    where
        F: FnOnce(&AtomicBool) -> Result<OperationReport, String> + Send + 'static,
    {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let op_id = format!("{kind}-{bank_id}-{n}");

        if kind == OperationKind::Refresh {
            match self.running_refresh.entry(bank_id.to_string()) {
                Entry::Occupied(e) => {
                    return Err(RefreshError::Conflict {
                        bank_id: bank_id.to_string(),
                        operation_id: e.get().clone(),
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(op_id.clone());
                }
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.ops.insert(
            op_id.clone(),
            OperationEntry {
                bank_id: bank_id.to_string(),
                kind,
                status: OperationStatus::Pending,
                cancel: Arc::clone(&cancel),
            },
        );

        let tracker = Arc::clone(self);
        let id = op_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("akh-op-{n}"))
            .spawn(move || tracker.execute(&id, &cancel, job));

        match spawned {
            Ok(handle) => {
                if let Ok(mut handles) = self.handles.lock() {
                    handles.insert(op_id.clone(), handle);
                }
                tracing::info!(operation_id = %op_id, bank_id, %kind, "operation submitted");
                Ok(op_id)
            }
            Err(e) => {
                self.ops.remove(&op_id);
                self.release(bank_id, &op_id);
                Err(RefreshError::Spawn {
                    message: e.to_string(),
                })
            }
        }
    }

    fn execute<F>(&self, op_id: &str, cancel: &AtomicBool, job: F)
    where
        F: FnOnce(&AtomicBool) -> Result<OperationReport, String>,
    {
        self.set_status(op_id, OperationStatus::Running);
        let result = catch_unwind(AssertUnwindSafe(|| job(cancel)))
            .unwrap_or_else(|_| Err("operation worker panicked".to_string()));

        let status = match result {
            Ok(report) if cancel.load(Ordering::SeqCst) => OperationStatus::Cancelled {
                report: Some(report),
            },
            Ok(report) => OperationStatus::Completed { report },
            Err(message) => {
                tracing::warn!(operation_id = op_id, %message, "operation failed");
                OperationStatus::Failed { message }
            }
        };
        let bank_id = self.ops.get(op_id).map(|e| e.bank_id.clone());
        self.set_status(op_id, status);
        if let Some(bank_id) = bank_id {
            self.release(&bank_id, op_id);
        }
        tracing::info!(operation_id = op_id, "operation finished");
        self.evict_beyond_retention(op_id);
    }

    /// Record `op_id` as finished and forget the oldest finished operations
    /// past the retention limit.
    fn evict_beyond_retention(&self, op_id: &str) {
        let evicted: Vec<String> = match self.finished.lock() {
            Ok(mut finished) => {
                finished.push_back(op_id.to_string());
                let excess = finished.len().saturating_sub(self.retention);
                finished.drain(..excess).collect()
            }
            Err(_) => return,
        };
        if evicted.is_empty() {
            return;
        }
        if let Ok(mut handles) = self.handles.lock() {
            for id in &evicted {
                handles.remove(id);
            }
        }
        for id in &evicted {
            self.ops.remove(id);
        }
        tracing::debug!(evicted = evicted.len(), "forgot finished operations");
    }

    fn set_status(&self, op_id: &str, status: OperationStatus) {
        if let Some(mut entry) = self.ops.get_mut(op_id) {
            entry.status = status;
        }
    }

    /// Drop the bank's refresh marker if it still belongs to `op_id`.
    fn release(&self, bank_id: &str, op_id: &str) {
        self.running_refresh.remove_if(bank_id, |_, running| running == op_id);
    }

    fn not_found(op_id: &str) -> RefreshError {
        RefreshError::OperationNotFound {
            operation_id: op_id.to_string(),
        }
    }

    pub fn status(&self, op_id: &str) -> Result<OperationStatus, RefreshError> {
        self.ops
            .get(op_id)
            .map(|e| e.status.clone())
            .ok_or_else(|| Self::not_found(op_id))
    }

    pub fn kind(&self, op_id: &str) -> Result<OperationKind, RefreshError> {
        self.ops
            .get(op_id)
            .map(|e| e.kind)
            .ok_or_else(|| Self::not_found(op_id))
    }

    /// Request cancellation. Returns the status at the time of the request.
    pub fn cancel(&self, op_id: &str) -> Result<OperationStatus, RefreshError> {
        let entry = self.ops.get(op_id).ok_or_else(|| Self::not_found(op_id))?;
        if !entry.status.is_terminal() {
            entry.cancel.store(true, Ordering::SeqCst);
            tracing::info!(operation_id = op_id, "cancellation requested");
        }
        Ok(entry.status.clone())
    }

    /// Block until the operation reaches a terminal state.
    pub fn wait(&self, op_id: &str) -> Result<OperationStatus, RefreshError> {
        if !self.ops.contains_key(op_id) {
            return Err(Self::not_found(op_id));
        }
        let handle = self
            .handles
            .lock()
            .ok()
            .and_then(|mut handles| handles.remove(op_id));
        match handle {
            Some(handle) => {
                // The worker catches panics from the job itself.
                let _ = handle.join();
            }
            None => {
                // Another caller owns the handle; poll.
                while !self.status(op_id)?.is_terminal() {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
        self.status(op_id)
    }

    /// Ids of all known operations, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ops.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
