use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ExecutorError, Result};
use crate::lifecycle::{self, CancelOutcome};
use crate::record::ExecutionRecord;
use crate::request::ExecuteRequest;

/// Concurrency-safe store of execution records keyed by id.
///
/// The map lock only covers lookups and insertion; status changes happen
/// under each record's own lock, so unrelated executions never contend.
#[derive(Default)]
pub struct ExecutionRegistry {
    records: RwLock<HashMap<String, Arc<ExecutionRecord>>>,
    counter: Mutex<u64>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and store a new pending record for `request`.
    ///
    /// With a `parent` scope, canceling the parent cancels the record too.
    pub fn create(
        &self,
        request: ExecuteRequest,
        parent: Option<&CancellationToken>,
    ) -> Arc<ExecutionRecord> {
        let id = self.next_id();
        let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let record = Arc::new(ExecutionRecord::new(id.clone(), request, token));

        self.records.write().insert(id.clone(), record.clone());
        debug!(execution_id = %id, "Execution registered");
        record
    }

    /// `exec_<unix seconds>_<counter>`; the counter alone guarantees uniqueness.
    fn next_id(&self) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("exec_{}_{}", chrono::Utc::now().timestamp(), *counter)
    }

    pub fn get(&self, id: &str) -> Result<Arc<ExecutionRecord>> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ExecutorError::NotFound(id.to_string()))
    }

    /// Snapshot of all records, in no particular order.
    pub fn list(&self) -> Vec<Arc<ExecutionRecord>> {
        self.records.read().values().cloned().collect()
    }

    pub fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        let record = self.get(id)?;
        Ok(lifecycle::cancel(&record))
    }

    /// Cancel every record that has not finished yet; returns how many.
    pub fn cancel_all(&self) -> usize {
        self.list()
            .iter()
            .filter(|record| lifecycle::cancel(record) == CancelOutcome::Canceled)
            .count()
    }

    /// Evict a finished record. Pending or running records stay put.
    pub fn remove(&self, id: &str) -> Result<Arc<ExecutionRecord>> {
        let mut records = self.records.write();
        match records.get(id) {
            None => Err(ExecutorError::NotFound(id.to_string())),
            Some(record) if !record.is_terminal() => Err(ExecutorError::invalid(format!(
                "execution {id} is still {}",
                record.status()
            ))),
            Some(_) => records
                .remove(id)
                .ok_or_else(|| ExecutorError::NotFound(id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records that are still pending or running.
    pub fn active_count(&self) -> usize {
        self.records
            .read()
            .values()
            .filter(|record| !record.is_terminal())
            .count()
    }
}
