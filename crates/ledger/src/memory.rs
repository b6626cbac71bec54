use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sqlgate_contracts::ExecStatus;

use crate::{
    ExecutionRecord, ExecutionStore, LedgerError, ProgressUpdate, PurgeReport, ResultSetRecord,
    ResultSetStore, check_transition,
};

#[derive(Default)]
struct MemoryState {
    executions: HashMap<String, ExecutionRecord>,
    result_sets: HashMap<String, ResultSetRecord>,
}

/// Process-local store. One lock covers both maps so multi-record updates stay atomic.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn detach(state: &mut MemoryState, result_set_id: &str) -> u64 {
    let mut detached = 0;
    for execution in state.executions.values_mut() {
        if execution.result_set_id.as_deref() == Some(result_set_id) {
            execution.result_set_id = None;
            detached += 1;
        }
    }
    detached
}

#[async_trait]
impl ExecutionStore for MemoryLedger {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), LedgerError> {
        let mut state = self.lock();
        if let Some(existing) = state.executions.get(&record.execution_id) {
            return Err(LedgerError::Conflict {
                current: existing.status,
                attempted: record.status,
            });
        }
        state
            .executions
            .insert(record.execution_id.clone(), record.clone());
        Ok(())
    }

    async fn load_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, LedgerError> {
        Ok(self.lock().executions.get(execution_id).cloned())
    }

    async fn cancel_execution(
        &self,
        execution_id: &str,
        finished_at_ms: i64,
    ) -> Result<Option<ExecutionRecord>, LedgerError> {
        let mut state = self.lock();
        let Some(record) = state.executions.get_mut(execution_id) else {
            return Ok(None);
        };
        record.status = ExecStatus::Canceled;
        record.finished_at_ms = Some(finished_at_ms);
        Ok(Some(record.clone()))
    }

    async fn apply_progress(
        &self,
        execution_id: &str,
        expected: ExecStatus,
        update: &ProgressUpdate,
    ) -> Result<ExecutionRecord, LedgerError> {
        let mut state = self.lock();
        let record = state
            .executions
            .get_mut(execution_id)
            .ok_or(LedgerError::NotFound)?;
        if record.status != expected {
            return Err(LedgerError::Conflict {
                current: record.status,
                attempted: update.status,
            });
        }
        check_transition(record.status, update.status)?;
        update.apply_to(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl ResultSetStore for MemoryLedger {
    async fn attach_result_set(
        &self,
        execution_id: &str,
        record: &ResultSetRecord,
    ) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let execution = state
            .executions
            .get_mut(execution_id)
            .ok_or(LedgerError::NotFound)?;
        execution.result_set_id = Some(record.result_set_id.clone());
        state
            .result_sets
            .insert(record.result_set_id.clone(), record.clone());
        Ok(())
    }

    async fn load_result_set(
        &self,
        result_set_id: &str,
    ) -> Result<Option<ResultSetRecord>, LedgerError> {
        Ok(self.lock().result_sets.get(result_set_id).cloned())
    }

    async fn list_result_sets(&self, owner: &str) -> Result<Vec<ResultSetRecord>, LedgerError> {
        let state = self.lock();
        let mut out: Vec<ResultSetRecord> = state
            .result_sets
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.result_set_id.cmp(&a.result_set_id))
        });
        Ok(out)
    }

    async fn delete_result_set(&self, result_set_id: &str) -> Result<PurgeReport, LedgerError> {
        let mut state = self.lock();
        if !state.result_sets.contains_key(result_set_id) {
            return Ok(PurgeReport::default());
        }
        let detached = detach(&mut state, result_set_id);
        state.result_sets.remove(result_set_id);
        Ok(PurgeReport {
            deleted_ids: vec![result_set_id.to_string()],
            detached_executions: detached,
        })
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<PurgeReport, LedgerError> {
        let mut state = self.lock();
        let mut expired: Vec<String> = state
            .result_sets
            .values()
            .filter(|r| r.expires_at_ms < now_ms)
            .map(|r| r.result_set_id.clone())
            .collect();
        if expired.is_empty() {
            return Ok(PurgeReport::default());
        }
        expired.sort();

        let mut report = PurgeReport::default();
        for id in expired {
            report.detached_executions += detach(&mut state, &id);
            state.result_sets.remove(&id);
            report.deleted_ids.push(id);
        }
        Ok(report)
    }
}
