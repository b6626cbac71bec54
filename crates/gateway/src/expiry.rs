//! Periodic deletion of expired result sets.
//!
//! Each sweep reads the clock once, then asks the store to clear execution references and
//! delete every set whose `expires_at_ms` is strictly before that instant. The store does
//! this in a single transaction, so a failed sweep leaves everything in place for the next
//! tick. Sweeps never overlap: a tick that fires while one is in flight is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlgate_ledger::{LedgerError, PurgeReport, ResultSetStore};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::execution::unix_epoch_ms_now;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Skipped,
    Completed(PurgeReport),
}

#[derive(Clone)]
pub struct ResultSetExpiryJob {
    store: Arc<dyn ResultSetStore>,
    running: Arc<AtomicBool>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ResultSetExpiryJob {
    pub fn new(store: Arc<dyn ResultSetStore>) -> Self {
        Self {
            store,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run_once(&self) -> Result<SweepOutcome, LedgerError> {
        self.run_at(unix_epoch_ms_now()).await
    }

    pub async fn run_at(&self, now_ms: i64) -> Result<SweepOutcome, LedgerError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("result set sweep already running; skipping tick");
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let report = self.store.purge_expired(now_ms).await?;
        if report.deleted() > 0 {
            crate::metrics::inc_result_sets_swept(report.deleted());
            tracing::info!(
                deleted = report.deleted(),
                detached_executions = report.detached_executions,
                "expired result sets deleted"
            );
        }
        Ok(SweepOutcome::Completed(report))
    }

    /// Runs a sweep every `interval`, starting one interval from now.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let span = tracing::info_span!(
                    "result_set.sweep",
                    latency_ms = tracing::field::Empty,
                    outcome = tracing::field::Empty,
                );
                let started = std::time::Instant::now();
                let job = self.clone();
                async move {
                    let outcome = match job.run_once().await {
                        Ok(SweepOutcome::Skipped) => "skipped",
                        Ok(SweepOutcome::Completed(_)) => "ok",
                        Err(err) => {
                            tracing::warn!(error = %err, "result set sweep failed; rolled back");
                            "error"
                        }
                    };
                    let span = tracing::Span::current();
                    span.record("latency_ms", started.elapsed().as_millis() as u64);
                    span.record("outcome", outcome);
                }
                .instrument(span)
                .await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlgate_contracts::{ExecStatus, StorageFormat};
    use sqlgate_ledger::{ExecutionRecord, ExecutionStore, MemoryLedger, ResultSetRecord};
    use tokio::sync::Notify;

    fn execution(id: &str) -> ExecutionRecord {
        ExecutionRecord {
            execution_id: id.to_string(),
            engine: "trino".to_string(),
            datasource: "trino".to_string(),
            catalog: None,
            schema: None,
            dataset_id: None,
            sql_text: "SELECT 1".to_string(),
            executed_sql: "SELECT 1".to_string(),
            query_hash: sqlgate_contracts::canonical::query_hash("SELECT 1"),
            status: ExecStatus::Succeeded,
            limit_applied: false,
            dry_run: false,
            fetch_size: None,
            client_request_id: None,
            elapsed_ms: 0,
            rows: 1,
            bytes: 0,
            queue_position: 0,
            remote_job_handle: None,
            result_set_id: None,
            error_message: None,
            submitted_by: "alice".to_string(),
            submitted_at_ms: 0,
            finished_at_ms: Some(1),
        }
    }

    fn result_set(id: &str, expires_at_ms: i64) -> ResultSetRecord {
        ResultSetRecord {
            result_set_id: id.to_string(),
            owner: "alice".to_string(),
            storage_uri: format!("sqlgate://result-sets/{}.json", id),
            storage_format: StorageFormat::Json,
            columns: vec!["a".to_string()],
            row_count: Some(1),
            ttl_days: 1,
            created_at_ms: 0,
            expires_at_ms,
        }
    }

    #[tokio::test]
    async fn sweep_deletes_only_strictly_expired_sets() {
        let ledger = MemoryLedger::default();
        let fixtures = [("e1", "rs-old", 100), ("e2", "rs-edge", 500), ("e3", "rs-new", 900)];
        for (exec, rs, expires) in fixtures {
            ledger.insert_execution(&execution(exec)).await.expect("insert");
            ledger
                .attach_result_set(exec, &result_set(rs, expires))
                .await
                .expect("attach");
        }

        let job = ResultSetExpiryJob::new(Arc::new(ledger.clone()));
        let outcome = job.run_at(500).await.expect("sweep");
        let SweepOutcome::Completed(report) = outcome else {
            panic!("sweep should run");
        };
        assert_eq!(report.deleted_ids, vec!["rs-old".to_string()]);
        assert_eq!(report.detached_executions, 1);

        let e1 = ledger.load_execution("e1").await.expect("load").expect("e1");
        assert!(e1.result_set_id.is_none());
        assert!(ledger.load_result_set("rs-edge").await.expect("load").is_some());

        let again = job.run_at(500).await.expect("second sweep");
        assert_eq!(again, SweepOutcome::Completed(PurgeReport::default()));
    }

    struct BlockingStore {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ResultSetStore for BlockingStore {
        async fn attach_result_set(&self, _: &str, _: &ResultSetRecord) -> Result<(), LedgerError> {
            Ok(())
        }

        async fn load_result_set(&self, _: &str) -> Result<Option<ResultSetRecord>, LedgerError> {
            Ok(None)
        }

        async fn list_result_sets(&self, _: &str) -> Result<Vec<ResultSetRecord>, LedgerError> {
            Ok(Vec::new())
        }

        async fn delete_result_set(&self, _: &str) -> Result<PurgeReport, LedgerError> {
            Ok(PurgeReport::default())
        }

        async fn purge_expired(&self, _: i64) -> Result<PurgeReport, LedgerError> {
            self.entered.notify_one();
            self.release.notified().await;
            Err(LedgerError::Timeout)
        }
    }

    #[tokio::test]
    async fn overlapping_sweeps_are_skipped_and_flag_resets_after_failure() {
        let store = Arc::new(BlockingStore {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let job = ResultSetExpiryJob::new(store.clone());

        let first = tokio::spawn({
            let job = job.clone();
            async move { job.run_at(10).await }
        });
        store.entered.notified().await;

        assert_eq!(job.run_at(10).await.expect("skip"), SweepOutcome::Skipped);

        store.release.notify_one();
        let result = first.await.expect("join");
        assert!(matches!(result, Err(LedgerError::Timeout)));

        let next = tokio::spawn({
            let job = job.clone();
            async move { job.run_at(10).await }
        });
        store.entered.notified().await;
        store.release.notify_one();
        assert!(next.await.expect("join").is_err());
    }
}
