//! Ingestion run ledger: one `running` row per job invocation, closed exactly once.

use agri_core::{Clock, IngestionRun, RunCompletion, RunStatus};
use agri_storage::{StoreResult, WarehouseStore};
use tracing::{info, warn};
use uuid::Uuid;

pub const ERROR_SUMMARY_SEPARATOR: &str = "; ";

pub struct RunLedger<'a> {
    store: &'a dyn WarehouseStore,
    clock: &'a dyn Clock,
    data_source: &'a str,
}

impl<'a> RunLedger<'a> {
    pub fn new(store: &'a dyn WarehouseStore, clock: &'a dyn Clock, data_source: &'a str) -> Self {
        Self {
            store,
            clock,
            data_source,
        }
    }

    pub async fn open(&self, dataset: &str) -> StoreResult<IngestionRun> {
        let run = IngestionRun::start(self.data_source, dataset, self.clock.now());
        self.store.begin_run(run.clone()).await?;
        info!(run_id = %run.id, dataset, "ingestion run opened");
        Ok(run)
    }

    pub async fn close(
        &self,
        run_id: Uuid,
        status: RunStatus,
        records_processed: u64,
        errors: &[String],
    ) -> StoreResult<IngestionRun> {
        let completion = RunCompletion {
            status,
            finished_at: self.clock.now(),
            records_processed,
            error_summary: summarize_errors(errors),
        };
        let run = self.store.finish_run(run_id, completion).await?;
        if status == RunStatus::Succeeded {
            info!(%run_id, records_processed, "ingestion run {status}");
        } else {
            warn!(%run_id, records_processed, errors = errors.len(), "ingestion run {status}");
        }
        Ok(run)
    }
}

/// Lossy, alert-friendly rendering of the per-record error list.
pub fn summarize_errors(errors: &[String]) -> Option<String> {
    if errors.is_empty() {
        None
    } else {
        Some(errors.join(ERROR_SUMMARY_SEPARATOR))
    }
}

/// Terminal status for jobs whose work is a sweep of independent units.
pub fn sweep_status(written: u64, errors: usize) -> RunStatus {
    match (written, errors) {
        (_, 0) => RunStatus::Succeeded,
        (0, _) => RunStatus::Failed,
        _ => RunStatus::Partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agri_core::FixedClock;
    use agri_storage::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn error_summary_is_semicolon_joined() {
        assert_eq!(summarize_errors(&[]), None);
        let errors = vec!["NSW/wheat: timeout".to_string(), "QLD/oats: no data".to_string()];
        assert_eq!(
            summarize_errors(&errors).as_deref(),
            Some("NSW/wheat: timeout; QLD/oats: no data")
        );
    }

    #[test]
    fn sweep_status_table() {
        assert_eq!(sweep_status(56, 0), RunStatus::Succeeded);
        assert_eq!(sweep_status(0, 0), RunStatus::Succeeded);
        assert_eq!(sweep_status(55, 1), RunStatus::Partial);
        assert_eq!(sweep_status(0, 56), RunStatus::Failed);
    }

    #[tokio::test]
    async fn ledger_round_trip_stamps_clock_times() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 2, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        let store = MemoryStore::new();
        let ledger = RunLedger::new(&store, &clock, "abares");

        let run = ledger.open("farm_benchmarks").await.unwrap();
        assert_eq!(run.status, RunStatus::Running);

        clock.advance(Duration::seconds(42));
        let closed = ledger
            .close(run.id, RunStatus::Partial, 3, &["x".to_string()])
            .await
            .unwrap();
        assert_eq!(closed.started_at, t0);
        assert_eq!(closed.finished_at, Some(t0 + Duration::seconds(42)));
        assert_eq!(closed.error_summary.as_deref(), Some("x"));
        assert_eq!(closed.data_source, "abares");
    }
}
