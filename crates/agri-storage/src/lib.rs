//! Reconciliation store + ingestion run ledger persistence.
//!
//! Every upsert is a single conditional write keyed by the entity's natural key, so
//! repeated ingestion converges on one row per key even under concurrent jobs.

use std::collections::BTreeMap;

use agri_core::{
    CommodityPrice, CommodityPriceInput, CropForecast, CropForecastInput, DomainError,
    FarmBenchmark, FarmBenchmarkInput, IngestionRun, RunCompletion, RunStatus, SupplyForecast,
    UpsertOutcome, YieldPrediction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "agri-storage";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("ingestion run {run_id} is already {status}")]
    InvalidTransition { run_id: Uuid, status: RunStatus },
    #[error("completion status must be terminal, got {0}")]
    NonTerminalCompletion(RunStatus),
    #[error("ingestion run {0} not found")]
    RunNotFound(Uuid),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::StorageUnavailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Warehouse persistence used by every pipeline job.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    async fn upsert_crop_forecast(
        &self,
        input: CropForecastInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome>;

    async fn upsert_commodity_price(
        &self,
        input: CommodityPriceInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome>;

    async fn upsert_farm_benchmark(
        &self,
        input: FarmBenchmarkInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome>;

    async fn crop_forecasts(&self) -> StoreResult<Vec<CropForecast>>;

    async fn commodity_prices(&self) -> StoreResult<Vec<CommodityPrice>>;

    async fn farm_benchmarks(&self) -> StoreResult<Vec<FarmBenchmark>>;

    /// Append-only; history accumulates across runs.
    async fn insert_yield_prediction(&self, prediction: YieldPrediction) -> StoreResult<()>;

    async fn insert_supply_forecast(&self, forecast: SupplyForecast) -> StoreResult<()>;

    /// Latest non-expired prediction per (crop, region, season).
    async fn current_yield_predictions(&self, now: DateTime<Utc>)
        -> StoreResult<Vec<YieldPrediction>>;

    /// Latest non-expired forecast per region.
    async fn current_supply_forecasts(&self, now: DateTime<Utc>) -> StoreResult<Vec<SupplyForecast>>;

    async fn begin_run(&self, run: IngestionRun) -> StoreResult<()>;

    /// Applies the single terminal write; a run that already left `running` is rejected.
    async fn finish_run(&self, run_id: Uuid, completion: RunCompletion) -> StoreResult<IngestionRun>;

    async fn ingestion_runs(&self) -> StoreResult<Vec<IngestionRun>>;

    /// Runs still `running` that started before `started_before`.
    async fn stuck_runs(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<IngestionRun>>;
}

/// Keep the most recently generated, still valid item for each key.
pub fn latest_valid_per_key<T, K, FK, FG, FV>(
    items: impl IntoIterator<Item = T>,
    now: DateTime<Utc>,
    key_of: FK,
    generated_at: FG,
    valid_until: FV,
) -> Vec<T>
where
    K: Ord,
    FK: Fn(&T) -> K,
    FG: Fn(&T) -> DateTime<Utc>,
    FV: Fn(&T) -> DateTime<Utc>,
{
    let mut latest: BTreeMap<K, T> = BTreeMap::new();
    for item in items.into_iter().filter(|item| valid_until(item) >= now) {
        let key = key_of(&item);
        match latest.get(&key) {
            Some(existing) if generated_at(existing) >= generated_at(&item) => {}
            _ => {
                latest.insert(key, item);
            }
        }
    }
    latest.into_values().collect()
}

fn check_completion(completion: &RunCompletion) -> StoreResult<()> {
    if completion.status.is_terminal() {
        Ok(())
    } else {
        Err(StoreError::NonTerminalCompletion(completion.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        key: &'static str,
        generated_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    }

    #[test]
    fn latest_valid_per_key_prefers_newest_unexpired() {
        let now = Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap();
        let rows = vec![
            Row { key: "a", generated_at: now - Duration::days(3), valid_until: now + Duration::days(4) },
            Row { key: "a", generated_at: now - Duration::days(1), valid_until: now + Duration::days(6) },
            Row { key: "b", generated_at: now - Duration::days(9), valid_until: now - Duration::days(2) },
        ];
        let current = latest_valid_per_key(rows, now, |r| r.key, |r| r.generated_at, |r| r.valid_until);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].generated_at, now - Duration::days(1));
    }

    #[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct SeasonKey {
        crop: &'static str,
        start_year: i32,
    }

    #[test]
    fn latest_valid_per_key_accepts_ordered_keys() {
        let now = Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap();
        let rows = vec![
            Row { key: "wheat", generated_at: now - Duration::days(2), valid_until: now + Duration::days(5) },
            Row { key: "barley", generated_at: now - Duration::days(1), valid_until: now + Duration::days(6) },
        ];
        let current = latest_valid_per_key(
            rows,
            now,
            |r| SeasonKey { crop: r.key, start_year: 2024 },
            |r| r.generated_at,
            |r| r.valid_until,
        );
        let crops: Vec<_> = current.iter().map(|r| r.key).collect();
        assert_eq!(crops, vec!["barley", "wheat"]);
    }

    #[test]
    fn pool_timeouts_map_to_unavailable() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_unavailable());
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_unavailable());
    }
}
