use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use agri_core::{
    CommodityPrice, CommodityPriceInput, CommodityPriceKey, CropForecast, CropForecastInput,
    CropForecastKey, FarmBenchmark, FarmBenchmarkInput, FarmBenchmarkKey, IngestionRun,
    RunCompletion, RunStatus, SupplyForecast, UpsertOutcome, YieldPrediction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{check_completion, latest_valid_per_key, StoreError, StoreResult, WarehouseStore};

#[derive(Debug, Default)]
struct MemoryState {
    crop_forecasts: BTreeMap<CropForecastKey, CropForecast>,
    commodity_prices: BTreeMap<CommodityPriceKey, CommodityPrice>,
    farm_benchmarks: BTreeMap<FarmBenchmarkKey, FarmBenchmark>,
    yield_predictions: Vec<YieldPrediction>,
    supply_forecasts: Vec<SupplyForecast>,
    runs: Vec<IngestionRun>,
}

/// In-process warehouse. Lookup and write happen under one lock, which makes each
/// upsert atomic with respect to concurrent jobs.
#[derive(Debug)]
pub struct MemoryStore {
    available: AtomicBool,
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Simulate an outage: every call fails with `StorageUnavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::StorageUnavailable("memory store offline".to_string()))
        }
    }

    pub async fn yield_prediction_count(&self) -> usize {
        self.state.lock().await.yield_predictions.len()
    }

    pub async fn supply_forecast_count(&self) -> usize {
        self.state.lock().await.supply_forecasts.len()
    }
}

#[async_trait]
impl WarehouseStore for MemoryStore {
    async fn upsert_crop_forecast(
        &self,
        input: CropForecastInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.crop_forecasts.get_mut(&input.key) {
            existing.apply(&input, at);
            return Ok(UpsertOutcome::Updated);
        }
        let key = input.key.clone();
        state
            .crop_forecasts
            .insert(key, CropForecast::from_input(input, at));
        Ok(UpsertOutcome::Inserted)
    }

    async fn upsert_commodity_price(
        &self,
        input: CommodityPriceInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.commodity_prices.get_mut(&input.key) {
            existing.apply(&input, at);
            return Ok(UpsertOutcome::Updated);
        }
        let key = input.key.clone();
        state
            .commodity_prices
            .insert(key, CommodityPrice::from_input(input, at));
        Ok(UpsertOutcome::Inserted)
    }

    async fn upsert_farm_benchmark(
        &self,
        input: FarmBenchmarkInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state.farm_benchmarks.get_mut(&input.key) {
            existing.apply(&input, at);
            return Ok(UpsertOutcome::Updated);
        }
        let key = input.key.clone();
        state
            .farm_benchmarks
            .insert(key, FarmBenchmark::from_input(input, at));
        Ok(UpsertOutcome::Inserted)
    }

    async fn crop_forecasts(&self) -> StoreResult<Vec<CropForecast>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.crop_forecasts.values().cloned().collect())
    }

    async fn commodity_prices(&self) -> StoreResult<Vec<CommodityPrice>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.commodity_prices.values().cloned().collect())
    }

    async fn farm_benchmarks(&self) -> StoreResult<Vec<FarmBenchmark>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.farm_benchmarks.values().cloned().collect())
    }

    async fn insert_yield_prediction(&self, prediction: YieldPrediction) -> StoreResult<()> {
        self.ensure_available()?;
        self.state.lock().await.yield_predictions.push(prediction);
        Ok(())
    }

    async fn insert_supply_forecast(&self, forecast: SupplyForecast) -> StoreResult<()> {
        self.ensure_available()?;
        self.state.lock().await.supply_forecasts.push(forecast);
        Ok(())
    }

    async fn current_yield_predictions(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<YieldPrediction>> {
        self.ensure_available()?;
        let rows = self.state.lock().await.yield_predictions.clone();
        Ok(latest_valid_per_key(
            rows,
            now,
            YieldPrediction::key,
            |p| p.generated_at,
            |p| p.valid_until,
        ))
    }

    async fn current_supply_forecasts(&self, now: DateTime<Utc>) -> StoreResult<Vec<SupplyForecast>> {
        self.ensure_available()?;
        let rows = self.state.lock().await.supply_forecasts.clone();
        Ok(latest_valid_per_key(
            rows,
            now,
            |f| f.region.clone(),
            |f| f.generated_at,
            |f| f.valid_until,
        ))
    }

    async fn begin_run(&self, run: IngestionRun) -> StoreResult<()> {
        self.ensure_available()?;
        self.state.lock().await.runs.push(run);
        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid, completion: RunCompletion) -> StoreResult<IngestionRun> {
        self.ensure_available()?;
        check_completion(&completion)?;
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|run| run.id == run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        if run.status != RunStatus::Running {
            return Err(StoreError::InvalidTransition {
                run_id,
                status: run.status,
            });
        }
        run.status = completion.status;
        run.finished_at = Some(completion.finished_at);
        run.records_processed = completion.records_processed;
        run.error_summary = completion.error_summary;
        Ok(run.clone())
    }

    async fn ingestion_runs(&self) -> StoreResult<Vec<IngestionRun>> {
        self.ensure_available()?;
        Ok(self.state.lock().await.runs.clone())
    }

    async fn stuck_runs(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<IngestionRun>> {
        self.ensure_available()?;
        Ok(self
            .state
            .lock()
            .await
            .runs
            .iter()
            .filter(|run| run.status == RunStatus::Running && run.started_at < started_before)
            .cloned()
            .collect())
    }
}
