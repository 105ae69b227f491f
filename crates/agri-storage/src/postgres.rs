use agri_core::{
    CommodityPrice, CommodityPriceInput, CropForecast, CropForecastInput, FarmBenchmark,
    FarmBenchmarkInput, IngestionRun, RunCompletion, RunStatus, Season, SupplyForecast,
    SupplyForecastPoint, UpsertOutcome, YieldPrediction, DEFAULT_PROVENANCE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{check_completion, StoreError, StoreResult, WarehouseStore};

/// Postgres warehouse. Upserts use `ON CONFLICT` on the natural key, so the
/// lookup and the write are one statement.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|err| StoreError::StorageUnavailable(err.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Database(format!("running migrations: {err}")))?;
        info!("warehouse migrations applied");
        Ok(())
    }
}

fn outcome(row: &PgRow) -> StoreResult<UpsertOutcome> {
    let inserted: bool = row.try_get("inserted")?;
    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

fn season_of(row: &PgRow) -> StoreResult<Season> {
    let label: String = row.try_get("season")?;
    Ok(label.parse()?)
}

fn crop_forecast_from_row(row: &PgRow) -> StoreResult<CropForecast> {
    Ok(CropForecast {
        id: row.try_get("id")?,
        crop: row.try_get("crop")?,
        region: row.try_get("region")?,
        season: season_of(row)?,
        area_planted: row.try_get("area_planted")?,
        production: row.try_get("production")?,
        yield_per_hectare: row.try_get("yield_per_hectare")?,
        yield_change_yoy: row.try_get("yield_change_yoy")?,
        production_change_yoy: row.try_get("production_change_yoy")?,
        reported_at: row.try_get("reported_at")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn commodity_price_from_row(row: &PgRow) -> StoreResult<CommodityPrice> {
    Ok(CommodityPrice {
        id: row.try_get("id")?,
        commodity: row.try_get("commodity")?,
        price_date: row.try_get("price_date")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        unit: row.try_get("unit")?,
        change_week_pct: row.try_get("change_week_pct")?,
        change_month_pct: row.try_get("change_month_pct")?,
        change_year_pct: row.try_get("change_year_pct")?,
        five_year_average: row.try_get("five_year_average")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn farm_benchmark_from_row(row: &PgRow) -> StoreResult<FarmBenchmark> {
    let sample_size: i32 = row.try_get("sample_size")?;
    Ok(FarmBenchmark {
        id: row.try_get("id")?,
        farm_type: row.try_get("farm_type")?,
        region: row.try_get("region")?,
        financial_year: row.try_get("financial_year")?,
        gross_income: row.try_get("gross_income")?,
        cash_costs: row.try_get("cash_costs")?,
        cash_income: row.try_get("cash_income")?,
        business_profit: row.try_get("business_profit")?,
        rate_of_return: row.try_get("rate_of_return")?,
        debt_to_equity: row.try_get("debt_to_equity")?,
        sample_size: sample_size.max(0) as u32,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn yield_prediction_from_row(row: &PgRow) -> StoreResult<YieldPrediction> {
    let basis_points: i32 = row.try_get("basis_points")?;
    Ok(YieldPrediction {
        id: row.try_get("id")?,
        region: row.try_get("region")?,
        crop: row.try_get("crop")?,
        season: season_of(row)?,
        predicted_yield: row.try_get("predicted_yield")?,
        confidence_low: row.try_get("confidence_low")?,
        confidence_high: row.try_get("confidence_high")?,
        methodology: row.try_get("methodology")?,
        basis_points: basis_points.max(0) as u32,
        generated_at: row.try_get("generated_at")?,
        valid_until: row.try_get("valid_until")?,
    })
}

fn supply_forecast_from_row(row: &PgRow) -> StoreResult<SupplyForecast> {
    let horizon_days: i32 = row.try_get("horizon_days")?;
    let risk_score: i16 = row.try_get("risk_score")?;
    let Json(points): Json<Vec<SupplyForecastPoint>> = row.try_get("points")?;
    Ok(SupplyForecast {
        id: row.try_get("id")?,
        region: row.try_get("region")?,
        state: row.try_get("state")?,
        forecast_date: row.try_get("forecast_date")?,
        horizon_days: horizon_days.max(0) as u32,
        points,
        risk_score: risk_score.clamp(0, 100) as u8,
        confidence: row.try_get("confidence")?,
        generated_at: row.try_get("generated_at")?,
        valid_until: row.try_get("valid_until")?,
    })
}

fn ingestion_run_from_row(row: &PgRow) -> StoreResult<IngestionRun> {
    let status: String = row.try_get("status")?;
    let records_processed: i64 = row.try_get("records_processed")?;
    Ok(IngestionRun {
        id: row.try_get("id")?,
        data_source: row.try_get("data_source")?,
        dataset: row.try_get("dataset")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        status: status.parse()?,
        records_processed: records_processed.max(0) as u64,
        error_summary: row.try_get("error_summary")?,
    })
}

#[async_trait]
impl WarehouseStore for PgStore {
    async fn upsert_crop_forecast(
        &self,
        input: CropForecastInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO crop_forecasts (
                id, crop, region, season, area_planted, production, yield_per_hectare,
                yield_change_yoy, production_change_yoy, reported_at, source, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            ON CONFLICT (crop, region, season) DO UPDATE
               SET area_planted = EXCLUDED.area_planted,
                   production = EXCLUDED.production,
                   yield_per_hectare = EXCLUDED.yield_per_hectare,
                   yield_change_yoy = EXCLUDED.yield_change_yoy,
                   production_change_yoy = EXCLUDED.production_change_yoy,
                   reported_at = EXCLUDED.reported_at,
                   updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.key.crop)
        .bind(&input.key.region)
        .bind(input.key.season.to_string())
        .bind(input.area_planted)
        .bind(input.production)
        .bind(input.yield_per_hectare)
        .bind(input.yield_change_yoy)
        .bind(input.production_change_yoy)
        .bind(input.reported_at.unwrap_or(at))
        .bind(DEFAULT_PROVENANCE)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        outcome(&row)
    }

    async fn upsert_commodity_price(
        &self,
        input: CommodityPriceInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO commodity_prices (
                id, commodity, price_date, price, currency, unit, change_week_pct,
                change_month_pct, change_year_pct, five_year_average, source, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            ON CONFLICT (commodity, price_date) DO UPDATE
               SET price = EXCLUDED.price,
                   currency = EXCLUDED.currency,
                   unit = EXCLUDED.unit,
                   change_week_pct = EXCLUDED.change_week_pct,
                   change_month_pct = EXCLUDED.change_month_pct,
                   change_year_pct = EXCLUDED.change_year_pct,
                   five_year_average = EXCLUDED.five_year_average,
                   updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.key.commodity)
        .bind(input.key.price_date)
        .bind(input.price)
        .bind(&input.currency)
        .bind(&input.unit)
        .bind(input.change_week_pct)
        .bind(input.change_month_pct)
        .bind(input.change_year_pct)
        .bind(input.five_year_average)
        .bind(DEFAULT_PROVENANCE)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        outcome(&row)
    }

    async fn upsert_farm_benchmark(
        &self,
        input: FarmBenchmarkInput,
        at: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        let row = sqlx::query(
            r#"
            INSERT INTO farm_benchmarks (
                id, farm_type, region, financial_year, gross_income, cash_costs, cash_income,
                business_profit, rate_of_return, debt_to_equity, sample_size, source,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (farm_type, region, financial_year) DO UPDATE
               SET gross_income = EXCLUDED.gross_income,
                   cash_costs = EXCLUDED.cash_costs,
                   cash_income = EXCLUDED.cash_income,
                   business_profit = EXCLUDED.business_profit,
                   rate_of_return = EXCLUDED.rate_of_return,
                   debt_to_equity = EXCLUDED.debt_to_equity,
                   sample_size = EXCLUDED.sample_size,
                   updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.key.farm_type)
        .bind(&input.key.region)
        .bind(&input.key.financial_year)
        .bind(input.gross_income)
        .bind(input.cash_costs)
        .bind(input.cash_income)
        .bind(input.business_profit)
        .bind(input.rate_of_return)
        .bind(input.debt_to_equity)
        .bind(i32::try_from(input.sample_size).unwrap_or(i32::MAX))
        .bind(DEFAULT_PROVENANCE)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        outcome(&row)
    }

    async fn crop_forecasts(&self) -> StoreResult<Vec<CropForecast>> {
        let rows = sqlx::query("SELECT * FROM crop_forecasts ORDER BY crop, region, season")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(crop_forecast_from_row).collect()
    }

    async fn commodity_prices(&self) -> StoreResult<Vec<CommodityPrice>> {
        let rows = sqlx::query("SELECT * FROM commodity_prices ORDER BY commodity, price_date")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(commodity_price_from_row).collect()
    }

    async fn farm_benchmarks(&self) -> StoreResult<Vec<FarmBenchmark>> {
        let rows = sqlx::query(
            "SELECT * FROM farm_benchmarks ORDER BY farm_type, region, financial_year",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(farm_benchmark_from_row).collect()
    }

    async fn insert_yield_prediction(&self, prediction: YieldPrediction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO yield_predictions (
                id, region, crop, season, predicted_yield, confidence_low, confidence_high,
                methodology, basis_points, generated_at, valid_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(prediction.id)
        .bind(&prediction.region)
        .bind(&prediction.crop)
        .bind(prediction.season.to_string())
        .bind(prediction.predicted_yield)
        .bind(prediction.confidence_low)
        .bind(prediction.confidence_high)
        .bind(&prediction.methodology)
        .bind(i32::try_from(prediction.basis_points).unwrap_or(i32::MAX))
        .bind(prediction.generated_at)
        .bind(prediction.valid_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_supply_forecast(&self, forecast: SupplyForecast) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO supply_forecasts (
                id, region, state, forecast_date, horizon_days, points, risk_score,
                confidence, generated_at, valid_until
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(forecast.id)
        .bind(&forecast.region)
        .bind(&forecast.state)
        .bind(forecast.forecast_date)
        .bind(forecast.horizon_days as i32)
        .bind(Json(&forecast.points))
        .bind(forecast.risk_score as i16)
        .bind(forecast.confidence)
        .bind(forecast.generated_at)
        .bind(forecast.valid_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn current_yield_predictions(
        &self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<YieldPrediction>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (region, crop, season) *
              FROM yield_predictions
             WHERE valid_until >= $1
             ORDER BY region, crop, season, generated_at DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(yield_prediction_from_row).collect()
    }

    async fn current_supply_forecasts(&self, now: DateTime<Utc>) -> StoreResult<Vec<SupplyForecast>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (region) *
              FROM supply_forecasts
             WHERE valid_until >= $1
             ORDER BY region, generated_at DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(supply_forecast_from_row).collect()
    }

    async fn begin_run(&self, run: IngestionRun) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_runs (id, data_source, dataset, started_at, status, records_processed)
            VALUES ($1, $2, $3, $4, $5, 0)
            "#,
        )
        .bind(run.id)
        .bind(&run.data_source)
        .bind(&run.dataset)
        .bind(run.started_at)
        .bind(run.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_run(&self, run_id: Uuid, completion: RunCompletion) -> StoreResult<IngestionRun> {
        check_completion(&completion)?;
        let updated = sqlx::query(
            r#"
            UPDATE ingestion_runs
               SET status = $2,
                   finished_at = $3,
                   records_processed = $4,
                   error_summary = $5
             WHERE id = $1
               AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(completion.status.as_str())
        .bind(completion.finished_at)
        .bind(i64::try_from(completion.records_processed).unwrap_or(i64::MAX))
        .bind(&completion.error_summary)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return ingestion_run_from_row(&row);
        }

        let existing = sqlx::query("SELECT status FROM ingestion_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        match existing {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Err(StoreError::InvalidTransition {
                    run_id,
                    status: status.parse::<RunStatus>()?,
                })
            }
            None => Err(StoreError::RunNotFound(run_id)),
        }
    }

    async fn ingestion_runs(&self) -> StoreResult<Vec<IngestionRun>> {
        let rows = sqlx::query("SELECT * FROM ingestion_runs ORDER BY started_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ingestion_run_from_row).collect()
    }

    async fn stuck_runs(&self, started_before: DateTime<Utc>) -> StoreResult<Vec<IngestionRun>> {
        let rows = sqlx::query(
            r#"
            SELECT *
              FROM ingestion_runs
             WHERE status = 'running'
               AND started_at < $1
             ORDER BY started_at
            "#,
        )
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ingestion_run_from_row).collect()
    }
}
