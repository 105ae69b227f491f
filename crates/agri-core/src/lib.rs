//! Core domain model for the agricultural intelligence pipeline.
//!
//! Sourced entities ([`CropForecast`], [`CommodityPrice`], [`FarmBenchmark`]) are keyed
//! by natural composite keys and reconciled in place. Derived entities
//! ([`YieldPrediction`], [`SupplyForecast`]) are append-only and carry a validity window.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "agri-core";

/// Provenance tag stamped on rows inserted by the reconciliation store.
pub const DEFAULT_PROVENANCE: &str = "abares";

/// Validity window applied to every derived artifact.
pub const DERIVED_VALIDITY_DAYS: i64 = 7;

pub const SUPPLY_HORIZON_DAYS: u32 = 180;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid season label {0:?}, expected YYYY-YYYY with consecutive years")]
    InvalidSeason(String),
    #[error("unknown run status {0:?}")]
    UnknownRunStatus(String),
    #[error("bioenergy region {region} is bound to untracked state {state}")]
    UntrackedState { region: String, state: String },
    #[error("registry has no {0}")]
    EmptyRegistry(&'static str),
}

/// Australian growing season label, serialized as `"YYYY-YYYY"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    /// March onwards belongs to the season starting this year; January and February
    /// still belong to the season that started last year.
    pub fn for_date(date: NaiveDate) -> Self {
        if date.month() >= 3 {
            Self::new(date.year())
        } else {
            Self::new(date.year() - 1)
        }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn end_year(&self) -> i32 {
        self.start_year + 1
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_year, self.end_year())
    }
}

impl FromStr for Season {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::InvalidSeason(s.to_string());
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        if start.len() != 4 || end.len() != 4 {
            return Err(invalid());
        }
        let start: i32 = start.parse().map_err(|_| invalid())?;
        let end: i32 = end.parse().map_err(|_| invalid())?;
        if end != start + 1 {
            return Err(invalid());
        }
        Ok(Self::new(start))
    }
}

impl TryFrom<String> for Season {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Season> for String {
    fn from(season: Season) -> Self {
        season.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CropForecastKey {
    pub crop: String,
    pub region: String,
    pub season: Season,
}

impl fmt::Display for CropForecastKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.crop, self.region, self.season)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommodityPriceKey {
    pub commodity: String,
    pub price_date: NaiveDate,
}

impl fmt::Display for CommodityPriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.commodity, self.price_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FarmBenchmarkKey {
    pub farm_type: String,
    pub region: String,
    pub financial_year: String,
}

impl fmt::Display for FarmBenchmarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.farm_type, self.region, self.financial_year)
    }
}

/// Reconciliation input for a crop forecast. Measurements are already defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropForecastInput {
    pub key: CropForecastKey,
    pub area_planted: Decimal,
    pub production: Decimal,
    pub yield_per_hectare: Decimal,
    pub yield_change_yoy: Decimal,
    pub production_change_yoy: Decimal,
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropForecast {
    pub id: Uuid,
    pub crop: String,
    pub region: String,
    pub season: Season,
    pub area_planted: Decimal,
    pub production: Decimal,
    pub yield_per_hectare: Decimal,
    pub yield_change_yoy: Decimal,
    pub production_change_yoy: Decimal,
    pub reported_at: DateTime<Utc>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CropForecast {
    pub fn key(&self) -> CropForecastKey {
        CropForecastKey {
            crop: self.crop.clone(),
            region: self.region.clone(),
            season: self.season,
        }
    }

    pub fn from_input(input: CropForecastInput, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            crop: input.key.crop,
            region: input.key.region,
            season: input.key.season,
            area_planted: input.area_planted,
            production: input.production,
            yield_per_hectare: input.yield_per_hectare,
            yield_change_yoy: input.yield_change_yoy,
            production_change_yoy: input.production_change_yoy,
            reported_at: input.reported_at.unwrap_or(at),
            source: DEFAULT_PROVENANCE.to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Overwrite measurements only; key fields, provenance and `created_at` stay put.
    pub fn apply(&mut self, input: &CropForecastInput, at: DateTime<Utc>) {
        self.area_planted = input.area_planted;
        self.production = input.production;
        self.yield_per_hectare = input.yield_per_hectare;
        self.yield_change_yoy = input.yield_change_yoy;
        self.production_change_yoy = input.production_change_yoy;
        self.reported_at = input.reported_at.unwrap_or(at);
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityPriceInput {
    pub key: CommodityPriceKey,
    pub price: Decimal,
    pub currency: String,
    pub unit: String,
    pub change_week_pct: Decimal,
    pub change_month_pct: Decimal,
    pub change_year_pct: Decimal,
    pub five_year_average: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityPrice {
    pub id: Uuid,
    pub commodity: String,
    pub price_date: NaiveDate,
    pub price: Decimal,
    pub currency: String,
    pub unit: String,
    pub change_week_pct: Decimal,
    pub change_month_pct: Decimal,
    pub change_year_pct: Decimal,
    pub five_year_average: Decimal,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommodityPrice {
    pub fn key(&self) -> CommodityPriceKey {
        CommodityPriceKey {
            commodity: self.commodity.clone(),
            price_date: self.price_date,
        }
    }

    pub fn from_input(input: CommodityPriceInput, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            commodity: input.key.commodity,
            price_date: input.key.price_date,
            price: input.price,
            currency: input.currency,
            unit: input.unit,
            change_week_pct: input.change_week_pct,
            change_month_pct: input.change_month_pct,
            change_year_pct: input.change_year_pct,
            five_year_average: input.five_year_average,
            source: DEFAULT_PROVENANCE.to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn apply(&mut self, input: &CommodityPriceInput, at: DateTime<Utc>) {
        self.price = input.price;
        self.currency = input.currency.clone();
        self.unit = input.unit.clone();
        self.change_week_pct = input.change_week_pct;
        self.change_month_pct = input.change_month_pct;
        self.change_year_pct = input.change_year_pct;
        self.five_year_average = input.five_year_average;
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmBenchmarkInput {
    pub key: FarmBenchmarkKey,
    pub gross_income: Decimal,
    pub cash_costs: Decimal,
    pub cash_income: Decimal,
    pub business_profit: Decimal,
    pub rate_of_return: Decimal,
    pub debt_to_equity: Decimal,
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmBenchmark {
    pub id: Uuid,
    pub farm_type: String,
    pub region: String,
    pub financial_year: String,
    pub gross_income: Decimal,
    pub cash_costs: Decimal,
    pub cash_income: Decimal,
    pub business_profit: Decimal,
    pub rate_of_return: Decimal,
    pub debt_to_equity: Decimal,
    pub sample_size: u32,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FarmBenchmark {
    pub fn key(&self) -> FarmBenchmarkKey {
        FarmBenchmarkKey {
            farm_type: self.farm_type.clone(),
            region: self.region.clone(),
            financial_year: self.financial_year.clone(),
        }
    }

    pub fn from_input(input: FarmBenchmarkInput, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            farm_type: input.key.farm_type,
            region: input.key.region,
            financial_year: input.key.financial_year,
            gross_income: input.gross_income,
            cash_costs: input.cash_costs,
            cash_income: input.cash_income,
            business_profit: input.business_profit,
            rate_of_return: input.rate_of_return,
            debt_to_equity: input.debt_to_equity,
            sample_size: input.sample_size,
            source: DEFAULT_PROVENANCE.to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn apply(&mut self, input: &FarmBenchmarkInput, at: DateTime<Utc>) {
        self.gross_income = input.gross_income;
        self.cash_costs = input.cash_costs;
        self.cash_income = input.cash_income;
        self.business_profit = input.business_profit;
        self.rate_of_return = input.rate_of_return;
        self.debt_to_equity = input.debt_to_equity;
        self.sample_size = input.sample_size;
        self.updated_at = at;
    }
}

/// Result of an atomic insert-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldPrediction {
    pub id: Uuid,
    pub region: String,
    pub crop: String,
    pub season: Season,
    pub predicted_yield: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub methodology: String,
    pub basis_points: u32,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl YieldPrediction {
    pub fn key(&self) -> CropForecastKey {
        CropForecastKey {
            crop: self.crop.clone(),
            region: self.region.clone(),
            season: self.season,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until >= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    OffSeasonStorageDependency,
    ReducedYieldForecast,
}

impl RiskFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::OffSeasonStorageDependency => "off_season_storage_dependency",
            RiskFactor::ReducedYieldForecast => "reduced_yield_forecast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyForecastPoint {
    pub date: NaiveDate,
    pub available_tonnes: f64,
    pub confidence: f64,
    pub risk_factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyForecast {
    pub id: Uuid,
    pub region: String,
    pub state: String,
    pub forecast_date: NaiveDate,
    pub horizon_days: u32,
    pub points: Vec<SupplyForecastPoint>,
    pub risk_score: u8,
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl SupplyForecast {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until >= now
    }
}

pub fn derived_valid_until(generated_at: DateTime<Utc>) -> DateTime<Utc> {
    generated_at + Duration::days(DERIVED_VALIDITY_DAYS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(DomainError::UnknownRunStatus(other.to_string())),
        }
    }
}

/// Audit record of one job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub data_source: String,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub records_processed: u64,
    pub error_summary: Option<String>,
}

impl IngestionRun {
    pub fn start(data_source: &str, dataset: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            data_source: data_source.to_string(),
            dataset: dataset.to_string(),
            started_at: at,
            finished_at: None,
            status: RunStatus::Running,
            records_processed: 0,
            error_summary: None,
        }
    }
}

/// Terminal write applied to a running [`IngestionRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub finished_at: DateTime<Utc>,
    pub records_processed: u64,
    pub error_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BioenergyRegion {
    pub name: String,
    pub state: String,
}

/// The fixed sweep dimensions of the derived jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRegistry {
    pub states: Vec<String>,
    pub crops: Vec<String>,
    pub bioenergy_regions: Vec<BioenergyRegion>,
}

impl Default for TrackedRegistry {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        let regions = [
            ("Riverina", "NSW"),
            ("Central West", "NSW"),
            ("Darling Downs", "QLD"),
            ("Wimmera", "VIC"),
            ("Eyre Peninsula", "SA"),
            ("Wheatbelt", "WA"),
            ("Northern Tasmania", "TAS"),
            ("Katherine", "NT"),
        ];
        Self {
            states: strings(&["NSW", "VIC", "QLD", "SA", "WA", "TAS", "NT"]),
            crops: strings(&[
                "wheat", "barley", "canola", "sorghum", "oats", "cotton", "chickpeas", "lentils",
            ]),
            bioenergy_regions: regions
                .iter()
                .map(|(name, state)| BioenergyRegion {
                    name: name.to_string(),
                    state: state.to_string(),
                })
                .collect(),
        }
    }
}

impl TrackedRegistry {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.states.is_empty() {
            return Err(DomainError::EmptyRegistry("states"));
        }
        if self.crops.is_empty() {
            return Err(DomainError::EmptyRegistry("crops"));
        }
        for region in &self.bioenergy_regions {
            if !self.states.contains(&region.state) {
                return Err(DomainError::UntrackedState {
                    region: region.name.clone(),
                    state: region.state.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Source of "now" for jobs, so windows and seasons are reproducible.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn season_rolls_over_in_march() {
        assert_eq!(Season::for_date(date(2025, 3, 15)).to_string(), "2025-2026");
        assert_eq!(Season::for_date(date(2025, 3, 1)).to_string(), "2025-2026");
        assert_eq!(Season::for_date(date(2025, 2, 28)).to_string(), "2024-2025");
        assert_eq!(Season::for_date(date(2025, 2, 1)).to_string(), "2024-2025");
        assert_eq!(Season::for_date(date(2025, 1, 1)).to_string(), "2024-2025");
        assert_eq!(Season::for_date(date(2025, 12, 31)).to_string(), "2025-2026");
    }

    #[test]
    fn season_parses_and_rejects_non_consecutive_years() {
        assert_eq!("2025-2026".parse::<Season>().unwrap(), Season::new(2025));
        assert!("2025-2027".parse::<Season>().is_err());
        assert!("25-26".parse::<Season>().is_err());
        assert!("2025".parse::<Season>().is_err());
    }

    #[test]
    fn season_serializes_as_label() {
        let json = serde_json::to_string(&Season::new(2024)).unwrap();
        assert_eq!(json, "\"2024-2025\"");
        let back: Season = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Season::new(2024));
    }

    #[test]
    fn crop_forecast_apply_keeps_key_and_created_at() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let t1 = t0 + Duration::hours(24);
        let input = CropForecastInput {
            key: CropForecastKey {
                crop: "wheat".into(),
                region: "NSW".into(),
                season: Season::new(2025),
            },
            area_planted: Decimal::from(10),
            production: Decimal::from(1000),
            yield_per_hectare: Decimal::new(21, 1),
            yield_change_yoy: Decimal::from(-3),
            production_change_yoy: Decimal::ONE,
            reported_at: None,
        };
        let mut row = CropForecast::from_input(input.clone(), t0);
        let mut changed = input.clone();
        changed.production = Decimal::new(12005, 1);
        row.apply(&changed, t1);

        assert_eq!(row.key(), input.key);
        assert_eq!(row.production.to_string(), "1200.5");
        assert_eq!(row.yield_per_hectare, Decimal::new(21, 1));
        assert_eq!(row.created_at, t0);
        assert_eq!(row.updated_at, t1);
        assert_eq!(row.source, DEFAULT_PROVENANCE);
    }

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        for status in [RunStatus::Succeeded, RunStatus::Partial, RunStatus::Failed] {
            assert!(status.is_terminal());
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }

    #[test]
    fn default_registry_has_expected_dimensions() {
        let registry = TrackedRegistry::default();
        assert_eq!(registry.states.len(), 7);
        assert_eq!(registry.crops.len(), 8);
        assert_eq!(registry.bioenergy_regions.len(), 8);
        registry.validate().unwrap();
    }

    #[test]
    fn registry_rejects_region_in_untracked_state() {
        let mut registry = TrackedRegistry::default();
        registry.bioenergy_regions.push(BioenergyRegion {
            name: "Canberra Fringe".into(),
            state: "ACT".into(),
        });
        assert!(matches!(
            registry.validate(),
            Err(DomainError::UntrackedState { .. })
        ));
    }

    #[test]
    fn fixed_clock_advances() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        clock.advance(Duration::days(1));
        assert_eq!(clock.today(), date(2025, 1, 2));

        let t1 = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        clock.set(t1);
        assert_eq!(clock.now(), t1);
        assert_eq!(Season::for_date(clock.today()), Season::new(2025));
    }
}
