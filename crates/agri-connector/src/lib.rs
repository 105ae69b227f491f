//! Source connector contract + fixture-first connector implementation.
//!
//! The connector hands the pipeline partially-typed records. Conversion into the
//! reconciliation inputs of `agri-core` happens here: key fields are required,
//! absent numeric measurements default to zero.

use std::fs;
use std::path::Path;

use agri_core::{
    CommodityPriceInput, CommodityPriceKey, CropForecastInput, CropForecastKey,
    FarmBenchmarkInput, FarmBenchmarkKey, Season,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "agri-connector";

pub const CATEGORY_CROP_FORECAST: &str = "crop_forecast";
pub const CATEGORY_COMMODITY_PRICE: &str = "commodity_price";

const DEFAULT_CURRENCY: &str = "AUD";
const DEFAULT_PRICE_UNIT: &str = "tonne";

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector unavailable: {0}")]
    Unavailable(String),
    #[error("no basis data for {crop} in {region} ({season})")]
    NoBasisData {
        region: String,
        crop: String,
        season: Season,
    },
    #[error("{record} is missing required field {field}")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Raw discovered data point as emitted by the upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub id: String,
    pub category: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalBatch {
    pub success: bool,
    #[serde(default)]
    pub signals: Vec<RawSignal>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Signal payload after classification by category.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    CropForecast(CropForecastRecord),
    CommodityPrice(CommodityPriceRecord),
    Unclassified { category: String },
}

impl RawSignal {
    pub fn classify(&self) -> Result<SignalPayload, ConnectorError> {
        let metadata = if self.metadata.is_null() {
            JsonValue::Object(Default::default())
        } else {
            self.metadata.clone()
        };
        match self.category.as_str() {
            CATEGORY_CROP_FORECAST => Ok(SignalPayload::CropForecast(serde_json::from_value(
                metadata,
            )?)),
            CATEGORY_COMMODITY_PRICE => Ok(SignalPayload::CommodityPrice(
                serde_json::from_value(metadata)?,
            )),
            other => Ok(SignalPayload::Unclassified {
                category: other.to_string(),
            }),
        }
    }
}

fn required(
    value: &Option<String>,
    record: &'static str,
    field: &'static str,
) -> Result<String, ConnectorError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or(ConnectorError::MissingField { record, field })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CropForecastRecord {
    pub crop: Option<String>,
    pub region: Option<String>,
    pub season: Option<String>,
    pub area_planted: Option<Decimal>,
    pub production: Option<Decimal>,
    pub yield_per_hectare: Option<Decimal>,
    pub yield_change_yoy: Option<Decimal>,
    pub production_change_yoy: Option<Decimal>,
    pub reported_at: Option<DateTime<Utc>>,
}

impl CropForecastRecord {
    pub fn to_input(&self) -> Result<CropForecastInput, ConnectorError> {
        let season_label = required(&self.season, "crop forecast", "season")?;
        let season: Season = season_label
            .parse()
            .map_err(|err: agri_core::DomainError| ConnectorError::Malformed(err.to_string()))?;
        Ok(CropForecastInput {
            key: CropForecastKey {
                crop: required(&self.crop, "crop forecast", "crop")?,
                region: required(&self.region, "crop forecast", "region")?,
                season,
            },
            area_planted: self.area_planted.unwrap_or_default(),
            production: self.production.unwrap_or_default(),
            yield_per_hectare: self.yield_per_hectare.unwrap_or_default(),
            yield_change_yoy: self.yield_change_yoy.unwrap_or_default(),
            production_change_yoy: self.production_change_yoy.unwrap_or_default(),
            reported_at: self.reported_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommodityPriceRecord {
    pub commodity: Option<String>,
    pub date: Option<NaiveDate>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub unit: Option<String>,
    pub change_week_pct: Option<Decimal>,
    pub change_month_pct: Option<Decimal>,
    pub change_year_pct: Option<Decimal>,
    pub five_year_average: Option<Decimal>,
}

impl CommodityPriceRecord {
    /// Observations without their own date are filed under `observed_on`.
    pub fn to_input(&self, observed_on: NaiveDate) -> Result<CommodityPriceInput, ConnectorError> {
        Ok(CommodityPriceInput {
            key: CommodityPriceKey {
                commodity: required(&self.commodity, "commodity price", "commodity")?,
                price_date: self.date.unwrap_or(observed_on),
            },
            price: self.price.unwrap_or_default(),
            currency: self
                .currency
                .clone()
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            unit: self
                .unit
                .clone()
                .unwrap_or_else(|| DEFAULT_PRICE_UNIT.to_string()),
            change_week_pct: self.change_week_pct.unwrap_or_default(),
            change_month_pct: self.change_month_pct.unwrap_or_default(),
            change_year_pct: self.change_year_pct.unwrap_or_default(),
            five_year_average: self.five_year_average.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FarmBenchmarkRecord {
    pub farm_type: Option<String>,
    pub region: Option<String>,
    pub financial_year: Option<String>,
    pub gross_income: Option<Decimal>,
    pub cash_costs: Option<Decimal>,
    pub cash_income: Option<Decimal>,
    pub business_profit: Option<Decimal>,
    pub rate_of_return: Option<Decimal>,
    pub debt_to_equity: Option<Decimal>,
    pub sample_size: Option<u32>,
}

impl FarmBenchmarkRecord {
    pub fn to_input(&self) -> Result<FarmBenchmarkInput, ConnectorError> {
        Ok(FarmBenchmarkInput {
            key: FarmBenchmarkKey {
                farm_type: required(&self.farm_type, "farm benchmark", "farm_type")?,
                region: required(&self.region, "farm benchmark", "region")?,
                financial_year: required(&self.financial_year, "farm benchmark", "financial_year")?,
            },
            gross_income: self.gross_income.unwrap_or_default(),
            cash_costs: self.cash_costs.unwrap_or_default(),
            cash_income: self.cash_income.unwrap_or_default(),
            business_profit: self.business_profit.unwrap_or_default(),
            rate_of_return: self.rate_of_return.unwrap_or_default(),
            debt_to_equity: self.debt_to_equity.unwrap_or_default(),
            sample_size: self.sample_size.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandUseRecord {
    pub region: Option<String>,
    pub land_use: Option<String>,
    pub area_hectares: Option<Decimal>,
}

/// The connector's consolidated current view across all tracked data types.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntelligenceSnapshot {
    #[serde(default)]
    pub crop_forecasts: Vec<CropForecastRecord>,
    #[serde(default)]
    pub commodity_prices: Vec<CommodityPriceRecord>,
    #[serde(default)]
    pub farm_benchmarks: Vec<FarmBenchmarkRecord>,
    #[serde(default)]
    pub land_use: Vec<LandUseRecord>,
}

impl IntelligenceSnapshot {
    /// Crop forecast records whose region matches `state`, case-insensitively.
    pub fn forecasts_for_state<'a>(
        &'a self,
        state: &'a str,
    ) -> impl Iterator<Item = &'a CropForecastRecord> + 'a {
        self.crop_forecasts.iter().filter(move |record| {
            record
                .region
                .as_deref()
                .is_some_and(|region| region.trim().eq_ignore_ascii_case(state))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldEstimate {
    pub predicted_yield: f64,
    pub confidence_interval: [f64; 2],
    pub methodology: String,
    #[serde(default)]
    pub basis_data: Vec<JsonValue>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn fetch_signals(&self, since: DateTime<Utc>) -> Result<SignalBatch, ConnectorError>;

    async fn get_intelligence(&self) -> Result<IntelligenceSnapshot, ConnectorError>;

    async fn predict_yield(
        &self,
        region: &str,
        crop: &str,
        season: Season,
    ) -> Result<YieldEstimate, ConnectorError>;
}

/// On-disk capture of connector output used to drive the pipeline offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub signals: Vec<RawSignal>,
    #[serde(default)]
    pub intelligence: IntelligenceSnapshot,
    #[serde(default)]
    pub yield_estimates: Vec<FixtureYieldEstimate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureYieldEstimate {
    pub region: String,
    pub crop: String,
    pub season: Season,
    #[serde(flatten)]
    pub estimate: YieldEstimate,
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Serves a captured [`FixtureBundle`]. Yield predictions come from recorded
/// estimates when present, otherwise from the snapshot's matching forecasts.
#[derive(Debug, Clone)]
pub struct FixtureConnector {
    bundle: FixtureBundle,
}

pub const SNAPSHOT_MEAN_METHODOLOGY: &str = "snapshot_mean_yield_pm10";

impl FixtureConnector {
    pub fn new(bundle: FixtureBundle) -> Self {
        Self { bundle }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_bundle(path)?))
    }

    pub fn bundle(&self) -> &FixtureBundle {
        &self.bundle
    }

    fn recorded_estimate(&self, region: &str, crop: &str, season: Season) -> Option<YieldEstimate> {
        self.bundle
            .yield_estimates
            .iter()
            .find(|e| {
                e.season == season
                    && e.region.eq_ignore_ascii_case(region)
                    && e.crop.eq_ignore_ascii_case(crop)
            })
            .map(|e| e.estimate.clone())
    }

    fn snapshot_estimate(&self, region: &str, crop: &str, season: Season) -> Option<YieldEstimate> {
        let season_label = season.to_string();
        let basis: Vec<&CropForecastRecord> = self
            .bundle
            .intelligence
            .forecasts_for_state(region)
            .filter(|r| {
                r.crop.as_deref().is_some_and(|c| c.eq_ignore_ascii_case(crop))
                    && r.season.as_deref() == Some(season_label.as_str())
                    && r.yield_per_hectare.is_some()
            })
            .collect();
        if basis.is_empty() {
            return None;
        }
        let total: Decimal = basis.iter().filter_map(|r| r.yield_per_hectare).sum();
        let mean = (total / Decimal::from(basis.len())).to_f64()?;
        let margin = mean.abs() * 0.1;
        Some(YieldEstimate {
            predicted_yield: mean,
            confidence_interval: [mean - margin, mean + margin],
            methodology: SNAPSHOT_MEAN_METHODOLOGY.to_string(),
            basis_data: basis
                .into_iter()
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect(),
        })
    }
}

#[async_trait]
impl Connector for FixtureConnector {
    async fn fetch_signals(&self, since: DateTime<Utc>) -> Result<SignalBatch, ConnectorError> {
        Ok(SignalBatch {
            success: true,
            signals: self
                .bundle
                .signals
                .iter()
                .filter(|s| s.discovered_at >= since)
                .cloned()
                .collect(),
            errors: Vec::new(),
        })
    }

    async fn get_intelligence(&self) -> Result<IntelligenceSnapshot, ConnectorError> {
        Ok(self.bundle.intelligence.clone())
    }

    async fn predict_yield(
        &self,
        region: &str,
        crop: &str,
        season: Season,
    ) -> Result<YieldEstimate, ConnectorError> {
        self.recorded_estimate(region, crop, season)
            .or_else(|| self.snapshot_estimate(region, crop, season))
            .ok_or_else(|| ConnectorError::NoBasisData {
                region: region.to_string(),
                crop: crop.to_string(),
                season,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn sample_bundle_path() -> PathBuf {
        workspace_root()
            .join("fixtures")
            .join("abares")
            .join("sample")
            .join("bundle.json")
    }

    fn signal(category: &str, metadata: JsonValue) -> RawSignal {
        RawSignal {
            id: "sig-1".into(),
            category: category.into(),
            discovered_at: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
            metadata,
        }
    }

    #[test]
    fn crop_forecast_signal_defaults_missing_numbers_to_zero() {
        let payload = signal(
            CATEGORY_CROP_FORECAST,
            json!({"crop": "wheat", "region": "NSW", "season": "2025-2026", "production": 1000.0}),
        )
        .classify()
        .unwrap();
        let SignalPayload::CropForecast(record) = payload else {
            panic!("expected crop forecast payload");
        };
        let input = record.to_input().unwrap();
        assert_eq!(input.production, Decimal::from(1000));
        assert_eq!(input.area_planted, Decimal::ZERO);
        assert_eq!(input.yield_change_yoy, Decimal::ZERO);
        assert_eq!(input.key.season, Season::new(2025));
    }

    #[test]
    fn crop_forecast_without_key_field_is_rejected() {
        let record = CropForecastRecord {
            crop: Some("wheat".into()),
            season: Some("2025-2026".into()),
            ..Default::default()
        };
        assert!(matches!(
            record.to_input(),
            Err(ConnectorError::MissingField { field: "region", .. })
        ));
    }

    #[test]
    fn malformed_season_is_reported() {
        let record = CropForecastRecord {
            crop: Some("wheat".into()),
            region: Some("NSW".into()),
            season: Some("2025".into()),
            ..Default::default()
        };
        assert!(matches!(record.to_input(), Err(ConnectorError::Malformed(_))));
    }

    #[test]
    fn commodity_price_falls_back_to_observation_date_and_aud() {
        let observed = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let record = CommodityPriceRecord {
            commodity: Some("wheat".into()),
            price: Some(Decimal::from(350)),
            ..Default::default()
        };
        let input = record.to_input(observed).unwrap();
        assert_eq!(input.key.price_date, observed);
        assert_eq!(input.currency, "AUD");
        assert_eq!(input.unit, "tonne");
        assert_eq!(input.five_year_average, Decimal::ZERO);
    }

    #[test]
    fn price_signal_keeps_exact_cents() {
        let payload = signal(
            CATEGORY_COMMODITY_PRICE,
            json!({"commodity": "canola", "price": 712.15, "change_week_pct": -0.3}),
        )
        .classify()
        .unwrap();
        let SignalPayload::CommodityPrice(record) = payload else {
            panic!("expected commodity price payload");
        };
        let input = record
            .to_input(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())
            .unwrap();
        assert_eq!(input.price, Decimal::new(71215, 2));
        assert_eq!(input.change_week_pct, Decimal::new(-3, 1));
    }

    #[test]
    fn non_numeric_measurement_fails_classification() {
        let result = signal(
            CATEGORY_COMMODITY_PRICE,
            json!({"commodity": "wheat", "price": "three fifty"}),
        )
        .classify();
        assert!(matches!(result, Err(ConnectorError::Json(_))));
    }

    #[test]
    fn unknown_categories_stay_unclassified() {
        let payload = signal("land_use", JsonValue::Null).classify().unwrap();
        assert_eq!(
            payload,
            SignalPayload::Unclassified {
                category: "land_use".into()
            }
        );
    }

    #[test]
    fn forecasts_for_state_is_case_insensitive() {
        let snapshot = IntelligenceSnapshot {
            crop_forecasts: vec![
                CropForecastRecord {
                    region: Some("nsw".into()),
                    ..Default::default()
                },
                CropForecastRecord {
                    region: Some("QLD".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.forecasts_for_state("NSW").count(), 1);
    }

    #[tokio::test]
    async fn sample_fixture_bundle_loads_and_serves() {
        let connector = FixtureConnector::from_path(sample_bundle_path()).expect("load fixture");
        let snapshot = connector.get_intelligence().await.unwrap();
        assert!(!snapshot.crop_forecasts.is_empty());
        assert!(!snapshot.farm_benchmarks.is_empty());

        let since = connector.bundle().captured_at - chrono::Duration::days(7);
        let batch = connector.fetch_signals(since).await.unwrap();
        assert!(batch.success);
        for raw in &batch.signals {
            raw.classify().expect("fixture signals classify");
        }
    }

    #[tokio::test]
    async fn fixture_predicts_from_snapshot_mean() {
        let bundle = FixtureBundle {
            fixture_id: "test".into(),
            captured_at: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
            intelligence: IntelligenceSnapshot {
                crop_forecasts: vec![CropForecastRecord {
                    crop: Some("wheat".into()),
                    region: Some("NSW".into()),
                    season: Some("2025-2026".into()),
                    yield_per_hectare: Some(Decimal::new(25, 1)),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let connector = FixtureConnector::new(bundle);
        let estimate = connector
            .predict_yield("NSW", "wheat", Season::new(2025))
            .await
            .unwrap();
        assert_eq!(estimate.predicted_yield, 2.5);
        assert_eq!(estimate.confidence_interval, [2.25, 2.75]);
        assert_eq!(estimate.basis_data.len(), 1);

        let missing = connector
            .predict_yield("QLD", "wheat", Season::new(2025))
            .await
            .unwrap_err();
        assert!(matches!(missing, ConnectorError::NoBasisData { .. }));
    }

    #[test]
    fn bundle_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bundle.json");
        let bundle = FixtureBundle {
            fixture_id: "disk".into(),
            captured_at: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
            ..Default::default()
        };
        std::fs::write(&path, serde_json::to_vec(&bundle).unwrap()).unwrap();
        let loaded = load_fixture_bundle(&path).unwrap();
        assert_eq!(loaded.fixture_id, "disk");
        assert!(load_fixture_bundle(dir.path().join("missing.json")).is_err());
    }
}
