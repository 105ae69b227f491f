//! Rolling supply availability curve for one bioenergy region.

use agri_connector::CropForecastRecord;
use agri_core::{
    derived_valid_until, BioenergyRegion, RiskFactor, SupplyForecast, SupplyForecastPoint,
    SUPPLY_HORIZON_DAYS,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

pub const WEEKLY_POINTS: usize = 26;
pub const POINT_STEP_DAYS: i64 = 7;
pub const WEEKS_PER_YEAR: f64 = 52.0;

/// Year-over-year yield change (percent) below which a region is flagged.
pub const REDUCED_YIELD_THRESHOLD_PCT: i64 = -10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonalPhase {
    Harvest,
    Planting,
    Shoulder,
}

impl SeasonalPhase {
    pub fn for_date(date: NaiveDate) -> Self {
        match date.month() {
            11 | 12 | 1 | 2 => SeasonalPhase::Harvest,
            4..=6 => SeasonalPhase::Planting,
            _ => SeasonalPhase::Shoulder,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            SeasonalPhase::Harvest => 1.5,
            SeasonalPhase::Planting => 0.7,
            SeasonalPhase::Shoulder => 1.0,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            SeasonalPhase::Harvest => 0.85,
            _ => 0.70,
        }
    }
}

/// State-level inputs folded out of the matching crop forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SupplyBasis {
    pub total_production: Decimal,
    pub reduced_yield: bool,
}

impl SupplyBasis {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CropForecastRecord>) -> Self {
        let threshold = Decimal::from(REDUCED_YIELD_THRESHOLD_PCT);
        records.into_iter().fold(Self::default(), |acc, record| Self {
            total_production: acc.total_production + record.production.unwrap_or_default(),
            reduced_yield: acc.reduced_yield
                || record.yield_change_yoy.unwrap_or_default() < threshold,
        })
    }

    /// Weekly tonnes before the seasonal multiplier.
    pub fn weekly_base(&self) -> f64 {
        self.total_production.to_f64().unwrap_or_default() / WEEKS_PER_YEAR
    }
}

pub fn build_points(basis: SupplyBasis, start: NaiveDate) -> Vec<SupplyForecastPoint> {
    let base = basis.weekly_base();
    (0..WEEKLY_POINTS as i64)
        .map(|week| {
            let date = start + Duration::days(week * POINT_STEP_DAYS);
            let phase = SeasonalPhase::for_date(date);
            let mut risk_factors = Vec::new();
            if phase == SeasonalPhase::Shoulder {
                risk_factors.push(RiskFactor::OffSeasonStorageDependency);
            }
            if basis.reduced_yield {
                risk_factors.push(RiskFactor::ReducedYieldForecast);
            }
            SupplyForecastPoint {
                date,
                available_tonnes: (base * phase.multiplier()).round(),
                confidence: phase.confidence(),
                risk_factors,
            }
        })
        .collect()
}

/// Mean per-point penalty of `factors * 10 + (1 - confidence) * 20`, clamped to 0..=100.
pub fn risk_score(points: &[SupplyForecastPoint]) -> u8 {
    if points.is_empty() {
        return 0;
    }
    let total: f64 = points
        .iter()
        .map(|p| p.risk_factors.len() as f64 * 10.0 + (1.0 - p.confidence) * 20.0)
        .sum();
    (total / points.len() as f64).round().clamp(0.0, 100.0) as u8
}

pub fn aggregate_confidence(points: &[SupplyForecastPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mean = points.iter().map(|p| p.confidence).sum::<f64>() / points.len() as f64;
    (mean * 100.0).round() / 100.0
}

pub fn build_supply_forecast(
    region: &BioenergyRegion,
    basis: SupplyBasis,
    generated_at: DateTime<Utc>,
) -> SupplyForecast {
    let forecast_date = generated_at.date_naive();
    let points = build_points(basis, forecast_date);
    SupplyForecast {
        id: Uuid::new_v4(),
        region: region.name.clone(),
        state: region.state.clone(),
        forecast_date,
        horizon_days: SUPPLY_HORIZON_DAYS,
        risk_score: risk_score(&points),
        confidence: aggregate_confidence(&points),
        points,
        generated_at,
        valid_until: derived_valid_until(generated_at),
    }
}
