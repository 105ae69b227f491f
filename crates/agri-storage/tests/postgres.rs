//! Runs against a disposable Postgres named by `DATABASE_URL`:
//! `cargo test -p agri-storage -- --ignored`.

use agri_core::{
    CommodityPriceInput, CommodityPriceKey, IngestionRun, RunCompletion, RunStatus, UpsertOutcome,
};
use agri_storage::{PgStore, StoreError, WarehouseStore};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

async fn store_from_env() -> Option<PgStore> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.expect("connect");
    let store = PgStore::from_pool(pool);
    store.migrate().await.expect("migrate");
    Some(store)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 12, 2, 0, 0).unwrap()
}

fn price(commodity: &str, cents: i64) -> CommodityPriceInput {
    CommodityPriceInput {
        key: CommodityPriceKey {
            commodity: commodity.to_string(),
            price_date: NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),
        },
        price: Decimal::new(cents, 2),
        currency: "AUD".into(),
        unit: "tonne".into(),
        change_week_pct: Decimal::new(-3, 1),
        change_month_pct: Decimal::ZERO,
        change_year_pct: Decimal::ZERO,
        five_year_average: Decimal::ZERO,
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn price_upsert_conflicts_on_natural_key() {
    let Some(store) = store_from_env().await else {
        return;
    };
    let commodity = format!("canola-{}", Uuid::new_v4());

    let first = store.upsert_commodity_price(price(&commodity, 71215), t0()).await.unwrap();
    let second = store
        .upsert_commodity_price(price(&commodity, 72030), t0() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(first, UpsertOutcome::Inserted);
    assert_eq!(second, UpsertOutcome::Updated);

    let rows: Vec<_> = store
        .commodity_prices()
        .await
        .unwrap()
        .into_iter()
        .filter(|row| row.commodity == commodity)
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].price, Decimal::new(72030, 2));
    assert_eq!(rows[0].change_week_pct, Decimal::new(-3, 1));
    assert_eq!(rows[0].created_at, t0());
    assert_eq!(rows[0].updated_at, t0() + Duration::days(1));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_price_upserts_insert_once() {
    let Some(store) = store_from_env().await else {
        return;
    };
    let commodity = format!("barley-{}", Uuid::new_v4());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let input = price(&commodity, 30000 + i);
        handles.push(tokio::spawn(async move {
            store.upsert_commodity_price(input, t0()).await.unwrap()
        }));
    }
    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() == UpsertOutcome::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    let count = store
        .commodity_prices()
        .await
        .unwrap()
        .iter()
        .filter(|row| row.commodity == commodity)
        .count();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn finish_run_accepts_one_terminal_write() {
    let Some(store) = store_from_env().await else {
        return;
    };
    let run = IngestionRun::start("abares", "supply_forecasts", t0());
    let run_id = run.id;
    store.begin_run(run).await.unwrap();

    let done = store
        .finish_run(
            run_id,
            RunCompletion {
                status: RunStatus::Partial,
                finished_at: t0() + Duration::minutes(3),
                records_processed: 6,
                error_summary: Some("Mallee: connector timeout".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Partial);
    assert_eq!(done.records_processed, 6);

    let again = store
        .finish_run(
            run_id,
            RunCompletion {
                status: RunStatus::Succeeded,
                finished_at: t0() + Duration::minutes(4),
                records_processed: 7,
                error_summary: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        StoreError::InvalidTransition { status: RunStatus::Partial, .. }
    ));

    let missing = store
        .finish_run(
            Uuid::new_v4(),
            RunCompletion {
                status: RunStatus::Failed,
                finished_at: t0(),
                records_processed: 0,
                error_summary: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, StoreError::RunNotFound(_)));
}
