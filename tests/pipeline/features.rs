use serde_json::json;

use super::common::{day, Harness};
use groundwater_forecast::domain::FeatureRow;
use groundwater_forecast::store::{find_all, Collection, Query, SortOrder};

async fn seed_ten_days(h: &Harness) {
    h.region("A", "sandy_loam").await;
    for offset in 0..10 {
        h.reading("A", "w1", offset, 6, 10.0 + offset as f64).await;
        h.rain("A", offset, 5.0, "gauge").await;
    }
}

async fn feature_rows(h: &Harness) -> Vec<FeatureRow> {
    find_all(
        &*h.store,
        Collection::RegionFeatureStore,
        Query::default().sorted(SortOrder::Ascending),
    )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ten_days_yield_two_feature_rows() {
    let h = Harness::new();
    seed_ten_days(&h).await;
    h.run_days(10).await;

    let rows = feature_rows(&h).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].date, day(8));
    assert_eq!(rows[1].date, day(9));
    assert_eq!(rows[0].feat_water_trend_7d, 7.0);
    assert_eq!(rows[1].feat_water_trend_7d, 7.0);
    assert_eq!(rows[0].target_water_level, 18.0);
    // 5 mm less the default 0.625 mm evaporation
    assert_eq!(rows[0].effective_rainfall, 4.375);
    assert_eq!(rows[0].feat_net_flux_1d_lag, 4.375);
    assert_eq!(rows[0].feat_soil_permeability, 0.4);
    for row in &rows {
        let value = serde_json::to_value(row).unwrap();
        for (_, field) in value.as_object().unwrap() {
            if let Some(f) = field.as_f64() {
                assert!(f.is_finite());
            }
        }
    }
}

#[tokio::test]
async fn test_feature_rerun_replaces_the_day() {
    let h = Harness::new();
    seed_ten_days(&h).await;
    h.run_days(10).await;
    let before = h.docs(Collection::RegionFeatureStore).await;

    h.pipeline.run_feature_generation(day(9)).await.unwrap();
    h.pipeline.run_feature_generation(day(9)).await.unwrap();
    assert_eq!(h.docs(Collection::RegionFeatureStore).await, before);
}

#[tokio::test]
async fn test_future_and_same_day_levels_do_not_leak_into_features() {
    let h = Harness::new();
    seed_ten_days(&h).await;
    h.run_days(10).await;
    let day8 = feature_rows(&h).await.remove(0);

    // change the label on day 8 and add later data, then rebuild day 8
    h.reading("A", "w2", 8, 9, 1000.0).await;
    h.reading("A", "w1", 10, 6, 500.0).await;
    h.pipeline.run_daily(day(8)).await.unwrap();
    h.pipeline.run_daily(day(10)).await.unwrap();
    h.pipeline.run_feature_generation(day(8)).await.unwrap();

    let rebuilt = feature_rows(&h)
        .await
        .into_iter()
        .find(|r| r.date == day(8))
        .unwrap();
    assert_ne!(rebuilt.target_water_level, day8.target_water_level);
    assert_eq!(
        FeatureRow {
            target_water_level: day8.target_water_level,
            ..rebuilt
        },
        day8
    );
}

#[tokio::test]
async fn test_extraction_enters_as_log_volume() {
    let h = Harness::new();
    seed_ten_days(&h).await;
    h.insert(
        Collection::Extraction,
        vec![json!({
            "region_id": "A",
            "well_id": "p1",
            "timestamp": day(8).to_rfc3339(),
            "volume_liters": 1_000_000.0,
            "source": "meter",
        })],
    )
    .await;
    h.run_days(10).await;

    let rows = feature_rows(&h).await;
    assert_eq!(rows[0].log_extraction, 13.8155);
    // the pumping on day 8 shows in day 9's lag
    assert_eq!(rows[1].feat_net_flux_1d_lag, 2.9934);
}

#[tokio::test]
async fn test_failed_feature_write_keeps_previous_rows() {
    let h = Harness::new();
    seed_ten_days(&h).await;
    h.run_days(10).await;
    let before = h.docs(Collection::RegionFeatureStore).await;

    h.reading("A", "w1", 9, 12, 40.0).await;
    h.pipeline.run_aggregation(day(9)).await.unwrap();
    let failing = h.failing_pipeline(Collection::RegionFeatureStore);
    assert!(failing.run_feature_generation(day(9)).await.is_err());

    assert_eq!(h.docs(Collection::RegionFeatureStore).await, before);
}
