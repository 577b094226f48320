use serde_json::json;

use super::common::{day, Harness};
use groundwater_forecast::store::Collection;

#[tokio::test]
async fn test_aggregation_rerun_is_idempotent() {
    let h = Harness::new();
    h.region("A", "clay").await;
    h.reading("A", "w1", 0, 6, 10.0).await;
    h.reading("A", "w1", 0, 12, 20.0).await;
    h.reading("A", "w2", 0, 18, "30.0").await;
    h.rain("A", 0, 4.0, "gauge").await;
    h.rain("A", 0, 2.0, "manual").await;

    h.pipeline.run_aggregation(day(0)).await.unwrap();
    let first_gw = h.docs(Collection::DailyRegionGroundwater).await;
    let first_rain = h.docs(Collection::DailyRegionRainfall).await;

    h.pipeline.run_aggregation(day(0)).await.unwrap();
    assert_eq!(h.docs(Collection::DailyRegionGroundwater).await, first_gw);
    assert_eq!(h.docs(Collection::DailyRegionRainfall).await, first_rain);

    assert_eq!(first_gw.len(), 1);
    let gw = &first_gw[0];
    assert_eq!(gw["avg_water_level"], json!(20.0));
    assert_eq!(gw["min_water_level"], json!(10.0));
    assert_eq!(gw["max_water_level"], json!(30.0));
    assert_eq!(gw["reading_count"], json!(3));
    assert_eq!(gw["reporting_entity_count"], json!(2));

    let rain = &first_rain[0];
    assert_eq!(rain["total_mm"], json!(6.0));
    assert_eq!(rain["source_diversity_count"], json!(2));
}

#[tokio::test]
async fn test_invalid_records_are_dropped_and_counted() {
    let h = Harness::new();
    h.region("A", "sandy_loam").await;
    h.reading("A", "w1", 0, 6, 11.0).await;
    h.reading("A", "w1", 0, 7, "not a number").await;
    h.reading("", "w1", 0, 8, 11.0).await;
    h.rain("A", 0, -1.0, "gauge").await;

    let report = h.pipeline.run_aggregation(day(0)).await.unwrap();
    let water = report.cleaning["water_readings"];
    assert_eq!(water.seen, 3);
    assert_eq!(water.kept, 1);
    assert_eq!(water.bad_value, 1);
    assert_eq!(water.missing_field, 1);
    assert_eq!(report.cleaning["rainfall"].out_of_range, 1);
    assert_eq!(report.groundwater, 1);
    assert_eq!(report.rainfall, 0);
}

#[tokio::test]
async fn test_regions_without_metadata_are_skipped() {
    let h = Harness::new();
    h.region("A", "sandy_loam").await;
    h.reading("A", "w1", 0, 6, 11.0).await;
    h.reading("B", "w9", 0, 6, 12.0).await;

    let report = h.pipeline.run_aggregation(day(0)).await.unwrap();
    assert_eq!(report.unknown_regions, 1);
    let stored = h.docs(Collection::DailyRegionGroundwater).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["region_id"], json!("A"));
}

#[tokio::test]
async fn test_only_the_target_day_is_read() {
    let h = Harness::new();
    h.region("A", "sandy_loam").await;
    h.reading("A", "w1", 0, 23, 11.0).await;
    h.reading("A", "w1", 1, 0, 99.0).await;

    h.pipeline.run_aggregation(day(0)).await.unwrap();
    let stored = h.docs(Collection::DailyRegionGroundwater).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["avg_water_level"], json!(11.0));
}

#[tokio::test]
async fn test_failed_write_keeps_every_daily_partition() {
    let h = Harness::new();
    h.region("A", "sandy_loam").await;
    h.reading("A", "w1", 0, 6, 10.0).await;
    h.rain("A", 0, 3.0, "gauge").await;
    h.pipeline.run_aggregation(day(0)).await.unwrap();
    let groundwater = h.docs(Collection::DailyRegionGroundwater).await;
    let rainfall = h.docs(Collection::DailyRegionRainfall).await;

    // late readings change the day, then the third partition's write fails
    h.reading("A", "w2", 0, 9, 30.0).await;
    h.rain("A", 0, 7.0, "manual").await;
    let failing = h.failing_pipeline(Collection::DailyRegionWeather);
    assert!(failing.run_aggregation(day(0)).await.is_err());

    assert_eq!(h.docs(Collection::DailyRegionGroundwater).await, groundwater);
    assert_eq!(h.docs(Collection::DailyRegionRainfall).await, rainfall);
    assert_eq!(groundwater[0]["avg_water_level"], json!(10.0));

    // the next healthy run picks the late readings up
    h.pipeline.run_aggregation(day(0)).await.unwrap();
    let stored = h.docs(Collection::DailyRegionGroundwater).await;
    assert_eq!(stored[0]["avg_water_level"], json!(20.0));
}
