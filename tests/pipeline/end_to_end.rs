use serde_json::json;

use super::common::{day, seed_driven_region, Harness};
use groundwater_forecast::domain::ExtractionSchedule;
use groundwater_forecast::registry::Registry;
use groundwater_forecast::store::{Collection, Datastore, Filter};

const DAYS: i64 = 120;

#[tokio::test]
async fn test_train_promote_forecast() {
    let h = Harness::new();
    seed_driven_region(&h, "A", DAYS).await;
    // too short to train
    h.region("B", "rock").await;
    for offset in DAYS - 20..DAYS {
        h.reading("B", "w1", offset, 6, 5.0).await;
    }
    h.run_days(DAYS).await;

    let training = h.pipeline.run_training().await.unwrap();
    assert_eq!(training.candidates, 1);
    assert_eq!(training.skipped, 1);
    assert!(h.pipeline.config().registry.candidates_path().exists());

    let promotion = h.pipeline.run_promotion().unwrap();
    assert_eq!(promotion.promoted, vec!["A".to_string()]);
    assert!(promotion.registry_written);

    let registry = Registry::load(&h.pipeline.config().registry.registry_path()).unwrap();
    let active = registry.active_for("A").unwrap();
    assert!(active.metrics.mae < active.metrics.baseline_mae);

    let rows = h.pipeline.run_forecast(None, None).await.unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].forecast_date, day(DAYS));
    assert_eq!(rows[6].horizon_step, 7);
    assert!(rows.iter().all(|r| r.model_version == active.model_version));
    assert!(rows.iter().all(|r| r.predicted_level.is_finite()));

    // rerun overwrites the same keys
    h.pipeline.run_forecast(None, None).await.unwrap();
    assert_eq!(h.docs(Collection::DailyForecasts).await.len(), 7);
}

#[tokio::test]
async fn test_scenario_forecast_is_not_persisted() {
    let h = Harness::new();
    seed_driven_region(&h, "A", DAYS).await;
    h.run_days(DAYS).await;
    h.pipeline.run_training().await.unwrap();
    h.pipeline.run_promotion().unwrap();
    h.pipeline.run_forecast(None, None).await.unwrap();
    let before = h.docs(Collection::DailyForecasts).await;

    let schedule = ExtractionSchedule::PerStep(vec![5000.0, 5000.0]);
    let rows = h.pipeline.run_forecast(Some("A"), Some(&schedule)).await.unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].scenario_extraction, Some(5000.0));
    assert_eq!(rows[6].scenario_extraction, Some(0.0));

    assert_eq!(h.docs(Collection::DailyForecasts).await, before);
}

#[tokio::test]
async fn test_forecast_without_registry_is_empty() {
    let h = Harness::new();
    seed_driven_region(&h, "A", 10).await;
    h.run_days(10).await;

    let rows = h.pipeline.run_forecast(None, None).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(
        h.store.count(Collection::DailyForecasts, &Filter::all()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_corrupt_registry_aborts_forecast() {
    let h = Harness::new();
    let path = h.pipeline.config().registry.registry_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, json!({"not": "a list"}).to_string()).unwrap();

    assert!(h.pipeline.run_forecast(None, None).await.is_err());
}

#[tokio::test]
async fn test_retraining_keeps_one_active_entry_and_cleanup_archives_old_artifacts() {
    let h = Harness::with_config(|c| c.registry.retention_count = 1);
    seed_driven_region(&h, "A", DAYS).await;
    h.run_days(DAYS).await;

    h.pipeline.run_training().await.unwrap();
    h.pipeline.run_promotion().unwrap();
    // artifact names carry a second resolution timestamp
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    h.pipeline.run_training().await.unwrap();
    h.pipeline.run_promotion().unwrap();

    let registry = Registry::load(&h.pipeline.config().registry.registry_path()).unwrap();
    assert_eq!(registry.entries.len(), 2);
    assert_eq!(registry.active().count(), 1);
    let active = registry.active_for("A").unwrap().artifact_reference.clone();

    let report = h.pipeline.run_cleanup().unwrap();
    assert_eq!(report.archived.len(), 1);
    assert_ne!(report.archived[0], active);
    assert!(h.pipeline.config().registry.artifacts_dir().join(&active).exists());
}

#[tokio::test]
async fn test_run_all_sequence() {
    let h = Harness::new();
    seed_driven_region(&h, "A", DAYS).await;
    h.run_days(DAYS - 1).await;

    let summary = h.pipeline.run_all(day(DAYS - 1)).await.unwrap();
    assert_eq!(summary.features.rows_written, 1);
    assert_eq!(summary.training.candidates, 1);
    assert_eq!(summary.promotion.promoted.len(), 1);
    assert_eq!(summary.forecasts, 7);
}
