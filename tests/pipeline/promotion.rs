use serde_json::{json, Value};

use super::common::Harness;
use groundwater_forecast::registry::Registry;

fn candidate(region_id: &str, artifact: &str, mae: f64, baseline_mae: f64) -> Value {
    json!({
        "region_id": region_id,
        "model_type": "linear_regression",
        "feature_set": "linear-v1",
        "features": ["feat_net_flux_1d_lag", "feat_net_flux_window_sum", "feat_water_trend_7d", "feat_sin_day", "feat_cos_day"],
        "artifact_reference": artifact,
        "trained_at": "2024-05-01T02:00:00Z",
        "training_rows": 80,
        "test_rows": 20,
        "metrics": {"mae": mae, "rmse": mae, "r2": 0.8, "baseline_mae": baseline_mae, "improvement_pct": 0.0},
    })
}

fn write_candidates(h: &Harness, candidates: Vec<Value>) {
    let path = h.pipeline.config().registry.candidates_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, Value::Array(candidates).to_string()).unwrap();
}

#[test]
fn test_gate_sequence_keeps_registry_invariants() {
    let h = Harness::new();
    let registry_path = h.pipeline.config().registry.registry_path();

    write_candidates(&h, vec![candidate("A", "a1.bin", 0.2, 0.4), candidate("B", "b1.bin", 0.5, 0.4)]);
    let report = h.pipeline.run_promotion().unwrap();
    assert_eq!(report.promoted, vec!["A".to_string()]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].region_id, "B");
    assert_eq!(report.rejected[0].reason.to_string(), "model_error 0.5 >= baseline_error 0.4");
    let after_first = std::fs::read(&registry_path).unwrap();

    // equal error is not an improvement
    write_candidates(&h, vec![candidate("A", "a2.bin", 0.4, 0.4)]);
    let report = h.pipeline.run_promotion().unwrap();
    assert!(!report.registry_written);
    assert_eq!(std::fs::read(&registry_path).unwrap(), after_first);

    write_candidates(&h, vec![candidate("A", "a3.bin", 0.1, 0.4), candidate("B", "b2.bin", 0.1, 0.4)]);
    h.pipeline.run_promotion().unwrap();

    let registry = Registry::load(&registry_path).unwrap();
    assert_eq!(registry.entries.len(), 3);
    assert_eq!(registry.active().count(), 2);
    assert_eq!(registry.active_for("A").unwrap().artifact_reference, "a3.bin");
    assert_eq!(registry.active_for("B").unwrap().artifact_reference, "b2.bin");
}

#[test]
fn test_candidates_are_consumed_once() {
    let h = Harness::new();
    write_candidates(&h, vec![candidate("A", "a1.bin", 0.2, 0.4)]);
    h.pipeline.run_promotion().unwrap();
    assert!(!h.pipeline.config().registry.candidates_path().exists());

    let again = h.pipeline.run_promotion().unwrap();
    assert!(again.promoted.is_empty());
    assert_eq!(again.active_count, 1);
}

#[test]
fn test_corrupt_registry_is_never_overwritten() {
    let h = Harness::new();
    let registry_path = h.pipeline.config().registry.registry_path();
    write_candidates(&h, vec![candidate("A", "a1.bin", 0.2, 0.4)]);
    std::fs::write(&registry_path, "{\"region_id\": \"A\"}").unwrap();

    assert!(h.pipeline.run_promotion().is_err());
    assert_eq!(std::fs::read_to_string(&registry_path).unwrap(), "{\"region_id\": \"A\"}");
}
