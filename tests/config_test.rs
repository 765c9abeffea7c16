use cofind_rs::{AlignmentStats, CoFinder, EvalParams, FinderConfig, Metric};

#[test]
fn test_config_json_round_trip() {
    let mut config = FinderConfig::new(10, 32);
    config.device_frequency = Some(24e6);
    config.approx_width_cycles = 46.0;
    config.width_metric = Metric::Sad;
    config.refine_top_percent = 25.0;

    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: FinderConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_partial_json_uses_defaults() {
    let json = r#"{
        "device_frequency": 8000000.0,
        "similar_rounds": 4,
        "expected_events": 12,
        "template_metric": "correlation"
    }"#;
    let config: FinderConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.similar_rounds, 4);
    assert_eq!(config.expected_events, 12);
    assert_eq!(config.template_metric, Metric::Correlation);
    assert_eq!(config.width_metric, Metric::Correlation);
    assert_eq!(config.top_x, 10);
    assert_eq!(config.sub_peak_delta, 2);
    assert!(config.avg_round_template);
    assert!(CoFinder::new(config).is_ok());
}

#[test]
fn test_invalid_json_values_fail_validation() {
    let json = r#"{ "similar_rounds": 1 }"#;
    let config: FinderConfig = serde_json::from_str(json).unwrap();
    assert!(CoFinder::new(config).is_err());

    let json = r#"{ "width_metric": "euclidean" }"#;
    assert!(serde_json::from_str::<FinderConfig>(json).is_err());
}

#[test]
fn test_stats_serialize() {
    let stats = cofind_rs::evaluate(&[10, 20], &[10, 20], 5.0, 2, &EvalParams::default()).unwrap();
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["hit_rate"], 1.0);
    assert_eq!(json["histogram"].as_array().unwrap().len(), 5);
    let back: AlignmentStats = serde_json::from_value(json).unwrap();
    assert_eq!(back, stats);
}
