//! Config Validation Tests
//!
//! Exercises typo detection, range validation and file loading of the
//! engine configuration independently from the rest of the pipeline.

use pll_histogram::config::validation::{
    known_config_keys, suggest_correction, suspicious_values, validate_unknown_keys,
};
use pll_histogram::config::{AcceptanceWindow, ConfigError, EngineConfig};
use std::io::Write;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_loop_filter_warns_with_suggestion() {
    let toml_str = r#"
[loop_filter]
prop_gian = 2e-9
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("prop_gian"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("loop_filter.prop_gain")
    );
}

#[test]
fn unknown_section_far_from_any_key_has_no_suggestion() {
    let warnings = validate_unknown_keys("[completely_unrelated]\nvalue = 1\n");
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(|w| w.suggestion.is_none()));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[channels]
clock = 9
data_1 = -5
data_2 = -14

[phase]
mult = 4
phase_offset_ps = 25.0

[coincidence.window_1]
start_ps = 80.0
end_ps = 160.0
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
}

#[test]
fn default_config_serializes_to_known_keys_only() {
    let toml_str = EngineConfig::default().to_toml().expect("serialize");
    assert!(validate_unknown_keys(&toml_str).is_empty());
    assert!(known_config_keys().contains("time_walk.reference_bins"));
}

#[test]
fn suggestion_prefers_closest_key() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("histogram.bin", &known).as_deref(),
        Some("histogram.bins")
    );
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn zero_mult_and_capacity_fail_fast() {
    let toml_str = r#"
[phase]
mult = 0

[buffers]
n_bins = 0
"#;
    match EngineConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 2, "errors: {errors:?}");
            assert!(errors.iter().any(|e| e.contains("phase.mult")));
            assert!(errors.iter().any(|e| e.contains("buffers.n_bins")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn shared_channel_numbers_rejected() {
    let toml_str = r#"
[channels]
clock = 9
data_1 = 9
"#;
    assert!(matches!(
        EngineConfig::from_toml_str(toml_str),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn inverted_window_rejected() {
    let mut config = EngineConfig::default();
    config.coincidence.window_2 = AcceptanceWindow::new(150.0, 90.0);
    assert!(config.validate().is_err());
}

#[test]
fn period_deviation_must_stay_below_one() {
    let mut config = EngineConfig::default();
    for value in [1.0, 2.5, f64::NAN, 0.0] {
        config.loop_filter.max_period_deviation = value;
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors
                    .iter()
                    .any(|e| e.contains("loop_filter.max_period_deviation")));
            }
            other => panic!("{value} accepted: {other:?}"),
        }
    }
    config.loop_filter.max_period_deviation = 0.999;
    assert!(config.validate().is_ok());
}

#[test]
fn aggressive_gain_is_suspicious_but_valid() {
    let mut config = EngineConfig::default();
    config.loop_filter.prop_gain = 1e-3;
    assert!(config.validate().is_ok());
    assert!(suspicious_values(&config)
        .iter()
        .any(|w| w.field == "loop_filter.prop_gain"));
}

// ============================================================================
// File Loading
// ============================================================================

#[test]
fn load_from_file_applies_overrides_and_defaults() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
[channels]
clock = 3
data_1 = -1
data_2 = -5

[phase]
mult = 2
"#
    )
    .expect("write config");

    let config = EngineConfig::load_from_file(file.path()).expect("load config");
    assert_eq!(config.channels.clock, 3);
    assert_eq!(config.phase.mult, 2);
    // Untouched sections keep their defaults
    assert_eq!(config.buffers, EngineConfig::default().buffers);
}

#[test]
fn save_then_load_preserves_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("pll_histogram.toml");

    let mut config = EngineConfig::default();
    config.phase.mult = 8;
    config.time_walk.step_ps = 250;
    config.save_to_file(&path).expect("save");

    assert_eq!(EngineConfig::load_from_file(&path).expect("load"), config);
}

#[test]
fn malformed_file_reports_path() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[phase\nmult = ").expect("write config");

    match EngineConfig::load_from_file(file.path()) {
        Err(ConfigError::Parse(path, _)) => assert_eq!(path, file.path()),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    assert!(matches!(
        EngineConfig::load_from_file(&dir.path().join("absent.toml")),
        Err(ConfigError::Io(..))
    ));
}
