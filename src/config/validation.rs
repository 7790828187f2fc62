//! Config checks that warn instead of failing.
//!
//! - Unknown keys: the raw TOML tree is compared against the key tree of a
//!   serialized default [`EngineConfig`](super::EngineConfig), and each
//!   stray key gets a "did you mean?" suggestion by edit distance.
//! - Plausibility: legal values that will not lock on a real clock.
//!
//! Neither check rejects a config; `EngineConfig::validate` does that.

use std::collections::{BTreeSet, HashSet};

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        match &self.suggestion {
            Some(s) => write!(f, " (did you mean '{s}'?)"),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every dotted key path an `EngineConfig` file may contain.
///
/// Derived from the serialized defaults, so new fields are picked up
/// without touching this module.
pub fn known_config_keys() -> HashSet<String> {
    toml::Value::try_from(super::EngineConfig::default())
        .map(|value| walk_toml_keys(&value, "").into_iter().collect())
        .unwrap_or_default()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Dotted paths of every key in a TOML tree, tables included, sorted.
///
/// `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut found = BTreeSet::new();
    let mut pending = vec![(prefix.to_string(), value)];

    while let Some((path, node)) = pending.pop() {
        let Some(table) = node.as_table() else {
            continue;
        };
        for (key, child) in table {
            let child_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            if child.is_table() {
                pending.push((child_path.clone(), child));
            }
            found.insert(child_path);
        }
    }
    found.into_iter().collect()
}

// ============================================================================
// Edit Distance
// ============================================================================

/// Levenshtein distance over chars, single-row formulation.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = diagonal + usize::from(ca != cb);
            diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every key in `raw_toml` that no config field consumes.
/// Unparseable input yields nothing; serde reports it on load.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Plausibility Checks
// ============================================================================

/// Flag values that are legal but unlikely to lock on a real clock.
pub fn suspicious_values(config: &super::EngineConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut flag = |field: &str, message: String| {
        warnings.push(ValidationWarning {
            field: field.to_string(),
            message,
            suggestion: None,
        });
    };

    let lf = &config.loop_filter;
    if lf.prop_gain > 1e-6 {
        flag(
            "loop_filter.prop_gain",
            format!(
                "loop_filter.prop_gain = {:e} is very large; the loop will likely oscillate",
                lf.prop_gain
            ),
        );
    }
    if lf.deriv_gain > 10.0 {
        flag(
            "loop_filter.deriv_gain",
            format!("loop_filter.deriv_gain = {} amplifies edge jitter", lf.deriv_gain),
        );
    }
    if lf.bootstrap_edges < 10 {
        flag(
            "loop_filter.bootstrap_edges",
            format!(
                "loop_filter.bootstrap_edges = {} gives a noisy initial period",
                lf.bootstrap_edges
            ),
        );
    }
    for (name, window) in [
        ("coincidence.window_1", config.coincidence.window_1),
        ("coincidence.window_2", config.coincidence.window_2),
    ] {
        if window.start_ps < 0.0 {
            flag(
                name,
                format!("{name} starts below zero; folded phases are never negative"),
            );
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_typo_suggests_known_key() {
        let warnings = validate_unknown_keys(
            r#"
[loop_filter]
prop_gian = 2e-9
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "loop_filter.prop_gian");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("loop_filter.prop_gain")
        );
    }

    #[test]
    fn test_valid_keys_produce_no_warnings() {
        let warnings = validate_unknown_keys(
            r#"
[channels]
clock = 9
data_1 = -5
data_2 = -14

[coincidence.window_1]
start_ps = 90.0
end_ps = 150.0
"#,
        );
        assert!(warnings.is_empty(), "unexpected: {warnings:?}");
    }

    #[test]
    fn test_unrelated_key_has_no_suggestion() {
        let warnings = validate_unknown_keys("[gui]\nplot_color = \"red\"\n");
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.suggestion.is_none()));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("mult", "mult"), 0);
        assert_eq!(levenshtein("mlut", "mult"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_suspicious_gain_flagged() {
        let mut config = EngineConfig::default();
        assert!(suspicious_values(&config).is_empty());
        config.loop_filter.prop_gain = 1e-3;
        let warnings = suspicious_values(&config);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "loop_filter.prop_gain");
    }
}
