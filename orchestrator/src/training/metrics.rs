//! Trainer metric parsing.

use std::collections::BTreeMap;

/// Canonical snake_case name for a reported metric.
pub fn normalize_metric_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_matches('_');

    match name {
        "f1" | "f1_score" | "model_f1" | "model_f1_score" => "f1_score".to_string(),
        "silhouette" | "silhouette_score" => "silhouette_score".to_string(),
        "model_accuracy" | "accuracy" => "accuracy".to_string(),
        other => other.to_string(),
    }
}

/// Collect every `Name: number` line of trainer output.
///
/// Lines whose value does not parse as a finite number are ignored; a metric
/// reported twice keeps its last value.
pub fn parse_metrics(stdout: &str) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    for line in stdout.lines() {
        let Some((name, value)) = line.rsplit_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<f64>() else {
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        let name = normalize_metric_name(name);
        if !name.is_empty() {
            metrics.insert(name, value);
        }
    }

    metrics
}
