//! Normalizer (C4): pure column-transform functions used by the trigger
//! engine and the Top-N ranker.
//!
//! Ported from `ScoreCalculator` in the original Python service. Every
//! operation is defined on a slice of values and documents its behavior on
//! degenerate input (empty, single value, all-equal) per the spec's
//! invariant that identical inputs normalize to 0.5 and a single value
//! normalizes to 0.5.

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("weights must sum to 1.0 within 1e-9, got {0}")]
    WeightsNotNormalized(f64),
}

fn min_max_raw(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some((min, max))
}

/// Min-max normalize into `[new_min, new_max]`. All-equal (including a
/// single value) maps to the midpoint.
pub fn min_max(values: &[f64], new_min: f64, new_max: f64) -> Vec<f64> {
    let Some((min, max)) = min_max_raw(values) else {
        return Vec::new();
    };
    if (max - min).abs() < f64::EPSILON {
        return vec![(new_min + new_max) / 2.0; values.len()];
    }
    values
        .iter()
        .map(|v| (v - min) / (max - min) * (new_max - new_min) + new_min)
        .collect()
}

pub fn z_score(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Robust normalize: (x - median) / IQR. All-equal input returns all zero.
pub fn robust(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let median = percentile(values, 50.0);
    let q1 = percentile(values, 25.0);
    let q3 = percentile(values, 75.0);
    let iqr = q3 - q1;
    if iqr == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - median) / iqr).collect()
}

/// Linear-interpolated percentile, matching pandas' default `quantile`.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// Clip to the `[lower_pct, upper_pct]` band then min-max into `[0, 1]`.
pub fn percentile_clip(values: &[f64], lower_pct: f64, upper_pct: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let lower = percentile(values, lower_pct);
    let upper = percentile(values, upper_pct);
    let clipped: Vec<f64> = values.iter().map(|v| v.clamp(lower, upper)).collect();
    min_max(&clipped, 0.0, 1.0)
}

/// Rank-normalize into `[0, 1]`; `rank/(n-1)` with ties broken by the
/// minimum rank in the group (pandas `method='min'`).
pub fn rank_normalize(values: &[f64], ascending: bool) -> Vec<f64> {
    let n = values.len();
    if n <= 1 {
        return vec![0.5; n];
    }
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| {
        let ord = values[a].partial_cmp(&values[b]).unwrap();
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[indices[j + 1]] == values[indices[i]] {
            j += 1;
        }
        for k in indices.iter().take(j + 1).skip(i) {
            ranks[*k] = i as f64;
        }
        i = j + 1;
    }
    ranks.iter().map(|r| r / (n - 1) as f64).collect()
}

pub fn sigmoid(values: &[f64], midpoint: f64, steepness: f64) -> Vec<f64> {
    values
        .iter()
        .map(|v| 1.0 / (1.0 + (-steepness * (v - midpoint)).exp()))
        .collect()
}

/// Natural (or base-`b`) log on values clipped to >= 1.
pub fn log_normalize(values: &[f64], base: Option<f64>) -> Vec<f64> {
    values
        .iter()
        .map(|v| {
            let clipped = v.max(1e-10);
            match base {
                Some(b) => clipped.ln() / b.ln(),
                None => clipped.ln(),
            }
        })
        .collect()
}

/// 1 - min_max(values): for metrics where lower is better (e.g. debt ratio).
pub fn inverse(values: &[f64]) -> Vec<f64> {
    min_max(values, 0.0, 1.0).iter().map(|v| 1.0 - v).collect()
}

/// Weighted composition of equal-length columns. Weights must sum to 1.0
/// within 1e-9 tolerance.
pub fn weighted_composition(columns: &[&[f64]], weights: &[f64]) -> Result<Vec<f64>, NormalizeError> {
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > 1e-9 {
        return Err(NormalizeError::WeightsNotNormalized(sum));
    }
    let n = columns.first().map(|c| c.len()).unwrap_or(0);
    let mut out = vec![0.0; n];
    for (col, w) in columns.iter().zip(weights.iter()) {
        for (o, v) in out.iter_mut().zip(col.iter()) {
            *o += v * w;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn min_max_identical_inputs_yield_half() {
        let values = vec![3.0; 5];
        let normalized = min_max(&values, 0.0, 1.0);
        assert!(normalized.iter().all(|v| (*v - 0.5).abs() < 1e-9));
    }

    #[test]
    fn min_max_single_value_yields_half() {
        let normalized = min_max(&[42.0], 0.0, 1.0);
        assert_relative_eq!(normalized[0], 0.5);
    }

    #[test]
    fn min_max_spans_full_range() {
        let normalized = min_max(&[10.0, 20.0, 30.0, 40.0, 50.0], 0.0, 1.0);
        assert_relative_eq!(normalized[0], 0.0);
        assert_relative_eq!(normalized[4], 1.0);
        assert_relative_eq!(normalized[2], 0.5);
    }

    #[test]
    fn robust_handles_outliers() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        let normalized = robust(&values);
        assert!(normalized[5] > normalized[0]);
    }

    #[test]
    fn weighted_composition_rejects_bad_weights() {
        let col = [1.0, 2.0, 3.0];
        let err = weighted_composition(&[&col], &[0.5]).unwrap_err();
        matches!(err, NormalizeError::WeightsNotNormalized(_));
    }

    #[test]
    fn weighted_composition_blends_columns() {
        let a = [1.0, 1.0];
        let b = [0.0, 2.0];
        let result = weighted_composition(&[&a, &b], &[0.5, 0.5]).unwrap();
        assert_relative_eq!(result[0], 0.5);
        assert_relative_eq!(result[1], 1.5);
    }

    #[test]
    fn rank_normalize_orders_ascending() {
        let values = [10.0, 50.0, 30.0, 40.0, 20.0];
        let ranked = rank_normalize(&values, true);
        assert_relative_eq!(ranked[0], 0.0);
        assert_relative_eq!(ranked[1], 1.0);
    }
}
