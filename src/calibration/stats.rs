use chrono::{DateTime, Utc};
use log::warn;

use crate::db::CalibrationResult;

use super::pairing::MatchedPair;

/// Summary of one (center, leaf) link for one run.
#[derive(Debug, Clone, Default)]
pub struct PairOutcome {
    pub result: Option<CalibrationResult>,
    /// Matched pairs dropped because the reverse amplitude was zero.
    pub skipped_zero_reverse: usize,
}

/// Mean and sample variance (n - 1 denominator). A single value has variance 0.
pub fn mean_and_variance(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = if values.len() < 2 {
        0.0
    } else {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    };
    Some((mean, variance))
}

/// Aggregate matched pairs into a calibration result.
///
/// Gains are taken from the earliest matched forward measurement; the ratio
/// variance is normalized by the squared ratio mean.
pub fn summarize(
    center: &str,
    leaf: &str,
    pairs: &[MatchedPair<'_>],
    computed_at: DateTime<Utc>,
) -> PairOutcome {
    let (valid, zero_reverse): (Vec<&MatchedPair<'_>>, Vec<&MatchedPair<'_>>) = pairs
        .iter()
        .partition(|pair| pair.reverse.amplitude != 0.0);

    if !zero_reverse.is_empty() {
        warn!(
            "{}/{}: skipped {} matched pair(s) with zero reverse amplitude",
            center,
            leaf,
            zero_reverse.len()
        );
    }

    let forward: Vec<f64> = valid.iter().map(|p| p.forward.amplitude).collect();
    let reverse: Vec<f64> = valid.iter().map(|p| p.reverse.amplitude).collect();
    let ratios: Vec<f64> = valid
        .iter()
        .map(|p| p.forward.amplitude / p.reverse.amplitude)
        .collect();

    let (Some((fwd_mean, fwd_var)), Some((rev_mean, rev_var)), Some((ratio_mean, ratio_var))) = (
        mean_and_variance(&forward),
        mean_and_variance(&reverse),
        mean_and_variance(&ratios),
    ) else {
        return PairOutcome {
            result: None,
            skipped_zero_reverse: zero_reverse.len(),
        };
    };

    // Amplitudes are magnitudes, so a zero mean ratio means every ratio is zero.
    let normalized_ratio_var = if ratio_mean != 0.0 {
        ratio_var / ratio_mean.powi(2)
    } else {
        0.0
    };

    let Some(first) = valid.iter().min_by_key(|p| p.forward.timestamp) else {
        return PairOutcome::default();
    };

    PairOutcome {
        result: Some(CalibrationResult {
            id: None,
            center_id: center.to_string(),
            leaf_id: leaf.to_string(),
            center_tx_gain: first.forward.tx_gain,
            leaf_rx_gain: first.forward.rx_gain,
            fwd_amp_mean: fwd_mean,
            fwd_amp_var: fwd_var,
            rev_amp_mean: rev_mean,
            rev_amp_var: rev_var,
            ratio_of_means: fwd_mean / rev_mean,
            amp_ratio_mean: ratio_mean,
            amp_ratio_var: normalized_ratio_var,
            sample_count: valid.len() as u64,
            first_sample_at: first.forward.timestamp,
            computed_at,
        }),
        skipped_zero_reverse: zero_reverse.len(),
    }
}
