//! Aggregated amplitude calibration for one center/leaf pair.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics of one aggregation run for a (center, leaf) pair.
///
/// Rows are append-only; a pair accumulates one row per run that found
/// matched measurements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationResult {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    pub center_id: String,
    pub leaf_id: String,
    pub center_tx_gain: f64,
    pub leaf_rx_gain: f64,
    /// Center to leaf amplitude.
    pub fwd_amp_mean: f64,
    pub fwd_amp_var: f64,
    /// Leaf to center amplitude.
    pub rev_amp_mean: f64,
    pub rev_amp_var: f64,
    /// `fwd_amp_mean / rev_amp_mean`.
    pub ratio_of_means: f64,
    pub amp_ratio_mean: f64,
    /// Ratio variance divided by the squared ratio mean.
    pub amp_ratio_var: f64,
    pub sample_count: u64,
    #[serde(with = "node_time")]
    pub first_sample_at: NaiveDateTime,
    pub computed_at: DateTime<Utc>,
}

mod node_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::db::helpers::NODE_TIME_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(NODE_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, NODE_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
