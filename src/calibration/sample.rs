use chrono::{DateTime, NaiveDateTime, SubsecRound};
use serde::Deserialize;

use crate::db::helpers::NODE_TIME_FORMAT;
use crate::error::{Error, Result};

/// One amplitude measurement reported by a node.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSample {
    pub tx_device_id: String,
    pub rx_device_id: String,
    pub amplitude: f64,
    pub tx_gain: f64,
    pub rx_gain: f64,
    /// Node wall clock at measurement time.
    pub timestamp: NaiveDateTime,
}

#[derive(Deserialize)]
struct RawSample {
    tx_dev: String,
    rx_dev: String,
    tx_gain: f64,
    rx_gain: f64,
    amplitude: f64,
    time: String,
}

impl CalibrationSample {
    /// Decode a `calibration/results` payload.
    ///
    /// Payloads are data, never code: anything that is not the expected JSON
    /// object is a parse error.
    pub fn from_payload(payload: &str) -> Result<Self> {
        let raw: RawSample = serde_json::from_str(payload)?;

        if !raw.amplitude.is_finite() || raw.amplitude < 0.0 {
            return Err(Error::Parse(format!(
                "amplitude {} is not a finite magnitude",
                raw.amplitude
            )));
        }

        Ok(Self {
            tx_device_id: raw.tx_dev,
            rx_device_id: raw.rx_dev,
            amplitude: raw.amplitude,
            tx_gain: raw.tx_gain,
            rx_gain: raw.rx_gain,
            timestamp: parse_node_time(&raw.time)?,
        })
    }

    pub fn is_link(&self, tx: &str, rx: &str) -> bool {
        self.tx_device_id == tx && self.rx_device_id == rx
    }
}

/// Node clocks report whole seconds; RFC 3339 fractions are dropped to match.
fn parse_node_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, NODE_TIME_FORMAT)
        .or_else(|_| {
            DateTime::parse_from_rfc3339(value).map(|dt| dt.naive_local().trunc_subsecs(0))
        })
        .map_err(|err| Error::Parse(format!("invalid sample time '{value}': {err}")))
}
