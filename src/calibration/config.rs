use anyhow::anyhow;
use chrono::Duration;

use crate::error::{Error, Result};
use crate::settings::CalibrationSettings;

/// Tunables of one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Topic whose unprocessed messages feed the run.
    pub topic: String,

    /// Messages received before `now - lookback` are left alone.
    pub lookback: Duration,

    /// Forward/reverse measurements further apart than this never pair.
    pub tolerance: Duration,

    /// Per-pair results are published to `<prefix>/<center>/<leaf>`.
    pub ratio_topic_prefix: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        let settings = CalibrationSettings::default();
        Self {
            topic: settings.topic,
            lookback: Duration::minutes(30),
            tolerance: Duration::seconds(3),
            ratio_topic_prefix: settings.ratio_topic_prefix,
        }
    }
}

impl TryFrom<&CalibrationSettings> for AggregationConfig {
    type Error = Error;

    fn try_from(settings: &CalibrationSettings) -> Result<Self> {
        settings.validate()?;

        let lookback = Duration::try_minutes(settings.lookback_minutes).ok_or_else(|| {
            Error::Config(anyhow!(
                "lookback_minutes {} is out of range",
                settings.lookback_minutes
            ))
        })?;
        let tolerance = Duration::try_seconds(settings.tolerance_secs).ok_or_else(|| {
            Error::Config(anyhow!(
                "tolerance_secs {} is out of range",
                settings.tolerance_secs
            ))
        })?;

        Ok(Self {
            topic: settings.topic.clone(),
            lookback,
            tolerance,
            ratio_topic_prefix: settings.ratio_topic_prefix.clone(),
        })
    }
}

impl AggregationConfig {
    pub fn ratio_topic(&self, center: &str, leaf: &str) -> String {
        format!("{}/{}/{}", self.ratio_topic_prefix, center, leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_default_settings() {
        let config = AggregationConfig::try_from(&CalibrationSettings::default()).unwrap();
        let default = AggregationConfig::default();
        assert_eq!(config.lookback, default.lookback);
        assert_eq!(config.tolerance, default.tolerance);
        assert_eq!(config.topic, default.topic);
        assert_eq!(config.ratio_topic("32A", "32B"), "calibration/ratio/32A/32B");
    }

    #[test]
    fn huge_windows_are_config_errors() {
        let settings = CalibrationSettings {
            lookback_minutes: i64::MAX,
            ..CalibrationSettings::default()
        };
        assert!(matches!(
            AggregationConfig::try_from(&settings),
            Err(Error::Config(_))
        ));

        let settings = CalibrationSettings {
            tolerance_secs: i64::MAX,
            ..CalibrationSettings::default()
        };
        assert!(matches!(
            AggregationConfig::try_from(&settings),
            Err(Error::Config(_))
        ));
    }
}
