use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub listener_client_id: String,
    pub publisher_client_id: String,
    /// How long the publisher waits for each broker acknowledgement.
    pub publish_timeout_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            keep_alive_secs: 60,
            listener_client_id: "TelemetryDb_client".into(),
            publisher_client_id: "calib_result_publisher".into(),
            publish_timeout_secs: 10,
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Topic the nodes report their amplitude measurements on.
    pub topic: String,
    /// Only messages received within this window are aggregated.
    pub lookback_minutes: i64,
    /// Maximum gap between a forward and a reverse measurement of one pair.
    pub tolerance_secs: i64,
    /// Results go to `<prefix>/<center>/<leaf>`.
    pub ratio_topic_prefix: String,
}

/// Upper bounds keep `now - lookback` and the pairing window representable.
pub const MAX_LOOKBACK_MINUTES: i64 = 366 * 24 * 60;
pub const MAX_TOLERANCE_SECS: i64 = 24 * 60 * 60;

impl CalibrationSettings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LOOKBACK_MINUTES).contains(&self.lookback_minutes) {
            return Err(Error::Config(anyhow::anyhow!(
                "calibration lookback_minutes must be within 1..={MAX_LOOKBACK_MINUTES}, got {}",
                self.lookback_minutes
            )));
        }
        if !(0..=MAX_TOLERANCE_SECS).contains(&self.tolerance_secs) {
            return Err(Error::Config(anyhow::anyhow!(
                "calibration tolerance_secs must be within 0..={MAX_TOLERANCE_SECS}, got {}",
                self.tolerance_secs
            )));
        }
        Ok(())
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            topic: "calibration/results".into(),
            lookback_minutes: 30,
            tolerance_secs: 3,
            ratio_topic_prefix: "calibration/ratio".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowcalSettings {
    pub degree: usize,
    pub plot_dir: PathBuf,
}

impl Default for PowcalSettings {
    fn default() -> Self {
        Self {
            degree: 5,
            plot_dir: PathBuf::from("plots"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    pub session_name: String,
    /// Placeholders: `{username}`, `{address}`, `{serial}`.
    pub leaf_template: String,
    pub cent_template: String,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            session_name: "node_git_update".into(),
            leaf_template: "ssh {username}@{address} 'cd $HOME/OTA-C && git stash && git checkout main && git pull && mkdir -p $HOME/OTA-C/ProjectRoot/build/ && cd $HOME/OTA-C/ProjectRoot/build/ && cmake ../ && make -j && ./otac_cent leaf {serial}'".into(),
            cent_template: "cd $HOME/OTA-C/ProjectRoot/build/ && ./otac_cent cent {serial}".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub database_path: PathBuf,
    pub registry_path: PathBuf,
    pub subscriptions: Vec<String>,
    pub calibration: CalibrationSettings,
    pub powcal: PowcalSettings,
    pub orchestration: OrchestrationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            database_path: PathBuf::from("config/mosquitto/telemetry.db"),
            registry_path: PathBuf::from("config/devices.json"),
            subscriptions: [
                "calibration/#",
                "control/#",
                "telemetry/#",
                "config/run_config_info",
                "otac/#",
                "usrp/#",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            calibration: CalibrationSettings::default(),
            powcal: PowcalSettings::default(),
            orchestration: OrchestrationSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            log::warn!("Settings file {} not found; using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))
            .map_err(Error::Config)?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
            .map_err(Error::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.subscriptions.is_empty() {
            return Err(Error::Config(anyhow::anyhow!(
                "at least one subscription filter is required"
            )));
        }
        self.calibration.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(settings.calibration.tolerance_secs, 3);
        assert_eq!(settings.calibration.lookback_minutes, 30);
        assert_eq!(settings.powcal.degree, 5);
        assert_eq!(settings.subscriptions.len(), 6);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"broker": {"host": "10.0.0.5"}, "calibration": {"tolerance_secs": 5}}"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.broker.host, "10.0.0.5");
        assert_eq!(settings.broker.port, 1883);
        assert_eq!(settings.calibration.tolerance_secs, 5);
        assert_eq!(settings.calibration.topic, "calibration/results");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn out_of_range_calibration_windows_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{"calibration": {"lookback_minutes": 9223372036854775807}}"#).unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));

        fs::write(&path, r#"{"calibration": {"tolerance_secs": 9223372036854775807}}"#).unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));

        fs::write(&path, r#"{"calibration": {"tolerance_secs": -1}}"#).unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn empty_subscription_list_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"subscriptions": []}"#).unwrap();

        assert!(matches!(Settings::load(Some(&path)), Err(Error::Config(_))));
    }
}
