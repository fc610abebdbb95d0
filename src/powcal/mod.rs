mod chart;
mod fit;

pub use chart::render_power_chart;
pub use fit::{polyfit, Polynomial};

use std::path::PathBuf;

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Deserialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::settings::PowcalSettings;

/// Topic a leaf reports its post-calibration power sweep on.
pub fn powcal_topic(serial: &str) -> String {
    format!("telemetry/powcalib/{serial}")
}

/// One step of a leaf's transmit-scale sweep.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PowerSample {
    pub tx_scale: f64,
    /// Received power in linear units.
    pub rx_pow: f64,
}

impl PowerSample {
    pub fn from_payload(payload: &str) -> Result<Self> {
        let sample: PowerSample = serde_json::from_str(payload)?;
        if !sample.tx_scale.is_finite() || !sample.rx_pow.is_finite() || sample.rx_pow < 0.0 {
            return Err(Error::Parse(format!(
                "unusable power sample tx_scale={} rx_pow={}",
                sample.tx_scale, sample.rx_pow
            )));
        }
        Ok(sample)
    }

    /// Received amplitude, on the same scale as `tx_scale`.
    pub fn rx_scale(&self) -> f64 {
        self.rx_pow.sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct PowerCalibrationReport {
    pub serial: String,
    pub sample_count: usize,
    /// Degree actually fitted, after clamping to the distinct tx_scale values.
    pub degree: usize,
    pub polynomial: Polynomial,
    pub chart_path: PathBuf,
    /// Store rows marked processed by this run.
    pub consumed: Vec<i64>,
}

#[derive(Debug)]
pub enum PowcalOutcome {
    NoData,
    Rendered(PowerCalibrationReport),
}

/// Fits and charts the scaling a leaf applied after calibration.
pub struct PowerCalibration<'a> {
    db: &'a Database,
    degree: usize,
    plot_dir: PathBuf,
}

impl<'a> PowerCalibration<'a> {
    pub fn new(db: &'a Database, settings: &PowcalSettings) -> Self {
        Self {
            db,
            degree: settings.degree,
            plot_dir: settings.plot_dir.clone(),
        }
    }

    /// Fit, chart and consume the unprocessed sweep of one leaf.
    ///
    /// Rows are only marked processed once the chart is on disk; rows that
    /// did not decode stay unprocessed.
    pub async fn generate(&self, serial: &str, now: DateTime<Local>) -> Result<PowcalOutcome> {
        let topic = powcal_topic(serial);
        let messages = self
            .db
            .fetch_unprocessed(&topic)
            .await
            .map_err(Error::Persistence)?;

        let mut ids = Vec::with_capacity(messages.len());
        let mut points = Vec::with_capacity(messages.len());
        for message in &messages {
            match PowerSample::from_payload(&message.payload) {
                Ok(sample) => {
                    ids.push(message.id);
                    points.push((sample.tx_scale, sample.rx_scale()));
                }
                Err(err) => warn!("Skipping power sample {}: {err}", message.id),
            }
        }

        if points.is_empty() {
            info!("{serial}: no power calibration data to plot");
            return Ok(PowcalOutcome::NoData);
        }

        let x: Vec<f64> = points.iter().map(|p| p.0).collect();
        let y: Vec<f64> = points.iter().map(|p| p.1).collect();

        // Repeated tx_scale steps add rows but not rank.
        let mut distinct = x.clone();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();

        let degree = self.degree.min(distinct.len() - 1);
        if degree < self.degree {
            info!(
                "{serial}: fitting degree {degree} instead of {} with {} distinct tx_scale value(s)",
                self.degree,
                distinct.len()
            );
        }

        let polynomial = match polyfit(&x, &y, degree) {
            Ok(polynomial) => polynomial,
            Err(Error::InsufficientData(reason)) => {
                info!("{serial}: power calibration data cannot be fitted: {reason}");
                return Ok(PowcalOutcome::NoData);
            }
            Err(err) => return Err(err),
        };

        std::fs::create_dir_all(&self.plot_dir).map_err(|err| {
            Error::Render(format!("cannot create {}: {err}", self.plot_dir.display()))
        })?;
        let chart_path = self.plot_dir.join(format!(
            "{serial}_calib_pow_plot_{}.svg",
            now.format("%Y%m%d_%H%M%S")
        ));
        render_power_chart(&chart_path, serial, &points, &polynomial)?;

        self.db
            .mark_processed(&ids)
            .await
            .map_err(Error::Persistence)?;
        info!("{serial}: power calibration chart saved to {}", chart_path.display());

        Ok(PowcalOutcome::Rendered(PowerCalibrationReport {
            serial: serial.to_string(),
            sample_count: points.len(),
            degree,
            polynomial,
            chart_path,
            consumed: ids,
        }))
    }
}
