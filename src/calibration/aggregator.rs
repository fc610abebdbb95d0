use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::db::{CalibrationResult, Database};
use crate::error::{Error, Result};
use crate::publisher::PublishEvent;
use crate::registry::DeviceRegistry;

use super::config::AggregationConfig;
use super::pairing::{pair_nearest, partition_link};
use super::sample::CalibrationSample;
use super::stats::summarize;

/// Outcome of one aggregation run.
#[derive(Debug, Default)]
pub struct AggregationReport {
    /// Messages taken from the store, all of which were marked processed.
    pub selected: usize,
    /// Messages whose payload could not be decoded.
    pub discarded: usize,
    /// Decoded samples naming a device outside the registry.
    pub unknown_device: usize,
    pub skipped_zero_reverse: usize,
    pub results: Vec<CalibrationResult>,
    /// Retained publishes for the result publisher, one per result.
    pub events: Vec<PublishEvent>,
}

/// Batch job turning raw `calibration/results` messages into per-link ratios.
pub struct Aggregator<'a> {
    db: &'a Database,
    registry: &'a DeviceRegistry,
    config: AggregationConfig,
}

impl<'a> Aggregator<'a> {
    pub fn new(db: &'a Database, registry: &'a DeviceRegistry, config: AggregationConfig) -> Self {
        Self {
            db,
            registry,
            config,
        }
    }

    /// Run once against the store.
    ///
    /// Results and processed flags are committed together after every link
    /// has been computed; if the store fails, nothing is marked and the next
    /// run sees the same messages again.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<AggregationReport> {
        let horizon = now
            .checked_sub_signed(self.config.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let messages = self
            .db
            .fetch_unprocessed(&self.config.topic)
            .await
            .map_err(Error::Persistence)?;

        let selected: Vec<_> = messages
            .into_iter()
            .filter(|message| message.received_at > horizon)
            .collect();

        let mut report = AggregationReport {
            selected: selected.len(),
            ..AggregationReport::default()
        };

        if selected.is_empty() {
            info!("No new calibration messages on {}", self.config.topic);
            return Ok(report);
        }

        let mut samples = Vec::with_capacity(selected.len());
        for message in &selected {
            match CalibrationSample::from_payload(&message.payload) {
                Ok(sample) => {
                    if self.registry.contains(&sample.tx_device_id)
                        && self.registry.contains(&sample.rx_device_id)
                    {
                        samples.push(sample);
                    } else {
                        report.unknown_device += 1;
                    }
                }
                Err(err) => {
                    warn!("Discarding calibration message {}: {err}", message.id);
                    report.discarded += 1;
                }
            }
        }

        let mut results = Vec::new();
        for (center, leaf) in self.registry.pairs() {
            let (forward, reverse) = partition_link(&samples, center, leaf);
            let pairs = pair_nearest(&forward, &reverse, self.config.tolerance);
            let outcome = summarize(center, leaf, &pairs, now);
            report.skipped_zero_reverse += outcome.skipped_zero_reverse;

            match outcome.result {
                Some(result) => results.push(result),
                None => info!("{leaf}: No calibration data available"),
            }
        }

        let consumed: Vec<i64> = selected.iter().map(|message| message.id).collect();
        let stored = self
            .db
            .commit_calibration_run(results, consumed)
            .await
            .map_err(Error::Persistence)?;

        for result in &stored {
            report.events.push(PublishEvent {
                topic: self.config.ratio_topic(&result.center_id, &result.leaf_id),
                payload: serde_json::to_string(result)?,
                retain: true,
            });
        }
        report.results = stored;

        info!(
            "Calibration run: {} message(s), {} discarded, {} result(s)",
            report.selected,
            report.discarded,
            report.results.len()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::TempDir;

    use super::*;

    const DEVICES: &str = r#"{
        "cent-node": {"serial": "32A"},
        "leaf-nodes": [{"serial": "32B"}, {"serial": "32C"}]
    }"#;

    fn payload(tx: &str, rx: &str, amplitude: f64, time: &str) -> String {
        serde_json::json!({
            "tx_dev": tx,
            "rx_dev": rx,
            "tx_gain": 60.0,
            "rx_gain": 40.0,
            "amplitude": amplitude,
            "time": time,
        })
        .to_string()
    }

    async fn setup() -> (TempDir, Database, DeviceRegistry) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("telemetry.db")).unwrap();
        let registry = DeviceRegistry::from_json(DEVICES).unwrap();
        (dir, db, registry)
    }

    #[tokio::test]
    async fn end_to_end_pair_statistics() {
        let (_dir, db, registry) = setup().await;
        let now = Utc::now();

        for (tx, rx, amplitude, time) in [
            ("32A", "32B", 4.0, "2024-08-26 14:00:00"),
            ("32A", "32B", 6.0, "2024-08-26 14:00:10"),
            ("32B", "32A", 2.0, "2024-08-26 14:00:01"),
            ("32B", "32A", 3.0, "2024-08-26 14:00:09"),
        ] {
            db.append_message("calibration/results", &payload(tx, rx, amplitude, time), now)
                .await
                .unwrap();
        }

        let aggregator = Aggregator::new(&db, &registry, AggregationConfig::default());
        let report = aggregator.run(now).await.unwrap();

        assert_eq!(report.selected, 4);
        assert_eq!(report.results.len(), 1, "32C has no data and yields no row");
        let result = &report.results[0];
        assert_eq!(result.leaf_id, "32B");
        assert_eq!(result.sample_count, 2);
        assert_eq!(result.amp_ratio_mean, 2.0);
        assert_eq!(result.amp_ratio_var, 0.0);

        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].topic, "calibration/ratio/32A/32B");
        assert!(report.events[0].retain);
        let published: CalibrationResult =
            serde_json::from_str(&report.events[0].payload).unwrap();
        assert_eq!(&published, result);

        assert!(db.fetch_unprocessed("calibration/results").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rerun_without_new_messages_adds_nothing() {
        let (_dir, db, registry) = setup().await;
        let now = Utc::now();

        db.append_message(
            "calibration/results",
            &payload("32A", "32B", 4.0, "2024-08-26 14:00:00"),
            now,
        )
        .await
        .unwrap();
        db.append_message(
            "calibration/results",
            &payload("32B", "32A", 2.0, "2024-08-26 14:00:01"),
            now,
        )
        .await
        .unwrap();

        let aggregator = Aggregator::new(&db, &registry, AggregationConfig::default());
        assert_eq!(aggregator.run(now).await.unwrap().results.len(), 1);

        let second = aggregator.run(now).await.unwrap();
        assert_eq!(second.selected, 0);
        assert!(second.results.is_empty());
        assert_eq!(db.count_calibration_results().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unmatched_and_malformed_messages_are_still_consumed() {
        let (_dir, db, registry) = setup().await;
        let now = Utc::now();

        db.append_message(
            "calibration/results",
            &payload("32A", "32B", 4.0, "2024-08-26 14:00:00"),
            now,
        )
        .await
        .unwrap();
        db.append_message(
            "calibration/results",
            &payload("32B", "32A", 2.0, "2024-08-26 14:05:00"),
            now,
        )
        .await
        .unwrap();
        db.append_message("calibration/results", "{'amplitude': 1}", now)
            .await
            .unwrap();
        db.append_message(
            "calibration/results",
            &payload("99Z", "32A", 2.0, "2024-08-26 14:00:01"),
            now,
        )
        .await
        .unwrap();

        let aggregator = Aggregator::new(&db, &registry, AggregationConfig::default());
        let report = aggregator.run(now).await.unwrap();

        assert_eq!(report.selected, 4);
        assert_eq!(report.discarded, 1);
        assert_eq!(report.unknown_device, 1);
        assert!(report.results.is_empty());
        assert!(report.events.is_empty());
        assert!(db.fetch_unprocessed("calibration/results").await.unwrap().is_empty());
        assert_eq!(db.count_calibration_results().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn messages_older_than_lookback_are_left_alone() {
        let (_dir, db, registry) = setup().await;
        let now = Utc::now();
        let stale = now - Duration::minutes(45);

        db.append_message(
            "calibration/results",
            &payload("32A", "32B", 4.0, "2024-08-26 14:00:00"),
            stale,
        )
        .await
        .unwrap();
        db.append_message("telemetry/powcalib/32B", "{}", now).await.unwrap();

        let aggregator = Aggregator::new(&db, &registry, AggregationConfig::default());
        let report = aggregator.run(now).await.unwrap();

        assert_eq!(report.selected, 0);
        assert_eq!(db.fetch_unprocessed("calibration/results").await.unwrap().len(), 1);
        assert_eq!(db.fetch_unprocessed("telemetry/#").await.unwrap().len(), 1);
    }
}
