pub mod calibration;
pub mod db;
pub mod error;
pub mod instruments;
pub mod listener;
pub mod orchestrate;
pub mod powcal;
pub mod publisher;
pub mod registry;
pub mod settings;
pub mod topic;

use chrono::{Local, Utc};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use calibration::{AggregationConfig, AggregationReport, Aggregator};
use db::Database;
use error::{Error, Result};
use listener::{Listener, MqttInbox};
use orchestrate::TmuxPlan;
use powcal::{PowcalOutcome, PowerCalibration};
use publisher::{MqttPublisher, PublishSummary, ResultPublisher};
use registry::DeviceRegistry;
use settings::Settings;

fn open_database(settings: &Settings) -> Result<Database> {
    Database::new(settings.database_path.clone()).map_err(Error::Persistence)
}

/// Capture every subscribed topic into the store until `cancel` fires.
pub async fn run_listen(settings: &Settings, cancel: CancellationToken) -> Result<u64> {
    let db = open_database(settings)?;
    info!("Message store at {}", db.path().display());

    let mut inbox = MqttInbox::subscribe(&settings.broker, &settings.subscriptions).await?;
    Listener::new(db).run(&mut inbox, cancel).await
}

/// One aggregation run, optionally followed by publishing its results.
pub async fn run_aggregate(
    settings: &Settings,
    publish: bool,
) -> Result<(AggregationReport, PublishSummary)> {
    let db = open_database(settings)?;
    let registry = DeviceRegistry::load(&settings.registry_path)?;

    let config = AggregationConfig::try_from(&settings.calibration)?;
    let report = Aggregator::new(&db, &registry, config).run(Utc::now()).await?;

    if !publish || report.events.is_empty() {
        return Ok((report, PublishSummary::default()));
    }

    let mut publisher = ResultPublisher::new(MqttPublisher::connect(&settings.broker));
    let summary = publisher.publish_all(&report.events).await;
    publisher.into_inner().close().await;

    if summary.failed > 0 {
        warn!(
            "{} of {} result(s) were not published",
            summary.failed,
            report.events.len()
        );
    }
    Ok((report, summary))
}

/// Fit and chart the post-calibration power sweep of one leaf.
pub async fn run_plot(settings: &Settings, serial: &str) -> Result<PowcalOutcome> {
    let db = open_database(settings)?;
    PowerCalibration::new(&db, &settings.powcal)
        .generate(serial, Local::now())
        .await
}

/// Start the node processes in a tiled tmux session, or print the plan.
pub async fn run_orchestrate(settings: &Settings, dry_run: bool) -> Result<()> {
    let registry = DeviceRegistry::load(&settings.registry_path)?;
    let plan = TmuxPlan::build(&registry, &settings.orchestration);

    if dry_run {
        print!("{plan}");
        return Ok(());
    }
    plan.execute().await
}
