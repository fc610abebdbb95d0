use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tokio_util::sync::CancellationToken;

use otac_telemetry_lib::powcal::PowcalOutcome;
use otac_telemetry_lib::settings::Settings;

/// Telemetry capture and calibration tooling for the OTA-C testbed.
#[derive(Parser)]
#[command(name = "otac-telemetry", about)]
struct Cli {
    /// Path to the JSON settings file. Defaults apply when it is absent.
    #[arg(short, long, default_value = "config/telemetry.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record every subscribed broker message until interrupted.
    Listen,
    /// Compute per-link calibration ratios from unprocessed measurements.
    Aggregate {
        /// Store results without publishing them.
        #[arg(long)]
        no_publish: bool,
    },
    /// Fit and chart a leaf's post-calibration power sweep.
    Plot {
        /// Leaf serial, e.g. 32B.
        serial: String,
    },
    /// Launch the node processes in a tiled tmux session.
    Orchestrate {
        /// Print the tmux commands instead of running them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("otac-telemetry {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let settings = Settings::load(Some(&cli.config))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(dispatch(cli.command, settings))
}

async fn dispatch(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Listen => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, shutting down");
                }
                on_signal.cancel();
            });

            let stored = otac_telemetry_lib::run_listen(&settings, cancel).await?;
            info!("Stored {stored} message(s)");
        }
        Command::Aggregate { no_publish } => {
            let (report, summary) =
                otac_telemetry_lib::run_aggregate(&settings, !no_publish).await?;
            info!(
                "{} result(s) stored, {} published, {} failed",
                report.results.len(),
                summary.sent,
                summary.failed
            );
        }
        Command::Plot { serial } => match otac_telemetry_lib::run_plot(&settings, &serial).await? {
            PowcalOutcome::Rendered(report) => {
                info!(
                    "Fitted degree {} over {} sample(s): {:?}",
                    report.degree,
                    report.sample_count,
                    report.polynomial.coefficients()
                );
                println!("{}", report.chart_path.display());
            }
            PowcalOutcome::NoData => info!("Nothing to plot for {serial}"),
        },
        Command::Orchestrate { dry_run } => {
            otac_telemetry_lib::run_orchestrate(&settings, dry_run).await?;
        }
        Command::Version => {}
    }
    Ok(())
}
