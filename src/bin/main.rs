//! capcast: storage capacity forecasting for InfluxDB telemetry.

use capcast_core::cli::{handle_config, handle_run, Commands};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Forecast storage usage and write it back to InfluxDB")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // Logs go to stderr so that --dry-run output on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(command) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            match runtime.block_on(handle_run(command)) {
                Ok(summary) => info!(
                    entity = %summary.entity,
                    observations = summary.observations,
                    rows = summary.rows,
                    unordered = summary.unordered_rows,
                    lines = summary.lines_written,
                    "run complete"
                ),
                Err(e) => {
                    error!(error = %e, data_quality = e.is_data_quality(), "run failed");
                    return Err(e.into());
                }
            }
        }
        Commands::Config(command) => handle_config(command)?,
    }

    Ok(())
}
