use crate::config::ConfigArgs;
use clap::Args;

#[derive(Debug, Args)]
pub struct RunCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print line protocol to stdout instead of writing it to the store
    #[arg(long)]
    pub dry_run: bool,

    /// Only emit future points, not the fitted history
    #[arg(long)]
    pub no_history: bool,

    /// Fixed seed for the uncertainty simulation
    #[arg(long)]
    pub seed: Option<u64>,
}
