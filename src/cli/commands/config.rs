use crate::config::ConfigArgs;
use clap::Args;

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Also run validation and fail on settings a run would reject
    #[arg(long)]
    pub check: bool,
}
