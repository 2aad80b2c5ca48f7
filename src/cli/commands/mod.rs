pub mod config;
pub mod run;

pub use config::ConfigCommand;
pub use run::RunCommand;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch history, forecast it and write the forecast back
    Run(RunCommand),
    /// Print the effective configuration
    Config(ConfigCommand),
}
