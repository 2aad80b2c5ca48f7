//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running the forecast pipeline for one entity
//! - Inspecting the effective configuration

pub mod commands;
pub mod handlers;

pub use commands::{Commands, ConfigCommand, RunCommand};
pub use handlers::{handle_config, handle_run};
