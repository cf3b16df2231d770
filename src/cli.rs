// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The binary is a thin helper around the library: it prints the execution
//! plan of a `Convoy.toml` and applies schema migrations to a store file.
//! Conversions themselves are run by programs that register their steps with
//! a [`crate::convert::Converter`].

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `convoy`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "convoy",
    version,
    about = "Plan and prepare dependency-ordered data conversions.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CONVOY_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Validate the config and print the step execution order.
    Plan(PlanArgs),

    /// Apply pending schema migrations to an intermediate store.
    Migrate(MigrateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Leave out a step (repeatable). Added to `[pipeline].skip`.
    #[arg(long, value_name = "NAME")]
    pub skip: Vec<String>,

    /// Run only these steps and their dependencies (repeatable). Replaces
    /// `[pipeline].only`.
    #[arg(long, value_name = "NAME")]
    pub only: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// Path to the config file (TOML). Optional when both `--database` and
    /// `--schema` are given.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Store file to migrate. Overrides `[pipeline].database`.
    #[arg(long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Directory of `.sql` files. Overrides `[pipeline].schema_dir`.
    #[arg(long, value_name = "DIR")]
    pub schema: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
