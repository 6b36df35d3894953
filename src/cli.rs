use clap::{Parser, Subcommand, ValueEnum};
use crate::portal::Portal;
use std::path::PathBuf;

/// Automates the campus identity provider and course election system.
#[derive(Debug, Parser)]
#[command(name = "suep", version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_SHORT"), ")"))]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty, global = true)]
    pub tracing: TracingFormat,

    /// Configuration file (defaults to ./suep.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check whether the campus internal network is reachable
    Probe,
    /// Log in and verify the session is accepted by a portal
    Check {
        #[arg(value_enum)]
        portal: Portal,
    },
    /// Elect (or drop) every offering listed in a file, one identifier per line
    Elect {
        /// File of offering identifiers such as `2024001.01`
        file: PathBuf,
        /// Drop the listed offerings instead of electing them
        #[arg(long)]
        cancel: bool,
        /// Start without waiting for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Colored single-line output for terminals
    Pretty,
    /// One JSON object per line
    Json,
}
