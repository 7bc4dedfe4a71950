//! Standard command line tools, used by the stackmerge binary.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use stackmerge_core::merge::MergeStatus;
use thiserror::Error;

pub mod diff;
pub mod emitter_io;
pub mod merge;
pub mod status;

/// CLI arguments.
#[derive(Parser, Debug)]
#[clap(version, long_about = None)]
#[clap(about = "Diff and merge emitter script stacks.")]
#[non_exhaustive]
pub struct CliArgs {
    /// The command to run.
    #[command(subcommand)]
    pub command: CliCommand,
    /// Verbosity.
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

/// Subcommands of the CLI.
#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum CliCommand {
    /// Show the differences between two emitters.
    Diff(diff::DiffArgs),
    /// Merge the changes of an instance into its parent.
    Merge(merge::MergeArgs),
    /// Check whether an instance is up to date with its parent.
    Status(status::StatusArgs),
}

/// Error type for the CLI.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    /// Error reading input.
    #[error("Error reading from path: {0}")]
    InputFile(#[from] std::io::Error),
    /// Error parsing input.
    #[error("Error parsing input: {0}")]
    Parse(#[from] serde_json::Error),
    /// The emitters could not be compared.
    #[error("Diff failed with {} errors:\n{}", .errors.len(), .errors.join("\n"))]
    InvalidDiff {
        /// Accumulated diff failures.
        errors: Vec<String>,
    },
    /// The merge did not succeed.
    #[error("Merge {status} with {} errors:\n{}", .errors.len(), .errors.join("\n"))]
    Merge {
        /// How the merge ended.
        status: MergeStatus,
        /// Accumulated failures.
        errors: Vec<String>,
    },
}

impl CliArgs {
    /// Installs the log subscriber and runs the selected command.
    pub fn run(self) -> anyhow::Result<()> {
        init_tracing(&self.verbose);
        match self.command {
            CliCommand::Diff(mut args) => args.run(),
            CliCommand::Merge(mut args) => args.run(),
            CliCommand::Status(mut args) => args.run(),
        }
    }
}

/// Sends log output to stderr, filtered by the verbosity flags.
pub fn init_tracing(verbose: &Verbosity<InfoLevel>) {
    let Some(level) = verbose.tracing_level() else {
        return;
    };
    // A subscriber may already be installed when running as a library.
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
