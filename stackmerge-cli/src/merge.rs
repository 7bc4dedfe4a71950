//! The `merge` subcommand.

use anyhow::Result;
use clap::Parser;
use clio::{Input, Output};
use stackmerge_core::merge::{MergeManager, MergeOptions, MergeStatus};
use tracing::{info, warn};

use crate::CliError;
use crate::emitter_io::{read_emitter, write_emitter};

/// Merge the changes of an instance into its parent.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Merge an instance emitter's changes into its parent.")]
#[non_exhaustive]
pub struct MergeArgs {
    /// The current parent emitter. Use '-' for stdin.
    #[arg(value_parser)]
    pub parent: Input,
    /// The instance emitter. Use '-' for stdin.
    #[arg(value_parser)]
    pub instance: Input,
    /// The parent as it was when the instance was last merged.
    #[arg(long, value_parser)]
    pub last: Option<Input>,
    /// Output file for the merged emitter. Use '-' for stdout.
    #[clap(short, long, value_parser, default_value = "-")]
    pub output: Output,
    /// Delete modules missing from the instance even on a first merge.
    #[arg(long, help_heading = "Merge")]
    pub delete_removed: bool,
    /// Keep fast-iteration values that are no longer used.
    #[arg(long, help_heading = "Merge")]
    pub keep_stale_values: bool,
    /// Leave node change ids as the apply step produced them.
    #[arg(long, help_heading = "Merge")]
    pub no_change_ids: bool,
}

impl MergeArgs {
    /// The merge options selected by the flags.
    pub fn options(&self) -> MergeOptions {
        MergeOptions::default()
            .with_disable_removed_on_first_merge(!self.delete_removed)
            .with_prune_rapid_iteration(!self.keep_stale_values)
            .with_force_change_ids(!self.no_change_ids)
    }

    /// Runs the merge and writes the resulting instance.
    pub fn run(&mut self) -> Result<()> {
        let parent = read_emitter(&mut self.parent)?;
        let instance = read_emitter(&mut self.instance)?;
        let last = self.last.as_mut().map(read_emitter).transpose()?;

        let mut manager = MergeManager::with_options(self.options());
        let result = manager.merge_emitter(&parent, last.as_ref(), &instance);
        match (result.status, &result.merged) {
            (MergeStatus::NoDifferences, _) => {
                info!(emitter = %instance.unique_name, "no differences, instance unchanged");
                write_emitter(&mut self.output, &instance)?;
            }
            (MergeStatus::SucceededDifferencesApplied, Some(merged)) => {
                info!(
                    emitter = %merged.unique_name,
                    modified = result.modified_graph,
                    "merge succeeded"
                );
                write_emitter(&mut self.output, merged)?;
            }
            (status, _) => {
                warn!(emitter = %instance.unique_name, %status, "merge failed");
                Err(CliError::Merge {
                    status,
                    errors: result.errors,
                })?;
            }
        }
        Ok(())
    }
}
