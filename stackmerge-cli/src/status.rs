//! The `status` subcommand.

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use clio::{Input, Output};
use derive_more::Display;
use stackmerge_core::inherit::InheritedEmitter;
use stackmerge_core::merge::MergeManager;

use crate::emitter_io::read_emitter;

/// Check whether an instance is up to date with its parent.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Report whether an instance emitter is synchronized with its parent.")]
#[non_exhaustive]
pub struct StatusArgs {
    /// The current parent emitter. Use '-' for stdin.
    #[arg(value_parser)]
    pub parent: Input,
    /// The instance emitter. Use '-' for stdin.
    #[arg(value_parser)]
    pub instance: Input,
    /// The parent as it was when the instance was last merged.
    #[arg(long, value_parser)]
    pub last: Option<Input>,
    /// Output file. Use '-' for stdout.
    #[clap(short, long, value_parser, default_value = "-")]
    pub output: Output,
}

/// Synchronization state of an instance.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum SyncState {
    /// The parent has not changed since the last merge.
    #[display("synchronized with its parent")]
    Synchronized,
    /// The parent changed since the last merge.
    #[display("out of date with its parent")]
    OutOfDate,
}

impl StatusArgs {
    /// Prints the synchronization state and whether the instance has local
    /// changes.
    pub fn run(&mut self) -> Result<()> {
        let parent = read_emitter(&mut self.parent)?;
        let instance = read_emitter(&mut self.instance)?;
        let last = self.last.as_mut().map(read_emitter).transpose()?;

        let local_changes = {
            let base = last.as_ref().unwrap_or(&parent);
            let diff = MergeManager::new().diff_emitters(base, &instance);
            !diff.is_valid() || !diff.is_empty()
        };
        let inherited = InheritedEmitter {
            instance,
            parent: Some(parent),
            parent_at_last_merge: last,
        };
        let state = if inherited.is_synchronized_with_parent() {
            SyncState::Synchronized
        } else {
            SyncState::OutOfDate
        };

        let name = &inherited.instance.unique_name;
        writeln!(self.output, "{name} is {state}.")?;
        if local_changes {
            writeln!(self.output, "{name} has local changes.")?;
        } else {
            writeln!(self.output, "{name} has no local changes.")?;
        }
        Ok(())
    }
}
