//! The `diff` subcommand.

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use clio::{Input, Output};
use stackmerge_core::merge::diff::StackSummary;
use stackmerge_core::merge::{DiffSummary, MergeManager};
use tracing::info;

use crate::CliError;
use crate::emitter_io::read_emitter;

/// Show the differences between two emitters.
#[derive(Parser, Debug)]
#[clap(version = "1.0", long_about = None)]
#[clap(about = "Diff two serialized emitters.")]
#[non_exhaustive]
pub struct DiffArgs {
    /// The base emitter. Use '-' for stdin.
    #[arg(value_parser)]
    pub base: Input,
    /// The changed emitter. Use '-' for stdin.
    #[arg(value_parser)]
    pub other: Input,
    /// Output the diff summary as JSON.
    #[arg(long)]
    pub json: bool,
    /// Output file. Use '-' for stdout.
    #[clap(short, long, value_parser, default_value = "-")]
    pub output: Output,
}

/// Printed when the emitters have no differences.
pub const NO_DIFFERENCES_PRINT: &str = "Emitters are identical.";

impl DiffArgs {
    /// Diffs the emitters and prints a summary. Fails if they could not be
    /// compared.
    pub fn run(&mut self) -> Result<()> {
        let base = read_emitter(&mut self.base)?;
        let other = read_emitter(&mut self.other)?;
        let diff = MergeManager::new().diff_emitters(&base, &other);
        let summary = DiffSummary::from(&diff);
        info!(base = %base.unique_name, other = %other.unique_name, empty = summary.empty, "diffed emitters");

        if self.json {
            serde_json::to_writer_pretty(&mut self.output, &summary)?;
            writeln!(self.output)?;
        } else {
            write_summary(&mut self.output, &summary)?;
        }

        if !summary.valid {
            Err(CliError::InvalidDiff {
                errors: summary.errors,
            })?;
        }
        Ok(())
    }
}

fn write_list<T: std::fmt::Display>(out: &mut impl Write, label: &str, items: &[T]) -> std::io::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let items: Vec<String> = items.iter().map(ToString::to_string).collect();
    writeln!(out, "  {label}: {}", items.join(", "))
}

fn write_stack(out: &mut impl Write, name: &str, stack: &StackSummary) -> std::io::Result<()> {
    writeln!(out, "{name}:")?;
    write_list(out, "removed modules", &stack.removed_modules)?;
    write_list(out, "added modules", &stack.added_modules)?;
    write_list(out, "moved modules", &stack.moved_modules)?;
    write_list(out, "enabled changed", &stack.enabled_changed)?;
    write_list(out, "version changed", &stack.version_changed)?;
    write_list(out, "removed inputs", &stack.removed_inputs)?;
    write_list(out, "added inputs", &stack.added_inputs)?;
    write_list(out, "modified inputs", &stack.modified_inputs)?;
    if stack.removed_messages + stack.added_messages > 0 {
        writeln!(
            out,
            "  messages: {} removed, {} added",
            stack.removed_messages, stack.added_messages
        )?;
    }
    Ok(())
}

/// Writes a human readable diff summary.
pub fn write_summary(out: &mut impl Write, summary: &DiffSummary) -> std::io::Result<()> {
    if summary.valid && summary.empty {
        return writeln!(out, "{NO_DIFFERENCES_PRINT}");
    }
    for (name, stack) in &summary.stacks {
        write_stack(out, name, stack)?;
    }
    for (id, entry) in &summary.modified_event_handlers {
        write_stack(out, &format!("Event Handler - {id}"), &entry.stack)?;
        write_list(out, "properties", &entry.properties)?;
    }
    for (id, entry) in &summary.modified_simulation_stages {
        write_stack(out, &format!("Simulation Stage - {id}"), &entry.stack)?;
        write_list(out, "properties", &entry.properties)?;
    }

    let entries = [
        ("removed event handlers", &summary.removed_event_handlers),
        ("added event handlers", &summary.added_event_handlers),
        ("removed simulation stages", &summary.removed_simulation_stages),
        ("added simulation stages", &summary.added_simulation_stages),
    ];
    let renderers = [
        ("removed renderers", &summary.removed_renderers),
        ("added renderers", &summary.added_renderers),
        ("modified renderers", &summary.modified_renderers),
    ];
    let has_emitter_changes = entries.iter().any(|(_, ids)| !ids.is_empty())
        || renderers.iter().any(|(_, ids)| !ids.is_empty())
        || !summary.emitter_properties.is_empty()
        || summary.scratch_pad_modified
        || !summary.display_names.is_empty();
    if has_emitter_changes {
        writeln!(out, "Emitter:")?;
        for (label, ids) in entries {
            write_list(out, label, ids)?;
        }
        for (label, ids) in renderers {
            write_list(out, label, ids)?;
        }
        write_list(out, "properties", &summary.emitter_properties)?;
        if summary.scratch_pad_modified {
            writeln!(out, "  scratch pad scripts modified")?;
        }
        let names = &summary.display_names;
        let changed: Vec<&String> = names
            .removed
            .iter()
            .chain(names.added.keys())
            .chain(names.modified.keys())
            .collect();
        write_list(out, "display names", &changed)?;
    }

    if !summary.errors.is_empty() {
        writeln!(out, "Errors:")?;
        for error in &summary.errors {
            writeln!(out, "  {error}")?;
        }
    }
    Ok(())
}
