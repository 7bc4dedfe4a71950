//! Diffs of script stacks and whole emitters.

use std::collections::BTreeMap;

use smol_str::SmolStr;
use tracing::debug;

use super::adapter::{
    AdaptedEntry, EmitterAdapter, FunctionAdapter, InputOverrideAdapter, OverrideValue,
    ScriptStackAdapter, StackEntryAdapter,
};
use super::error::{DiffSide, MergeError};
use super::list_diff::{MapDiff, diff_lists, diff_maps};
use super::property_diff::diff_properties;
use crate::emitter::{EventHandlerProperties, Renderer, SimulationStageProperties};
use crate::graph::Definition;
use crate::ids::{MessageId, NodeId, RendererId, UsageId};
use crate::usage::{ScriptUsage, UsageKey};

/// Compares two overrides of the same input.
///
/// Returns `None` when the two cannot be compared, which callers must treat
/// as an error rather than as a match.
pub fn do_input_overrides_match(
    base: &InputOverrideAdapter,
    other: &InputOverrideAdapter,
) -> Option<bool> {
    use OverrideValue::*;
    match (&base.value, &other.value) {
        (Local { literal: a }, Local { literal: b }) => Some(a == b),
        (Rapid { value: a, .. }, Rapid { value: b, .. }) => match (a, b) {
            (Some(a), Some(b)) => Some(a.type_name == b.type_name && a.bytes == b.bytes),
            _ => None,
        },
        (Linked { handle: a, .. }, Linked { handle: b, .. }) => Some(a == b),
        (
            Data {
                name: na,
                object: a,
                ..
            },
            Data {
                name: nb,
                object: b,
                ..
            },
        ) => Some(na == nb && a == b),
        (Dynamic(a), Dynamic(b)) => dynamic_inputs_match(a, b),
        (StaticSwitch { value: a }, StaticSwitch { value: b }) => Some(a == b),
        (Unknown { .. }, Unknown { .. }) => None,
        _ => Some(false),
    }
}

fn dynamic_inputs_match(base: &FunctionAdapter, other: &FunctionAdapter) -> Option<bool> {
    if !definitions_match(base.definition.as_ref(), other.definition.as_ref()) {
        return Some(false);
    }
    let inputs = diff_lists(&base.overrides, &other.overrides, |o| o.input_name.clone());
    let mut matched = inputs.removed_from_base.is_empty() && inputs.added_in_other.is_empty();
    for (b, o) in inputs.common {
        matched &= do_input_overrides_match(b, o)?;
    }
    Some(matched)
}

fn definitions_match(base: Option<&Definition>, other: Option<&Definition>) -> bool {
    match (base, other) {
        (Some(a), Some(b)) => a.same_definition(b),
        (None, None) => true,
        _ => false,
    }
}

fn describe(definition: Option<&Definition>) -> String {
    definition.map_or_else(|| "(missing)".to_string(), Definition::describe)
}

/// An annotation added to or removed from a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleMessage {
    /// The annotated module.
    pub module: NodeId,
    /// Annotation id.
    pub id: MessageId,
    /// Annotation text.
    pub text: String,
}

/// Differences between two versions of one script stack.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptStackDiff {
    /// Modules only in the base, in base order.
    pub removed_base_modules: Vec<FunctionAdapter>,
    /// Modules only in the other, in other order.
    pub added_other_modules: Vec<FunctionAdapter>,
    /// Modules that changed position relative to the other common modules.
    ///
    /// These are the common modules left outside a longest increasing run of
    /// base positions taken in other order, not every module whose index
    /// differs. Moving one module to the front of a stack therefore reports
    /// that module alone, although all modules before it shift by one.
    pub moved_base_modules: Vec<FunctionAdapter>,
    /// The other side of [`ScriptStackDiff::moved_base_modules`].
    pub moved_other_modules: Vec<FunctionAdapter>,
    /// Modules whose enabled flag differs, base side.
    pub enabled_changed_base_modules: Vec<FunctionAdapter>,
    /// Modules whose enabled flag differs, other side.
    pub enabled_changed_other_modules: Vec<FunctionAdapter>,
    /// Modules whose selected version differs, base side.
    pub version_changed_base_modules: Vec<FunctionAdapter>,
    /// Modules whose selected version differs, other side.
    pub version_changed_other_modules: Vec<FunctionAdapter>,
    /// Overrides only in the base.
    pub removed_base_input_overrides: Vec<InputOverrideAdapter>,
    /// Overrides only in the other.
    pub added_other_input_overrides: Vec<InputOverrideAdapter>,
    /// Overrides whose values differ, base side.
    pub modified_base_input_overrides: Vec<InputOverrideAdapter>,
    /// Overrides whose values differ, other side.
    pub modified_other_input_overrides: Vec<InputOverrideAdapter>,
    /// Annotations only in the base.
    pub removed_messages: Vec<ModuleMessage>,
    /// Annotations only in the other.
    pub added_messages: Vec<ModuleMessage>,
    /// Base usage, set when the two stacks feed different usages.
    pub changed_base_usage: Option<UsageKey>,
    /// Other usage, set when the two stacks feed different usages.
    pub changed_other_usage: Option<UsageKey>,
    /// Why the diff is invalid.
    pub errors: Vec<String>,
}

impl ScriptStackDiff {
    /// Whether the stacks were equal.
    pub fn is_empty(&self) -> bool {
        self.removed_base_modules.is_empty()
            && self.added_other_modules.is_empty()
            && self.moved_base_modules.is_empty()
            && self.enabled_changed_base_modules.is_empty()
            && self.version_changed_base_modules.is_empty()
            && self.removed_base_input_overrides.is_empty()
            && self.added_other_input_overrides.is_empty()
            && self.modified_other_input_overrides.is_empty()
            && self.removed_messages.is_empty()
            && self.added_messages.is_empty()
            && self.changed_other_usage.is_none()
    }

    /// Whether every comparison succeeded.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Diffs two versions of a script stack.
pub fn diff_script_stacks(base: &ScriptStackAdapter, other: &ScriptStackAdapter) -> ScriptStackDiff {
    let mut diff = ScriptStackDiff::default();
    let modules = diff_lists(&base.modules, &other.modules, |m| m.id);

    diff.removed_base_modules = modules.removed_from_base.into_iter().cloned().collect();
    diff.removed_base_modules.sort_by_key(|m| m.stack_index);
    diff.added_other_modules = modules.added_in_other.into_iter().cloned().collect();
    diff.added_other_modules.sort_by_key(|m| m.stack_index);

    let mut common = modules.common;
    common.sort_by_key(|(_, o)| o.stack_index);
    let base_order: Vec<_> = common.iter().map(|(b, _)| b.stack_index).collect();
    let in_order = longest_increasing(&base_order);
    let mut moved: Vec<_> = common
        .iter()
        .zip(in_order)
        .filter(|(_, kept)| !kept)
        .map(|(pair, _)| *pair)
        .collect();
    moved.sort_by_key(|(b, _)| b.stack_index);
    for (b, o) in moved {
        diff.moved_base_modules.push(b.clone());
        diff.moved_other_modules.push(o.clone());
    }

    common.sort_by_key(|(b, _)| b.stack_index);
    for (b, o) in common {
        if b.enabled != o.enabled {
            diff.enabled_changed_base_modules.push(b.clone());
            diff.enabled_changed_other_modules.push(o.clone());
        }
        if b.selected_version != o.selected_version {
            diff.version_changed_base_modules.push(b.clone());
            diff.version_changed_other_modules.push(o.clone());
        }
        diff_messages(b, o, &mut diff);
        if definitions_match(b.definition.as_ref(), o.definition.as_ref()) {
            diff_function_inputs(b, o, &mut diff);
        } else {
            let err = MergeError::FunctionScriptMismatch {
                function: b.name.clone(),
                parent: describe(b.definition.as_ref()),
                child: describe(o.definition.as_ref()),
            };
            diff.errors.push(err.to_string());
        }
    }

    if base.usage != other.usage {
        diff.changed_base_usage = Some(base.usage);
        diff.changed_other_usage = Some(other.usage);
    }
    diff
}

fn diff_messages(base: &FunctionAdapter, other: &FunctionAdapter, diff: &mut ScriptStackDiff) {
    let message = |module: &FunctionAdapter, (id, text): (&MessageId, &String)| ModuleMessage {
        module: module.id,
        id: *id,
        text: text.clone(),
    };
    diff.removed_messages.extend(
        base.messages
            .iter()
            .filter(|(id, _)| !other.messages.contains_key(*id))
            .map(|m| message(base, m)),
    );
    diff.added_messages.extend(
        other
            .messages
            .iter()
            .filter(|(id, _)| !base.messages.contains_key(*id))
            .map(|m| message(other, m)),
    );
}

fn diff_function_inputs(base: &FunctionAdapter, other: &FunctionAdapter, diff: &mut ScriptStackDiff) {
    let inputs = diff_lists(&base.overrides, &other.overrides, |o| o.input_name.clone());
    diff.removed_base_input_overrides
        .extend(inputs.removed_from_base.into_iter().cloned());
    diff.added_other_input_overrides
        .extend(inputs.added_in_other.into_iter().cloned());
    for (b, o) in inputs.common {
        match do_input_overrides_match(b, o) {
            Some(true) => {}
            Some(false) => {
                diff.modified_base_input_overrides.push(b.clone());
                diff.modified_other_input_overrides.push(o.clone());
            }
            None => {
                let err = MergeError::InputDiffFailed {
                    function: base.name.clone(),
                    input: b.input_name.clone(),
                };
                diff.errors.push(err.to_string());
            }
        }
    }
}

/// Marks the items of a sequence that belong to one longest strictly
/// increasing subsequence.
fn longest_increasing(seq: &[usize]) -> Vec<bool> {
    let mut len = vec![1usize; seq.len()];
    let mut prev = vec![None; seq.len()];
    for i in 0..seq.len() {
        for j in 0..i {
            if seq[j] < seq[i] && len[j] + 1 > len[i] {
                len[i] = len[j] + 1;
                prev[i] = Some(j);
            }
        }
    }
    let mut keep = vec![false; seq.len()];
    let mut end = (0..seq.len()).rev().max_by_key(|&i| len[i]);
    while let Some(i) = end {
        keep[i] = true;
        end = prev[i];
    }
    keep
}

/// Differences between two versions of one event handler or simulation
/// stage.
#[derive(Clone, Debug, PartialEq)]
pub struct StackEntryDiff<P> {
    /// The base entry.
    pub base: StackEntryAdapter<P>,
    /// The other entry.
    pub other: StackEntryAdapter<P>,
    /// Non-stack settings that differ.
    pub changed_properties: Vec<&'static str>,
    /// Differences of the entries' stacks.
    pub stack: ScriptStackDiff,
}

/// Differences between two lists of entries.
#[derive(Clone, Debug, PartialEq)]
pub struct StackEntryListDiff<P> {
    /// Entries only in the base.
    pub removed_base: Vec<StackEntryAdapter<P>>,
    /// Entries only in the other.
    pub added_other: Vec<StackEntryAdapter<P>>,
    /// Entries in both that differ.
    pub modified: Vec<StackEntryDiff<P>>,
}

impl<P> Default for StackEntryListDiff<P> {
    fn default() -> Self {
        Self {
            removed_base: Vec::new(),
            added_other: Vec::new(),
            modified: Vec::new(),
        }
    }
}

impl<P> StackEntryListDiff<P> {
    /// Whether the lists were equal.
    pub fn is_empty(&self) -> bool {
        self.removed_base.is_empty() && self.added_other.is_empty() && self.modified.is_empty()
    }

    /// The diff of a matched entry.
    pub fn modified_entry(&self, usage_id: UsageId) -> Option<&StackEntryDiff<P>> {
        self.modified.iter().find(|d| d.base.usage_id == usage_id)
    }
}

fn diff_entries<P: AdaptedEntry>(
    base: &[StackEntryAdapter<P>],
    other: &[StackEntryAdapter<P>],
    errors: &mut Vec<String>,
) -> StackEntryListDiff<P> {
    let entries = diff_lists(base, other, |e| e.usage_id);
    let mut diff = StackEntryListDiff {
        removed_base: entries.removed_from_base.into_iter().cloned().collect(),
        added_other: entries.added_in_other.into_iter().cloned().collect(),
        modified: Vec::new(),
    };
    for (b, o) in entries.common {
        let (Some(base_stack), Some(other_stack)) = (&b.stack, &o.stack) else {
            let side = if b.stack.is_none() {
                DiffSide::Base
            } else {
                DiffSide::Other
            };
            errors.push(P::invalid_entry(side, b.usage_id).to_string());
            continue;
        };
        let stack = diff_script_stacks(base_stack, other_stack);
        push_stack_errors(&P::stack_name(b.usage_id), &stack, errors);
        let changed_properties = match diff_properties(&b.properties, &o.properties) {
            Ok(changed) => changed,
            Err(err) => {
                errors.push(MergeError::from(err).to_string());
                Vec::new()
            }
        };
        if !stack.is_empty() || !changed_properties.is_empty() {
            diff.modified.push(StackEntryDiff {
                base: b.clone(),
                other: o.clone(),
                changed_properties,
                stack,
            });
        }
    }
    diff
}

fn push_stack_errors(stack_name: &str, diff: &ScriptStackDiff, errors: &mut Vec<String>) {
    if diff.is_valid() {
        return;
    }
    let header = MergeError::StackDiffFailed {
        stack: stack_name.to_string(),
        count: diff.errors.len(),
    };
    errors.push(header.to_string());
    errors.extend(diff.errors.iter().cloned());
}

/// Differences between two renderer lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RendererDiff {
    /// Renderers only in the base, with their positions.
    pub removed_base: Vec<(usize, Renderer)>,
    /// Renderers only in the other, with their positions.
    pub added_other: Vec<(usize, Renderer)>,
    /// Matched renderers that differ, base side.
    pub modified_base: Vec<(usize, Renderer)>,
    /// Matched renderers that differ, other side.
    pub modified_other: Vec<(usize, Renderer)>,
}

impl RendererDiff {
    /// Whether the lists were equal.
    pub fn is_empty(&self) -> bool {
        self.removed_base.is_empty() && self.added_other.is_empty() && self.modified_other.is_empty()
    }
}

fn diff_renderers(base: &[(usize, Renderer)], other: &[(usize, Renderer)]) -> RendererDiff {
    let renderers = diff_lists(base, other, |(_, r)| r.merge_id);
    let mut diff = RendererDiff {
        removed_base: renderers.removed_from_base.into_iter().cloned().collect(),
        added_other: renderers.added_in_other.into_iter().cloned().collect(),
        ..Default::default()
    };
    for (b, o) in renderers.common {
        if b.1 != o.1 {
            diff.modified_base.push(b.clone());
            diff.modified_other.push(o.clone());
        }
    }
    diff
}

/// Differences between two emitters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmitterDiff {
    /// Diffs of the fixed stacks that could be read on both sides.
    pub script_stacks: BTreeMap<ScriptUsage, ScriptStackDiff>,
    /// Event handler differences.
    pub event_handlers: StackEntryListDiff<EventHandlerProperties>,
    /// Simulation stage differences.
    pub simulation_stages: StackEntryListDiff<SimulationStageProperties>,
    /// Renderer differences.
    pub renderers: RendererDiff,
    /// Editable emitter properties that differ.
    pub different_emitter_properties: Vec<&'static str>,
    /// Whether the scratch pad scripts differ.
    pub scratch_pad_modified: bool,
    /// Display name override differences.
    pub display_names: MapDiff<String, String>,
    /// Every diff failure, with per-stack headers.
    pub errors: Vec<String>,
}

impl EmitterDiff {
    /// Whether the emitters were equal.
    pub fn is_empty(&self) -> bool {
        self.script_stacks.values().all(ScriptStackDiff::is_empty)
            && self.event_handlers.is_empty()
            && self.simulation_stages.is_empty()
            && self.renderers.is_empty()
            && self.different_emitter_properties.is_empty()
            && !self.scratch_pad_modified
            && self.display_names.is_empty()
    }

    /// Whether every comparison succeeded.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The diff of the stack with the given key, if one was produced.
    pub fn stack(&self, key: UsageKey) -> Option<&ScriptStackDiff> {
        match key.usage {
            ScriptUsage::ParticleEvent => self
                .event_handlers
                .modified_entry(key.usage_id)
                .map(|d| &d.stack),
            ScriptUsage::SimulationStage => self
                .simulation_stages
                .modified_entry(key.usage_id)
                .map(|d| &d.stack),
            fixed => self.script_stacks.get(&fixed),
        }
    }
}

/// Diffs two emitters. Failures are collected in [`EmitterDiff::errors`].
pub fn diff_emitters(base: &EmitterAdapter, other: &EmitterAdapter) -> EmitterDiff {
    let mut diff = EmitterDiff::default();
    for usage in ScriptUsage::FIXED {
        let stacks = (
            base.fixed_stacks.get(&usage).and_then(Option::as_ref),
            other.fixed_stacks.get(&usage).and_then(Option::as_ref),
        );
        let (Some(b), Some(o)) = stacks else {
            diff.errors.push(MergeError::InvalidStack { usage }.to_string());
            continue;
        };
        let stack = diff_script_stacks(b, o);
        push_stack_errors(usage.display_name(), &stack, &mut diff.errors);
        diff.script_stacks.insert(usage, stack);
    }

    diff.event_handlers = diff_entries(&base.event_handlers, &other.event_handlers, &mut diff.errors);
    diff.simulation_stages =
        diff_entries(&base.simulation_stages, &other.simulation_stages, &mut diff.errors);
    diff.renderers = diff_renderers(&base.renderers, &other.renderers);

    match diff_properties(&base.properties, &other.properties) {
        Ok(changed) => diff.different_emitter_properties = changed,
        Err(err) => diff.errors.push(MergeError::from(err).to_string()),
    }

    let (a, b) = (&base.scratch_pad_scripts, &other.scratch_pad_scripts);
    diff.scratch_pad_modified = a.len() != b.len()
        || a.iter()
            .zip(b)
            .any(|(x, y)| x.name != y.name || x.change_id != y.change_id);

    diff.display_names = diff_maps(&base.display_names, &other.display_names);

    debug!(
        base = %base.unique_name,
        other = %other.unique_name,
        empty = diff.is_empty(),
        errors = diff.errors.len(),
        "diffed emitters"
    );
    diff
}

/// Module and input level changes of one stack, by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StackSummary {
    /// Removed modules.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_modules: Vec<SmolStr>,
    /// Added modules.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_modules: Vec<SmolStr>,
    /// Moved modules.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub moved_modules: Vec<SmolStr>,
    /// Modules whose enabled flag changed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_changed: Vec<SmolStr>,
    /// Modules whose version changed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub version_changed: Vec<SmolStr>,
    /// Removed overrides, as `Module.Input`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_inputs: Vec<String>,
    /// Added overrides, as `Module.Input`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_inputs: Vec<String>,
    /// Modified overrides, as `Module.Input`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modified_inputs: Vec<String>,
    /// Number of removed annotations.
    #[serde(skip_serializing_if = "is_zero")]
    pub removed_messages: usize,
    /// Number of added annotations.
    #[serde(skip_serializing_if = "is_zero")]
    pub added_messages: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl From<&ScriptStackDiff> for StackSummary {
    fn from(diff: &ScriptStackDiff) -> Self {
        let names = |modules: &[FunctionAdapter]| -> Vec<SmolStr> {
            modules.iter().map(|m| m.name.clone()).collect()
        };
        let inputs = |overrides: &[InputOverrideAdapter]| -> Vec<String> {
            overrides
                .iter()
                .map(|o| format!("{}.{}", o.owner_name, o.input_name))
                .collect()
        };
        Self {
            removed_modules: names(&diff.removed_base_modules),
            added_modules: names(&diff.added_other_modules),
            moved_modules: names(&diff.moved_other_modules),
            enabled_changed: names(&diff.enabled_changed_other_modules),
            version_changed: names(&diff.version_changed_other_modules),
            removed_inputs: inputs(&diff.removed_base_input_overrides),
            added_inputs: inputs(&diff.added_other_input_overrides),
            modified_inputs: inputs(&diff.modified_other_input_overrides),
            removed_messages: diff.removed_messages.len(),
            added_messages: diff.added_messages.len(),
        }
    }
}

/// Changes of one matched event handler or simulation stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct EntrySummary {
    /// Changed settings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<&'static str>,
    /// Changes of the entry's stack.
    pub stack: StackSummary,
}

/// A serializable overview of an [`EmitterDiff`].
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiffSummary {
    /// Whether the diff is valid.
    pub valid: bool,
    /// Whether the diff is empty.
    pub empty: bool,
    /// Changed fixed stacks, by display name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub stacks: BTreeMap<&'static str, StackSummary>,
    /// Removed event handlers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_event_handlers: Vec<UsageId>,
    /// Added event handlers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_event_handlers: Vec<UsageId>,
    /// Changed event handlers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub modified_event_handlers: BTreeMap<UsageId, EntrySummary>,
    /// Removed simulation stages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_simulation_stages: Vec<UsageId>,
    /// Added simulation stages.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_simulation_stages: Vec<UsageId>,
    /// Changed simulation stages.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub modified_simulation_stages: BTreeMap<UsageId, EntrySummary>,
    /// Removed renderers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_renderers: Vec<RendererId>,
    /// Added renderers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub added_renderers: Vec<RendererId>,
    /// Changed renderers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modified_renderers: Vec<RendererId>,
    /// Changed emitter properties.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emitter_properties: Vec<&'static str>,
    /// Whether the scratch pad changed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub scratch_pad_modified: bool,
    /// Display name override changes.
    #[serde(skip_serializing_if = "MapDiff::is_empty")]
    pub display_names: MapDiff<String, String>,
    /// Diff failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl<P> StackEntryListDiff<P> {
    fn summarize(&self) -> (Vec<UsageId>, Vec<UsageId>, BTreeMap<UsageId, EntrySummary>) {
        let removed = self.removed_base.iter().map(|e| e.usage_id).collect();
        let added = self.added_other.iter().map(|e| e.usage_id).collect();
        let modified = self
            .modified
            .iter()
            .map(|d| {
                let summary = EntrySummary {
                    properties: d.changed_properties.clone(),
                    stack: StackSummary::from(&d.stack),
                };
                (d.base.usage_id, summary)
            })
            .collect();
        (removed, added, modified)
    }
}

impl From<&EmitterDiff> for DiffSummary {
    fn from(diff: &EmitterDiff) -> Self {
        let stacks = diff
            .script_stacks
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .map(|(usage, d)| (usage.display_name(), StackSummary::from(d)))
            .collect();
        let (removed_event_handlers, added_event_handlers, modified_event_handlers) =
            diff.event_handlers.summarize();
        let (removed_simulation_stages, added_simulation_stages, modified_simulation_stages) =
            diff.simulation_stages.summarize();
        let ids = |renderers: &[(usize, Renderer)]| -> Vec<RendererId> {
            renderers.iter().map(|(_, r)| r.merge_id).collect()
        };
        Self {
            valid: diff.is_valid(),
            empty: diff.is_empty(),
            stacks,
            removed_event_handlers,
            added_event_handlers,
            modified_event_handlers,
            removed_simulation_stages,
            added_simulation_stages,
            modified_simulation_stages,
            removed_renderers: ids(&diff.renderers.removed_base),
            added_renderers: ids(&diff.renderers.added_other),
            modified_renderers: ids(&diff.renderers.modified_other),
            emitter_properties: diff.different_emitter_properties.clone(),
            scratch_pad_modified: diff.scratch_pad_modified,
            display_names: diff.display_names.clone(),
            errors: diff.errors.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{EmitterBuilder, ModuleBuilder};
    use crate::emitter::{Emitter, ParameterValue, ScratchPadScript, SimTarget};
    use crate::ids::{ChangeId, DefinitionId, ParameterHandle};
    use cool_asserts::assert_matches;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::{fixture, rstest};

    const UPDATE: UsageKey = UsageKey::fixed(ScriptUsage::ParticleUpdate);

    fn diff(base: &Emitter, other: &Emitter) -> EmitterDiff {
        diff_emitters(&EmitterAdapter::build(base), &EmitterAdapter::build(other))
    }

    fn update(diff: &EmitterDiff) -> &ScriptStackDiff {
        &diff.script_stacks[&ScriptUsage::ParticleUpdate]
    }

    fn names(modules: &[FunctionAdapter]) -> Vec<&str> {
        modules.iter().map(|m| m.name.as_str()).collect()
    }

    #[fixture]
    fn base() -> Emitter {
        EmitterBuilder::new("Sparks")
            .module(
                UPDATE,
                ModuleBuilder::asset("A", "/Modules/A")
                    .literal("Speed", "float", "5.0")
                    .static_switch("Mode", "enum", "Slow"),
            )
            .module(UPDATE, ModuleBuilder::asset("B", "/Modules/B"))
            .module(UPDATE, ModuleBuilder::asset("C", "/Modules/C"))
            .build()
            .unwrap()
    }

    #[rstest]
    fn identical_emitters_have_empty_diffs(base: Emitter) {
        let d = diff(&base, &base.duplicate());
        assert!(d.is_empty());
        assert!(d.is_valid());
        assert_eq!(d.script_stacks.len(), 4);
    }

    #[rstest]
    fn enabled_and_added_modules(base: Emitter) {
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        other.graph.set_module_enabled(a, false).unwrap();
        other
            .add_module(UPDATE, 3, ModuleBuilder::asset("D", "/Modules/D"))
            .unwrap();

        let d = diff(&base, &other);
        let stack = update(&d);
        assert_eq!(names(&stack.enabled_changed_other_modules), ["A"]);
        assert!(!stack.enabled_changed_other_modules[0].enabled);
        assert_eq!(names(&stack.added_other_modules), ["D"]);
        assert!(stack.removed_base_modules.is_empty());
        assert!(stack.moved_base_modules.is_empty());
    }

    #[rstest]
    fn moving_a_module_reports_only_that_module(base: Emitter) {
        let mut other = base.duplicate();
        let c = other.find_module(UPDATE, "C").unwrap();
        other.graph.remove_module(UPDATE, c).unwrap();
        other
            .add_module(UPDATE, 0, ModuleBuilder::asset("C", "/Modules/C").id(c))
            .unwrap();

        let d = diff(&base, &other);
        let stack = update(&d);
        assert_eq!(names(&stack.moved_base_modules), ["C"]);
        assert_eq!(stack.moved_base_modules[0].stack_index, 2);
        assert_eq!(stack.moved_other_modules[0].stack_index, 0);
        assert!(stack.added_other_modules.is_empty());
        assert!(stack.removed_base_modules.is_empty());
    }

    #[rstest]
    fn literal_replaced_by_linked_handle(base: Emitter) {
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        other.graph.remove_override_pin(a, "Speed").unwrap();
        other
            .graph
            .get_or_create_override_pin(a, "Speed", "float", None)
            .unwrap();
        other
            .graph
            .bind_linked_handle(a, "Speed", ParameterHandle::new("Particles", "Age"), NodeId::new())
            .unwrap();

        let base_adapter = EmitterAdapter::build(&base);
        let other_adapter = EmitterAdapter::build(&other);
        let speed = |e: &EmitterAdapter| {
            e.stack(UPDATE).unwrap().modules[0]
                .input_override("Speed")
                .unwrap()
                .clone()
        };
        assert_eq!(
            do_input_overrides_match(&speed(&base_adapter), &speed(&other_adapter)),
            Some(false)
        );

        let d = diff_emitters(&base_adapter, &other_adapter);
        let stack = update(&d);
        assert_eq!(stack.modified_other_input_overrides.len(), 1);
        assert_eq!(stack.modified_other_input_overrides[0].input_name, "Speed");
        assert!(stack.added_other_input_overrides.is_empty());
        assert!(stack.removed_base_input_overrides.is_empty());
    }

    #[rstest]
    fn static_switch_change_is_a_modification(base: Emitter) {
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        let call = other.graph.function_call_mut(a).unwrap();
        call.static_switches["Mode"].value = "Fast".into();

        let d = diff(&base, &other);
        let stack = update(&d);
        assert_eq!(stack.modified_other_input_overrides.len(), 1);
        assert_matches!(
            &stack.modified_other_input_overrides[0].value,
            OverrideValue::StaticSwitch { value } => assert_eq!(value, "Fast")
        );
        assert!(stack.removed_base_input_overrides.is_empty());
        assert!(stack.added_other_input_overrides.is_empty());
    }

    #[test]
    fn missing_rapid_value_is_an_error() {
        let base = EmitterBuilder::new("Sparks")
            .module(
                UPDATE,
                ModuleBuilder::asset("Gravity", "/Gravity").rapid("Strength", ParameterValue::float(1.0)),
            )
            .build()
            .unwrap();
        let mut other = base.duplicate();
        other
            .script_mut(UPDATE)
            .unwrap()
            .rapid_iteration
            .remove("Constants.Emitter.Gravity.Strength");

        let d = diff(&base, &other);
        assert!(!d.is_valid());
        assert_eq!(
            d.errors,
            [
                "Failed to diff Particle Update script stack. 1 Errors:",
                "Failed to diff function inputs. Function name: Gravity Input Name: Strength",
            ]
        );
    }

    #[test]
    fn scratch_definitions_must_share_identity() {
        let scratch = |id| Definition::Scratch {
            name: "Wobble".into(),
            id,
        };
        let module = NodeId::new();
        let base = EmitterBuilder::new("Sparks")
            .module(UPDATE, ModuleBuilder::new("Wobble", scratch(DefinitionId::new())).id(module))
            .build()
            .unwrap();
        let other = EmitterBuilder::new("Sparks")
            .module(UPDATE, ModuleBuilder::new("Wobble", scratch(DefinitionId::new())).id(module))
            .build()
            .unwrap();

        let d = diff(&base, &other);
        assert!(!d.is_valid());
        assert!(d.errors[1].starts_with("Function scripts for function Wobble did not match."));
    }

    #[test]
    fn dynamic_inputs_compare_recursively() {
        let random = |max: &str| ModuleBuilder::asset("Random", "/Random").literal("Max", "float", max);
        let module = NodeId::new();
        let dynamic = NodeId::new();
        let build = |max| {
            EmitterBuilder::new("Sparks")
                .module(
                    UPDATE,
                    ModuleBuilder::asset("Spawn", "/Spawn")
                        .id(module)
                        .dynamic("Count", "int", random(max).id(dynamic)),
                )
                .build()
                .unwrap()
        };
        assert!(diff(&build("2"), &build("2")).is_empty());

        let d = diff(&build("2"), &build("3"));
        assert_eq!(update(&d).modified_other_input_overrides.len(), 1);
        assert_eq!(update(&d).modified_other_input_overrides[0].input_name, "Count");
    }

    #[test]
    fn nested_rapid_values_are_compared() {
        let module = NodeId::new();
        let dynamic = NodeId::new();
        let build = |max| {
            EmitterBuilder::new("Sparks")
                .module(
                    UPDATE,
                    ModuleBuilder::asset("Spawn", "/Spawn").id(module).dynamic(
                        "Count",
                        "float",
                        ModuleBuilder::asset("Random", "/Random")
                            .id(dynamic)
                            .rapid("Max", ParameterValue::float(max)),
                    ),
                )
                .build()
                .unwrap()
        };
        let same = diff(&build(1.0), &build(1.0));
        assert!(same.is_empty());
        assert!(same.is_valid());

        let d = diff(&build(1.0), &build(7.0));
        assert!(d.is_valid(), "{:?}", d.errors);
        let modified = &update(&d).modified_other_input_overrides;
        assert_eq!(modified.len(), 1);
        assert_matches!(&modified[0].value, OverrideValue::Dynamic(random) => {
            assert_matches!(
                &random.input_override("Max").unwrap().value,
                OverrideValue::Rapid { value: Some(v), .. } => assert_eq!(v, &ParameterValue::float(7.0))
            );
        });
    }

    #[rstest]
    fn emitter_level_changes(base: Emitter) {
        let mut other = base.duplicate();
        other.properties.sim_target = SimTarget::Gpu;
        other
            .display_names
            .insert("ParticleUpdate/A".into(), "Accelerate".into());
        other.scratch_pad_scripts.push(ScratchPadScript {
            id: DefinitionId::new(),
            name: "Wobble".into(),
            change_id: ChangeId::new(),
            source: serde_json::Value::Null,
        });
        other.renderers.push(Renderer {
            merge_id: RendererId::new(),
            kind: "Sprite".into(),
            enabled: true,
            settings: serde_json::Value::Null,
        });

        let d = diff(&base, &other);
        assert!(!d.is_empty());
        assert_eq!(d.different_emitter_properties, ["sim_target"]);
        assert!(d.scratch_pad_modified);
        assert_eq!(d.display_names.added.len(), 1);
        assert_eq!(d.renderers.added_other.len(), 1);
        assert!(update(&d).is_empty());
    }

    #[test]
    fn event_handler_changes() {
        let handler = UsageId::new();
        let base = EmitterBuilder::new("Sparks")
            .event_handler(
                handler,
                EventHandlerProperties::default(),
                [ModuleBuilder::asset("Receive", "/Receive")],
            )
            .build()
            .unwrap();
        let mut other = base.duplicate();
        other.event_handlers[0].properties.spawn_number = 12;
        other.event_handlers[0].script = None;

        let d = diff(&base, &other);
        assert_eq!(
            d.errors,
            [format!(
                "Failed to diff event handlers, the other event handler was invalid. Script Usage Id: {handler}"
            )]
        );

        let mut other = base.duplicate();
        other.event_handlers[0].properties.spawn_number = 12;
        let d = diff(&base, &other);
        let entry = d.event_handlers.modified_entry(handler).unwrap();
        assert_eq!(entry.changed_properties, ["spawn_number"]);
        assert!(entry.stack.is_empty());
    }

    #[test]
    fn longest_increasing_keeps_relative_order() {
        assert_eq!(longest_increasing(&[2, 0, 1]), [false, true, true]);
        assert_eq!(longest_increasing(&[0, 1, 2]), [true, true, true]);
        assert_eq!(longest_increasing(&[]), Vec::<bool>::new());
    }

    #[test]
    fn diff_summary_snapshot() {
        let base = EmitterBuilder::new("Sparks")
            .module(
                UPDATE,
                ModuleBuilder::asset("A", "/Modules/A").literal("Speed", "float", "5.0"),
            )
            .module(UPDATE, ModuleBuilder::asset("B", "/Modules/B"))
            .build()
            .unwrap();
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        let b = other.find_module(UPDATE, "B").unwrap();
        other.graph.remove_override_pin(a, "Speed").unwrap();
        other
            .graph
            .get_or_create_override_pin(a, "Speed", "float", None)
            .unwrap();
        other
            .graph
            .bind_linked_handle(a, "Speed", ParameterHandle::new("Particles", "Age"), NodeId::new())
            .unwrap();
        other.graph.set_module_enabled(b, false).unwrap();
        other
            .add_module(UPDATE, 2, ModuleBuilder::asset("C", "/Modules/C"))
            .unwrap();
        other.renderers.push(Renderer {
            merge_id: RendererId::from_u128(1),
            kind: "Sprite".into(),
            enabled: true,
            settings: serde_json::Value::Null,
        });
        other.properties.local_space = true;
        other
            .display_names
            .insert("ParticleUpdate/B".into(), "Brake".into());

        let summary = DiffSummary::from(&diff(&base, &other));
        insta::assert_snapshot!(serde_json::to_string_pretty(&summary).unwrap());
    }

    fn generated_emitter(modules: Vec<(bool, String, Option<String>)>) -> Emitter {
        modules
            .into_iter()
            .enumerate()
            .fold(EmitterBuilder::new("Generated"), |builder, (i, (enabled, speed, link))| {
                let mut module = ModuleBuilder::asset(format!("M{i}"), format!("/Modules/M{i}"))
                    .literal("Speed", "float", speed)
                    .static_switch("Mode", "enum", if enabled { "On" } else { "Off" });
                if let Some(link) = link {
                    module = module.linked("Source", "float", ParameterHandle::new("Particles", link));
                }
                if !enabled {
                    module = module.disabled();
                }
                builder.module(UPDATE, module)
            })
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn self_diff_is_empty(
            modules in prop::collection::vec(
                (any::<bool>(), "[0-9]{1,3}", prop::option::of("[A-Z][a-z]{0,5}")),
                0..6,
            )
        ) {
            let emitter = generated_emitter(modules);
            let d = diff(&emitter, &emitter);
            prop_assert!(d.is_empty());
            prop_assert!(d.is_valid());
            let d = diff(&emitter, &emitter.duplicate());
            prop_assert!(d.is_empty());
        }
    }
}
