//! Applies diffs to a target emitter.
//!
//! Every step is attempted even when an earlier one failed. Failures are
//! collected in the returned [`ApplyResult`], whose target must not be
//! trusted unless [`ApplyResult::succeeded`].

use indexmap::IndexMap;
use itertools::Itertools;
use tracing::debug;

use super::adapter::{
    AdaptedEntry, FunctionAdapter, InputOverrideAdapter, OverrideValue, ScriptStackAdapter,
};
use super::diff::{RendererDiff, ScriptStackDiff, StackEntryListDiff};
use super::error::MergeError;
use super::property_diff::copy_properties;
use crate::emitter::{Emitter, Script, StackEntry, rapid_iteration_name};
use crate::graph::{Definition, FunctionCall, GraphError, Node, NodeOp, ScriptGraph, StaticSwitch};
use crate::ids::NodeId;
use crate::usage::UsageKey;

/// Outcome of applying a diff.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyResult {
    /// Whether the target was changed.
    pub modified: bool,
    /// Failed steps.
    pub errors: Vec<String>,
}

impl ApplyResult {
    /// Whether every step succeeded.
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, err: impl Into<MergeError>) {
        let err = err.into();
        debug!(%err, "apply step failed");
        self.errors.push(err.to_string());
    }

    /// Folds in the result of another apply.
    pub fn absorb(&mut self, other: ApplyResult) {
        self.modified |= other.modified;
        self.errors.extend(other.errors);
    }
}

fn pin_error(err: GraphError) -> MergeError {
    match err {
        GraphError::PinLinked { .. } => MergeError::OverridePinStillLinked,
        err => err.into(),
    }
}

fn unused_id(graph: &ScriptGraph, id: NodeId) -> NodeId {
    if graph.contains(id) { NodeId::new() } else { id }
}

/// A function call node equivalent to an adapted call.
fn function_call(function: &FunctionAdapter, definition: Definition) -> FunctionCall {
    let mut static_switches = IndexMap::new();
    let mut rapid_inputs = IndexMap::new();
    for o in &function.overrides {
        match &o.value {
            OverrideValue::StaticSwitch { value } => {
                let switch = StaticSwitch {
                    type_name: o.type_name.clone(),
                    value: value.clone(),
                };
                static_switches.insert(o.input_name.clone(), switch);
            }
            OverrideValue::Rapid { .. } => {
                rapid_inputs.insert(o.input_name.clone(), o.type_name.clone());
            }
            _ => {}
        }
    }
    FunctionCall {
        name: function.name.clone(),
        definition: Some(definition),
        enabled: function.enabled,
        selected_version: function.selected_version.clone(),
        static_switches,
        rapid_inputs,
        messages: function.messages.clone(),
    }
}

/// Applies a stack diff to the stack of `target` feeding `usage`.
///
/// With `disable_removed`, modules removed in the diff are disabled in the
/// target instead of deleted.
pub fn apply_script_stack_diff(
    target: &mut Emitter,
    usage: UsageKey,
    diff: &ScriptStackDiff,
    disable_removed: bool,
) -> ApplyResult {
    let mut result = ApplyResult::default();
    let table = target.script(usage).map(|s| &s.rapid_iteration);
    let snapshot = match ScriptStackAdapter::build(&target.graph, usage, table) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            debug!(%usage, %err, "target stack is invalid");
            result.error(MergeError::TargetStackInvalid(usage.to_string()));
            return result;
        }
    };
    let mut apply = StackApply {
        target,
        usage,
        result,
    };
    apply.remove_modules(&snapshot, diff, disable_removed);
    apply.add_modules(diff);
    apply.remove_input_overrides(&snapshot, diff);
    apply.add_input_overrides(diff);
    apply.change_versions_and_messages(diff);
    apply.change_enabled(diff);
    apply.change_usage(&snapshot, diff);
    apply.result
}

struct StackApply<'a> {
    target: &'a mut Emitter,
    usage: UsageKey,
    result: ApplyResult,
}

impl StackApply<'_> {
    fn remove_modules(&mut self, snapshot: &ScriptStackAdapter, diff: &ScriptStackDiff, disable: bool) {
        for module in &diff.removed_base_modules {
            if snapshot.module(module.id).is_none() {
                self.result
                    .error(MergeError::RemoveModuleFailed { module: module.id });
                continue;
            }
            let graph = &mut self.target.graph;
            let removed = if disable {
                debug!(module = %module.name, "disabling module removed before the first merge");
                graph.set_module_enabled(module.id, false)
            } else {
                graph.remove_module(self.usage, module.id)
            };
            match removed {
                Ok(()) => self.result.modified = true,
                Err(err) => self.result.error(err),
            }
        }
    }

    fn add_modules(&mut self, diff: &ScriptStackDiff) {
        for module in &diff.added_other_modules {
            if let Err(err) = self.add_module(module) {
                self.result.error(err);
            }
        }
    }

    fn add_module(&mut self, module: &FunctionAdapter) -> Result<(), MergeError> {
        let definition = module
            .definition
            .clone()
            .ok_or_else(|| MergeError::MissingModuleScript(module.name.clone()))?;
        let node = Node::new(module.id, function_call(module, definition));
        self.target
            .graph
            .insert_module(self.usage, module.stack_index, node)?;
        self.result.modified = true;
        debug!(module = %module.name, index = module.stack_index, "added module");
        for o in &module.overrides {
            if matches!(o.value, OverrideValue::StaticSwitch { .. }) {
                continue;
            }
            if let Err(err) = self.add_input_override(module.id, o) {
                self.result.error(err);
            }
        }
        Ok(())
    }

    /// Removes the target's version of every removed or changed override.
    fn remove_input_overrides(&mut self, snapshot: &ScriptStackAdapter, diff: &ScriptStackDiff) {
        let changed = diff
            .removed_base_input_overrides
            .iter()
            .chain(&diff.added_other_input_overrides)
            .chain(&diff.modified_other_input_overrides);
        let existing: Vec<_> = changed
            .filter_map(|o| {
                snapshot
                    .module(o.owner)
                    .and_then(|m| m.input_override(&o.input_name))
            })
            .filter(|o| self.target.graph.contains(o.owner))
            .unique_by(|o| (o.owner, o.input_name.clone()))
            .collect();
        for o in existing {
            if let Err(err) = self.remove_input_override(o) {
                self.result.error(err);
            }
        }
    }

    fn remove_input_override(&mut self, o: &InputOverrideAdapter) -> Result<(), MergeError> {
        match &o.value {
            value if value.is_pin_based() => {
                if !self.target.graph.remove_override_pin(o.owner, &o.input_name)? {
                    return Err(MergeError::RemoveInputOverrideInvalid);
                }
            }
            OverrideValue::Rapid { parameter, .. } => {
                let call = self.target.graph.function_call_mut(o.owner)?;
                call.rapid_inputs.shift_remove(&o.input_name);
                self.target.graph.mark_changed(o.owner);
                if let Some(script) = self.target.script_mut(self.usage) {
                    script.rapid_iteration.remove(parameter);
                }
            }
            // The re-add overwrites the switch value.
            OverrideValue::StaticSwitch { .. } => return Ok(()),
            _ => return Err(MergeError::RemoveInputOverrideInvalid),
        }
        self.result.modified = true;
        Ok(())
    }

    fn add_input_overrides(&mut self, diff: &ScriptStackDiff) {
        let changed = diff
            .added_other_input_overrides
            .iter()
            .chain(&diff.modified_other_input_overrides);
        for o in changed {
            if !self.target.graph.contains(o.owner) {
                self.result.error(MergeError::OwnerNotFound {
                    module: o.owner,
                    input: o.input_name.clone(),
                });
                continue;
            }
            if let Err(err) = self.add_input_override(o.owner, o) {
                self.result.error(err);
            }
        }
    }

    fn add_input_override(&mut self, owner: NodeId, o: &InputOverrideAdapter) -> Result<(), MergeError> {
        if let Some(target) = &o.assignment_target {
            let call = self.target.graph.function_call_mut(owner)?;
            if let Some(Definition::Assignment { targets }) = &mut call.definition {
                if !targets.iter().any(|t| t.handle == target.handle) {
                    targets.push(target.clone());
                    self.target.graph.mark_changed(owner);
                }
            }
        }

        let input = o.input_name.as_str();
        let graph = &mut self.target.graph;
        match &o.value {
            OverrideValue::Local { literal } => {
                graph.get_or_create_override_pin(owner, input, &o.type_name, o.override_set_id)?;
                graph
                    .set_pin_default(owner, input, literal.clone())
                    .map_err(pin_error)?;
            }
            OverrideValue::Linked { handle, node_id } => {
                graph.get_or_create_override_pin(owner, input, &o.type_name, o.override_set_id)?;
                let id = unused_id(graph, *node_id);
                graph
                    .bind_linked_handle(owner, input, handle.clone(), id)
                    .map_err(pin_error)?;
            }
            OverrideValue::Data {
                name,
                object,
                node_id,
            } => {
                graph.get_or_create_override_pin(owner, input, &o.type_name, o.override_set_id)?;
                let id = unused_id(graph, *node_id);
                graph
                    .bind_data_object(owner, input, name.clone(), object.clone(), id)
                    .map_err(pin_error)?;
            }
            OverrideValue::Dynamic(function) => {
                let definition = function
                    .definition
                    .clone()
                    .ok_or(MergeError::InvalidDynamicInput)?;
                graph.get_or_create_override_pin(owner, input, &o.type_name, o.override_set_id)?;
                let id = unused_id(graph, function.id);
                graph
                    .bind_dynamic_input(owner, input, function_call(function, definition), id)
                    .map_err(pin_error)?;
                for nested in &function.overrides {
                    if matches!(nested.value, OverrideValue::StaticSwitch { .. }) {
                        continue;
                    }
                    if let Err(err) = self.add_input_override(id, nested) {
                        self.result.error(err);
                    }
                }
            }
            OverrideValue::Rapid { value, .. } => {
                let value = value
                    .clone()
                    .ok_or_else(|| MergeError::RapidValueMissing(o.input_name.clone()))?;
                let call = graph.function_call_mut(owner)?;
                call.rapid_inputs
                    .insert(o.input_name.clone(), o.type_name.clone());
                let parameter = rapid_iteration_name(&call.name, input);
                graph.mark_changed(owner);
                let script = self
                    .target
                    .script_mut(self.usage)
                    .ok_or_else(|| MergeError::TargetStackInvalid(self.usage.to_string()))?;
                script.rapid_iteration.set(parameter, value);
            }
            OverrideValue::StaticSwitch { value } => {
                let call = graph.function_call_mut(owner)?;
                let switch = call
                    .static_switches
                    .get_mut(input)
                    .ok_or(MergeError::StaticSwitchNotFound)?;
                if switch.type_name != o.type_name {
                    return Err(MergeError::StaticSwitchWrongType);
                }
                switch.value = value.clone();
                graph.mark_changed(owner);
            }
            _ => return Err(MergeError::AddInputOverrideInvalid),
        }
        self.result.modified = true;
        Ok(())
    }

    fn change_versions_and_messages(&mut self, diff: &ScriptStackDiff) {
        let graph = &mut self.target.graph;
        for module in &diff.version_changed_other_modules {
            match graph.function_call_mut(module.id) {
                Ok(call) => {
                    call.selected_version = module.selected_version.clone();
                    graph.mark_changed(module.id);
                    self.result.modified = true;
                }
                Err(err) => self.result.error(err),
            }
        }
        for message in &diff.removed_messages {
            // The module may have been removed already.
            if let Ok(call) = graph.function_call_mut(message.module) {
                call.messages.remove(&message.id);
                self.result.modified = true;
            }
        }
        for message in &diff.added_messages {
            match graph.function_call_mut(message.module) {
                Ok(call) => {
                    call.messages.insert(message.id, message.text.clone());
                    self.result.modified = true;
                }
                Err(err) => self.result.error(err),
            }
        }
    }

    fn change_enabled(&mut self, diff: &ScriptStackDiff) {
        for module in &diff.enabled_changed_other_modules {
            if !self.target.graph.contains(module.id) {
                self.result
                    .error(MergeError::EnableModuleFailed { module: module.id });
                continue;
            }
            match self.target.graph.set_module_enabled(module.id, module.enabled) {
                Ok(()) => self.result.modified = true,
                Err(err) => self.result.error(err),
            }
        }
    }

    fn change_usage(&mut self, snapshot: &ScriptStackAdapter, diff: &ScriptStackDiff) {
        let Some(new_usage) = diff.changed_other_usage else {
            return;
        };
        for id in [snapshot.input_node, snapshot.output_node] {
            if let Some(node) = self.target.graph.node_mut(id) {
                if let NodeOp::Input { usage } | NodeOp::Output { usage } = &mut node.op {
                    *usage = new_usage;
                }
            }
            self.target.graph.mark_changed(id);
        }
        if let Some(script) = self.target.script_mut(self.usage) {
            script.usage = new_usage;
        }
        self.result.modified = true;
    }
}

/// Applies an event handler or simulation stage diff.
///
/// Removed entries are only supported when `first_merge` is set, in which
/// case they are left in the target.
pub fn apply_stack_entry_diff<P: AdaptedEntry>(
    target: &mut Emitter,
    diff: &StackEntryListDiff<P>,
    first_merge: bool,
    disable_removed: bool,
) -> ApplyResult {
    let mut result = ApplyResult::default();
    if !diff.removed_base.is_empty() {
        if first_merge {
            debug!(kind = P::NAME, count = diff.removed_base.len(), "keeping removed entries");
        } else {
            result.error(MergeError::RemovedEntriesUnsupported { kind: P::NAME });
        }
    }

    for modified in &diff.modified {
        let usage_id = modified.base.usage_id;
        let Some(entry) = P::entries_mut(target)
            .iter_mut()
            .find(|e| e.usage_id == usage_id)
        else {
            result.error(MergeError::EntryNotFound {
                kind: P::NAME,
                usage_id,
            });
            continue;
        };
        if !modified.changed_properties.is_empty() {
            match copy_properties(
                &mut entry.properties,
                &modified.other.properties,
                &modified.changed_properties,
            ) {
                Ok(()) => result.modified = true,
                Err(err) => result.error(err),
            }
        }
        let key = entry.usage_key();
        if !modified.stack.is_empty() {
            result.absorb(apply_script_stack_diff(target, key, &modified.stack, disable_removed));
        }
    }

    for added in &diff.added_other {
        let usage_id = added.usage_id;
        if P::entries(target).iter().any(|e| e.usage_id == usage_id) {
            debug!(kind = P::NAME, %usage_id, "added entry already present");
            continue;
        }
        let Some(stack) = &added.stack else {
            result.error(MergeError::EntryScriptMissing {
                kind: P::NAME,
                usage_id,
            });
            continue;
        };
        let entry = StackEntry {
            usage_id,
            properties: added.properties.clone(),
            script: Some(Script::new(stack.usage)),
        };
        let key = entry.usage_key();
        let output = unused_id(&target.graph, stack.output_node);
        let input = unused_id(&target.graph, stack.input_node);
        if let Err(err) = target.graph.reset_graph_for_output(key, output, input) {
            result.error(err);
            continue;
        }
        let entries = P::entries_mut(target);
        entries.insert(added.index.min(entries.len()), entry);
        result.modified = true;

        let mut apply = StackApply {
            target: &mut *target,
            usage: key,
            result: ApplyResult::default(),
        };
        for module in &stack.modules {
            if let Err(err) = apply.add_module(module) {
                apply.result.error(err);
            }
        }
        result.absorb(apply.result);
    }
    result
}

/// Applies a renderer diff. Modified renderers are replaced whole.
pub fn apply_renderer_diff(target: &mut Emitter, diff: &RendererDiff) -> ApplyResult {
    let mut result = ApplyResult::default();
    for (_, removed) in &diff.removed_base {
        let before = target.renderers.len();
        target.renderers.retain(|r| r.merge_id != removed.merge_id);
        result.modified |= target.renderers.len() != before;
    }
    for (index, renderer) in &diff.modified_other {
        let Some(pos) = target
            .renderers
            .iter()
            .position(|r| r.merge_id == renderer.merge_id)
        else {
            result.error(MergeError::RendererNotFound(renderer.merge_id));
            continue;
        };
        target.renderers.remove(pos);
        let index = (*index).min(target.renderers.len());
        target.renderers.insert(index, renderer.clone());
        result.modified = true;
    }
    for (index, renderer) in &diff.added_other {
        let index = (*index).min(target.renderers.len());
        target.renderers.insert(index, renderer.clone());
        result.modified = true;
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{EmitterBuilder, ModuleBuilder};
    use crate::emitter::{
        EventHandlerProperties, ParameterValue, Renderer, SimulationStageProperties,
    };
    use crate::graph::AssignmentTarget;
    use crate::ids::{ParameterHandle, RendererId, UsageId};
    use crate::merge::adapter::EmitterAdapter;
    use crate::merge::diff::{EmitterDiff, diff_emitters};
    use crate::usage::ScriptUsage;
    use cool_asserts::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const UPDATE: UsageKey = UsageKey::fixed(ScriptUsage::ParticleUpdate);

    fn diff(base: &Emitter, other: &Emitter) -> EmitterDiff {
        diff_emitters(&EmitterAdapter::build(base), &EmitterAdapter::build(other))
    }

    fn apply_update(target: &mut Emitter, diff: &EmitterDiff, disable_removed: bool) -> ApplyResult {
        let stack = &diff.script_stacks[&ScriptUsage::ParticleUpdate];
        apply_script_stack_diff(target, UPDATE, stack, disable_removed)
    }

    fn modules(emitter: &Emitter, usage: UsageKey) -> Vec<(String, bool)> {
        emitter
            .graph
            .ordered_modules(usage)
            .unwrap()
            .into_iter()
            .map(|m| {
                let call = emitter.graph.function_call(m).unwrap();
                (call.name.to_string(), call.enabled)
            })
            .collect()
    }

    fn base() -> Emitter {
        EmitterBuilder::new("Sparks")
            .module(
                UPDATE,
                ModuleBuilder::asset("A", "/Modules/A").literal("Speed", "float", "5.0"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn enabled_change_and_added_module() {
        let base = base();
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        other.graph.set_module_enabled(a, false).unwrap();
        let b = other
            .add_module(UPDATE, 1, ModuleBuilder::asset("B", "/Modules/B"))
            .unwrap();

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        let result = apply_update(&mut target, &d, false);
        assert!(result.succeeded(), "{:?}", result.errors);
        assert!(result.modified);
        assert_eq!(
            modules(&target, UPDATE),
            [("A".to_string(), false), ("B".to_string(), true)]
        );
        assert_eq!(target.find_module(UPDATE, "B"), Some(b));
    }

    #[test]
    fn nested_override_errors_do_not_stop_the_rest() {
        let base = base();
        let mut other = base.duplicate();
        other
            .add_module(
                UPDATE,
                1,
                ModuleBuilder::asset("Spawn", "/Modules/Spawn").dynamic(
                    "Count",
                    "float",
                    ModuleBuilder::asset("Random", "/Modules/Random")
                        .rapid("Max", ParameterValue::float(7.0))
                        .rapid("Min", ParameterValue::float(1.0)),
                ),
            )
            .unwrap();
        other
            .script_mut(UPDATE)
            .unwrap()
            .rapid_iteration
            .remove("Constants.Emitter.Random.Max");

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        let result = apply_update(&mut target, &d, false);
        assert_eq!(
            result.errors,
            [MergeError::RapidValueMissing("Max".into()).to_string()]
        );
        let table = &target.script(UPDATE).unwrap().rapid_iteration;
        assert_eq!(
            table.get("Constants.Emitter.Random.Min"),
            Some(&ParameterValue::float(1.0))
        );
        assert_eq!(table.get("Constants.Emitter.Random.Max"), None);
    }

    #[test]
    fn literal_is_replaced_by_linked_handle() {
        let base = base();
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        other.graph.remove_override_pin(a, "Speed").unwrap();
        other
            .graph
            .get_or_create_override_pin(a, "Speed", "float", None)
            .unwrap();
        let reader = other
            .graph
            .bind_linked_handle(a, "Speed", ParameterHandle::new("Particles", "Age"), NodeId::new())
            .unwrap();

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        assert!(apply_update(&mut target, &d, false).succeeded());
        assert_eq!(target.graph.pin_value_node(a, "Speed"), Some(reader));
        assert!(diff(&target, &other).is_empty());
    }

    #[rstest]
    #[case::first_merge(true, vec![("A".to_string(), false)])]
    #[case::later_merge(false, vec![])]
    fn removed_modules(#[case] disable_removed: bool, #[case] expected: Vec<(String, bool)>) {
        let base = base();
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        other.graph.remove_module(UPDATE, a).unwrap();

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        assert!(apply_update(&mut target, &d, disable_removed).succeeded());
        assert_eq!(modules(&target, UPDATE), expected);
    }

    #[test]
    fn added_module_without_script_fails() {
        let base = base();
        let mut other = base.duplicate();
        other
            .add_module(UPDATE, 1, ModuleBuilder::missing("Lost"))
            .unwrap();

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        let result = apply_update(&mut target, &d, false);
        assert_eq!(
            result.errors,
            ["Can not add module Lost because it's script was missing."]
        );
        assert_eq!(modules(&target, UPDATE).len(), 1);
    }

    #[test]
    fn added_modules_round_trip() {
        let base = base();
        let random = ModuleBuilder::asset("Random", "/Dynamic/Random")
            .literal("Max", "float", "3")
            .static_switch("Distribution", "enum", "Uniform");
        let mut other = base.duplicate();
        other
            .add_module(
                UPDATE,
                0,
                ModuleBuilder::asset("Spawn", "/Modules/Spawn")
                    .dynamic("Count", "int", random)
                    .data("Curve", "curve", "SizeCurve", crate::graph::DataObject {
                        class: "Curve".into(),
                        properties: serde_json::json!({ "keys": [0, 1] }),
                    })
                    .rapid("Rate", ParameterValue::float(10.0))
                    .static_switch("Burst", "bool", "true"),
            )
            .unwrap();

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        let result = apply_update(&mut target, &d, false);
        assert!(result.succeeded(), "{:?}", result.errors);
        assert!(diff(&target, &other).is_empty());

        let spawn = other.find_module(UPDATE, "Spawn").unwrap();
        assert_eq!(
            target.graph.pin_value_node(spawn, "Count"),
            other.graph.pin_value_node(spawn, "Count")
        );
        assert_eq!(
            target.script(UPDATE).unwrap().rapid_iteration.get("Constants.Emitter.Spawn.Rate"),
            Some(&ParameterValue::float(10.0))
        );
    }

    #[test]
    fn static_switch_types_must_match() {
        let base = EmitterBuilder::new("Sparks")
            .module(
                UPDATE,
                ModuleBuilder::asset("A", "/Modules/A").static_switch("Mode", "enum", "Slow"),
            )
            .build()
            .unwrap();
        let mut other = base.duplicate();
        let a = other.find_module(UPDATE, "A").unwrap();
        other.graph.function_call_mut(a).unwrap().static_switches["Mode"].value = "Fast".into();
        let d = diff(&base, &other);

        let mut target = base.duplicate();
        assert!(apply_update(&mut target, &d, false).succeeded());
        assert_eq!(target.graph.function_call(a).unwrap().static_switches["Mode"].value, "Fast");

        let mut target = base.duplicate();
        target.graph.function_call_mut(a).unwrap().static_switches["Mode"].type_name = "int".into();
        let result = apply_update(&mut target, &d, false);
        assert_eq!(
            result.errors,
            ["Failed to add static switch input override because the type of the pin matched by name did not match."]
        );
    }

    #[test]
    fn assignment_targets_are_added() {
        let written = |name: &str| AssignmentTarget {
            handle: ParameterHandle::new("Particles", name),
            type_name: "float".into(),
            default: "0".into(),
        };
        let module = NodeId::new();
        let assignment = |targets| {
            ModuleBuilder::new("Set", Definition::Assignment { targets }).id(module)
        };
        let base = EmitterBuilder::new("Sparks")
            .module(UPDATE, assignment(vec![written("Mass")]).literal("Particles.Mass", "float", "1"))
            .build()
            .unwrap();
        let other = EmitterBuilder::new("Sparks")
            .module(
                UPDATE,
                assignment(vec![written("Mass"), written("Drag")])
                    .literal("Particles.Mass", "float", "1")
                    .literal("Particles.Drag", "float", "0.2"),
            )
            .build()
            .unwrap();

        let d = diff(&base, &other);
        assert!(d.is_valid());
        let mut target = base.duplicate();
        assert!(apply_update(&mut target, &d, false).succeeded());
        let call = target.graph.function_call(module).unwrap();
        assert_matches!(&call.definition, Some(Definition::Assignment { targets }) => {
            assert_eq!(targets.len(), 2);
        });
    }

    #[test]
    fn added_event_handlers_keep_stack_ids() {
        let handler = UsageId::new();
        let base = base();
        let other = EmitterBuilder::new("Sparks")
            .event_handler(
                handler,
                EventHandlerProperties {
                    spawn_number: 4,
                    ..Default::default()
                },
                [ModuleBuilder::asset("Receive", "/Receive").literal("Scale", "float", "2")],
            )
            .build()
            .unwrap();
        let d = diff(&base, &other);
        assert_eq!(d.event_handlers.added_other.len(), 1);

        let mut target = base.duplicate();
        let result = apply_stack_entry_diff(&mut target, &d.event_handlers, false, false);
        assert!(result.succeeded(), "{:?}", result.errors);
        let key = UsageKey::event(handler);
        assert_eq!(target.event_handler(handler).unwrap().properties.spawn_number, 4);
        assert_eq!(target.graph.find_output(key), other.graph.find_output(key));
        assert_eq!(modules(&target, key), [("Receive".to_string(), true)]);

        let d = diff(&other, &base);
        let mut target = other.duplicate();
        let result = apply_stack_entry_diff(&mut target, &d.event_handlers, false, false);
        assert_eq!(
            result.errors,
            ["Apply diff failed, removed event handlers are currently unsupported."]
        );
        let result = apply_stack_entry_diff(&mut target, &d.event_handlers, true, true);
        assert!(result.succeeded());
        assert_eq!(target.event_handlers.len(), 1);
    }

    #[test]
    fn modified_simulation_stage_properties_are_copied() {
        let stage = UsageId::new();
        let base = EmitterBuilder::new("Fluid")
            .simulation_stage(stage, SimulationStageProperties::default(), [])
            .build()
            .unwrap();
        let mut other = base.duplicate();
        other.simulation_stages[0].properties.num_iterations = 8;
        other
            .add_module(UsageKey::simulation_stage(stage), 0, ModuleBuilder::asset("Solve", "/Solve"))
            .unwrap();

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        let result = apply_stack_entry_diff(&mut target, &d.simulation_stages, false, false);
        assert!(result.succeeded(), "{:?}", result.errors);
        assert_eq!(target.simulation_stages[0].properties.num_iterations, 8);
        assert!(diff(&target, &other).is_empty());
    }

    #[test]
    fn renderers_are_replaced_whole() {
        let renderer = |id, kind: &str| Renderer {
            merge_id: RendererId::from_u128(id),
            kind: kind.into(),
            enabled: true,
            settings: serde_json::Value::Null,
        };
        let base = EmitterBuilder::new("Sparks")
            .renderer(renderer(1, "Sprite"))
            .renderer(renderer(2, "Ribbon"))
            .build()
            .unwrap();
        let mut other = base.duplicate();
        other.renderers[0].settings = serde_json::json!({ "alignment": "velocity" });
        other.renderers.remove(1);
        other.renderers.push(renderer(3, "Mesh"));

        let d = diff(&base, &other);
        let mut target = base.duplicate();
        assert!(apply_renderer_diff(&mut target, &d.renderers).succeeded());
        assert_eq!(target.renderers, other.renderers);
    }
}
