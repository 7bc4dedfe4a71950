//! Merging an emitter instance with its parent, and per-item queries
//! against a base emitter.

use derive_more::Display;
use tracing::{debug, info, warn};

use super::adapter::{AdaptedEntry, AdapterCache, InputOverrideAdapter};
use super::apply::{
    ApplyResult, apply_renderer_diff, apply_script_stack_diff, apply_stack_entry_diff,
};
use super::change_id::{diff_change_ids, gather_change_ids, resolve_change_ids};
use super::diff::{EmitterDiff, RendererDiff, ScriptStackDiff, diff_emitters, diff_script_stacks};
use super::error::MergeError;
use super::property_diff::{copy_properties, diff_properties};
use crate::emitter::{
    Emitter, EventHandlerProperties, SimulationStageProperties, StackEntryKind,
};
use crate::ids::{NodeId, RendererId, UsageId};
use crate::usage::UsageKey;

/// Settings of a [`MergeManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOptions {
    /// Disable, rather than delete, modules missing from the instance when
    /// there is no snapshot of the parent.
    pub disable_removed_on_first_merge: bool,
    /// Remove fast-iteration values no module input uses after a merge.
    pub prune_rapid_iteration: bool,
    /// Reconcile node change ids across parent, snapshot and instance.
    pub force_change_ids: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            disable_removed_on_first_merge: true,
            prune_rapid_iteration: true,
            force_change_ids: true,
        }
    }
}

impl MergeOptions {
    /// Sets [`MergeOptions::disable_removed_on_first_merge`].
    pub fn with_disable_removed_on_first_merge(mut self, disable: bool) -> Self {
        self.disable_removed_on_first_merge = disable;
        self
    }

    /// Sets [`MergeOptions::prune_rapid_iteration`].
    pub fn with_prune_rapid_iteration(mut self, prune: bool) -> Self {
        self.prune_rapid_iteration = prune;
        self
    }

    /// Sets [`MergeOptions::force_change_ids`].
    pub fn with_force_change_ids(mut self, force: bool) -> Self {
        self.force_change_ids = force;
        self
    }
}

/// Outcome of [`MergeManager::merge_emitter`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MergeStatus {
    /// The instance already matches its parent.
    #[display("no differences")]
    NoDifferences,
    /// A merged instance was produced.
    #[display("succeeded, differences applied")]
    SucceededDifferencesApplied,
    /// The inputs could not be compared.
    #[display("failed to diff")]
    FailedToDiff,
    /// Applying the instance's changes failed.
    #[display("failed to merge")]
    FailedToMerge,
}

/// Result of a merge.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeResult {
    /// How the merge ended.
    pub status: MergeStatus,
    /// The merged instance. Only set when the status is
    /// [`MergeStatus::SucceededDifferencesApplied`].
    pub merged: Option<Emitter>,
    /// Whether applying the instance's changes modified the parent copy.
    pub modified_graph: bool,
    /// Every failure, in the order encountered.
    pub errors: Vec<String>,
}

impl MergeResult {
    fn new(status: MergeStatus) -> Self {
        Self {
            status,
            merged: None,
            modified_graph: false,
            errors: Vec::new(),
        }
    }

    fn failed(status: MergeStatus, errors: Vec<String>) -> Self {
        Self {
            errors,
            ..Self::new(status)
        }
    }

    /// Whether the merge succeeded, with or without changes.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            MergeStatus::NoDifferences | MergeStatus::SucceededDifferencesApplied
        )
    }
}

/// Diffs and merges emitters, caching their adapters between calls.
#[derive(Debug, Default)]
pub struct MergeManager {
    cache: AdapterCache,
    options: MergeOptions,
}

impl MergeManager {
    /// A manager with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager with the given options.
    pub fn with_options(options: MergeOptions) -> Self {
        Self {
            cache: AdapterCache::new(),
            options,
        }
    }

    /// The manager's options.
    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Drops every cached adapter.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Diffs two emitters.
    pub fn diff_emitters(&mut self, base: &Emitter, other: &Emitter) -> EmitterDiff {
        let base = self.cache.get(base);
        let other = self.cache.get(other);
        diff_emitters(&base, &other)
    }

    /// Merges the changes an instance made since `last_merged_parent` into
    /// a copy of `parent`. Without a snapshot the parent itself is the
    /// diff base.
    pub fn merge_emitter(
        &mut self,
        parent: &Emitter,
        last_merged_parent: Option<&Emitter>,
        instance: &Emitter,
    ) -> MergeResult {
        let diff_base = last_merged_parent.unwrap_or(parent);
        let diff = self.diff_emitters(diff_base, instance);
        if !diff.is_valid() {
            warn!(
                emitter = %instance.unique_name,
                errors = diff.errors.len(),
                "failed to diff instance against its parent"
            );
            return MergeResult::failed(MergeStatus::FailedToDiff, diff.errors);
        }

        if diff.is_empty() {
            let from_parent = self.diff_emitters(parent, instance);
            if from_parent.is_valid() && from_parent.is_empty() {
                info!(emitter = %instance.unique_name, "instance matches its parent");
                return MergeResult::new(MergeStatus::NoDifferences);
            }
            info!(emitter = %instance.unique_name, "instance has no changes, refreshing from parent");
            let mut result = MergeResult::new(MergeStatus::SucceededDifferencesApplied);
            result.merged = Some(refreshed_copy(parent, instance));
            return result;
        }

        let mut merged = refreshed_copy(parent, instance);
        let applied = self.apply_emitter_diff(&mut merged, &diff, last_merged_parent.is_none(), instance);
        let mut result = MergeResult::new(MergeStatus::SucceededDifferencesApplied);
        result.modified_graph = applied.modified;
        result.errors = applied.errors;

        if self.options.force_change_ids {
            let forced = diff_change_ids(
                &gather_change_ids(parent),
                last_merged_parent.map(gather_change_ids).as_ref(),
                &gather_change_ids(instance),
            );
            let updated = resolve_change_ids(&mut merged, &forced);
            debug!(forced = forced.len(), updated, "reconciled change ids");
        }
        if self.options.prune_rapid_iteration {
            if let Err(err) = merged.clean_up_stale_rapid_iteration_parameters() {
                result.errors.push(err.to_string());
            }
        }

        if result.errors.is_empty() {
            merged.update_change_id("merged changes from parent");
            info!(emitter = %instance.unique_name, "merged instance changes into parent");
            result.merged = Some(merged);
        } else {
            warn!(
                emitter = %instance.unique_name,
                errors = result.errors.len(),
                "failed to apply instance changes"
            );
            result.status = MergeStatus::FailedToMerge;
        }
        result
    }

    fn apply_emitter_diff(
        &self,
        merged: &mut Emitter,
        diff: &EmitterDiff,
        first_merge: bool,
        instance: &Emitter,
    ) -> ApplyResult {
        let disable_removed = first_merge && self.options.disable_removed_on_first_merge;
        let mut result = ApplyResult::default();
        for (&usage, stack) in &diff.script_stacks {
            if !stack.is_empty() {
                let applied = apply_script_stack_diff(merged, UsageKey::fixed(usage), stack, disable_removed);
                result.absorb(applied);
            }
        }
        result.absorb(apply_stack_entry_diff(merged, &diff.event_handlers, first_merge, disable_removed));
        result.absorb(apply_stack_entry_diff(
            merged,
            &diff.simulation_stages,
            first_merge,
            disable_removed,
        ));
        result.absorb(apply_renderer_diff(merged, &diff.renderers));

        if !diff.different_emitter_properties.is_empty() {
            match copy_properties(
                &mut merged.properties,
                &instance.properties,
                &diff.different_emitter_properties,
            ) {
                Ok(()) => result.modified = true,
                Err(err) => result.errors.push(MergeError::from(err).to_string()),
            }
        }
        for path in &diff.display_names.removed {
            merged.display_names.remove(path);
        }
        for (path, name) in diff.display_names.added.iter().chain(&diff.display_names.modified) {
            merged.display_names.insert(path.clone(), name.clone());
        }
        if diff.scratch_pad_modified {
            merged.scratch_pad_scripts = instance.scratch_pad_scripts.clone();
            result.modified = true;
        }
        result
    }

    /// Whether the base emitter has a module with the given id in the stack
    /// feeding `usage`.
    pub fn has_base_module(&mut self, base: &Emitter, usage: UsageKey, module: NodeId) -> bool {
        self.cache
            .get(base)
            .stack(usage)
            .is_some_and(|stack| stack.module(module).is_some())
    }

    /// Whether an input of a module differs from the same input in the base
    /// emitter. Stacks that cannot be compared count as different.
    pub fn is_module_input_different_from_base(
        &mut self,
        emitter: &Emitter,
        base: &Emitter,
        usage: UsageKey,
        module: NodeId,
        input: &str,
    ) -> bool {
        let adapter = self.cache.get(emitter);
        let base_adapter = self.cache.get(base);
        let Some(base_stack) = base_adapter.stack(usage) else {
            return false;
        };
        let Some(stack) = adapter.stack(usage) else {
            return true;
        };
        let diff = diff_script_stacks(base_stack, stack);
        if !diff.is_valid() {
            return true;
        }
        let is_input = |o: &InputOverrideAdapter| input_matches(o, module, input);
        diff.removed_base_input_overrides.iter().any(is_input)
            || diff.added_other_input_overrides.iter().any(is_input)
            || diff.modified_other_input_overrides.iter().any(is_input)
    }

    /// Resets one input of a module back to its value in the base emitter.
    pub fn reset_module_input_to_base(
        &mut self,
        emitter: &mut Emitter,
        base: &Emitter,
        usage: UsageKey,
        module: NodeId,
        input: &str,
    ) -> ApplyResult {
        let reset = {
            let adapter = self.cache.get(emitter);
            let base_adapter = self.cache.get(base);
            match (adapter.stack(usage), base_adapter.stack(usage)) {
                (Some(stack), Some(base_stack)) => Some(diff_script_stacks(stack, base_stack)),
                _ => None,
            }
        };
        let mut result = ApplyResult::default();
        let reset_error = |diffable: bool| {
            let (what, emitter, item) = ("input", emitter.unique_name.clone(), input.to_string());
            if diffable {
                MergeError::ResetNotDifferent { what, emitter, item }
            } else {
                MergeError::ResetNotDiffable { what, emitter, item }
            }
        };
        let Some(reset) = reset.filter(ScriptStackDiff::is_valid) else {
            result.errors.push(reset_error(false).to_string());
            return result;
        };

        let only_input = |overrides: &[InputOverrideAdapter]| -> Vec<InputOverrideAdapter> {
            overrides
                .iter()
                .filter(|o| input_matches(o, module, input))
                .cloned()
                .collect()
        };
        let reset = ScriptStackDiff {
            removed_base_input_overrides: only_input(&reset.removed_base_input_overrides),
            added_other_input_overrides: only_input(&reset.added_other_input_overrides),
            modified_base_input_overrides: only_input(&reset.modified_base_input_overrides),
            modified_other_input_overrides: only_input(&reset.modified_other_input_overrides),
            ..ScriptStackDiff::default()
        };
        if reset.is_empty() {
            result.errors.push(reset_error(true).to_string());
            return result;
        }
        let result = apply_script_stack_diff(emitter, usage, &reset, false);
        if result.modified {
            emitter.update_change_id("reset module input to base");
        }
        result
    }

    /// Whether the base emitter has a renderer with the given merge id.
    pub fn has_base_renderer(&mut self, base: &Emitter, merge_id: RendererId) -> bool {
        base.renderer(merge_id).is_some()
    }

    /// Whether a renderer differs from the renderer with the same merge id
    /// in the base emitter. Renderers missing from either side are not
    /// different.
    pub fn is_renderer_different_from_base(
        &mut self,
        emitter: &Emitter,
        base: &Emitter,
        merge_id: RendererId,
    ) -> bool {
        match (emitter.renderer(merge_id), base.renderer(merge_id)) {
            (Some(renderer), Some(base_renderer)) => renderer != base_renderer,
            _ => false,
        }
    }

    /// Replaces a renderer with a copy of the base emitter's renderer of the
    /// same merge id, keeping its position.
    pub fn reset_renderer_to_base(
        &mut self,
        emitter: &mut Emitter,
        base: &Emitter,
        merge_id: RendererId,
    ) -> ApplyResult {
        let position = emitter.renderers.iter().position(|r| r.merge_id == merge_id);
        let (Some(index), Some(base_renderer)) = (position, base.renderer(merge_id)) else {
            let mut result = ApplyResult::default();
            result
                .errors
                .push(MergeError::RendererNotFound(merge_id).to_string());
            return result;
        };
        if emitter.renderers[index] == *base_renderer {
            let mut result = ApplyResult::default();
            let err = MergeError::ResetNotDifferent {
                what: "renderer",
                emitter: emitter.unique_name.clone(),
                item: merge_id.to_string(),
            };
            result.errors.push(err.to_string());
            return result;
        }
        let reset = RendererDiff {
            modified_base: vec![(index, emitter.renderers[index].clone())],
            modified_other: vec![(index, base_renderer.clone())],
            ..RendererDiff::default()
        };
        let result = apply_renderer_diff(emitter, &reset);
        if result.modified {
            emitter.update_change_id("reset renderer to base");
        }
        result
    }

    /// Whether the base emitter has an event handler with the given id.
    pub fn has_base_event_handler(&mut self, base: &Emitter, usage_id: UsageId) -> bool {
        self.has_base_entry::<EventHandlerProperties>(base, usage_id)
    }

    /// Whether the non-stack settings of an event handler differ from the
    /// base emitter's.
    pub fn is_event_handler_property_set_different_from_base(
        &mut self,
        emitter: &Emitter,
        base: &Emitter,
        usage_id: UsageId,
    ) -> bool {
        entry_properties_differ::<EventHandlerProperties>(emitter, base, usage_id)
    }

    /// Copies the differing non-stack settings of an event handler from the
    /// base emitter.
    pub fn reset_event_handler_property_set_to_base(
        &mut self,
        emitter: &mut Emitter,
        base: &Emitter,
        usage_id: UsageId,
    ) -> ApplyResult {
        reset_entry_properties::<EventHandlerProperties>(emitter, base, usage_id)
    }

    /// Whether the base emitter has a simulation stage with the given id.
    pub fn has_base_simulation_stage(&mut self, base: &Emitter, usage_id: UsageId) -> bool {
        self.has_base_entry::<SimulationStageProperties>(base, usage_id)
    }

    /// Whether the non-stack settings of a simulation stage differ from the
    /// base emitter's.
    pub fn is_simulation_stage_property_set_different_from_base(
        &mut self,
        emitter: &Emitter,
        base: &Emitter,
        usage_id: UsageId,
    ) -> bool {
        entry_properties_differ::<SimulationStageProperties>(emitter, base, usage_id)
    }

    /// Copies the differing non-stack settings of a simulation stage from
    /// the base emitter.
    pub fn reset_simulation_stage_property_set_to_base(
        &mut self,
        emitter: &mut Emitter,
        base: &Emitter,
        usage_id: UsageId,
    ) -> ApplyResult {
        reset_entry_properties::<SimulationStageProperties>(emitter, base, usage_id)
    }

    /// Whether the editable emitter settings differ from the base's.
    pub fn is_emitter_property_set_different_from_base(&mut self, emitter: &Emitter, base: &Emitter) -> bool {
        diff_properties(&base.properties, &emitter.properties).map_or(true, |changed| !changed.is_empty())
    }

    /// Copies the differing editable emitter settings from the base.
    pub fn reset_emitter_property_set_to_base(&mut self, emitter: &mut Emitter, base: &Emitter) -> ApplyResult {
        let mut result = ApplyResult::default();
        let copied = diff_properties(&base.properties, &emitter.properties)
            .and_then(|changed| {
                copy_properties(&mut emitter.properties, &base.properties, &changed)?;
                Ok(changed)
            });
        match copied {
            Ok(changed) if changed.is_empty() => {}
            Ok(_) => {
                result.modified = true;
                emitter.update_change_id("reset emitter properties to base");
            }
            Err(err) => result.errors.push(MergeError::from(err).to_string()),
        }
        result
    }

    fn has_base_entry<P: AdaptedEntry>(&mut self, base: &Emitter, usage_id: UsageId) -> bool {
        P::adapters(&self.cache.get(base))
            .iter()
            .any(|e| e.usage_id == usage_id)
    }
}

/// A copy of `parent` standing in for `instance`.
fn refreshed_copy(parent: &Emitter, instance: &Emitter) -> Emitter {
    let mut merged = parent.duplicate();
    merged.id = instance.id;
    merged.unique_name = instance.unique_name.clone();
    merged.editor_data = instance.editor_data.clone();
    merged
}

fn input_matches(o: &InputOverrideAdapter, module: NodeId, input: &str) -> bool {
    o.owner == module && o.input_name == input
}

fn entry_properties_differ<P: StackEntryKind>(emitter: &Emitter, base: &Emitter, usage_id: UsageId) -> bool {
    let find = |e: &Emitter| {
        P::entries(e)
            .iter()
            .find(|entry| entry.usage_id == usage_id)
            .map(|entry| entry.properties.clone())
    };
    match (find(emitter), find(base)) {
        (Some(properties), Some(base_properties)) => {
            diff_properties(&base_properties, &properties).map_or(true, |changed| !changed.is_empty())
        }
        _ => true,
    }
}

fn reset_entry_properties<P: StackEntryKind>(
    emitter: &mut Emitter,
    base: &Emitter,
    usage_id: UsageId,
) -> ApplyResult {
    let mut result = ApplyResult::default();
    let base_entry = P::entries(base).iter().find(|e| e.usage_id == usage_id);
    let entry = P::entries_mut(emitter).iter_mut().find(|e| e.usage_id == usage_id);
    let (Some(entry), Some(base_entry)) = (entry, base_entry) else {
        let err = MergeError::EntryNotFound {
            kind: P::NAME,
            usage_id,
        };
        result.errors.push(err.to_string());
        return result;
    };
    let copied = diff_properties(&base_entry.properties, &entry.properties).and_then(|changed| {
        copy_properties(&mut entry.properties, &base_entry.properties, &changed)?;
        Ok(changed)
    });
    match copied {
        Ok(changed) if changed.is_empty() => {}
        Ok(_) => {
            result.modified = true;
            emitter.update_change_id("reset entry properties to base");
        }
        Err(err) => result.errors.push(MergeError::from(err).to_string()),
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::{EmitterBuilder, ModuleBuilder};
    use crate::emitter::{ParameterValue, Renderer, ScratchPadScript};
    use crate::graph::Definition;
    use crate::ids::{ChangeId, DefinitionId, ParameterHandle};
    use crate::usage::ScriptUsage;
    use cool_asserts::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    const UPDATE: UsageKey = UsageKey::fixed(ScriptUsage::ParticleUpdate);
    const A: NodeId = NodeId::from_u128(0xa);
    const B: NodeId = NodeId::from_u128(0xb);

    fn modules(emitter: &Emitter) -> Vec<(String, bool)> {
        emitter
            .graph
            .ordered_modules(UPDATE)
            .unwrap()
            .into_iter()
            .map(|m| {
                let call = emitter.graph.function_call(m).unwrap();
                (call.name.to_string(), call.enabled)
            })
            .collect()
    }

    #[fixture]
    fn parent() -> Emitter {
        EmitterBuilder::new("Template")
            .module(
                UPDATE,
                ModuleBuilder::asset("A", "/Modules/A")
                    .id(A)
                    .literal("Speed", "float", "5.0"),
            )
            .module(UPDATE, ModuleBuilder::asset("B", "/Modules/B").id(B))
            .renderer(Renderer {
                merge_id: RendererId::from_u128(1),
                kind: "Sprite".into(),
                enabled: true,
                settings: serde_json::Value::Null,
            })
            .build()
            .unwrap()
    }

    fn instance_of(parent: &Emitter) -> Emitter {
        let mut instance = parent.duplicate();
        instance.unique_name = "Instance".into();
        instance
    }

    #[rstest]
    fn untouched_instance_has_no_differences(parent: Emitter) {
        let last = parent.duplicate();
        let instance = instance_of(&parent);
        let result = MergeManager::new().merge_emitter(&parent, Some(&last), &instance);
        assert_eq!(result.status, MergeStatus::NoDifferences);
        assert!(result.merged.is_none());
    }

    #[rstest]
    fn untouched_instance_follows_parent(parent: Emitter) {
        let last = parent.duplicate();
        let instance = instance_of(&parent);
        let mut parent = parent;
        parent.graph.set_module_enabled(B, false).unwrap();
        parent.update_change_id("test edit");

        let result = MergeManager::new().merge_emitter(&parent, Some(&last), &instance);
        assert_eq!(result.status, MergeStatus::SucceededDifferencesApplied);
        let merged = result.merged.unwrap();
        assert_eq!(merged.graph, parent.graph);
        assert_eq!(merged.unique_name, "Instance");
        assert_eq!(merged.id, instance.id);
    }

    #[rstest]
    fn both_sides_changed(parent: Emitter) {
        let last = parent.duplicate();
        let mut instance = instance_of(&parent);
        instance.graph.set_module_enabled(A, false).unwrap();
        instance.display_names.insert("ParticleUpdate/A".into(), "Accelerate".into());
        instance.update_change_id("test edit");

        let mut parent = parent;
        let c = parent
            .add_module(UPDATE, 2, ModuleBuilder::asset("C", "/Modules/C"))
            .unwrap();
        let b_set = parent.graph.get_or_create_override_pin(B, "Drag", "float", None).unwrap();
        parent.graph.set_pin_default(B, "Drag", "0.1").unwrap();

        let result = MergeManager::new().merge_emitter(&parent, Some(&last), &instance);
        assert!(result.succeeded(), "{:?}", result.errors);
        let merged = result.merged.unwrap();
        assert_eq!(
            modules(&merged),
            [
                ("A".to_string(), false),
                ("B".to_string(), true),
                ("C".to_string(), true)
            ]
        );
        assert_eq!(merged.display_names["ParticleUpdate/A"], "Accelerate");

        let ids = merged.graph.change_ids();
        let instance_ids = instance.graph.change_ids();
        let parent_ids = parent.graph.change_ids();
        assert_eq!(ids[&A], instance_ids[&A]);
        assert_eq!(ids[&b_set], parent_ids[&b_set]);
        assert_eq!(ids[&c], parent_ids[&c]);
    }

    #[rstest]
    fn instance_module_added_to_refreshed_parent(parent: Emitter) {
        let last = parent.duplicate();
        let mut instance = instance_of(&parent);
        let d = instance
            .add_module(
                UPDATE,
                0,
                ModuleBuilder::asset("D", "/Modules/D").linked("Force", "vector", ParameterHandle::new("User", "Wind")),
            )
            .unwrap();

        let mut parent = parent;
        parent.properties.local_space = true;
        parent.update_change_id("test edit");

        let mut manager = MergeManager::new();
        let result = manager.merge_emitter(&parent, Some(&last), &instance);
        let merged = result.merged.unwrap();
        assert_eq!(modules(&merged)[0].0, "D");
        assert!(merged.properties.local_space);
        assert_eq!(
            merged.graph.change_ids()[&d],
            instance.graph.change_ids()[&d]
        );
        assert!(manager.diff_emitters(&merged, &instance).renderers.is_empty());
    }

    #[rstest]
    fn same_named_modules_keep_their_own_rapid_values(parent: Emitter) {
        let last = parent.duplicate();
        let mut instance = instance_of(&parent);
        instance
            .add_module(UPDATE, 2, ModuleBuilder::asset("G", "/Modules/G").rapid("Scale", ParameterValue::float(5.0)))
            .unwrap();
        let mut parent = parent;
        parent
            .add_module(UPDATE, 2, ModuleBuilder::asset("G", "/Modules/G").rapid("Scale", ParameterValue::float(1.0)))
            .unwrap();

        let result = MergeManager::new().merge_emitter(&parent, Some(&last), &instance);
        assert!(result.succeeded(), "{:?}", result.errors);
        let merged = result.merged.unwrap();
        let mut names: Vec<_> = modules(&merged).into_iter().map(|(name, _)| name).collect();
        names.sort();
        assert_eq!(names, ["A", "B", "G", "G001"]);

        let table = &merged.script(UPDATE).unwrap().rapid_iteration;
        assert_eq!(table.get("Constants.Emitter.G.Scale"), Some(&ParameterValue::float(1.0)));
        assert_eq!(table.get("Constants.Emitter.G001.Scale"), Some(&ParameterValue::float(5.0)));
    }

    #[rstest]
    fn first_merge_disables_removed_modules(parent: Emitter) {
        let mut instance = instance_of(&parent);
        instance.graph.remove_module(UPDATE, B).unwrap();
        instance.update_change_id("test edit");

        let result = MergeManager::new().merge_emitter(&parent, None, &instance);
        assert_eq!(result.status, MergeStatus::SucceededDifferencesApplied);
        assert_eq!(
            modules(&result.merged.unwrap()),
            [("A".to_string(), true), ("B".to_string(), false)]
        );

        let options = MergeOptions::default().with_disable_removed_on_first_merge(false);
        let result = MergeManager::with_options(options).merge_emitter(&parent, None, &instance);
        assert_eq!(modules(&result.merged.unwrap()), [("A".to_string(), true)]);
    }

    #[test]
    fn mismatched_scratch_definitions_fail_to_diff() {
        let module = NodeId::new();
        let scratch = |id| {
            EmitterBuilder::new("Template")
                .module(
                    UPDATE,
                    ModuleBuilder::new(
                        "Noise",
                        Definition::Scratch {
                            name: "Noise".into(),
                            id,
                        },
                    )
                    .id(module),
                )
                .scratch_pad_script(ScratchPadScript {
                    id,
                    name: "Noise".into(),
                    change_id: ChangeId::new(),
                    source: serde_json::Value::Null,
                })
                .build()
                .unwrap()
        };
        let parent = scratch(DefinitionId::new());
        let instance = scratch(DefinitionId::new());

        let result = MergeManager::new().merge_emitter(&parent, None, &instance);
        assert_eq!(result.status, MergeStatus::FailedToDiff);
        assert!(result.merged.is_none());
        assert_eq!(result.errors[0], "Failed to diff Particle Update script stack. 1 Errors:");
        assert!(result.errors[1].contains("Noise"));
    }

    #[rstest]
    fn apply_failures_reject_the_merge(parent: Emitter) {
        let last = parent.duplicate();
        let mut instance = instance_of(&parent);
        instance
            .add_module(UPDATE, 0, ModuleBuilder::missing("Lost"))
            .unwrap();

        let result = MergeManager::new().merge_emitter(&parent, Some(&last), &instance);
        assert_eq!(result.status, MergeStatus::FailedToMerge);
        assert!(result.merged.is_none());
        assert_eq!(
            result.errors,
            ["Can not add module Lost because it's script was missing."]
        );
    }

    #[rstest]
    fn module_input_queries(parent: Emitter) {
        let mut manager = MergeManager::new();
        let mut instance = instance_of(&parent);
        assert!(manager.has_base_module(&parent, UPDATE, A));
        assert!(!manager.has_base_module(&parent, UPDATE, NodeId::new()));
        assert!(!manager.is_module_input_different_from_base(&instance, &parent, UPDATE, A, "Speed"));

        instance.graph.set_pin_default(A, "Speed", "9.0").unwrap();
        instance.graph.set_module_enabled(B, false).unwrap();
        assert!(manager.is_module_input_different_from_base(&instance, &parent, UPDATE, A, "Speed"));
        assert!(!manager.diff_emitters(&parent, &instance).is_empty());

        let result = manager.reset_module_input_to_base(&mut instance, &parent, UPDATE, A, "Speed");
        assert!(result.succeeded(), "{:?}", result.errors);
        assert!(!manager.is_module_input_different_from_base(&instance, &parent, UPDATE, A, "Speed"));
        // Only the reset input is touched.
        assert_eq!(modules(&instance)[1], ("B".to_string(), false));

        let result = manager.reset_module_input_to_base(&mut instance, &parent, UPDATE, A, "Speed");
        assert_eq!(
            result.errors,
            ["Failed to reset input back to it's base value. It wasn't different from the base. Emitter: Instance Input:Speed"]
        );
    }

    #[rstest]
    fn renderer_queries(parent: Emitter) {
        let mut manager = MergeManager::new();
        let id = RendererId::from_u128(1);
        let mut instance = instance_of(&parent);
        instance.renderers[0].enabled = false;

        assert!(manager.has_base_renderer(&parent, id));
        assert!(manager.is_renderer_different_from_base(&instance, &parent, id));
        assert!(manager.reset_renderer_to_base(&mut instance, &parent, id).succeeded());
        assert_eq!(instance.renderers, parent.renderers);
        assert!(!manager.is_renderer_different_from_base(&instance, &parent, id));
        assert_eq!(
            manager.reset_renderer_to_base(&mut instance, &parent, id).errors,
            [format!(
                "Failed to reset renderer back to it's base value. It wasn't different from the base. Emitter: Instance Input:{id}"
            )]
        );

        let missing = RendererId::from_u128(2);
        assert_matches!(
            manager.reset_renderer_to_base(&mut instance, &parent, missing).errors.as_slice(),
            [message] => assert!(message.contains(&missing.to_string()))
        );
    }

    #[rstest]
    fn property_set_queries(parent: Emitter) {
        let mut manager = MergeManager::new();
        let mut instance = instance_of(&parent);
        instance.properties.random_seed = 7;
        instance.properties.notes = "local notes".into();

        assert!(manager.is_emitter_property_set_different_from_base(&instance, &parent));
        assert!(manager.reset_emitter_property_set_to_base(&mut instance, &parent).modified);
        assert_eq!(instance.properties.random_seed, 0);
        assert_eq!(instance.properties.notes, "local notes");
        assert!(!manager.is_emitter_property_set_different_from_base(&instance, &parent));
    }

    #[test]
    fn entry_property_queries() {
        let handler = UsageId::new();
        let stage = UsageId::new();
        let base = EmitterBuilder::new("Template")
            .event_handler(handler, EventHandlerProperties::default(), [])
            .simulation_stage(stage, SimulationStageProperties::default(), [])
            .build()
            .unwrap();
        let mut manager = MergeManager::new();
        let mut instance = instance_of(&base);
        instance.event_handlers[0].properties.max_events_per_frame = 3;

        assert!(manager.has_base_event_handler(&base, handler));
        assert!(!manager.has_base_event_handler(&base, stage));
        assert!(manager.has_base_simulation_stage(&base, stage));
        assert!(manager.is_event_handler_property_set_different_from_base(&instance, &base, handler));
        assert!(!manager.is_simulation_stage_property_set_different_from_base(&instance, &base, stage));
        assert!(manager.is_simulation_stage_property_set_different_from_base(&instance, &base, UsageId::new()));

        assert!(manager
            .reset_event_handler_property_set_to_base(&mut instance, &base, handler)
            .modified);
        assert_eq!(instance.event_handlers, base.event_handlers);
        assert!(!manager
            .reset_simulation_stage_property_set_to_base(&mut instance, &base, stage)
            .modified);
    }
}
