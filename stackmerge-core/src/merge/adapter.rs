//! Read-only views of an emitter used for diffing.
//!
//! Adapters are snapshots built by one top-down walk over an [`Emitter`].
//! They hold forward references and raw identifiers only, and are rebuilt
//! rather than updated when the emitter changes. An [`AdapterCache`] keeps
//! the last adapter built for each emitter until its change id moves on.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use smol_str::SmolStr;
use tracing::{debug, trace};

use crate::emitter::{
    Emitter, EmitterProperties, EventHandlerProperties, ParameterValue, RapidIterationTable, Renderer,
    ScratchPadScript, SimulationStageProperties, StackEntry, StackEntryKind, rapid_iteration_name,
};
use crate::graph::{AssignmentTarget, DataObject, Definition, GraphError, NodeOp, ScriptGraph};
use crate::ids::{ChangeId, EmitterId, MessageId, NodeId, ParameterHandle, UsageId};
use crate::merge::error::{DiffSide, MergeError};
use crate::usage::{ScriptUsage, UsageKey};

/// The value an input override binds.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum OverrideValue {
    /// A literal default on the override pin.
    Local {
        /// Serialized value.
        literal: String,
    },
    /// A value stored in the script's fast-iteration table.
    Rapid {
        /// Qualified table name.
        parameter: SmolStr,
        /// Stored value, `None` if the table has no entry.
        value: Option<ParameterValue>,
    },
    /// A read of another parameter.
    Linked {
        /// The parameter read.
        handle: ParameterHandle,
        /// The reading node.
        node_id: NodeId,
    },
    /// An embedded data object.
    Data {
        /// Name of the data input.
        name: SmolStr,
        /// The object.
        object: DataObject,
        /// The data input node.
        node_id: NodeId,
    },
    /// A nested dynamic input call.
    Dynamic(Box<FunctionAdapter>),
    /// A static switch value.
    StaticSwitch {
        /// Selected value.
        value: String,
    },
    /// A pin bound to a node that cannot supply a value.
    Unknown {
        /// The bound node.
        node_id: NodeId,
    },
}

impl OverrideValue {
    /// Whether the value is stored on an override pin.
    pub fn is_pin_based(&self) -> bool {
        matches!(
            self,
            OverrideValue::Local { .. }
                | OverrideValue::Linked { .. }
                | OverrideValue::Data { .. }
                | OverrideValue::Dynamic(_)
                | OverrideValue::Unknown { .. }
        )
    }
}

/// One input override of a function call.
#[derive(Clone, Debug, PartialEq)]
pub struct InputOverrideAdapter {
    /// The overridden input. Identifies the override within its owner.
    pub input_name: SmolStr,
    /// Type of the input.
    pub type_name: SmolStr,
    /// The function call owning the override.
    pub owner: NodeId,
    /// Name of the owning function call.
    pub owner_name: SmolStr,
    /// The owner's override set node, for pin based values.
    pub override_set_id: Option<NodeId>,
    /// The variable this input writes, when the owner is an assignment.
    pub assignment_target: Option<AssignmentTarget>,
    /// The bound value.
    pub value: OverrideValue,
}

/// A module call, or a dynamic input call nested in an override.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionAdapter {
    /// Node id of the call.
    pub id: NodeId,
    /// Change token of the call.
    pub change_id: ChangeId,
    /// Call name.
    pub name: SmolStr,
    /// Whether the call is enabled.
    pub enabled: bool,
    /// Selected definition version.
    pub selected_version: Option<SmolStr>,
    /// The called definition.
    pub definition: Option<Definition>,
    /// Annotations.
    pub messages: BTreeMap<MessageId, String>,
    /// Position in the owning stack. Zero for dynamic inputs.
    pub stack_index: usize,
    /// Overrides: pins first, then static switches, then fast-iteration
    /// inputs.
    pub overrides: Vec<InputOverrideAdapter>,
}

impl FunctionAdapter {
    /// Reads a function call and its overrides, including those of nested
    /// dynamic inputs. `table` is the owning script's fast-iteration table.
    pub fn build(
        graph: &ScriptGraph,
        id: NodeId,
        stack_index: usize,
        table: Option<&RapidIterationTable>,
    ) -> Result<Self, GraphError> {
        let call = graph.function_call(id)?;
        let change_id = graph.try_node(id)?.change_id;
        let targets: &[AssignmentTarget] = match &call.definition {
            Some(Definition::Assignment { targets }) => targets,
            _ => &[],
        };
        let target_for = |input: &str| targets.iter().find(|t| t.handle.as_str() == input).cloned();
        let override_input = |input: &SmolStr, type_name: &SmolStr, set, value| InputOverrideAdapter {
            input_name: input.clone(),
            type_name: type_name.clone(),
            owner: id,
            owner_name: call.name.clone(),
            override_set_id: set,
            assignment_target: target_for(input),
            value,
        };

        let mut overrides = Vec::new();
        let set = graph.override_set(id);
        if let Some(pins) = graph.override_pins(id) {
            for (input, pin) in &pins.pins {
                let value = match graph.pin_value_node(id, input) {
                    None => OverrideValue::Local {
                        literal: pin.default.clone(),
                    },
                    Some(node_id) => match &graph.try_node(node_id)?.op {
                        NodeOp::ParameterGet { handle } => OverrideValue::Linked {
                            handle: handle.clone(),
                            node_id,
                        },
                        NodeOp::DataInput { name, object } => OverrideValue::Data {
                            name: name.clone(),
                            object: object.clone(),
                            node_id,
                        },
                        NodeOp::FunctionCall(_) => {
                            OverrideValue::Dynamic(Box::new(Self::build(graph, node_id, 0, table)?))
                        }
                        _ => OverrideValue::Unknown { node_id },
                    },
                };
                overrides.push(override_input(input, &pin.type_name, set, value));
            }
        }
        for (input, switch) in &call.static_switches {
            let value = OverrideValue::StaticSwitch {
                value: switch.value.clone(),
            };
            overrides.push(override_input(input, &switch.type_name, None, value));
        }
        if let Some(table) = table {
            for (input, type_name) in &call.rapid_inputs {
                if overrides.iter().any(|o| o.input_name == *input) {
                    continue;
                }
                let parameter = rapid_iteration_name(&call.name, input);
                let value = OverrideValue::Rapid {
                    value: table.get(&parameter).cloned(),
                    parameter,
                };
                overrides.push(override_input(input, type_name, None, value));
            }
        }

        Ok(Self {
            id,
            change_id,
            name: call.name.clone(),
            enabled: call.enabled,
            selected_version: call.selected_version.clone(),
            definition: call.definition.clone(),
            messages: call.messages.clone(),
            stack_index,
            overrides,
        })
    }

    /// The override of an input.
    pub fn input_override(&self, input: &str) -> Option<&InputOverrideAdapter> {
        self.overrides.iter().find(|o| o.input_name == input)
    }
}

/// One script stack.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptStackAdapter {
    /// The stack's usage.
    pub usage: UsageKey,
    /// The stack's input node.
    pub input_node: NodeId,
    /// The stack's output node.
    pub output_node: NodeId,
    /// Modules in execution order.
    pub modules: Vec<FunctionAdapter>,
}

impl ScriptStackAdapter {
    /// Reads the stack feeding `usage`.
    pub fn build(
        graph: &ScriptGraph,
        usage: UsageKey,
        table: Option<&RapidIterationTable>,
    ) -> Result<Self, GraphError> {
        let chain = graph.stack_chain(usage)?;
        let (Some(&input_node), Some(&output_node)) = (chain.first(), chain.last()) else {
            return Err(GraphError::MissingOutput { usage });
        };
        let modules = chain[1..chain.len() - 1]
            .iter()
            .enumerate()
            .map(|(index, &id)| FunctionAdapter::build(graph, id, index, table))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            usage,
            input_node,
            output_node,
            modules,
        })
    }

    /// The module with the given id.
    pub fn module(&self, id: NodeId) -> Option<&FunctionAdapter> {
        self.modules.iter().find(|m| m.id == id)
    }
}

/// An event handler or simulation stage.
#[derive(Clone, Debug, PartialEq)]
pub struct StackEntryAdapter<P> {
    /// Identifies the entry.
    pub usage_id: UsageId,
    /// Position in the owning list.
    pub index: usize,
    /// Non-stack settings.
    pub properties: P,
    /// The entry's stack. `None` if its script is missing or its graph is
    /// invalid.
    pub stack: Option<ScriptStackAdapter>,
}

impl<P: StackEntryKind> StackEntryAdapter<P> {
    fn build(emitter: &Emitter, index: usize, entry: &StackEntry<P>) -> Self {
        let stack = match &entry.script {
            Some(script) => {
                ScriptStackAdapter::build(&emitter.graph, entry.usage_key(), Some(&script.rapid_iteration))
                    .inspect_err(|err| debug!(kind = P::NAME, usage_id = %entry.usage_id, %err, "invalid stack"))
                    .ok()
            }
            None => None,
        };
        Self {
            usage_id: entry.usage_id,
            index,
            properties: entry.properties.clone(),
            stack,
        }
    }
}

/// Entry kinds with adapters in an [`EmitterAdapter`].
pub trait AdaptedEntry: StackEntryKind {
    /// The adapters of this kind.
    fn adapters(emitter: &EmitterAdapter) -> &[StackEntryAdapter<Self>];
    /// The error for an entry whose stack could not be read.
    fn invalid_entry(side: DiffSide, usage_id: UsageId) -> MergeError;
    /// Name of an entry's stack in diagnostics.
    fn stack_name(usage_id: UsageId) -> String;
}

impl AdaptedEntry for EventHandlerProperties {
    fn adapters(emitter: &EmitterAdapter) -> &[StackEntryAdapter<Self>] {
        &emitter.event_handlers
    }

    fn invalid_entry(side: DiffSide, usage_id: UsageId) -> MergeError {
        MergeError::InvalidEventHandler { side, usage_id }
    }

    fn stack_name(usage_id: UsageId) -> String {
        format!("Event Handler - {usage_id}")
    }
}

impl AdaptedEntry for SimulationStageProperties {
    fn adapters(emitter: &EmitterAdapter) -> &[StackEntryAdapter<Self>] {
        &emitter.simulation_stages
    }

    fn invalid_entry(side: DiffSide, usage_id: UsageId) -> MergeError {
        MergeError::InvalidSimulationStage { side, usage_id }
    }

    fn stack_name(usage_id: UsageId) -> String {
        format!("Simulation Stage - {usage_id}")
    }
}

/// A whole emitter.
#[derive(Clone, Debug, PartialEq)]
pub struct EmitterAdapter {
    /// Identity of the adapted emitter.
    pub emitter_id: EmitterId,
    /// Change id of the emitter when the adapter was built.
    pub change_id: ChangeId,
    /// Revision of the emitter's graph when the adapter was built.
    pub graph_revision: ChangeId,
    /// Name of the emitter.
    pub unique_name: SmolStr,
    /// The fixed stacks; `None` where a stack could not be read.
    pub fixed_stacks: BTreeMap<ScriptUsage, Option<ScriptStackAdapter>>,
    /// Event handlers.
    pub event_handlers: Vec<StackEntryAdapter<EventHandlerProperties>>,
    /// Simulation stages.
    pub simulation_stages: Vec<StackEntryAdapter<SimulationStageProperties>>,
    /// Renderers with their positions.
    pub renderers: Vec<(usize, Renderer)>,
    /// Editable settings.
    pub properties: EmitterProperties,
    /// Display name overrides.
    pub display_names: BTreeMap<String, String>,
    /// Scratch pad scripts.
    pub scratch_pad_scripts: Vec<ScratchPadScript>,
}

impl EmitterAdapter {
    /// Reads an emitter.
    pub fn build(emitter: &Emitter) -> Self {
        let fixed_stacks = ScriptUsage::FIXED
            .into_iter()
            .map(|usage| {
                let key = UsageKey::fixed(usage);
                let stack = emitter.script(key).and_then(|script| {
                    ScriptStackAdapter::build(&emitter.graph, key, Some(&script.rapid_iteration))
                        .inspect_err(|err| debug!(usage = %key, %err, "invalid stack"))
                        .ok()
                });
                (usage, stack)
            })
            .collect();
        Self {
            emitter_id: emitter.id,
            change_id: emitter.change_id,
            graph_revision: emitter.graph.revision(),
            unique_name: emitter.unique_name.clone(),
            fixed_stacks,
            event_handlers: entry_adapters(emitter),
            simulation_stages: entry_adapters(emitter),
            renderers: emitter.renderers.iter().cloned().enumerate().collect(),
            properties: emitter.properties.clone(),
            display_names: emitter.display_names.clone(),
            scratch_pad_scripts: emitter.scratch_pad_scripts.clone(),
        }
    }

    /// The stack of a fixed usage or entry.
    pub fn stack(&self, key: UsageKey) -> Option<&ScriptStackAdapter> {
        match key.usage {
            ScriptUsage::ParticleEvent => find_entry_stack(&self.event_handlers, key.usage_id),
            ScriptUsage::SimulationStage => find_entry_stack(&self.simulation_stages, key.usage_id),
            fixed => self.fixed_stacks.get(&fixed)?.as_ref(),
        }
    }

    /// Every readable stack.
    pub fn stacks(&self) -> impl Iterator<Item = &ScriptStackAdapter> + '_ {
        let fixed = self.fixed_stacks.values().flatten();
        let events = self.event_handlers.iter().filter_map(|e| e.stack.as_ref());
        let stages = self.simulation_stages.iter().filter_map(|e| e.stack.as_ref());
        fixed.chain(events).chain(stages)
    }

    /// Finds a module in any stack.
    pub fn module(&self, id: NodeId) -> Option<(&ScriptStackAdapter, &FunctionAdapter)> {
        self.stacks()
            .find_map(|stack| stack.module(id).map(|m| (stack, m)))
    }
}

fn entry_adapters<P: StackEntryKind>(emitter: &Emitter) -> Vec<StackEntryAdapter<P>> {
    P::entries(emitter)
        .iter()
        .enumerate()
        .map(|(index, entry)| StackEntryAdapter::build(emitter, index, entry))
        .collect()
}

fn find_entry_stack<P>(entries: &[StackEntryAdapter<P>], usage_id: UsageId) -> Option<&ScriptStackAdapter> {
    entries
        .iter()
        .find(|e| e.usage_id == usage_id)?
        .stack
        .as_ref()
}

/// Adapters keyed by emitter identity, rebuilt lazily when an emitter's
/// change id or graph revision no longer matches the cached one.
#[derive(Debug, Default)]
pub struct AdapterCache {
    adapters: HashMap<EmitterId, Rc<EmitterAdapter>>,
}

impl AdapterCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The adapter for `emitter`, building it if needed.
    pub fn get(&mut self, emitter: &Emitter) -> Rc<EmitterAdapter> {
        if let Some(adapter) = self.adapters.get(&emitter.id) {
            if adapter.change_id == emitter.change_id
                && adapter.graph_revision == emitter.graph.revision()
            {
                trace!(emitter = %emitter.unique_name, "adapter cache hit");
                return Rc::clone(adapter);
            }
        }
        let adapter = Rc::new(EmitterAdapter::build(emitter));
        self.adapters.insert(emitter.id, Rc::clone(&adapter));
        adapter
    }

    /// Drops every cached adapter.
    pub fn clear(&mut self) {
        self.adapters.clear();
    }

    /// Number of cached adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
