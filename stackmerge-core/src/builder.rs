//! Builders for emitters and the modules of their stacks.
//!
//! ```
//! use stackmerge_core::builder::{EmitterBuilder, ModuleBuilder};
//! use stackmerge_core::usage::ScriptUsage;
//!
//! let emitter = EmitterBuilder::new("Sparks")
//!     .module(
//!         ScriptUsage::ParticleUpdate,
//!         ModuleBuilder::asset("Gravity", "/Modules/Gravity").literal("Strength", "float", "980"),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(emitter.find_module(ScriptUsage::ParticleUpdate.into(), "Gravity").is_some());
//! ```

use smol_str::SmolStr;

use crate::emitter::{
    Emitter, EmitterProperties, EventHandlerProperties, ParameterValue, RapidIterationTable, Renderer,
    ScratchPadScript, Script, SimulationStageProperties, StackEntry, rapid_iteration_name,
};
use crate::graph::{
    DataObject, Definition, FunctionCall, GraphError, Node, ScriptGraph, StaticSwitch,
};
use crate::ids::{MessageId, NodeId, ParameterHandle, UsageId};
use crate::usage::UsageKey;

#[derive(Clone, Debug)]
enum InputValue {
    Literal {
        type_name: SmolStr,
        literal: String,
    },
    Linked {
        type_name: SmolStr,
        handle: ParameterHandle,
    },
    Data {
        type_name: SmolStr,
        name: SmolStr,
        object: DataObject,
    },
    Dynamic {
        type_name: SmolStr,
        function: ModuleBuilder,
    },
    Rapid(ParameterValue),
}

/// Builds one module call together with its input overrides.
#[derive(Clone, Debug)]
pub struct ModuleBuilder {
    id: NodeId,
    call: FunctionCall,
    override_set_id: Option<NodeId>,
    inputs: Vec<(SmolStr, InputValue)>,
}

impl ModuleBuilder {
    /// A module calling `definition`.
    pub fn new(name: impl Into<SmolStr>, definition: Definition) -> Self {
        Self {
            id: NodeId::new(),
            call: FunctionCall::new(name, definition),
            override_set_id: None,
            inputs: Vec::new(),
        }
    }

    /// A module calling the asset definition at `path`.
    pub fn asset(name: impl Into<SmolStr>, path: impl Into<SmolStr>) -> Self {
        Self::new(name, Definition::Asset { path: path.into() })
    }

    /// A module with no definition reference.
    pub fn missing(name: impl Into<SmolStr>) -> Self {
        let mut builder = Self::asset(name, "");
        builder.call.definition = None;
        builder
    }

    /// Uses a fixed node id.
    pub fn id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Uses a fixed id for the module's override set.
    pub fn override_set_id(mut self, id: NodeId) -> Self {
        self.override_set_id = Some(id);
        self
    }

    /// Disables the module.
    pub fn disabled(mut self) -> Self {
        self.call.enabled = false;
        self
    }

    /// Selects a definition version.
    pub fn version(mut self, version: impl Into<SmolStr>) -> Self {
        self.call.selected_version = Some(version.into());
        self
    }

    /// Attaches an annotation.
    pub fn message(mut self, id: MessageId, text: impl Into<String>) -> Self {
        self.call.messages.insert(id, text.into());
        self
    }

    /// Sets a static switch.
    pub fn static_switch(
        mut self,
        name: impl Into<SmolStr>,
        type_name: impl Into<SmolStr>,
        value: impl Into<String>,
    ) -> Self {
        self.call.static_switches.insert(
            name.into(),
            StaticSwitch {
                type_name: type_name.into(),
                value: value.into(),
            },
        );
        self
    }

    /// Overrides an input with a literal value.
    pub fn literal(
        self,
        input: impl Into<SmolStr>,
        type_name: impl Into<SmolStr>,
        literal: impl Into<String>,
    ) -> Self {
        self.input(
            input,
            InputValue::Literal {
                type_name: type_name.into(),
                literal: literal.into(),
            },
        )
    }

    /// Links an input to another parameter.
    pub fn linked(
        self,
        input: impl Into<SmolStr>,
        type_name: impl Into<SmolStr>,
        handle: ParameterHandle,
    ) -> Self {
        self.input(
            input,
            InputValue::Linked {
                type_name: type_name.into(),
                handle,
            },
        )
    }

    /// Binds an input to an embedded data object.
    pub fn data(
        self,
        input: impl Into<SmolStr>,
        type_name: impl Into<SmolStr>,
        name: impl Into<SmolStr>,
        object: DataObject,
    ) -> Self {
        self.input(
            input,
            InputValue::Data {
                type_name: type_name.into(),
                name: name.into(),
                object,
            },
        )
    }

    /// Computes an input with a nested dynamic input call.
    pub fn dynamic(
        self,
        input: impl Into<SmolStr>,
        type_name: impl Into<SmolStr>,
        function: ModuleBuilder,
    ) -> Self {
        self.input(
            input,
            InputValue::Dynamic {
                type_name: type_name.into(),
                function,
            },
        )
    }

    /// Declares a fast-iteration input and stores its value in the owning
    /// script's table.
    pub fn rapid(mut self, input: impl Into<SmolStr>, value: ParameterValue) -> Self {
        let input = input.into();
        self.call
            .rapid_inputs
            .insert(input.clone(), value.type_name.clone());
        self.input(input, InputValue::Rapid(value))
    }

    fn input(mut self, input: impl Into<SmolStr>, value: InputValue) -> Self {
        self.inputs.push((input.into(), value));
        self
    }

    fn bind_inputs(
        self,
        graph: &mut ScriptGraph,
        call: NodeId,
        mut table: Option<&mut RapidIterationTable>,
    ) -> Result<(), GraphError> {
        let name = graph.function_call(call)?.name.clone();
        for (input, value) in self.inputs {
            let type_name = match &value {
                InputValue::Rapid(v) => {
                    if let Some(table) = table.as_deref_mut() {
                        table.set(rapid_iteration_name(&name, &input), v.clone());
                    }
                    continue;
                }
                InputValue::Literal { type_name, .. }
                | InputValue::Linked { type_name, .. }
                | InputValue::Data { type_name, .. }
                | InputValue::Dynamic { type_name, .. } => type_name.clone(),
            };
            graph.get_or_create_override_pin(call, &input, &type_name, self.override_set_id)?;
            match value {
                InputValue::Literal { literal, .. } => graph.set_pin_default(call, &input, literal)?,
                InputValue::Linked { handle, .. } => {
                    graph.bind_linked_handle(call, &input, handle, NodeId::new())?;
                }
                InputValue::Data { name, object, .. } => {
                    graph.bind_data_object(call, &input, name, object, NodeId::new())?;
                }
                InputValue::Dynamic { function, .. } => {
                    let id = function.id;
                    graph.bind_dynamic_input(call, &input, function.call.clone(), id)?;
                    function.bind_inputs(graph, id, table.as_deref_mut())?;
                }
                InputValue::Rapid(_) => {}
            }
        }
        Ok(())
    }
}

impl Emitter {
    /// Adds a module to a stack so that it ends up at `index`.
    pub fn add_module(
        &mut self,
        usage: UsageKey,
        index: usize,
        module: ModuleBuilder,
    ) -> Result<NodeId, GraphError> {
        let node = Node::new(module.id, module.call.clone());
        let id = self.graph.insert_module(usage, index, node)?;
        let script = if usage.usage.is_fixed() {
            self.scripts.get_mut(&usage.usage)
        } else {
            self.event_handlers
                .iter_mut()
                .filter_map(|e| e.script.as_mut())
                .chain(self.simulation_stages.iter_mut().filter_map(|e| e.script.as_mut()))
                .find(|s| s.usage == usage)
        };
        module.bind_inputs(&mut self.graph, id, script.map(|s| &mut s.rapid_iteration))?;
        self.update_change_id("module added");
        Ok(id)
    }

    /// The first module of a stack with the given name.
    pub fn find_module(&self, usage: UsageKey, name: &str) -> Option<NodeId> {
        self.graph
            .ordered_modules(usage)
            .ok()?
            .into_iter()
            .find(|&m| self.graph.function_call(m).is_ok_and(|c| c.name == name))
    }
}

/// Builds an [`Emitter`].
#[derive(Clone, Debug)]
pub struct EmitterBuilder {
    emitter: Emitter,
    modules: Vec<(UsageKey, ModuleBuilder)>,
}

impl EmitterBuilder {
    /// An emitter with empty fixed stacks.
    pub fn new(unique_name: impl Into<SmolStr>) -> Self {
        Self {
            emitter: Emitter::new(unique_name),
            modules: Vec::new(),
        }
    }

    /// Appends a module to a stack.
    pub fn module(mut self, usage: impl Into<UsageKey>, module: ModuleBuilder) -> Self {
        self.modules.push((usage.into(), module));
        self
    }

    /// Adds an event handler with the given modules.
    pub fn event_handler(
        mut self,
        usage_id: UsageId,
        properties: EventHandlerProperties,
        modules: impl IntoIterator<Item = ModuleBuilder>,
    ) -> Self {
        let key = UsageKey::event(usage_id);
        self.emitter.event_handlers.push(StackEntry {
            usage_id,
            properties,
            script: Some(Script::new(key)),
        });
        self.modules.extend(modules.into_iter().map(|m| (key, m)));
        self
    }

    /// Adds a simulation stage with the given modules.
    pub fn simulation_stage(
        mut self,
        usage_id: UsageId,
        properties: SimulationStageProperties,
        modules: impl IntoIterator<Item = ModuleBuilder>,
    ) -> Self {
        let key = UsageKey::simulation_stage(usage_id);
        self.emitter.simulation_stages.push(StackEntry {
            usage_id,
            properties,
            script: Some(Script::new(key)),
        });
        self.modules.extend(modules.into_iter().map(|m| (key, m)));
        self
    }

    /// Appends a renderer.
    pub fn renderer(mut self, renderer: Renderer) -> Self {
        self.emitter.renderers.push(renderer);
        self
    }

    /// Sets the editable properties.
    pub fn properties(mut self, properties: EmitterProperties) -> Self {
        self.emitter.properties = properties;
        self
    }

    /// Adds a scratch pad script.
    pub fn scratch_pad_script(mut self, script: ScratchPadScript) -> Self {
        self.emitter.scratch_pad_scripts.push(script);
        self
    }

    /// Overrides the display name of a stack entry.
    pub fn display_name(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.emitter.display_names.insert(path.into(), name.into());
        self
    }

    /// Creates the entry stacks and adds every module.
    pub fn build(self) -> Result<Emitter, GraphError> {
        let Self {
            mut emitter,
            modules,
        } = self;
        let entry_keys: Vec<_> = emitter
            .event_handlers
            .iter()
            .map(StackEntry::usage_key)
            .chain(emitter.simulation_stages.iter().map(StackEntry::usage_key))
            .collect();
        for key in entry_keys {
            emitter
                .graph
                .reset_graph_for_output(key, NodeId::new(), NodeId::new())?;
        }
        for (usage, module) in modules {
            emitter.add_module(usage, usize::MAX, module)?;
        }
        Ok(emitter)
    }
}
