//! Editing operations on the script stacks of a [`ScriptGraph`].

use std::collections::HashSet;

use smol_str::SmolStr;

use super::{
    DataObject, FunctionCall, GraphError, Link, Node, NodeOp, OverridePin, OverrideSet,
    ScriptGraph,
};
use crate::ids::{NodeId, ParameterHandle};
use crate::usage::UsageKey;

impl ScriptGraph {
    /// The map chain of a stack, from its input node to its output node.
    pub fn stack_chain(&self, usage: UsageKey) -> Result<Vec<NodeId>, GraphError> {
        let output = self
            .find_output(usage)
            .ok_or(GraphError::MissingOutput { usage })?;
        let mut chain = vec![output];
        let mut seen = HashSet::from([output]);
        let mut current = output;
        loop {
            let previous: Vec<_> = self
                .incoming(current)
                .filter(|(_, l)| **l == Link::Map)
                .map(|(n, _)| n)
                .collect();
            let [previous] = previous[..] else {
                return Err(GraphError::InvalidStack {
                    usage,
                    reason: format!(
                        "node {current} has {} previous stack nodes",
                        previous.len()
                    ),
                });
            };
            if !seen.insert(previous) {
                return Err(GraphError::InvalidStack {
                    usage,
                    reason: "the stack contains a cycle".to_string(),
                });
            }
            chain.push(previous);
            match self.try_node(previous)?.op {
                NodeOp::Input { .. } => break,
                NodeOp::FunctionCall(_) => current = previous,
                _ => {
                    return Err(GraphError::InvalidStack {
                        usage,
                        reason: format!("node {previous} is not a module"),
                    });
                }
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// The module calls of a stack in execution order.
    pub fn ordered_modules(&self, usage: UsageKey) -> Result<Vec<NodeId>, GraphError> {
        let chain = self.stack_chain(usage)?;
        Ok(chain[1..chain.len() - 1].to_vec())
    }

    /// Creates an empty stack for `usage`, replacing any existing one. The new
    /// input and output nodes take the given ids.
    pub fn reset_graph_for_output(
        &mut self,
        usage: UsageKey,
        output_id: NodeId,
        input_id: NodeId,
    ) -> Result<(), GraphError> {
        if self.find_output(usage).is_some() {
            for module in self.ordered_modules(usage)? {
                self.remove_function_call(module);
            }
            self.remove_stack_ends(usage);
        }
        let input = self.add_node(Node::new(input_id, NodeOp::Input { usage }))?;
        let output = self.add_node(Node::new(output_id, NodeOp::Output { usage }))?;
        self.connect(input, output, Link::Map)
    }

    fn remove_stack_ends(&mut self, usage: UsageKey) {
        let ends: Vec<_> = self
            .nodes()
            .filter(|n| {
                matches!(
                    n.op,
                    NodeOp::Input { usage: u } | NodeOp::Output { usage: u } if u == usage
                )
            })
            .map(|n| n.id)
            .collect();
        for id in ends {
            self.remove_node(id);
        }
    }

    /// Inserts a module node into a stack so that it ends up at `index`.
    /// Indices past the end append. The call is renamed if its name is
    /// already used in the graph.
    pub fn insert_module(
        &mut self,
        usage: UsageKey,
        index: usize,
        mut node: Node,
    ) -> Result<NodeId, GraphError> {
        if node.as_function_call().is_none() {
            return Err(GraphError::UnexpectedNodeKind {
                node: node.id,
                expected: "function call",
            });
        }
        let chain = self.stack_chain(usage)?;
        self.uniquify_call_name(&mut node);
        let index = index.min(chain.len() - 2);
        let (previous, next) = (chain[index], chain[index + 1]);
        let id = self.add_node(node)?;
        self.disconnect_where(previous, next, |l| *l == Link::Map)?;
        self.connect(previous, id, Link::Map)?;
        self.connect(id, next, Link::Map)?;
        Ok(id)
    }

    /// Removes a module and everything that configures it from a stack.
    pub fn remove_module(&mut self, usage: UsageKey, module: NodeId) -> Result<(), GraphError> {
        let chain = self.stack_chain(usage)?;
        let pos = chain[1..chain.len() - 1]
            .iter()
            .position(|&n| n == module)
            .ok_or(GraphError::NodeNotFound { node: module })?
            + 1;
        let (previous, next) = (chain[pos - 1], chain[pos + 1]);
        self.remove_function_call(module);
        self.connect(previous, next, Link::Map)
    }

    /// Removes a function call with its override set and every value node
    /// bound to it, recursively.
    fn remove_function_call(&mut self, call: NodeId) {
        if let Some(set) = self.override_set(call) {
            let bound: Vec<_> = self
                .incoming(set)
                .filter(|(_, l)| matches!(l, Link::Value { .. }))
                .map(|(n, _)| n)
                .collect();
            for value in bound {
                self.remove_value_node(value);
            }
            self.remove_node(set);
        }
        self.remove_node(call);
    }

    fn remove_value_node(&mut self, value: NodeId) {
        let is_call = self
            .node(value)
            .is_some_and(|n| n.as_function_call().is_some());
        if is_call {
            self.remove_function_call(value);
        } else {
            self.remove_node(value);
        }
    }

    /// Enables or disables a module.
    pub fn set_module_enabled(&mut self, module: NodeId, enabled: bool) -> Result<(), GraphError> {
        let call = self.function_call_mut(module)?;
        if call.enabled != enabled {
            call.enabled = enabled;
            self.mark_changed(module);
        }
        Ok(())
    }

    /// The override set node configuring a function call.
    pub fn override_set(&self, call: NodeId) -> Option<NodeId> {
        self.incoming(call)
            .find(|(_, l)| **l == Link::Overrides)
            .map(|(n, _)| n)
    }

    /// The override set of a function call, creating it if needed. A new set
    /// takes `preferred_id` when given and not already in use.
    pub fn get_or_create_override_set(
        &mut self,
        call: NodeId,
        preferred_id: Option<NodeId>,
    ) -> Result<NodeId, GraphError> {
        self.function_call(call)?;
        if let Some(set) = self.override_set(call) {
            return Ok(set);
        }
        let id = preferred_id
            .filter(|id| !self.contains(*id))
            .unwrap_or_default();
        let set = self.add_node(Node::new(id, OverrideSet::default()))?;
        self.connect(set, call, Link::Overrides)?;
        Ok(set)
    }

    /// The override pins of a function call.
    pub fn override_pins(&self, call: NodeId) -> Option<&OverrideSet> {
        self.override_set(call)
            .and_then(|set| self.node(set))
            .and_then(Node::as_override_set)
    }

    /// The value node bound to an override pin, if any.
    pub fn pin_value_node(&self, call: NodeId, pin: &str) -> Option<NodeId> {
        let set = self.override_set(call)?;
        self.incoming(set)
            .find(|(_, l)| matches!(l, Link::Value { pin: p } if p == pin))
            .map(|(n, _)| n)
    }

    /// Finds the override pin for `input` on a function call, creating it
    /// with the given type if needed. Returns the override set node.
    pub fn get_or_create_override_pin(
        &mut self,
        call: NodeId,
        input: &str,
        type_name: &str,
        preferred_set_id: Option<NodeId>,
    ) -> Result<NodeId, GraphError> {
        let set = self.get_or_create_override_set(call, preferred_set_id)?;
        let NodeOp::OverrideSet(pins) = &mut self.try_node_mut(set)?.op else {
            return Err(GraphError::UnexpectedNodeKind {
                node: set,
                expected: "override set",
            });
        };
        if !pins.pins.contains_key(input) {
            pins.pins.insert(
                input.into(),
                OverridePin {
                    type_name: type_name.into(),
                    default: String::new(),
                },
            );
            self.mark_changed(set);
        }
        Ok(set)
    }

    /// Removes an override pin together with any value nodes bound to it.
    /// Returns `false` if there was no such pin.
    pub fn remove_override_pin(&mut self, call: NodeId, input: &str) -> Result<bool, GraphError> {
        let Some(set) = self.override_set(call) else {
            return Ok(false);
        };
        if let Some(value) = self.pin_value_node(call, input) {
            self.remove_value_node(value);
        }
        let NodeOp::OverrideSet(pins) = &mut self.try_node_mut(set)?.op else {
            return Ok(false);
        };
        let removed = pins.pins.shift_remove(input).is_some();
        if removed {
            self.mark_changed(set);
        }
        Ok(removed)
    }

    fn unbound_pin(&self, call: NodeId, input: &str) -> Result<NodeId, GraphError> {
        let set = self
            .override_pins(call)
            .filter(|pins| pins.pins.contains_key(input))
            .and(self.override_set(call))
            .ok_or_else(|| GraphError::PinNotFound {
                node: call,
                pin: input.into(),
            })?;
        if self.pin_value_node(call, input).is_some() {
            return Err(GraphError::PinLinked {
                node: call,
                pin: input.into(),
            });
        }
        Ok(set)
    }

    /// Sets the literal default of an unbound override pin.
    pub fn set_pin_default(
        &mut self,
        call: NodeId,
        input: &str,
        literal: impl Into<String>,
    ) -> Result<(), GraphError> {
        let set = self.unbound_pin(call, input)?;
        if let NodeOp::OverrideSet(pins) = &mut self.try_node_mut(set)?.op {
            if let Some(pin) = pins.pins.get_mut(input) {
                pin.default = literal.into();
            }
        }
        self.mark_changed(set);
        Ok(())
    }

    /// Binds an override pin to a read of another parameter.
    pub fn bind_linked_handle(
        &mut self,
        call: NodeId,
        input: &str,
        handle: ParameterHandle,
        node_id: NodeId,
    ) -> Result<NodeId, GraphError> {
        self.bind_value_node(call, input, Node::new(node_id, NodeOp::ParameterGet { handle }))
    }

    /// Binds an override pin to an embedded data object.
    pub fn bind_data_object(
        &mut self,
        call: NodeId,
        input: &str,
        name: impl Into<SmolStr>,
        object: DataObject,
        node_id: NodeId,
    ) -> Result<NodeId, GraphError> {
        let op = NodeOp::DataInput {
            name: name.into(),
            object,
        };
        self.bind_value_node(call, input, Node::new(node_id, op))
    }

    /// Binds an override pin to a new dynamic input call, renamed if its
    /// name is already used in the graph.
    pub fn bind_dynamic_input(
        &mut self,
        call: NodeId,
        input: &str,
        dynamic: FunctionCall,
        node_id: NodeId,
    ) -> Result<NodeId, GraphError> {
        let mut node = Node::new(node_id, dynamic);
        self.uniquify_call_name(&mut node);
        self.bind_value_node(call, input, node)
    }

    fn bind_value_node(&mut self, call: NodeId, input: &str, node: Node) -> Result<NodeId, GraphError> {
        let set = self.unbound_pin(call, input)?;
        let value = self.add_node(node)?;
        self.connect(value, set, Link::Value { pin: input.into() })?;
        self.mark_changed(set);
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::Definition;
    use crate::usage::ScriptUsage;
    use cool_asserts::assert_matches;
    use rstest::{fixture, rstest};

    const USAGE: UsageKey = UsageKey::fixed(ScriptUsage::ParticleUpdate);

    fn module(name: &str) -> Node {
        Node::new(
            NodeId::new(),
            FunctionCall::new(
                name,
                Definition::Asset {
                    path: format!("/Modules/{name}").into(),
                },
            ),
        )
    }

    #[fixture]
    fn stack() -> ScriptGraph {
        let mut graph = ScriptGraph::new();
        graph
            .reset_graph_for_output(USAGE, NodeId::new(), NodeId::new())
            .unwrap();
        graph
    }

    fn names(graph: &ScriptGraph) -> Vec<String> {
        graph
            .ordered_modules(USAGE)
            .unwrap()
            .into_iter()
            .map(|m| graph.function_call(m).unwrap().name.to_string())
            .collect()
    }

    #[rstest]
    fn insert_at_index(mut stack: ScriptGraph) {
        stack.insert_module(USAGE, 0, module("B")).unwrap();
        stack.insert_module(USAGE, 0, module("A")).unwrap();
        stack.insert_module(USAGE, 99, module("D")).unwrap();
        stack.insert_module(USAGE, 2, module("C")).unwrap();
        assert_eq!(names(&stack), ["A", "B", "C", "D"]);
    }

    #[rstest]
    fn duplicate_names_are_suffixed(mut stack: ScriptGraph) {
        let first = stack.insert_module(USAGE, 0, module("Gravity")).unwrap();
        stack.insert_module(USAGE, 1, module("Gravity")).unwrap();
        stack.insert_module(USAGE, 2, module("Gravity")).unwrap();
        assert_eq!(names(&stack), ["Gravity", "Gravity001", "Gravity002"]);

        stack
            .get_or_create_override_pin(first, "Strength", "float", None)
            .unwrap();
        let dynamic = FunctionCall::new(
            "Gravity001",
            Definition::Asset {
                path: "/Dynamic/Scale".into(),
            },
        );
        let d = stack
            .bind_dynamic_input(first, "Strength", dynamic, NodeId::new())
            .unwrap();
        assert_eq!(stack.function_call(d).unwrap().name, "Gravity003");
    }

    #[rstest]
    fn edits_replace_the_revision(mut stack: ScriptGraph) {
        let initial = stack.revision();
        let a = stack.insert_module(USAGE, 0, module("A")).unwrap();
        let inserted = stack.revision();
        assert_ne!(inserted, initial);

        stack
            .get_or_create_override_pin(a, "Speed", "float", None)
            .unwrap();
        let pinned = stack.revision();
        assert_ne!(pinned, inserted);
        stack.set_pin_default(a, "Speed", "9.0").unwrap();
        assert_ne!(stack.revision(), pinned);

        let before = stack.revision();
        assert_eq!(stack.function_call(a).unwrap().name, "A");
        assert_eq!(stack.revision(), before);
    }

    #[rstest]
    fn remove_module_relinks_stack(mut stack: ScriptGraph) {
        stack.insert_module(USAGE, 0, module("A")).unwrap();
        let b = stack.insert_module(USAGE, 1, module("B")).unwrap();
        stack.insert_module(USAGE, 2, module("C")).unwrap();
        stack
            .get_or_create_override_pin(b, "Speed", "float", None)
            .unwrap();
        stack
            .bind_linked_handle(b, "Speed", ParameterHandle::new("Particles", "Age"), NodeId::new())
            .unwrap();
        let before = stack.node_count();

        stack.remove_module(USAGE, b).unwrap();
        assert_eq!(names(&stack), ["A", "C"]);
        // module, override set and the linked reader
        assert_eq!(stack.node_count(), before - 3);
    }

    #[rstest]
    fn bound_pins_reject_new_values(mut stack: ScriptGraph) {
        let a = stack.insert_module(USAGE, 0, module("A")).unwrap();
        stack
            .get_or_create_override_pin(a, "Color", "color", None)
            .unwrap();
        stack
            .bind_linked_handle(a, "Color", ParameterHandle::new("User", "Tint"), NodeId::new())
            .unwrap();
        assert_matches!(
            stack.set_pin_default(a, "Color", "1,1,1"),
            Err(GraphError::PinLinked { .. })
        );
        assert_matches!(
            stack.set_pin_default(a, "Missing", "1"),
            Err(GraphError::PinNotFound { .. })
        );
    }

    #[rstest]
    fn dynamic_inputs_are_removed_recursively(mut stack: ScriptGraph) {
        let a = stack.insert_module(USAGE, 0, module("A")).unwrap();
        stack
            .get_or_create_override_pin(a, "Velocity", "vector", None)
            .unwrap();
        let dynamic = FunctionCall::new(
            "RandomVector",
            Definition::Asset {
                path: "/Dynamic/RandomVector".into(),
            },
        );
        let d = stack
            .bind_dynamic_input(a, "Velocity", dynamic, NodeId::new())
            .unwrap();
        stack.get_or_create_override_pin(d, "Min", "vector", None).unwrap();
        stack.set_pin_default(d, "Min", "0,0,0").unwrap();
        let with_dynamic = stack.node_count();

        assert!(stack.remove_override_pin(a, "Velocity").unwrap());
        // dynamic input and its override set
        assert_eq!(stack.node_count(), with_dynamic - 2);
        assert!(!stack.contains(d));
        assert!(!stack.remove_override_pin(a, "Velocity").unwrap());
    }

    #[rstest]
    fn override_set_takes_preferred_id(mut stack: ScriptGraph) {
        let a = stack.insert_module(USAGE, 0, module("A")).unwrap();
        let preferred = NodeId::from_u128(9);
        let set = stack
            .get_or_create_override_pin(a, "Speed", "float", Some(preferred))
            .unwrap();
        assert_eq!(set, preferred);
    }

    #[test]
    fn missing_output_is_reported() {
        let graph = ScriptGraph::new();
        assert_matches!(
            graph.ordered_modules(USAGE),
            Err(GraphError::MissingOutput { usage }) => assert_eq!(usage, USAGE)
        );
    }

    #[rstest]
    fn enabling_bumps_change_id(mut stack: ScriptGraph) {
        let a = stack.insert_module(USAGE, 0, module("A")).unwrap();
        let before = stack.node(a).unwrap().change_id;
        stack.set_module_enabled(a, true).unwrap();
        assert_eq!(stack.node(a).unwrap().change_id, before);
        stack.set_module_enabled(a, false).unwrap();
        assert_ne!(stack.node(a).unwrap().change_id, before);
        assert!(!stack.function_call(a).unwrap().enabled);
    }
}
