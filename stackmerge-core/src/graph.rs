//! The node graph that script stacks live in.
//!
//! A [`ScriptGraph`] holds the nodes of every stack owned by one emitter.
//! Each stack is a chain of [`Link::Map`] links running from an
//! [`NodeOp::Input`] node through its module calls to an [`NodeOp::Output`]
//! node. A module's input overrides hang off an [`NodeOp::OverrideSet`] node
//! linked into the module with [`Link::Overrides`]; an override pin that is
//! bound to a value node (a parameter read, a data object or a nested dynamic
//! input call) receives a [`Link::Value`] link from that node.
//!
//! Stack level editing operations are in the [`stack`] module.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use smol_str::SmolStr;
use thiserror::Error;
use tracing::debug;

use crate::ids::{ChangeId, DefinitionId, MessageId, NodeId, ParameterHandle};
use crate::usage::UsageKey;

pub mod stack;

/// A node of a [`ScriptGraph`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    /// Stable identifier.
    pub id: NodeId,
    /// Change token, replaced whenever the node's content changes.
    pub change_id: ChangeId,
    /// What the node does.
    #[serde(flatten)]
    pub op: NodeOp,
}

impl Node {
    /// Creates a node with a fresh change token.
    pub fn new(id: NodeId, op: impl Into<NodeOp>) -> Self {
        Self {
            id,
            change_id: ChangeId::new(),
            op: op.into(),
        }
    }

    /// The function call payload, if this is a function call node.
    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match &self.op {
            NodeOp::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    /// Mutable function call payload.
    pub fn as_function_call_mut(&mut self) -> Option<&mut FunctionCall> {
        match &mut self.op {
            NodeOp::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    /// The override set payload, if this is an override set node.
    pub fn as_override_set(&self) -> Option<&OverrideSet> {
        match &self.op {
            NodeOp::OverrideSet(set) => Some(set),
            _ => None,
        }
    }
}

/// The operation of a [`Node`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, derive_more::From)]
#[serde(tag = "kind")]
#[non_exhaustive]
pub enum NodeOp {
    /// Head of a stack.
    #[from(ignore)]
    Input {
        /// The stack this node starts.
        usage: UsageKey,
    },
    /// Tail of a stack.
    #[from(ignore)]
    Output {
        /// The stack this node ends.
        usage: UsageKey,
    },
    /// A module call, or a dynamic input computing an override value.
    FunctionCall(FunctionCall),
    /// The override pins of one function call.
    OverrideSet(OverrideSet),
    /// Reads another parameter, binding an override to a linked handle.
    #[from(ignore)]
    ParameterGet {
        /// The parameter read.
        handle: ParameterHandle,
    },
    /// Supplies an embedded data object to an override.
    #[from(ignore)]
    DataInput {
        /// Name of the data input.
        name: SmolStr,
        /// The embedded object.
        object: DataObject,
    },
}

/// A call to a step definition.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionCall {
    /// Display name; unique within a graph.
    pub name: SmolStr,
    /// The step definition being called. `None` when the reference is broken.
    pub definition: Option<Definition>,
    /// Whether the call participates in execution.
    pub enabled: bool,
    /// Selected version of a versioned definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_version: Option<SmolStr>,
    /// Compile time selector pins, keyed by name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub static_switches: IndexMap<SmolStr, StaticSwitch>,
    /// Inputs whose values live in the owning script's fast-iteration table,
    /// with their types. Only meaningful on module calls.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub rapid_inputs: IndexMap<SmolStr, SmolStr>,
    /// Annotations attached to the call.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<MessageId, String>,
}

impl FunctionCall {
    /// An enabled call of `definition` named `name`.
    pub fn new(name: impl Into<SmolStr>, definition: Definition) -> Self {
        Self {
            name: name.into(),
            definition: Some(definition),
            enabled: true,
            ..Default::default()
        }
    }

    /// Whether this call is an inline assignment.
    pub fn is_assignment(&self) -> bool {
        matches!(self.definition, Some(Definition::Assignment { .. }))
    }
}

/// The step definition a function call refers to.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum Definition {
    /// A reusable definition stored as an asset.
    Asset {
        /// Asset path.
        path: SmolStr,
    },
    /// A locally authored scratch pad definition.
    Scratch {
        /// Name of the scratch pad script.
        name: SmolStr,
        /// Identity of the scratch pad script.
        id: DefinitionId,
    },
    /// An inline step that writes directly to named variables.
    Assignment {
        /// The written variables.
        targets: Vec<AssignmentTarget>,
    },
}

impl Definition {
    /// Whether two calls refer to the same step definition.
    ///
    /// Scratch definitions match only if they share identity; a scratch
    /// definition never matches an asset.
    pub fn same_definition(&self, other: &Definition) -> bool {
        match (self, other) {
            (Definition::Asset { path: a }, Definition::Asset { path: b }) => a == b,
            (Definition::Scratch { id: a, .. }, Definition::Scratch { id: b, .. }) => a == b,
            (Definition::Assignment { .. }, Definition::Assignment { .. }) => true,
            _ => false,
        }
    }

    /// A short description used in diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Definition::Asset { path } => path.to_string(),
            Definition::Scratch { name, id } => format!("{name} (scratch {id})"),
            Definition::Assignment { .. } => "Assignment".to_string(),
        }
    }
}

/// A variable written by an assignment step.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AssignmentTarget {
    /// The written variable.
    pub handle: ParameterHandle,
    /// Type of the variable.
    pub type_name: SmolStr,
    /// Default value string.
    pub default: String,
}

/// A compile time selector pin.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StaticSwitch {
    /// Type of the selector.
    pub type_name: SmolStr,
    /// Selected value.
    pub value: String,
}

/// Override pins of one function call, keyed by input name.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OverrideSet {
    /// The pins, in creation order.
    pub pins: IndexMap<SmolStr, OverridePin>,
}

/// One override pin.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OverridePin {
    /// Type of the input.
    pub type_name: SmolStr,
    /// Literal default; ignored while a value node is bound to the pin.
    #[serde(default)]
    pub default: String,
}

/// An embedded configurable sub-object.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DataObject {
    /// Class of the object.
    pub class: SmolStr,
    /// Object properties.
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// A link between two nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(tag = "link")]
#[non_exhaustive]
pub enum Link {
    /// Execution order within a stack.
    Map,
    /// From an override set to the function call it configures.
    Overrides,
    /// From a value node to the named override pin it binds.
    Value {
        /// Override pin name.
        pin: SmolStr,
    },
}

impl Link {
    fn sort_key(&self) -> (u8, &str) {
        match self {
            Link::Map => (0, ""),
            Link::Overrides => (1, ""),
            Link::Value { pin } => (2, pin.as_str()),
        }
    }
}

/// Errors from editing a [`ScriptGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// The node is not in the graph.
    #[error("Node {node} was not found in the graph.")]
    NodeNotFound {
        /// The missing node.
        node: NodeId,
    },
    /// A node with the same identifier already exists.
    #[error("A node with id {node} already exists in the graph.")]
    DuplicateNode {
        /// The duplicated id.
        node: NodeId,
    },
    /// The node has an unexpected kind.
    #[error("Node {node} is not a {expected} node.")]
    UnexpectedNodeKind {
        /// The node.
        node: NodeId,
        /// The expected kind.
        expected: &'static str,
    },
    /// No output node exists for the stack.
    #[error("No output node was found for stack {usage}.")]
    MissingOutput {
        /// The stack.
        usage: UsageKey,
    },
    /// The map chain of a stack is broken.
    #[error("Invalid stack graph for {usage}: {reason}")]
    InvalidStack {
        /// The stack.
        usage: UsageKey,
        /// What is wrong.
        reason: String,
    },
    /// The override pin is missing.
    #[error("Override pin {pin} was not found on {node}.")]
    PinNotFound {
        /// The function call.
        node: NodeId,
        /// The pin.
        pin: SmolStr,
    },
    /// The override pin is already bound to a value node.
    #[error("Override pin {pin} on {node} is already linked to another node.")]
    PinLinked {
        /// The function call.
        node: NodeId,
        /// The pin.
        pin: SmolStr,
    },
}

/// The node graph holding every script stack of an emitter.
#[derive(Clone, Debug, Default)]
pub struct ScriptGraph {
    graph: StableDiGraph<Node, Link>,
    indices: HashMap<NodeId, NodeIndex>,
    revision: ChangeId,
}

impl ScriptGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Change token of the graph as a whole. Replaced by every mutation,
    /// including mutable node access. Not serialized.
    pub fn revision(&self) -> ChangeId {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = ChangeId::new();
    }

    /// `name`, or `name` with the lowest free three digit suffix when another
    /// function call of the graph already uses it.
    pub fn unique_function_name(&self, name: &str) -> SmolStr {
        let taken: HashSet<&str> = self
            .nodes()
            .filter_map(Node::as_function_call)
            .map(|call| call.name.as_str())
            .collect();
        if !taken.contains(name) {
            return name.into();
        }
        (1u32..)
            .map(|n| SmolStr::from(format!("{name}{n:03}")))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| name.into())
    }

    /// Renames a function call node so its name is unique in the graph.
    pub(crate) fn uniquify_call_name(&self, node: &mut Node) {
        if let Some(call) = node.as_function_call_mut() {
            let name = self.unique_function_name(&call.name);
            if name != call.name {
                debug!(from = %call.name, to = %name, "renamed function call");
                call.name = name;
            }
        }
    }

    /// Whether the graph contains a node with this id.
    pub fn contains(&self, id: NodeId) -> bool {
        self.indices.contains_key(&id)
    }

    /// Iterates over all nodes in index order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.graph.node_indices().map(|ix| &self.graph[ix])
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.indices.get(&id).map(|&ix| &self.graph[ix])
    }

    /// Looks up a node for editing. Callers that change the node's content
    /// should call [`ScriptGraph::mark_changed`] afterwards.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let ix = *self.indices.get(&id)?;
        self.touch();
        self.graph.node_weight_mut(ix)
    }

    pub(crate) fn try_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::NodeNotFound { node: id })
    }

    pub(crate) fn try_node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.node_mut(id).ok_or(GraphError::NodeNotFound { node: id })
    }

    /// Looks up a function call node.
    pub fn function_call(&self, id: NodeId) -> Result<&FunctionCall, GraphError> {
        self.try_node(id)?
            .as_function_call()
            .ok_or(GraphError::UnexpectedNodeKind {
                node: id,
                expected: "function call",
            })
    }

    pub(crate) fn function_call_mut(&mut self, id: NodeId) -> Result<&mut FunctionCall, GraphError> {
        self.try_node_mut(id)?
            .as_function_call_mut()
            .ok_or(GraphError::UnexpectedNodeKind {
                node: id,
                expected: "function call",
            })
    }

    /// Adds a node.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        let id = node.id;
        if self.indices.contains_key(&id) {
            return Err(GraphError::DuplicateNode { node: id });
        }
        let ix = self.graph.add_node(node);
        self.indices.insert(id, ix);
        self.touch();
        Ok(id)
    }

    /// Removes a node and all of its links.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let ix = self.indices.remove(&id)?;
        self.touch();
        self.graph.remove_node(ix)
    }

    /// Links `from` into `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId, link: Link) -> Result<(), GraphError> {
        let a = self.index(from)?;
        let b = self.index(to)?;
        self.graph.add_edge(a, b, link);
        self.touch();
        Ok(())
    }

    /// Removes every link from `from` into `to` matching `pred`. Returns the
    /// number of removed links.
    pub fn disconnect_where(
        &mut self,
        from: NodeId,
        to: NodeId,
        pred: impl Fn(&Link) -> bool,
    ) -> Result<usize, GraphError> {
        let a = self.index(from)?;
        let b = self.index(to)?;
        let edges: Vec<_> = self
            .graph
            .edges_directed(a, Direction::Outgoing)
            .filter(|e| e.target() == b && pred(e.weight()))
            .map(|e| e.id())
            .collect();
        for e in &edges {
            self.graph.remove_edge(*e);
        }
        if !edges.is_empty() {
            self.touch();
        }
        Ok(edges.len())
    }

    /// Incoming links of a node as `(source, link)` pairs.
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Link)> + '_ {
        self.links(id, Direction::Incoming)
    }

    /// Outgoing links of a node as `(target, link)` pairs.
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Link)> + '_ {
        self.links(id, Direction::Outgoing)
    }

    fn links(&self, id: NodeId, dir: Direction) -> impl Iterator<Item = (NodeId, &Link)> + '_ {
        self.indices.get(&id).into_iter().flat_map(move |&ix| {
            self.graph.edges_directed(ix, dir).map(move |e| {
                let other = match dir {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                (self.graph[other].id, e.weight())
            })
        })
    }

    /// Every `(source, target, link)` triple.
    pub fn all_links(&self) -> impl Iterator<Item = (NodeId, NodeId, &Link)> + '_ {
        self.graph.edge_references().map(|e| {
            (
                self.graph[e.source()].id,
                self.graph[e.target()].id,
                e.weight(),
            )
        })
    }

    /// Replaces a node's change token with a fresh one.
    pub fn mark_changed(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id) {
            node.change_id = ChangeId::new();
        }
    }

    /// Overwrites a node's change token. Returns `false` if the node is
    /// missing.
    pub fn force_change_id(&mut self, id: NodeId, change_id: ChangeId) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.change_id = change_id;
                true
            }
            None => false,
        }
    }

    /// Change token of every node, keyed by node id.
    pub fn change_ids(&self) -> BTreeMap<NodeId, ChangeId> {
        self.nodes().map(|n| (n.id, n.change_id)).collect()
    }

    /// The output node of a stack.
    pub fn find_output(&self, usage: UsageKey) -> Option<NodeId> {
        self.nodes()
            .find(|n| matches!(n.op, NodeOp::Output { usage: u } if u == usage))
            .map(|n| n.id)
    }

    /// The input node of a stack.
    pub fn find_input(&self, usage: UsageKey) -> Option<NodeId> {
        self.nodes()
            .find(|n| matches!(n.op, NodeOp::Input { usage: u } if u == usage))
            .map(|n| n.id)
    }

    fn index(&self, id: NodeId) -> Result<NodeIndex, GraphError> {
        self.indices
            .get(&id)
            .copied()
            .ok_or(GraphError::NodeNotFound { node: id })
    }
}

impl PartialEq for ScriptGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.node_count() != other.node_count() {
            return false;
        }
        let nodes_match = self.nodes().all(|n| other.node(n.id) == Some(n));
        nodes_match && SerScriptGraph::from(self).links == SerScriptGraph::from(other).links
    }
}

/// Serialized form of a [`ScriptGraph`].
#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
struct SerScriptGraph {
    nodes: Vec<Node>,
    /// For each link: (source, target, link)
    links: Vec<(NodeId, NodeId, Link)>,
}

impl From<&ScriptGraph> for SerScriptGraph {
    fn from(graph: &ScriptGraph) -> Self {
        let nodes = graph.nodes().cloned().collect();
        let mut links: Vec<_> = graph
            .all_links()
            .map(|(a, b, l)| (a, b, l.clone()))
            .collect();
        links.sort_by(|x, y| (x.0, x.1, x.2.sort_key()).cmp(&(y.0, y.1, y.2.sort_key())));
        Self { nodes, links }
    }
}

impl TryFrom<SerScriptGraph> for ScriptGraph {
    type Error = GraphError;

    fn try_from(ser: SerScriptGraph) -> Result<Self, Self::Error> {
        let mut graph = ScriptGraph::new();
        for node in ser.nodes {
            graph.add_node(node)?;
        }
        for (a, b, link) in ser.links {
            graph.connect(a, b, link)?;
        }
        Ok(graph)
    }
}

impl serde::Serialize for ScriptGraph {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerScriptGraph::from(self).serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for ScriptGraph {
    fn deserialize<D>(deserializer: D) -> Result<ScriptGraph, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let ser = SerScriptGraph::deserialize(deserializer)?;
        ser.try_into().map_err(serde::de::Error::custom)
    }
}
