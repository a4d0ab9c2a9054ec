// graph.rs — Traced graph model
//
// A `Trace` is an arena of nodes and graphs produced by an external tracer.
// Every node has a stable `NodeId` (its arena index) assigned at construction;
// every graph lists its nodes in emission order. Subgraphs declare an ordered
// list of free variables that are substituted positionally from the enclosing
// scope's capture list when the subgraph is emitted.
//
// Scoping is explicit: a node argument may reference only earlier nodes of the
// same graph or that graph's free variables. Values from an enclosing graph
// reach a subgraph through capture.
//
// Preconditions: none.
// Postconditions: `TraceBuilder::finish` / `Trace::validate` accept only
//                 well-scoped, well-formed traces.
// Failure modes: structural problems → `ValidationError::Graph`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diag::ValidationError;
use crate::id::{GraphId, IdAllocator, NodeId};
use crate::indexing::IndexExpr;
use crate::lir::ElementType;

// ── Op kinds ────────────────────────────────────────────────────────────────

/// Identifier of an operation kind (the dispatch key of the handler registry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpKind(String);

impl OpKind {
    pub fn new(name: impl Into<String>) -> Self {
        OpKind(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Op kinds with built-in handlers.
pub mod ops {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const REGISTER: &str = "register";
    pub const MMA: &str = "mma";
    pub const REGION: &str = "region";
    pub const GETITEM: &str = "getitem";
    /// Generic function-call passthrough; has no lowering.
    pub const CALL: &str = "call";
}

// ── Arguments ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// One positional argument of a call or output node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    /// Reference to a node (including a free variable of the current graph).
    Node(NodeId),
    Lit(Literal),
    Index(IndexExpr),
    Dtype(ElementType),
    /// Reference to a child subgraph.
    Graph(GraphId),
    Tuple(Vec<Arg>),
}

impl Arg {
    /// Short description of the argument's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Arg::Node(_) => "node",
            Arg::Lit(Literal::Int(_)) => "int literal",
            Arg::Lit(Literal::Float(_)) => "float literal",
            Arg::Lit(Literal::Bool(_)) => "bool literal",
            Arg::Index(_) => "index expression",
            Arg::Dtype(_) => "dtype",
            Arg::Graph(_) => "subgraph",
            Arg::Tuple(_) => "tuple",
        }
    }

    fn visit_refs(&self, f: &mut impl FnMut(&Arg)) {
        match self {
            Arg::Tuple(items) => items.iter().for_each(|a| a.visit_refs(f)),
            Arg::Node(_) | Arg::Graph(_) => f(self),
            _ => {}
        }
    }
}

// ── Nodes and graphs ────────────────────────────────────────────────────────

/// Declared type of a kernel buffer placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferType {
    pub shape: Vec<IndexExpr>,
    pub element: ElementType,
}

impl BufferType {
    pub fn new(shape: Vec<IndexExpr>, element: ElementType) -> Self {
        BufferType { shape, element }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KernelBuffer[")?;
        for dim in &self.shape {
            write!(f, "{dim}, ")?;
        }
        write!(f, "{}]", self.element)
    }
}

/// Per-node metadata. Integers are signed unless marked otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttrs {
    #[serde(default)]
    pub unsigned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeKind {
    /// External kernel input (root graph only).
    Placeholder { buffer: BufferType },
    /// Subgraph input substituted from the enclosing capture list.
    FreeVar,
    Call { target: OpKind, args: Vec<Arg> },
    Output { args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub graph: GraphId,
    pub kind: NodeKind,
    #[serde(default)]
    pub attrs: NodeAttrs,
}

impl Node {
    pub fn args(&self) -> &[Arg] {
        match &self.kind {
            NodeKind::Call { args, .. } | NodeKind::Output { args } => args,
            NodeKind::Placeholder { .. } | NodeKind::FreeVar => &[],
        }
    }

    pub fn target(&self) -> Option<&OpKind> {
        match &self.kind {
            NodeKind::Call { target, .. } => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: GraphId,
    pub parent: Option<GraphId>,
    /// Nodes in emission order.
    pub nodes: Vec<NodeId>,
    /// Ordered free variables (subgraphs only).
    #[serde(default)]
    pub free_vars: Vec<NodeId>,
}

/// A traced computation: node and graph arenas plus the root graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    nodes: Vec<Node>,
    graphs: Vec<Graph>,
    root: GraphId,
}

impl Trace {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn graph(&self, id: GraphId) -> Option<&Graph> {
        self.graphs.get(id.index())
    }

    pub fn root(&self) -> GraphId {
        self.root
    }

    /// `None` only for a trace that fails `validate`.
    pub fn root_graph(&self) -> Option<&Graph> {
        self.graph(self.root)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Root-graph placeholders in declaration order. Dangling ids in an
    /// unvalidated trace are skipped.
    pub fn placeholders(&self) -> impl Iterator<Item = &Node> + '_ {
        self.root_graph()
            .into_iter()
            .flat_map(|g| g.nodes.iter())
            .filter_map(|id| self.node(*id))
            .filter(|n| matches!(n.kind, NodeKind::Placeholder { .. }))
    }

    /// Check arena density, graph membership and argument scoping.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: String| Err(ValidationError::Graph(msg));

        for (i, node) in self.nodes.iter().enumerate() {
            if node.id != NodeId(i as u32) {
                return invalid(format!("node at index {} has id {}", i, node.id));
            }
        }
        for (i, graph) in self.graphs.iter().enumerate() {
            if graph.id != GraphId(i as u32) {
                return invalid(format!("graph at index {} has id {}", i, graph.id));
            }
        }
        let root = match self.graph(self.root) {
            Some(g) => g,
            None => return invalid(format!("root graph {} does not exist", self.root)),
        };
        if root.parent.is_some() {
            return invalid(format!("root graph {} has a parent", self.root));
        }
        if !root.free_vars.is_empty() {
            return invalid(format!("root graph {} declares free variables", self.root));
        }

        // Every node is listed exactly once, in the graph it names.
        let mut owner: HashMap<NodeId, GraphId> = HashMap::new();
        for graph in &self.graphs {
            if graph.id != self.root {
                match graph.parent.and_then(|p| self.graph(p)) {
                    Some(_) => {}
                    None => return invalid(format!("subgraph {} has no valid parent", graph.id)),
                }
            }
            for &id in graph.free_vars.iter().chain(graph.nodes.iter()) {
                let node = match self.node(id) {
                    Some(n) => n,
                    None => return invalid(format!("{} lists unknown node {}", graph.id, id)),
                };
                if node.graph != graph.id {
                    return invalid(format!(
                        "node {} belongs to {} but is listed in {}",
                        id, node.graph, graph.id
                    ));
                }
                if owner.insert(id, graph.id).is_some() {
                    return invalid(format!("node {} is listed more than once", id));
                }
            }
            for &id in &graph.free_vars {
                if !matches!(self.nodes[id.index()].kind, NodeKind::FreeVar) {
                    return invalid(format!("free variable {} of {} is not a free_var node", id, graph.id));
                }
            }
        }
        for node in &self.nodes {
            if !owner.contains_key(&node.id) {
                return invalid(format!("node {} is not listed in any graph", node.id));
            }
            match &node.kind {
                NodeKind::Placeholder { .. } if node.graph != self.root => {
                    return invalid(format!("placeholder {} outside the root graph", node.id));
                }
                NodeKind::FreeVar if !self.graphs[node.graph.index()].free_vars.contains(&node.id) => {
                    return invalid(format!("free variable {} not declared by its graph", node.id));
                }
                _ => {}
            }
        }

        // Arguments reference earlier nodes of the same graph, its free
        // variables, or its child subgraphs.
        for graph in &self.graphs {
            let mut visible: Vec<NodeId> = graph.free_vars.clone();
            for &id in &graph.nodes {
                let node = &self.nodes[id.index()];
                let mut error = None;
                for arg in node.args() {
                    arg.visit_refs(&mut |r| {
                        if error.is_some() {
                            return;
                        }
                        match r {
                            Arg::Node(target) if !visible.contains(target) => {
                                error = Some(format!(
                                    "node {} '{}' references {} which is not in scope",
                                    node.id, node.name, target
                                ));
                            }
                            Arg::Graph(g) => match self.graph(*g) {
                                Some(sub) if sub.parent == Some(graph.id) => {}
                                _ => {
                                    error = Some(format!(
                                        "node {} '{}' references {} which is not a child of {}",
                                        node.id, node.name, g, graph.id
                                    ));
                                }
                            },
                            _ => {}
                        }
                    });
                }
                if let Some(msg) = error {
                    return invalid(msg);
                }
                visible.push(id);
            }
        }
        Ok(())
    }

    fn fmt_arg(&self, f: &mut fmt::Formatter<'_>, arg: &Arg) -> fmt::Result {
        match arg {
            Arg::Node(id) => match self.node(*id) {
                Some(n) => write!(f, "%{}", n.name),
                None => write!(f, "{id}"),
            },
            Arg::Lit(lit) => write!(f, "{lit}"),
            Arg::Index(e) => write!(f, "[{e}]"),
            Arg::Dtype(t) => write!(f, "{t}"),
            Arg::Graph(g) => write!(f, "{g}"),
            Arg::Tuple(items) => {
                f.write_str("(")?;
                for (i, a) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.fmt_arg(f, a)?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }

    fn fmt_args(&self, f: &mut fmt::Formatter<'_>, args: &[Arg]) -> fmt::Result {
        for (i, a) in args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            self.fmt_arg(f, a)?;
        }
        Ok(())
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for graph in &self.graphs {
            write!(f, "graph {}", graph.id)?;
            if let Some(parent) = graph.parent {
                write!(f, " (parent {parent})")?;
            }
            if !graph.free_vars.is_empty() {
                f.write_str(" freevars(")?;
                for (i, id) in graph.free_vars.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "%{}", self.nodes[id.index()].name)?;
                }
                f.write_str(")")?;
            }
            writeln!(f, ":")?;
            for id in &graph.nodes {
                let node = &self.nodes[id.index()];
                match &node.kind {
                    NodeKind::Placeholder { buffer } => {
                        writeln!(f, "  %{} : {} = placeholder", node.name, buffer)?;
                    }
                    NodeKind::FreeVar => writeln!(f, "  %{} = free_var", node.name)?,
                    NodeKind::Call { target, args } => {
                        write!(f, "  %{} = {}(", node.name, target)?;
                        self.fmt_args(f, args)?;
                        f.write_str(")")?;
                        if node.attrs.unsigned {
                            f.write_str(" {unsigned}")?;
                        }
                        writeln!(f)?;
                    }
                    NodeKind::Output { args } => {
                        f.write_str("  return (")?;
                        self.fmt_args(f, args)?;
                        writeln!(f, ")")?;
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Assembles a `Trace`, assigning IDs in construction order.
#[derive(Debug)]
pub struct TraceBuilder {
    ids: IdAllocator,
    nodes: Vec<Node>,
    graphs: Vec<Graph>,
    root: GraphId,
    name_counts: HashMap<String, usize>,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        let mut ids = IdAllocator::new();
        let root = ids.alloc_graph();
        TraceBuilder {
            ids,
            nodes: Vec::new(),
            graphs: vec![Graph {
                id: root,
                parent: None,
                nodes: Vec::new(),
                free_vars: Vec::new(),
            }],
            root,
            name_counts: HashMap::new(),
        }
    }

    pub fn root(&self) -> GraphId {
        self.root
    }

    /// Create an empty subgraph nested under `parent`.
    pub fn subgraph(&mut self, parent: GraphId) -> GraphId {
        let id = self.ids.alloc_graph();
        self.graphs.push(Graph {
            id,
            parent: Some(parent),
            nodes: Vec::new(),
            free_vars: Vec::new(),
        });
        id
    }

    /// Unique node name: `base`, then `base_1`, `base_2`, ...
    fn unique_name(&mut self, base: &str) -> String {
        let count = self.name_counts.entry(base.to_string()).or_insert(0);
        let name = if *count == 0 {
            base.to_string()
        } else {
            format!("{base}_{count}")
        };
        *count += 1;
        name
    }

    fn add_node(&mut self, graph: GraphId, base: &str, kind: NodeKind, free_var: bool) -> NodeId {
        let id = self.ids.alloc_node();
        let name = self.unique_name(base);
        self.nodes.push(Node {
            id,
            name,
            graph,
            kind,
            attrs: NodeAttrs::default(),
        });
        // Unknown graphs are caught by `finish`: the node is left unlisted.
        if let Some(g) = self.graphs.get_mut(graph.index()) {
            if free_var {
                g.free_vars.push(id);
            } else {
                g.nodes.push(id);
            }
        }
        id
    }

    pub fn placeholder(&mut self, name: &str, buffer: BufferType) -> NodeId {
        let root = self.root;
        self.add_node(root, name, NodeKind::Placeholder { buffer }, false)
    }

    pub fn free_var(&mut self, graph: GraphId, name: &str) -> NodeId {
        self.add_node(graph, name, NodeKind::FreeVar, true)
    }

    pub fn call(&mut self, graph: GraphId, target: &str, args: Vec<Arg>) -> NodeId {
        self.add_node(
            graph,
            target,
            NodeKind::Call {
                target: OpKind::new(target),
                args,
            },
            false,
        )
    }

    pub fn output(&mut self, graph: GraphId, args: Vec<Arg>) -> NodeId {
        self.add_node(graph, "output", NodeKind::Output { args }, false)
    }

    pub fn set_attrs(&mut self, node: NodeId, attrs: NodeAttrs) {
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.attrs = attrs;
        }
    }

    pub fn finish(self) -> Result<Trace, ValidationError> {
        let trace = Trace {
            nodes: self.nodes,
            graphs: self.graphs,
            root: self.root,
        };
        trace.validate()?;
        Ok(trace)
    }
}
