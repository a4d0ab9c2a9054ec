// emit.rs — Graph emitter (dispatcher)
//
// Walks a graph in declaration order and hands each call node to the handler
// registered for its op kind. Handlers lower into the output module at the
// bound signature's entry point and record results in the write-once binding
// table. An output node ends the walk; any trailing nodes are not emitted.
//
// State machine:
//   Idle --emit()--> Emitting --finish()--> Finished
//                 \-(error)--> Failed
// `emit` is legal only from Idle, `finish` only from Emitting.
//
// Subgraphs share the binding table and signature. Their free variables are
// substituted positionally from the capture list before the subgraph body is
// emitted; capture arity is checked before any substitution happens.
//
// Preconditions: the trace has been validated; the registry is complete.
// Postconditions: after `finish`, the kernel function ends with `return`.
// Failure modes: every handler error is wrapped with the originating node.
// Side effects: appends instructions through the module builder.

use std::fmt;

use tracing::{debug, trace};

use crate::binding::BindingTable;
use crate::builder::{InsertionPoint, ModuleBuilder};
use crate::diag::{CodegenError, LowerError, Site, ValidationError};
use crate::graph::{Arg, Node, NodeAttrs, NodeKind, OpKind, Trace};
use crate::id::{GraphId, NodeId};
use crate::indexing::{IndexExpr, IndexingContext};
use crate::lir::{MemRefType, Value};
use crate::registry::OpRegistry;
use crate::signature::{BoundSignature, Ref};

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitOptions {
    /// Vector tile moved by one `read`.
    pub tile_shape: Vec<i64>,
    pub max_subgraph_depth: usize,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            tile_shape: vec![16, 16],
            max_subgraph_depth: 16,
        }
    }
}

/// Start offsets of a buffer access, one expression per buffer dimension.
pub trait StartOffsets: fmt::Debug {
    fn start_offsets(&self, node: &Node, buffer: &MemRefType) -> Vec<IndexExpr>;
}

/// Every access starts at the buffer origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroOffsets;

impl StartOffsets for ZeroOffsets {
    fn start_offsets(&self, _node: &Node, buffer: &MemRefType) -> Vec<IndexExpr> {
        vec![IndexExpr::Const(0); buffer.rank()]
    }
}

/// The same caller-supplied offsets for every access.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedOffsets(pub Vec<IndexExpr>);

impl StartOffsets for FixedOffsets {
    fn start_offsets(&self, _node: &Node, _buffer: &MemRefType) -> Vec<IndexExpr> {
        self.0.clone()
    }
}

// ── Emitter ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Emitting,
    Finished,
    Failed,
}

impl EmitterState {
    pub fn name(self) -> &'static str {
        match self {
            EmitterState::Idle => "idle",
            EmitterState::Emitting => "emitting",
            EmitterState::Finished => "finished",
            EmitterState::Failed => "failed",
        }
    }
}

pub(crate) fn site_of(node: &Node) -> Site {
    let op = match &node.kind {
        NodeKind::Call { target, .. } => target.clone(),
        NodeKind::Output { .. } => OpKind::new("output"),
        NodeKind::Placeholder { .. } => OpKind::new("placeholder"),
        NodeKind::FreeVar => OpKind::new("free_var"),
    };
    Site {
        node: node.id,
        name: node.name.clone(),
        op,
    }
}

pub struct Emitter<'a> {
    trace: &'a Trace,
    signature: &'a mut BoundSignature,
    builder: &'a mut ModuleBuilder,
    registry: &'a OpRegistry,
    idxc: &'a IndexingContext,
    options: EmitOptions,
    offsets: Box<dyn StartOffsets>,
    bindings: BindingTable,
    state: EmitterState,
    depth: usize,
    dispatched: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(
        trace: &'a Trace,
        signature: &'a mut BoundSignature,
        builder: &'a mut ModuleBuilder,
        registry: &'a OpRegistry,
        idxc: &'a IndexingContext,
    ) -> Self {
        Emitter {
            trace,
            signature,
            builder,
            registry,
            idxc,
            options: EmitOptions::default(),
            offsets: Box::new(ZeroOffsets),
            bindings: BindingTable::with_capacity(trace.node_count()),
            state: EmitterState::Idle,
            depth: 0,
            dispatched: 0,
        }
    }

    pub fn with_options(mut self, options: EmitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_offsets(mut self, offsets: impl StartOffsets + 'static) -> Self {
        self.offsets = Box::new(offsets);
        self
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    pub fn trace(&self) -> &'a Trace {
        self.trace
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    pub fn idxc(&self) -> &'a IndexingContext {
        self.idxc
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn builder(&mut self) -> &mut ModuleBuilder {
        &mut *self.builder
    }

    pub fn signature(&mut self) -> &mut BoundSignature {
        &mut *self.signature
    }

    /// Insertion point of the kernel body.
    pub fn entry(&self) -> InsertionPoint {
        self.signature.entry()
    }

    /// Number of call nodes handed to a handler so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn start_offsets(&self, node: &Node, buffer: &MemRefType) -> Vec<IndexExpr> {
        self.offsets.start_offsets(node, buffer)
    }

    /// Emit the root graph. Returns the arguments of its output node, if any.
    pub fn emit(&mut self) -> Result<Option<&'a [Arg]>, LowerError> {
        if self.state != EmitterState::Idle {
            return Err(self.state_error("emit"));
        }
        self.state = EmitterState::Emitting;
        let root = self.trace.root();
        debug!(graph = %root, "emit");
        match self.emit_graph(root) {
            Ok(out) => Ok(out),
            Err(e) => {
                self.state = EmitterState::Failed;
                Err(e)
            }
        }
    }

    /// Append the terminating `return` at the entry point.
    pub fn finish(&mut self) -> Result<(), LowerError> {
        if self.state != EmitterState::Emitting {
            return Err(self.state_error("finish"));
        }
        let entry = self.entry();
        self.builder.ret(entry);
        self.state = EmitterState::Finished;
        debug!(
            dispatched = self.dispatched,
            bound = self.bindings.len(),
            "emission finished"
        );
        Ok(())
    }

    fn state_error(&self, operation: &'static str) -> LowerError {
        CodegenError::InvalidEmitterState {
            operation,
            state: self.state.name(),
        }
        .into()
    }

    fn emit_graph(&mut self, graph: GraphId) -> Result<Option<&'a [Arg]>, LowerError> {
        let trace = self.trace;
        let g = trace
            .graph(graph)
            .ok_or_else(|| CodegenError::UnknownReference(format!("graph {graph}")))?;
        for &id in &g.nodes {
            let node = trace
                .node(id)
                .ok_or_else(|| CodegenError::UnknownReference(format!("node {id}")))?;
            match &node.kind {
                NodeKind::Call { .. } => self.dispatch(node)?,
                NodeKind::Output { args } => {
                    trace!(graph = %graph, node = %id, "output reached");
                    return Ok(Some(args.as_slice()));
                }
                NodeKind::Placeholder { .. } | NodeKind::FreeVar => {}
            }
        }
        Ok(None)
    }

    fn dispatch(&mut self, node: &Node) -> Result<(), LowerError> {
        let Some(target) = node.target() else {
            return Ok(());
        };
        let handler = self
            .registry
            .get(target)
            .ok_or_else(|| LowerError::from(CodegenError::UnregisteredOp { op: target.clone() }))
            .map_err(|e| e.at(site_of(node)))?;
        debug!(node = %node.id, name = %node.name, op = %target, "dispatch");
        self.dispatched += 1;
        handler(self, node).map_err(|e| e.at(site_of(node)))
    }

    /// Emit `graph` with its free variables substituted from `captures`.
    /// Returns the values of the subgraph's output, flattened in order.
    pub fn emit_subgraph(
        &mut self,
        graph: GraphId,
        captures: &[Arg],
    ) -> Result<Vec<Value>, LowerError> {
        let trace = self.trace;
        let sub = trace
            .graph(graph)
            .ok_or_else(|| CodegenError::UnknownReference(format!("graph {graph}")))?;
        if sub.free_vars.len() != captures.len() {
            return Err(CodegenError::FreeVarArity {
                graph,
                expected: sub.free_vars.len(),
                actual: captures.len(),
            }
            .into());
        }
        if self.depth >= self.options.max_subgraph_depth {
            return Err(CodegenError::SubgraphDepthExceeded {
                limit: self.options.max_subgraph_depth,
            }
            .into());
        }

        let mut resolved = Vec::with_capacity(captures.len());
        for (position, capture) in captures.iter().enumerate() {
            match capture {
                Arg::Node(id) => {
                    resolved.push((self.lookup_node_values(*id)?, self.node_attrs(*id)));
                }
                other => {
                    return Err(ValidationError::ArgumentKind {
                        position,
                        expected: "captured node",
                        found: other.kind_name().to_string(),
                    }
                    .into())
                }
            }
        }
        for (&fv, (values, attrs)) in sub.free_vars.iter().zip(resolved) {
            self.bindings.substitute(fv, values, Some(attrs));
        }

        debug!(graph = %graph, captures = captures.len(), depth = self.depth + 1, "enter subgraph");
        self.depth += 1;
        let out = self.emit_graph(graph);
        self.depth -= 1;

        let mut values = Vec::new();
        if let Some(args) = out? {
            for arg in args {
                self.collect_values(arg, &mut values)?;
            }
        }
        Ok(values)
    }

    fn collect_values(&mut self, arg: &Arg, out: &mut Vec<Value>) -> Result<(), LowerError> {
        match arg {
            Arg::Node(id) => out.extend(self.lookup_node_values(*id)?),
            Arg::Tuple(items) => {
                for item in items {
                    self.collect_values(item, out)?;
                }
            }
            other => {
                return Err(CodegenError::TypeMismatch {
                    expected: "node result".to_string(),
                    found: other.kind_name().to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    /// Values bound to `node`. Unbound kernel placeholders are resolved
    /// through the signature and bound on first use.
    pub fn lookup_node_values(&mut self, node: NodeId) -> Result<Vec<Value>, LowerError> {
        if let Some(values) = self.bindings.values(node) {
            return Ok(values.to_vec());
        }
        let value = self.signature.resolve_by_reference(Ref::Node(node))?;
        self.bindings.bind(node, vec![value], None)?;
        Ok(vec![value])
    }

    /// The single value bound to `node`.
    pub fn lookup_node_value(&mut self, node: NodeId) -> Result<Value, LowerError> {
        let values = self.lookup_node_values(node)?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(CodegenError::MultipleValues {
                node,
                count: values.len(),
            }
            .into()),
        }
    }

    pub fn bind_node_value(&mut self, node: NodeId, value: Value) -> Result<(), LowerError> {
        self.bind_node_values(node, vec![value], None)
    }

    pub fn bind_node_values(
        &mut self,
        node: NodeId,
        values: Vec<Value>,
        attrs: Option<NodeAttrs>,
    ) -> Result<(), LowerError> {
        trace!(node = %node, count = values.len(), "bind");
        self.bindings.bind(node, values, attrs)
    }

    /// Attributes recorded with `node`'s binding, else its traced attributes.
    pub fn node_attrs(&self, node: NodeId) -> NodeAttrs {
        self.bindings
            .get(node)
            .and_then(|b| b.attrs)
            .or_else(|| self.trace.node(node).map(|n| n.attrs))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Emitter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("offsets", &self.offsets)
            .field("bound", &self.bindings.len())
            .field("depth", &self.depth)
            .finish()
    }
}
