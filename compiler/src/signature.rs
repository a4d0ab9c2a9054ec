// signature.rs — Kernel signature derivation and binding
//
// `KernelSignature` collects the root graph's placeholders (in declaration
// order) and the symbolic grid descriptor. `bind` resolves both through the
// active indexing context, creates the kernel function in the output module
// and returns a `BoundSignature` positioned at the function entry.
//
// Parameter order: one memref per placeholder, then one `index` per grid
// dimension (`grid0`, `grid1`, ...).
//
// Preconditions: placeholder shapes and grid sizes only name bound symbols.
// Postconditions: `resolve_by_reference` returns the same `Value` for the
//                 same element on every call.
// Failure modes: unbound symbols → `UnboundSymbolError`; the grid is
//                resolved before any placeholder shape or IR is produced.
// Side effects: adds one function to the module builder.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::builder::{InsertionPoint, ModuleBuilder};
use crate::diag::{CodegenError, LowerError};
use crate::graph::{BufferType, NodeKind, Trace};
use crate::id::NodeId;
use crate::indexing::{IndexExpr, IndexingContext};
use crate::lir::{ElementType, IrType, MemRefType, Value};

/// A graph element that maps onto a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ref {
    /// A placeholder node, by ID.
    Node(NodeId),
    /// The i-th placeholder in declaration order.
    Placeholder(usize),
    /// The i-th grid dimension.
    Grid(usize),
}

/// A kernel buffer input, before symbol resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferParam {
    pub node: NodeId,
    pub name: String,
    pub buffer: BufferType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelSignature {
    buffers: Vec<BufferParam>,
    grid: Vec<IndexExpr>,
}

impl KernelSignature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature of `trace` launched over `grid`. The trace should have
    /// passed `Trace::validate`; dangling placeholder ids are skipped.
    pub fn from_trace(trace: &Trace, grid: Vec<IndexExpr>) -> Self {
        let mut sig = Self::new();
        sig.add_from_graph_placeholders(trace);
        sig.add_grid(grid);
        sig
    }

    pub fn add_from_graph_placeholders(&mut self, trace: &Trace) {
        for node in trace.placeholders() {
            if let NodeKind::Placeholder { buffer } = &node.kind {
                self.buffers.push(BufferParam {
                    node: node.id,
                    name: node.name.clone(),
                    buffer: buffer.clone(),
                });
            }
        }
    }

    pub fn add_grid(&mut self, grid: Vec<IndexExpr>) {
        self.grid.extend(grid);
    }

    pub fn buffers(&self) -> &[BufferParam] {
        &self.buffers
    }

    pub fn grid(&self) -> &[IndexExpr] {
        &self.grid
    }

    /// Resolve the signature and create the kernel function `name`.
    pub fn bind(
        &self,
        builder: &mut ModuleBuilder,
        name: &str,
        idxc: &IndexingContext,
    ) -> Result<BoundSignature, LowerError> {
        let grid = idxc.eval_all(&self.grid)?;

        let mut params = Vec::with_capacity(self.buffers.len() + grid.len());
        for param in &self.buffers {
            let shape =
                CodegenError::positive_shape("buffer", idxc.eval_all(&param.buffer.shape)?)?;
            params.push((
                param.name.clone(),
                IrType::MemRef(MemRefType {
                    shape,
                    element: param.buffer.element,
                }),
            ));
        }
        for i in 0..grid.len() {
            params.push((format!("grid{i}"), IrType::Scalar(ElementType::Index)));
        }

        let (entry, values) = builder.add_function(name, params, grid.clone());
        debug!(
            kernel = name,
            buffers = self.buffers.len(),
            grid = ?grid,
            "signature bound"
        );
        Ok(BoundSignature {
            entry,
            placeholders: self.buffers.iter().map(|p| p.node).collect(),
            params: values,
            grid,
            cache: HashMap::new(),
        })
    }
}

/// A signature with a concrete entry point and memoized element resolution.
#[derive(Debug)]
pub struct BoundSignature {
    entry: InsertionPoint,
    placeholders: Vec<NodeId>,
    /// Function parameter values: buffers first, then grid dimensions.
    params: Vec<Value>,
    grid: Vec<i64>,
    cache: HashMap<Ref, Value>,
}

impl BoundSignature {
    pub fn entry(&self) -> InsertionPoint {
        self.entry
    }

    pub fn grid(&self) -> &[i64] {
        &self.grid
    }

    pub fn placeholder_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Number of memoized resolutions so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Map a graph element to its kernel parameter, memoizing the result.
    pub fn resolve_by_reference(&mut self, reference: Ref) -> Result<Value, LowerError> {
        if let Some(&value) = self.cache.get(&reference) {
            return Ok(value);
        }
        let value = match reference {
            Ref::Node(node) => {
                let index = self
                    .placeholders
                    .iter()
                    .position(|&p| p == node)
                    .ok_or(CodegenError::UnresolvedNode { node })?;
                self.params[index]
            }
            Ref::Placeholder(index) => *self
                .params
                .get(index)
                .filter(|_| index < self.placeholders.len())
                .ok_or_else(|| CodegenError::UnknownReference(format!("placeholder #{index}")))?,
            Ref::Grid(dim) => *self
                .params
                .get(self.placeholders.len() + dim)
                .ok_or_else(|| CodegenError::UnknownReference(format!("grid dimension {dim}")))?,
        };
        trace!(?reference, %value, "resolved");
        self.cache.insert(reference, value);
        Ok(value)
    }
}
