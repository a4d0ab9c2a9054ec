// binding.rs — Write-once node → value(s) table
//
// Dense, `NodeId`-indexed storage for the values each node lowered to. A node
// is bound at most once; a second `bind` is a codegen error. Free variables
// are the exception: each subgraph invocation substitutes them afresh.

use crate::diag::{CodegenError, LowerError};
use crate::graph::NodeAttrs;
use crate::id::NodeId;
use crate::lir::Value;

/// The value(s) a node lowered to, plus the attributes recorded with them.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub values: Vec<Value>,
    pub attrs: Option<NodeAttrs>,
}

#[derive(Debug, Default)]
pub struct BindingTable {
    slots: Vec<Option<Binding>>,
    bound: usize,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nodes: usize) -> Self {
        BindingTable {
            slots: vec![None; nodes],
            bound: 0,
        }
    }

    fn slot_mut(&mut self, node: NodeId) -> &mut Option<Binding> {
        let i = node.index();
        if i >= self.slots.len() {
            self.slots.resize(i + 1, None);
        }
        &mut self.slots[i]
    }

    /// Record `node`'s values. Fails if the node is already bound.
    pub fn bind(
        &mut self,
        node: NodeId,
        values: Vec<Value>,
        attrs: Option<NodeAttrs>,
    ) -> Result<(), LowerError> {
        let slot = self.slot_mut(node);
        if slot.is_some() {
            return Err(CodegenError::AlreadyBound { node }.into());
        }
        *slot = Some(Binding { values, attrs });
        self.bound += 1;
        Ok(())
    }

    /// Set a free variable's values for the current subgraph invocation,
    /// replacing any previous substitution.
    pub fn substitute(&mut self, node: NodeId, values: Vec<Value>, attrs: Option<NodeAttrs>) {
        if !self.is_bound(node) {
            self.bound += 1;
        }
        *self.slot_mut(node) = Some(Binding { values, attrs });
    }

    pub fn get(&self, node: NodeId) -> Option<&Binding> {
        self.slots.get(node.index()).and_then(|s| s.as_ref())
    }

    pub fn values(&self, node: NodeId) -> Option<&[Value]> {
        self.get(node).map(|b| b.values.as_slice())
    }

    pub fn is_bound(&self, node: NodeId) -> bool {
        self.get(node).is_some()
    }

    /// Number of bound nodes.
    pub fn len(&self) -> usize {
        self.bound
    }

    pub fn is_empty(&self) -> bool {
        self.bound == 0
    }
}
