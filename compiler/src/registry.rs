// registry.rs — Op handler registry
//
// Maps an operation kind to its lowering routine. A `RegistryBuilder` is open
// for registration; every handler module contributes through its own
// `register` function. `build()` freezes the table into an `OpRegistry`,
// which the emitter consults once per call node.
//
// Preconditions: none.
// Postconditions: an `OpRegistry` never changes after construction.
// Failure modes: registering the same kind twice → `DuplicateHandler`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use crate::diag::{CodegenError, LowerError};
use crate::emit::Emitter;
use crate::graph::{Node, OpKind};
use crate::handlers;

/// Lowering routine for one operation kind. Reads the node's arguments
/// through the emitter, emits IR and binds the node's result(s).
pub type OpHandler = fn(&mut Emitter<'_>, &Node) -> Result<(), LowerError>;

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<OpKind, OpHandler>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op: &str, handler: OpHandler) -> Result<&mut Self, LowerError> {
        let op = OpKind::new(op);
        if self.handlers.contains_key(&op) {
            return Err(CodegenError::DuplicateHandler { op }.into());
        }
        self.handlers.insert(op, handler);
        Ok(self)
    }

    pub fn build(self) -> OpRegistry {
        OpRegistry {
            handlers: self.handlers,
        }
    }
}

/// Immutable dispatch table.
pub struct OpRegistry {
    handlers: HashMap<OpKind, OpHandler>,
}

impl OpRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry with every built-in handler module.
    pub fn standard() -> Result<Self, LowerError> {
        let mut builder = Self::builder();
        handlers::register_all(&mut builder)?;
        Ok(builder.build())
    }

    pub fn get(&self, op: &OpKind) -> Option<OpHandler> {
        self.handlers.get(op).copied()
    }

    pub fn contains(&self, op: &str) -> bool {
        self.handlers.contains_key(&OpKind::new(op))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&OpKind> {
        let mut kinds: Vec<&OpKind> = self.handlers.keys().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&OpKind> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("RegistryBuilder")
            .field("kinds", &kinds)
            .finish()
    }
}
