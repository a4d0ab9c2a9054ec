// handlers — Per-op-kind lowering routines
//
// Each submodule exposes `register`, which adds its handlers to a registry
// builder. Argument accessors below turn a malformed argument list into a
// `ValidationError` before any IR is emitted.

pub mod control;
pub mod convert;
pub mod math;
pub mod memory;

use crate::diag::{LowerError, ValidationError};
use crate::emit::Emitter;
use crate::graph::{Arg, Literal, Node};
use crate::id::{GraphId, NodeId};
use crate::lir::ElementType;
use crate::registry::RegistryBuilder;

/// Register every built-in handler.
pub fn register_all(builder: &mut RegistryBuilder) -> Result<(), LowerError> {
    memory::register(builder)?;
    math::register(builder)?;
    control::register(builder)?;
    Ok(())
}

// ── Argument accessors ──────────────────────────────────────────────────────

pub(crate) fn expect_args(node: &Node, expected: usize) -> Result<&[Arg], ValidationError> {
    let args = node.args();
    if args.len() != expected {
        return Err(ValidationError::Arity {
            expected,
            actual: args.len(),
        });
    }
    Ok(args)
}

fn wrong_kind(position: usize, expected: &'static str, found: &Arg) -> ValidationError {
    ValidationError::ArgumentKind {
        position,
        expected,
        found: found.kind_name().to_string(),
    }
}

pub(crate) fn node_arg(args: &[Arg], position: usize) -> Result<NodeId, ValidationError> {
    match &args[position] {
        Arg::Node(id) => Ok(*id),
        other => Err(wrong_kind(position, "node", other)),
    }
}

pub(crate) fn graph_arg(args: &[Arg], position: usize) -> Result<GraphId, ValidationError> {
    match &args[position] {
        Arg::Graph(id) => Ok(*id),
        other => Err(wrong_kind(position, "subgraph", other)),
    }
}

pub(crate) fn tuple_arg(args: &[Arg], position: usize) -> Result<&[Arg], ValidationError> {
    match &args[position] {
        Arg::Tuple(items) => Ok(items),
        other => Err(wrong_kind(position, "tuple", other)),
    }
}

pub(crate) fn dtype_arg(args: &[Arg], position: usize) -> Result<ElementType, ValidationError> {
    match &args[position] {
        Arg::Dtype(ty) => Ok(*ty),
        other => Err(wrong_kind(position, "dtype", other)),
    }
}

pub(crate) fn literal_arg(args: &[Arg], position: usize) -> Result<Literal, ValidationError> {
    match &args[position] {
        Arg::Lit(lit) => Ok(*lit),
        other => Err(wrong_kind(position, "literal", other)),
    }
}

/// An integer argument: an int literal or an index expression evaluated
/// under the emitter's indexing context.
pub(crate) fn index_arg(em: &Emitter<'_>, arg: &Arg, position: usize) -> Result<i64, LowerError> {
    match arg {
        Arg::Lit(Literal::Int(v)) => Ok(*v),
        Arg::Index(expr) => em.idxc().eval(expr),
        other => Err(wrong_kind(position, "integer", other).into()),
    }
}

/// The elements-per-thread hint of `read`/`write`; must be positive.
pub(crate) fn elements_per_thread(
    em: &Emitter<'_>,
    args: &[Arg],
    position: usize,
) -> Result<i64, LowerError> {
    let value = index_arg(em, &args[position], position)?;
    if value <= 0 {
        return Err(ValidationError::ArgumentKind {
            position,
            expected: "positive elements-per-thread",
            found: value.to_string(),
        }
        .into());
    }
    Ok(value)
}
