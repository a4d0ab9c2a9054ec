// control.rs — Subgraph invocation and multi-result projection
//
//   region(subgraph, captures)   emit the subgraph with its free variables
//                                bound to `captures`; the node is bound to
//                                the subgraph's output values, in order
//   getitem(node, index)         the index-th value of a multi-result node
//   call(...)                    generic call passthrough; has no lowering

use crate::diag::{CodegenError, LowerError, ValidationError};
use crate::emit::Emitter;
use crate::graph::{ops, Arg, Literal, Node, OpKind};
use crate::handlers::{expect_args, graph_arg, node_arg, tuple_arg};
use crate::registry::RegistryBuilder;

pub fn register(builder: &mut RegistryBuilder) -> Result<(), LowerError> {
    builder.register(ops::REGION, handle_region)?;
    builder.register(ops::GETITEM, handle_getitem)?;
    builder.register(ops::CALL, handle_call)?;
    Ok(())
}

fn handle_region(em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let args = expect_args(node, 2)?;
    let graph = graph_arg(args, 0)?;
    let captures = tuple_arg(args, 1)?;
    let values = em.emit_subgraph(graph, captures)?;
    em.bind_node_values(node.id, values, None)
}

fn handle_getitem(em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let args = expect_args(node, 2)?;
    let source = node_arg(args, 0)?;
    let index = match &args[1] {
        Arg::Lit(Literal::Int(i)) => *i,
        other => {
            return Err(ValidationError::ArgumentKind {
                position: 1,
                expected: "int literal",
                found: other.kind_name().to_string(),
            }
            .into())
        }
    };
    let values = em.lookup_node_values(source)?;
    let value = usize::try_from(index)
        .ok()
        .and_then(|i| values.get(i).copied())
        .ok_or(CodegenError::ResultIndexOutOfRange {
            node: source,
            index,
            count: values.len(),
        })?;
    let attrs = em.node_attrs(source);
    em.bind_node_values(node.id, vec![value], Some(attrs))
}

fn handle_call(_em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let op = node
        .target()
        .cloned()
        .unwrap_or_else(|| OpKind::new(ops::CALL));
    Err(CodegenError::UnimplementedOp { op }.into())
}
