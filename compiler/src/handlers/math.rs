// math.rs — Matrix multiply-accumulate lowering
//
//   mma(lhs, rhs, acc)
//       One `vector.contract` over three iteration dimensions. The roles and
//       maps are fixed for a 2-D tile GEMM:
//         d0, d1 parallel; d2 reduction
//         lhs (d0, d2)   rhs (d2, d1)   acc/result (d0, d1)
//       The accumulator's type is the result type.

use tracing::trace;

use crate::diag::LowerError;
use crate::emit::Emitter;
use crate::graph::{ops, Node};
use crate::handlers::convert::cast_vector;
use crate::handlers::expect_args;
use crate::lir::{AffineExpr, AffineMap, IteratorType};
use crate::registry::RegistryBuilder;

pub const ITERATOR_TYPES: [IteratorType; 3] = [
    IteratorType::Parallel,
    IteratorType::Parallel,
    IteratorType::Reduction,
];

/// Indexing maps of lhs, rhs and accumulator, in that order.
pub fn gemm_indexing_maps() -> Vec<AffineMap> {
    let map = |a, b| AffineMap::get(3, 0, vec![AffineExpr::Dim(a), AffineExpr::Dim(b)]);
    vec![map(0, 2), map(2, 1), map(0, 1)]
}

pub fn register(builder: &mut RegistryBuilder) -> Result<(), LowerError> {
    builder.register(ops::MMA, handle_mma)?;
    Ok(())
}

fn handle_mma(em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let args = expect_args(node, 3)?;
    let lhs = cast_vector(em, &args[0], 0, None)?;
    let rhs = cast_vector(em, &args[1], 1, None)?;
    let acc = cast_vector(em, &args[2], 2, None)?;

    let result_ty = em.builder().type_of(acc)?.clone();
    trace!(node = %node.id, ty = %result_ty, "mma");
    let ip = em.entry();
    let result = em.builder().contract(
        ip,
        result_ty,
        lhs,
        rhs,
        acc,
        gemm_indexing_maps(),
        ITERATOR_TYPES.to_vec(),
    );
    em.bind_node_value(node.id, result)
}
