// memory.rs — Tile loads, stores and register initialisation
//
//   read(memory, elements_per_thread)
//       One `transfer_read` of the configured tile shape from the buffer at
//       its start offsets, zero-padded, with a minor-identity map from the
//       buffer rank to the tile rank.
//   write(register, memory, elements_per_thread)
//       Casts the value to the buffer's element type and stores it with
//       `transfer_write`. A rank-0 value is first broadcast to an all-ones
//       shape of the buffer's rank; any other rank excess is an error.
//   register(shape, dtype, value)
//       A constant vector of `shape` filled with `value`.

use tracing::trace;

use crate::diag::{CodegenError, LowerError};
use crate::emit::Emitter;
use crate::graph::{ops, Node};
use crate::handlers::convert::{cast_kernel_buffer, cast_vector, literal_attr, start_indices};
use crate::handlers::{
    dtype_arg, elements_per_thread, expect_args, index_arg, literal_arg, tuple_arg,
};
use crate::lir::{AffineMap, VectorType};
use crate::registry::RegistryBuilder;

pub fn register(builder: &mut RegistryBuilder) -> Result<(), LowerError> {
    builder.register(ops::READ, handle_read)?;
    builder.register(ops::WRITE, handle_write)?;
    builder.register(ops::REGISTER, handle_register)?;
    Ok(())
}

fn handle_read(em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let args = expect_args(node, 2)?;
    let (source, mem) = cast_kernel_buffer(em, &args[0], 0)?;
    elements_per_thread(em, args, 1)?;

    let tile = CodegenError::positive_shape("read tile", em.options().tile_shape.clone())?;
    let map = AffineMap::minor_identity(mem.rank(), tile.len()).ok_or(
        CodegenError::RankMismatch {
            what: "read tile",
            expected: mem.rank(),
            actual: tile.len(),
        },
    )?;
    let indices = start_indices(em, node, &mem)?;

    let ip = em.entry();
    let padding = em.builder().zero(ip, mem.element);
    let result_ty = VectorType::new(tile, mem.element);
    trace!(node = %node.id, ty = %result_ty, %map, "read");
    let result = em
        .builder()
        .transfer_read(ip, result_ty, source, indices, map, padding);
    em.bind_node_value(node.id, result)
}

fn handle_write(em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let args = expect_args(node, 3)?;
    let (dest, mem) = cast_kernel_buffer(em, &args[1], 1)?;
    elements_per_thread(em, args, 2)?;
    let indices = start_indices(em, node, &mem)?;

    let mut value = cast_vector(em, &args[0], 0, Some(mem.element))?;
    let mut vector = em.builder().vector_type_of(value)?;
    let ip = em.entry();
    if vector.rank() == 0 && mem.rank() > 0 {
        let ones = VectorType::new(vec![1; mem.rank()], vector.element);
        value = em.builder().broadcast(ip, ones.clone(), value);
        vector = ones;
    }
    let map = AffineMap::minor_identity(mem.rank(), vector.rank()).ok_or(
        CodegenError::RankMismatch {
            what: "slice assignment",
            expected: mem.rank(),
            actual: vector.rank(),
        },
    )?;
    trace!(node = %node.id, ty = %vector, %map, "write");
    em.builder().transfer_write(ip, value, dest, indices, map);
    Ok(())
}

fn handle_register(em: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    let args = expect_args(node, 3)?;
    let dims = tuple_arg(args, 0)?;
    let element = dtype_arg(args, 1)?;
    let init = literal_arg(args, 2)?;
    let shape = dims
        .iter()
        .map(|d| index_arg(em, d, 0))
        .collect::<Result<Vec<_>, _>>()?;
    let shape = CodegenError::positive_shape("register", shape)?;

    let ip = em.entry();
    let result = em
        .builder()
        .splat(ip, literal_attr(init, element), shape);
    em.bind_node_value(node.id, result)
}
