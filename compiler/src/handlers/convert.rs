// convert.rs — Operand conversion shared by the handlers
//
// Turns node arguments into IR values of the shape a handler needs: kernel
// buffers (memrefs), vectors of a requested element type, and the index
// values of a buffer access's start offsets.

use crate::diag::{CodegenError, LowerError, ValidationError};
use crate::emit::Emitter;
use crate::graph::{Arg, Literal, Node};
use crate::lir::{Attr, CastKind, ElementType, IrType, MemRefType, Value, VectorType};

/// Default element type of an untyped literal.
fn literal_element(lit: Literal) -> ElementType {
    match lit {
        Literal::Int(_) => ElementType::I64,
        Literal::Float(_) => ElementType::F32,
        Literal::Bool(_) => ElementType::I1,
    }
}

/// `lit` as a constant attribute of type `element`.
pub fn literal_attr(lit: Literal, element: ElementType) -> Attr {
    let (int, float) = match lit {
        Literal::Int(v) => (v, v as f64),
        Literal::Float(v) => (v as i64, v),
        Literal::Bool(b) => (b as i64, b as i64 as f64),
    };
    if element.is_float() {
        Attr::Float {
            value: float,
            ty: element,
        }
    } else {
        Attr::Int {
            value: int,
            ty: element,
        }
    }
}

/// Resolve a kernel-buffer argument to its memref value and type.
pub fn cast_kernel_buffer(
    em: &mut Emitter<'_>,
    arg: &Arg,
    position: usize,
) -> Result<(Value, MemRefType), LowerError> {
    let Arg::Node(id) = arg else {
        return Err(ValidationError::ArgumentKind {
            position,
            expected: "kernel buffer",
            found: arg.kind_name().to_string(),
        }
        .into());
    };
    let value = em.lookup_node_value(*id)?;
    match em.builder().type_of(value)? {
        IrType::MemRef(mem) => Ok((value, mem.clone())),
        other => Err(CodegenError::TypeMismatch {
            expected: "memref".to_string(),
            found: other.to_string(),
        }
        .into()),
    }
}

/// Coerce an argument to a vector value, casting its elements to `element`
/// when given. Literals become rank-0 constants; scalars are broadcast to
/// rank 0. Integer casts follow the operand node's signedness.
pub fn cast_vector(
    em: &mut Emitter<'_>,
    arg: &Arg,
    position: usize,
    element: Option<ElementType>,
) -> Result<Value, LowerError> {
    let ip = em.entry();
    let (value, unsigned) = match arg {
        Arg::Lit(lit) => {
            let ty = element.unwrap_or_else(|| literal_element(*lit));
            return Ok(em.builder().splat(ip, literal_attr(*lit, ty), Vec::new()));
        }
        Arg::Node(id) => (em.lookup_node_value(*id)?, em.node_attrs(*id).unsigned),
        other => {
            return Err(ValidationError::ArgumentKind {
                position,
                expected: "vector operand",
                found: other.kind_name().to_string(),
            }
            .into())
        }
    };

    let vector = match em.builder().type_of(value)?.clone() {
        IrType::Vector(v) => v,
        IrType::Scalar(e) => {
            let v = VectorType::new(Vec::new(), e);
            let b = em.builder().broadcast(ip, v.clone(), value);
            return convert_elements(em, b, v, element, unsigned);
        }
        other => {
            return Err(CodegenError::TypeMismatch {
                expected: "vector".to_string(),
                found: other.to_string(),
            }
            .into())
        }
    };
    convert_elements(em, value, vector, element, unsigned)
}

fn convert_elements(
    em: &mut Emitter<'_>,
    value: Value,
    vector: VectorType,
    element: Option<ElementType>,
    unsigned: bool,
) -> Result<Value, LowerError> {
    let Some(to) = element else {
        return Ok(value);
    };
    match CastKind::select(vector.element, to, unsigned) {
        None => Ok(value),
        Some(kind) => {
            let ip = em.entry();
            let ty = IrType::Vector(VectorType::new(vector.shape, to));
            Ok(em.builder().cast(ip, kind, value, ty))
        }
    }
}

/// Evaluate the start offsets of an access to `buffer` and emit them as
/// index constants. The offset count must equal the buffer rank.
pub fn start_indices(
    em: &mut Emitter<'_>,
    node: &Node,
    buffer: &MemRefType,
) -> Result<Vec<Value>, LowerError> {
    let offsets = em.start_offsets(node, buffer);
    if offsets.len() != buffer.rank() {
        return Err(CodegenError::RankMismatch {
            what: "start offsets",
            expected: buffer.rank(),
            actual: offsets.len(),
        }
        .into());
    }
    let resolved = em.idxc().eval_all(&offsets)?;
    let ip = em.entry();
    Ok(resolved
        .into_iter()
        .map(|offset| em.builder().index_constant(ip, offset))
        .collect())
}
