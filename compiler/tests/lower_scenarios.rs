// End-to-end lowering scenarios.
//
// Each test builds a small traced graph, runs a full pass through the
// library API and checks the emitted instructions or the raised error.

use std::path::Path;

use wlc::builder::ModuleBuilder;
use wlc::diag::{codes, CodegenError, ErrorClass, LowerError};
use wlc::emit::{EmitOptions, Emitter, EmitterState, FixedOffsets};
use wlc::graph::{ops, Arg, BufferType, Literal, Node, NodeAttrs, Trace, TraceBuilder};
use wlc::id::NodeId;
use wlc::indexing::{IndexExpr, IndexingContext};
use wlc::lir::{AffineMap, Attr, CastKind, ElementType, Function, IrType, IteratorType, Op, Value};
use wlc::pipeline::{lower_descriptor, lower_kernel, KernelDescriptor, LowerOptions, Lowered};
use wlc::registry::{OpRegistry, RegistryBuilder};
use wlc::signature::{KernelSignature, Ref};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn buf(shape: &[&str], element: ElementType) -> BufferType {
    BufferType::new(IndexExpr::parse_all(shape).unwrap(), element)
}

fn int(v: i64) -> Arg {
    Arg::Lit(Literal::Int(v))
}

fn shape(dims: &[i64]) -> Arg {
    Arg::Tuple(dims.iter().map(|d| int(*d)).collect())
}

fn lower_with(
    trace: &Trace,
    grid: &[&str],
    bindings: &[(&str, i64)],
    mut options: LowerOptions,
) -> Result<Lowered, LowerError> {
    let registry = OpRegistry::standard().unwrap();
    for (sym, v) in bindings {
        options = options.bind(sym, *v);
    }
    let grid = IndexExpr::parse_all(grid).unwrap();
    lower_kernel(trace, &grid, &registry, &options)
}

fn lower(trace: &Trace, grid: &[&str], bindings: &[(&str, i64)]) -> Result<Lowered, LowerError> {
    lower_with(trace, grid, bindings, LowerOptions::default())
}

fn kernel(lowered: &Lowered) -> &Function {
    &lowered.module.functions[0]
}

fn op_names(func: &Function) -> Vec<&'static str> {
    func.body.iter().map(|i| i.op.name()).collect()
}

fn value_type(lowered: &Lowered, value: Value) -> String {
    lowered.module.value_type(value).unwrap().to_string()
}

// ── Scenario A: tile read ───────────────────────────────────────────────────

#[test]
fn scenario_a_read_emits_one_padded_tile_load() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["M", "N"], ElementType::F32));
    let root = b.root();
    b.call(root, ops::READ, vec![Arg::Node(a), int(4)]);
    let trace = b.finish().unwrap();

    let lowered = lower(&trace, &[], &[("M", 64), ("N", 64)]).unwrap();
    let func = kernel(&lowered);
    let reads: Vec<_> = func.ops_named("vector.transfer_read").collect();
    assert_eq!(reads.len(), 1);

    let read = reads[0];
    assert_eq!(value_type(&lowered, read.result.unwrap()), "vector<16x16xf32>");
    let Op::TransferRead {
        source,
        indices,
        permutation_map,
        padding,
    } = &read.op
    else {
        panic!("expected transfer_read, got {:?}", read.op);
    };
    assert_eq!(*source, func.params[0].value);
    assert_eq!(permutation_map, &AffineMap::minor_identity(2, 2).unwrap());
    assert_eq!(indices.len(), 2);

    // Padding is the f32 zero; offsets are index zeros.
    let constant_of = |v: Value| {
        func.body
            .iter()
            .find(|i| i.result == Some(v))
            .map(|i| i.op.clone())
    };
    assert_eq!(
        constant_of(*padding),
        Some(Op::Constant {
            value: Attr::zero(ElementType::F32)
        })
    );
    for idx in indices {
        assert_eq!(
            constant_of(*idx),
            Some(Op::Constant {
                value: Attr::Int {
                    value: 0,
                    ty: ElementType::Index
                }
            })
        );
    }
    assert!(func.is_terminated());
}

#[test]
fn configured_tile_shape_drives_read_type_and_map() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["B", "M", "N"], ElementType::BF16));
    let root = b.root();
    b.call(root, ops::READ, vec![Arg::Node(a), int(8)]);
    let trace = b.finish().unwrap();

    let options = LowerOptions {
        emit: EmitOptions {
            tile_shape: vec![32, 8],
            ..EmitOptions::default()
        },
        ..LowerOptions::default()
    };
    let lowered = lower_with(&trace, &[], &[("B", 2), ("M", 64), ("N", 64)], options).unwrap();
    let func = kernel(&lowered);
    let read = func.ops_named("vector.transfer_read").next().unwrap();
    assert_eq!(value_type(&lowered, read.result.unwrap()), "vector<32x8xbf16>");
    let Op::TransferRead {
        permutation_map, ..
    } = &read.op
    else {
        unreachable!()
    };
    assert_eq!(permutation_map.to_string(), "(d0, d1, d2) -> (d1, d2)");
}

// ── Scenario B: scalar store ────────────────────────────────────────────────

#[test]
fn scenario_b_rank0_store_broadcasts_then_writes() {
    let mut b = TraceBuilder::new();
    let c = b.placeholder("c", buf(&["M", "N"], ElementType::F32));
    let root = b.root();
    let acc = b.call(
        root,
        ops::REGISTER,
        vec![shape(&[]), Arg::Dtype(ElementType::F32), Arg::Lit(Literal::Float(0.0))],
    );
    b.call(root, ops::WRITE, vec![Arg::Node(acc), Arg::Node(c), int(1)]);
    let trace = b.finish().unwrap();

    let lowered = lower(&trace, &[], &[("M", 64), ("N", 32)]).unwrap();
    let func = kernel(&lowered);
    let names = op_names(func);
    let bcast = names.iter().position(|n| *n == "vector.broadcast").unwrap();
    let store = names
        .iter()
        .position(|n| *n == "vector.transfer_write")
        .unwrap();
    assert!(bcast < store);

    let broadcast = &func.body[bcast];
    assert_eq!(value_type(&lowered, broadcast.result.unwrap()), "vector<1x1xf32>");
    let Op::TransferWrite {
        value,
        dest,
        permutation_map,
        ..
    } = &func.body[store].op
    else {
        unreachable!()
    };
    assert_eq!(Some(*value), broadcast.result);
    assert_eq!(*dest, func.params[0].value);
    assert_eq!(permutation_map, &AffineMap::minor_identity(2, 2).unwrap());
}

#[test]
fn literal_store_is_a_rank0_store() {
    let mut b = TraceBuilder::new();
    let c = b.placeholder("c", buf(&["4", "4"], ElementType::F16));
    let root = b.root();
    b.call(
        root,
        ops::WRITE,
        vec![Arg::Lit(Literal::Float(1.5)), Arg::Node(c), int(1)],
    );
    let trace = b.finish().unwrap();
    let lowered = lower(&trace, &[], &[]).unwrap();
    let names = op_names(kernel(&lowered));
    assert!(names.contains(&"vector.broadcast"));
    assert!(!names.contains(&"arith.extf"));
}

// ── Rank mismatch ───────────────────────────────────────────────────────────

#[test]
fn store_with_too_few_offsets_cites_both_ranks() {
    let mut b = TraceBuilder::new();
    let c = b.placeholder("c", buf(&["M", "N"], ElementType::F32));
    let root = b.root();
    let r = b.call(
        root,
        ops::REGISTER,
        vec![shape(&[16]), Arg::Dtype(ElementType::F32), Arg::Lit(Literal::Float(0.0))],
    );
    let w = b.call(root, ops::WRITE, vec![Arg::Node(r), Arg::Node(c), int(1)]);
    let trace = b.finish().unwrap();

    let options = LowerOptions {
        offsets: Some(FixedOffsets(vec![IndexExpr::Const(0)])),
        ..LowerOptions::default()
    };
    let err = lower_with(&trace, &[], &[("M", 64), ("N", 64)], options).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Codegen);
    assert_eq!(err.code(), codes::RANK_MISMATCH);
    assert_eq!(err.site().map(|s| s.node), Some(w));
    let msg = err.to_string();
    assert!(msg.contains("rank 2") && msg.contains("got 1"), "{msg}");
}

#[test]
fn store_of_higher_rank_value_is_rejected() {
    let mut b = TraceBuilder::new();
    let c = b.placeholder("c", buf(&["M"], ElementType::F32));
    let root = b.root();
    let r = b.call(
        root,
        ops::REGISTER,
        vec![shape(&[4, 4]), Arg::Dtype(ElementType::F32), Arg::Lit(Literal::Float(0.0))],
    );
    b.call(root, ops::WRITE, vec![Arg::Node(r), Arg::Node(c), int(1)]);
    let trace = b.finish().unwrap();
    let err = lower(&trace, &[], &[("M", 64)]).unwrap_err();
    assert_eq!(
        err.as_codegen(),
        Some(&CodegenError::RankMismatch {
            what: "slice assignment",
            expected: 1,
            actual: 2
        })
    );
}

#[test]
fn fixed_offsets_are_evaluated_symbolically() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["M", "N"], ElementType::F32));
    let root = b.root();
    b.call(root, ops::READ, vec![Arg::Node(a), int(1)]);
    let trace = b.finish().unwrap();
    let options = LowerOptions {
        offsets: Some(FixedOffsets(
            IndexExpr::parse_all(&["M // 2", "N - 16"]).unwrap(),
        )),
        ..LowerOptions::default()
    };
    let lowered = lower_with(&trace, &[], &[("M", 64), ("N", 64)], options).unwrap();
    let consts: Vec<i64> = kernel(&lowered)
        .body
        .iter()
        .filter_map(|i| match i.op {
            Op::Constant {
                value:
                    Attr::Int {
                        value,
                        ty: ElementType::Index,
                    },
            } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(consts, vec![32, 48]);
}

// ── Scenario C: unbound grid symbol ─────────────────────────────────────────

fn must_not_dispatch(_: &mut Emitter<'_>, node: &Node) -> Result<(), LowerError> {
    panic!("node {} dispatched before signature binding", node.id)
}

#[test]
fn scenario_c_unbound_grid_symbol_fails_before_emission() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["64", "64"], ElementType::F32));
    let root = b.root();
    b.call(root, ops::READ, vec![Arg::Node(a), int(4)]);
    let trace = b.finish().unwrap();

    let mut rb = RegistryBuilder::new();
    rb.register(ops::READ, must_not_dispatch).unwrap();
    let registry = rb.build();

    let grid = vec![IndexExpr::sym("M")];
    let err = lower_kernel(&trace, &grid, &registry, &LowerOptions::default()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::UnboundSymbol);
    assert_eq!(err.as_unbound_symbol().unwrap().symbol.name(), "M");
    assert_eq!(err.render(), "error[E0300]: unbound symbol 'M'");
    assert!(!IndexingContext::is_active());
}

// ── Binding table and dispatch ──────────────────────────────────────────────

#[test]
fn double_bind_through_emitter_is_fatal() {
    let mut b = TraceBuilder::new();
    let root = b.root();
    let r = b.call(
        root,
        ops::REGISTER,
        vec![shape(&[2]), Arg::Dtype(ElementType::I32), int(0)],
    );
    let trace = b.finish().unwrap();
    let registry = OpRegistry::standard().unwrap();
    let idxc = IndexingContext::acquire().unwrap();
    let mut builder = ModuleBuilder::new();
    let mut sig = KernelSignature::from_trace(&trace, vec![])
        .bind(&mut builder, "k", &idxc)
        .unwrap();
    let mut em = Emitter::new(&trace, &mut sig, &mut builder, &registry, &idxc);
    em.emit().unwrap();

    let bound = em.lookup_node_value(r).unwrap();
    let err = em.bind_node_value(r, bound).unwrap_err();
    assert_eq!(err.as_codegen(), Some(&CodegenError::AlreadyBound { node: r }));
    assert_eq!(em.lookup_node_values(r).unwrap(), vec![bound]);
}

#[test]
fn unregistered_op_stops_emission_at_that_node() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["8", "8"], ElementType::F32));
    let root = b.root();
    b.call(root, ops::READ, vec![Arg::Node(a), int(4)]);
    let bad = b.call(root, "frobnicate", vec![Arg::Node(a)]);
    b.call(root, ops::READ, vec![Arg::Node(a), int(4)]);
    let trace = b.finish().unwrap();

    let registry = OpRegistry::standard().unwrap();
    let idxc = IndexingContext::acquire().unwrap();
    let mut builder = ModuleBuilder::new();
    let mut sig = KernelSignature::from_trace(&trace, vec![])
        .bind(&mut builder, "k", &idxc)
        .unwrap();
    let mut em = Emitter::new(&trace, &mut sig, &mut builder, &registry, &idxc);
    let err = em.emit().unwrap_err();
    assert_eq!(em.state(), EmitterState::Failed);
    assert_eq!(
        err.as_codegen(),
        Some(&CodegenError::UnregisteredOp {
            op: wlc::graph::OpKind::new("frobnicate")
        })
    );
    let site = err.site().unwrap();
    assert_eq!((site.node, site.op.as_str()), (bad, "frobnicate"));
    assert!(!em.bindings().is_bound(bad));
    drop(em);

    // Only the first read was lowered: two offsets, the pad, the load.
    let names = op_names(&builder.module().functions[0]);
    assert_eq!(
        names,
        vec![
            "arith.constant",
            "arith.constant",
            "arith.constant",
            "vector.transfer_read"
        ]
    );
}

#[test]
fn generic_call_is_unimplemented_not_unregistered() {
    let mut b = TraceBuilder::new();
    let root = b.root();
    b.call(root, ops::CALL, vec![int(1)]);
    let trace = b.finish().unwrap();
    let err = lower(&trace, &[], &[]).unwrap_err();
    assert_eq!(err.code(), codes::UNIMPLEMENTED_OP);
    assert!(err.render().starts_with("error[E0201]: at n0 'call' (call)"));
}

#[test]
fn malformed_arity_is_a_validation_error_with_site() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["8"], ElementType::F32));
    let root = b.root();
    let m = b.call(root, ops::MMA, vec![Arg::Node(a), Arg::Node(a)]);
    let trace = b.finish().unwrap();
    let err = lower(&trace, &[], &[]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(err.code(), codes::MALFORMED_ARGUMENTS);
    assert_eq!(err.site().map(|s| s.node), Some(m));
}

// ── GEMM ────────────────────────────────────────────────────────────────────

fn gemm_trace(acc_element: ElementType) -> (Trace, NodeId) {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["M", "K"], ElementType::F16));
    let bm = b.placeholder("b", buf(&["K", "N"], ElementType::F16));
    let c = b.placeholder("c", buf(&["M", "N"], ElementType::F32));
    let root = b.root();
    let acc = b.call(
        root,
        ops::REGISTER,
        vec![shape(&[16, 16]), Arg::Dtype(acc_element), Arg::Lit(Literal::Float(0.0))],
    );
    let ra = b.call(root, ops::READ, vec![Arg::Node(a), int(4)]);
    let rb = b.call(root, ops::READ, vec![Arg::Node(bm), int(4)]);
    let mma = b.call(root, ops::MMA, vec![Arg::Node(ra), Arg::Node(rb), Arg::Node(acc)]);
    b.call(root, ops::WRITE, vec![Arg::Node(mma), Arg::Node(c), int(4)]);
    b.output(root, vec![]);
    (b.finish().unwrap(), mma)
}

#[test]
fn gemm_lowers_to_fixed_role_contraction() {
    let (trace, _) = gemm_trace(ElementType::F32);
    let lowered = lower(
        &trace,
        &["M // 16", "N // 16"],
        &[("M", 64), ("N", 64), ("K", 32)],
    )
    .unwrap();
    let func = kernel(&lowered);
    assert_eq!(func.grid, vec![4, 4]);

    let contracts: Vec<_> = func.ops_named("vector.contract").collect();
    assert_eq!(contracts.len(), 1);
    let Op::Contract {
        acc,
        indexing_maps,
        iterator_types,
        ..
    } = &contracts[0].op
    else {
        unreachable!()
    };
    assert_eq!(
        iterator_types,
        &vec![
            IteratorType::Parallel,
            IteratorType::Parallel,
            IteratorType::Reduction
        ]
    );
    let maps: Vec<String> = indexing_maps.iter().map(|m| m.to_string()).collect();
    assert_eq!(
        maps,
        vec![
            "(d0, d1, d2) -> (d0, d2)",
            "(d0, d1, d2) -> (d2, d1)",
            "(d0, d1, d2) -> (d0, d1)"
        ]
    );
    // The result takes the accumulator's type.
    assert_eq!(
        lowered.module.value_type(contracts[0].result.unwrap()),
        lowered.module.value_type(*acc)
    );
    assert_eq!(func.ops_named("vector.transfer_write").count(), 1);
    assert_eq!(lowered.dispatched, 5);
}

#[test]
fn gemm_store_casts_accumulator_to_destination() {
    let (trace, _) = gemm_trace(ElementType::F16);
    let lowered = lower(&trace, &[], &[("M", 64), ("N", 64), ("K", 32)]).unwrap();
    let func = kernel(&lowered);
    let casts: Vec<_> = func
        .body
        .iter()
        .filter(|i| matches!(i.op, Op::Cast { kind: CastKind::ExtF, .. }))
        .collect();
    assert_eq!(casts.len(), 1);
    assert_eq!(value_type(&lowered, casts[0].result.unwrap()), "vector<16x16xf32>");
}

#[test]
fn integer_store_cast_follows_signedness() {
    for (unsigned, expected) in [(false, CastKind::ExtSI), (true, CastKind::ExtUI)] {
        let mut b = TraceBuilder::new();
        let c = b.placeholder("c", buf(&["4", "4"], ElementType::I32));
        let root = b.root();
        let r = b.call(
            root,
            ops::REGISTER,
            vec![shape(&[4, 4]), Arg::Dtype(ElementType::I8), int(3)],
        );
        b.set_attrs(r, NodeAttrs { unsigned });
        b.call(root, ops::WRITE, vec![Arg::Node(r), Arg::Node(c), int(1)]);
        let trace = b.finish().unwrap();

        let lowered = lower(&trace, &[], &[]).unwrap();
        let kinds: Vec<CastKind> = kernel(&lowered)
            .body
            .iter()
            .filter_map(|i| match i.op {
                Op::Cast { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![expected], "unsigned = {unsigned}");
    }
}

// ── Subgraphs ───────────────────────────────────────────────────────────────

#[test]
fn region_binds_subgraph_outputs_in_order() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["M", "N"], ElementType::F32));
    let c = b.placeholder("c", buf(&["M", "N"], ElementType::F32));
    let root = b.root();
    let sub = b.subgraph(root);
    let x = b.free_var(sub, "x");
    let r = b.call(sub, ops::READ, vec![Arg::Node(x), int(4)]);
    let acc = b.call(
        sub,
        ops::REGISTER,
        vec![shape(&[16, 16]), Arg::Dtype(ElementType::F32), Arg::Lit(Literal::Float(0.0))],
    );
    b.output(sub, vec![Arg::Tuple(vec![Arg::Node(r), Arg::Node(acc)])]);
    let region = b.call(
        root,
        ops::REGION,
        vec![Arg::Graph(sub), Arg::Tuple(vec![Arg::Node(a)])],
    );
    let first = b.call(root, ops::GETITEM, vec![Arg::Node(region), int(0)]);
    b.call(root, ops::WRITE, vec![Arg::Node(first), Arg::Node(c), int(4)]);
    let trace = b.finish().unwrap();

    let registry = OpRegistry::standard().unwrap();
    let mut idxc = IndexingContext::acquire().unwrap();
    idxc.bind_constant("M", 64).unwrap();
    idxc.bind_constant("N", 64).unwrap();
    let mut builder = ModuleBuilder::new();
    let mut sig = KernelSignature::from_trace(&trace, vec![])
        .bind(&mut builder, "k", &idxc)
        .unwrap();
    let mut em = Emitter::new(&trace, &mut sig, &mut builder, &registry, &idxc);
    em.emit().unwrap();

    let region_values = em.lookup_node_values(region).unwrap();
    assert_eq!(
        region_values,
        vec![
            em.lookup_node_value(r).unwrap(),
            em.lookup_node_value(acc).unwrap()
        ]
    );
    assert_eq!(em.lookup_node_value(first).unwrap(), region_values[0]);
    assert_eq!(em.lookup_node_value(x).unwrap(), em.lookup_node_value(a).unwrap());
    em.finish().unwrap();
    drop(em);

    let func = &builder.module().functions[0];
    let Some(Op::TransferRead { source, .. }) = func
        .ops_named("vector.transfer_read")
        .next()
        .map(|i| &i.op)
    else {
        panic!("no transfer_read emitted")
    };
    assert_eq!(*source, func.params[0].value);
    let Some(Op::TransferWrite { dest, .. }) = func
        .ops_named("vector.transfer_write")
        .next()
        .map(|i| &i.op)
    else {
        panic!("no transfer_write emitted")
    };
    assert_eq!(*dest, func.params[1].value);
}

#[test]
fn region_capture_arity_mismatch_is_reported_at_region() {
    let mut b = TraceBuilder::new();
    let a = b.placeholder("a", buf(&["8"], ElementType::F32));
    let root = b.root();
    let sub = b.subgraph(root);
    b.free_var(sub, "x");
    b.free_var(sub, "y");
    let region = b.call(
        root,
        ops::REGION,
        vec![Arg::Graph(sub), Arg::Tuple(vec![Arg::Node(a)])],
    );
    let trace = b.finish().unwrap();
    let err = lower(&trace, &[], &[]).unwrap_err();
    assert_eq!(
        err.as_codegen(),
        Some(&CodegenError::FreeVarArity {
            graph: sub,
            expected: 2,
            actual: 1
        })
    );
    assert_eq!(err.site().map(|s| s.node), Some(region));
}

#[test]
fn getitem_out_of_range_is_rejected() {
    let mut b = TraceBuilder::new();
    let root = b.root();
    let sub = b.subgraph(root);
    let r = b.call(
        sub,
        ops::REGISTER,
        vec![shape(&[2]), Arg::Dtype(ElementType::F32), Arg::Lit(Literal::Float(1.0))],
    );
    b.output(sub, vec![Arg::Node(r)]);
    let region = b.call(root, ops::REGION, vec![Arg::Graph(sub), Arg::Tuple(vec![])]);
    b.call(root, ops::GETITEM, vec![Arg::Node(region), int(3)]);
    let trace = b.finish().unwrap();
    let err = lower(&trace, &[], &[]).unwrap_err();
    assert_eq!(
        err.as_codegen(),
        Some(&CodegenError::ResultIndexOutOfRange {
            node: region,
            index: 3,
            count: 1
        })
    );
}

#[test]
fn nested_regions_respect_depth_limit() {
    let mut b = TraceBuilder::new();
    let root = b.root();
    let outer = b.subgraph(root);
    let inner = b.subgraph(outer);
    b.output(inner, vec![]);
    let inner_call = b.call(outer, ops::REGION, vec![Arg::Graph(inner), Arg::Tuple(vec![])]);
    b.output(outer, vec![Arg::Node(inner_call)]);
    b.call(root, ops::REGION, vec![Arg::Graph(outer), Arg::Tuple(vec![])]);
    let trace = b.finish().unwrap();

    lower(&trace, &[], &[]).unwrap();

    let options = LowerOptions {
        emit: EmitOptions {
            max_subgraph_depth: 1,
            ..EmitOptions::default()
        },
        ..LowerOptions::default()
    };
    let err = lower_with(&trace, &[], &[], options).unwrap_err();
    assert_eq!(
        err.as_codegen(),
        Some(&CodegenError::SubgraphDepthExceeded { limit: 1 })
    );
    assert_eq!(err.site().map(|s| s.node), Some(inner_call));
}

// ── Signature ───────────────────────────────────────────────────────────────

#[test]
fn grid_dimensions_become_index_parameters() {
    let mut b = TraceBuilder::new();
    b.placeholder("a", buf(&["M", "N"], ElementType::F32));
    let trace = b.finish().unwrap();

    let mut idxc = IndexingContext::acquire().unwrap();
    idxc.bind_constant("M", 128).unwrap();
    idxc.bind_constant("N", 64).unwrap();
    let sig = KernelSignature::from_trace(
        &trace,
        IndexExpr::parse_all(&["M // 16", "N // 16"]).unwrap(),
    );
    let mut builder = ModuleBuilder::new();
    let mut bound = sig.bind(&mut builder, "k", &idxc).unwrap();
    let g1 = bound.resolve_by_reference(Ref::Grid(1)).unwrap();

    let func = builder.function(bound.entry());
    let names: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["a", "grid0", "grid1"]);
    assert_eq!(func.params[2].value, g1);
    assert_eq!(func.params[2].ty, IrType::Scalar(ElementType::Index));
    assert_eq!(bound.grid(), &[8, 4]);
}

#[test]
fn failed_pass_leaves_no_bindings_for_the_next() {
    let mut b = TraceBuilder::new();
    let root = b.root();
    b.call(root, "frob", vec![]);
    let bad = b.finish().unwrap();
    assert!(lower(&bad, &[], &[("M", 1)]).is_err());

    // A fresh pass can bind M again.
    let mut b = TraceBuilder::new();
    b.placeholder("a", buf(&["M"], ElementType::F32));
    let good = b.finish().unwrap();
    let lowered = lower(&good, &[], &[("M", 4)]).unwrap();
    assert_eq!(
        kernel(&lowered).params[0].ty.to_string(),
        "memref<4xf32>"
    );
}

#[test]
fn deserialized_invalid_trace_is_rejected_before_signature() {
    let trace: Trace = serde_json::from_str(
        r#"{"nodes": [], "graphs": [{"id": 0, "parent": null, "nodes": [4]}], "root": 0}"#,
    )
    .unwrap();
    assert!(KernelSignature::from_trace(&trace, vec![]).buffers().is_empty());

    let err = lower(&trace, &[], &[]).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(err.code(), codes::INVALID_GRAPH);
    assert!(err.render().contains("lists unknown node 4"));
}

// ── Kernel description files ────────────────────────────────────────────────

fn demo(name: &str) -> KernelDescriptor {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("demos")
        .join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e));
    KernelDescriptor::from_json(&text)
        .unwrap_or_else(|e| panic!("{}: {}", path.display(), e.render()))
}

#[test]
fn demo_gemm_lowers_with_file_bindings() {
    let desc = demo("gemm.json");
    let registry = OpRegistry::standard().unwrap();
    let lowered = lower_descriptor(&desc, &registry, &desc.options()).unwrap();
    let func = lowered.module.function("gemm").unwrap();
    assert_eq!(func.grid, vec![4, 4]);
    assert_eq!(func.ops_named("vector.contract").count(), 1);
    assert_eq!(lowered.dispatched, 5);
}

#[test]
fn demo_region_extends_unsigned_source() {
    let desc = demo("region.json");
    let registry = OpRegistry::standard().unwrap();
    let lowered = lower_descriptor(&desc, &registry, &desc.options()).unwrap();
    let func = kernel(&lowered);
    assert!(func
        .body
        .iter()
        .any(|i| matches!(i.op, Op::Cast { kind: CastKind::ExtUI, .. })));
    assert_eq!(func.ops_named("vector.transfer_read").count(), 1);
}
