//! LIR – Low-level vector IR produced by the lowering pass.
//!
//! A `Module` holds functions whose bodies are flat instruction lists of
//! vector memory ops (`transfer_read`/`transfer_write`), broadcasts, casts,
//! constants and fused multiply-accumulate contractions. Every SSA value's
//! type is recorded in a module-wide table indexed by `ValueId`.
//!
//! The `Display` form is MLIR-like and used for debugging and snapshots; it
//! is not a serialization format.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::id::ValueId;

// ── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
    Index,
}

impl ElementType {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElementType::F16 | ElementType::BF16 | ElementType::F32 | ElementType::F64
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElementType::I1
                | ElementType::I8
                | ElementType::I16
                | ElementType::I32
                | ElementType::I64
        )
    }

    /// Bit width; `index` is treated as 64 bits.
    pub fn bit_width(self) -> u32 {
        match self {
            ElementType::I1 => 1,
            ElementType::I8 => 8,
            ElementType::I16 | ElementType::F16 | ElementType::BF16 => 16,
            ElementType::I32 | ElementType::F32 => 32,
            ElementType::I64 | ElementType::F64 | ElementType::Index => 64,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::I1 => "i1",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Index => "index",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VectorType {
    pub shape: Vec<i64>,
    pub element: ElementType,
}

impl VectorType {
    pub fn new(shape: Vec<i64>, element: ElementType) -> Self {
        VectorType { shape, element }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemRefType {
    pub shape: Vec<i64>,
    pub element: ElementType,
}

impl MemRefType {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Scalar(ElementType),
    Vector(VectorType),
    MemRef(MemRefType),
}

impl IrType {
    pub fn element_type(&self) -> ElementType {
        match self {
            IrType::Scalar(e) => *e,
            IrType::Vector(v) => v.element,
            IrType::MemRef(m) => m.element,
        }
    }
}

fn write_shaped(
    f: &mut fmt::Formatter<'_>,
    kind: &str,
    shape: &[i64],
    element: ElementType,
) -> fmt::Result {
    write!(f, "{kind}<")?;
    for dim in shape {
        write!(f, "{dim}x")?;
    }
    write!(f, "{element}>")
}

impl fmt::Display for VectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_shaped(f, "vector", &self.shape, self.element)
    }
}

impl fmt::Display for MemRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_shaped(f, "memref", &self.shape, self.element)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Scalar(e) => write!(f, "{e}"),
            IrType::Vector(v) => write!(f, "{v}"),
            IrType::MemRef(m) => write!(f, "{m}"),
        }
    }
}

// ── Values ─────────────────────────────────────────────────────────────────

/// Handle to an SSA value owned by a `Module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub ValueId);

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Affine maps ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffineExpr {
    Dim(u32),
    Symbol(u32),
    Const(i64),
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffineExpr::Dim(d) => write!(f, "d{d}"),
            AffineExpr::Symbol(s) => write!(f, "s{s}"),
            AffineExpr::Const(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffineMap {
    pub num_dims: u32,
    pub num_symbols: u32,
    pub results: Vec<AffineExpr>,
}

impl AffineMap {
    pub fn get(num_dims: u32, num_symbols: u32, results: Vec<AffineExpr>) -> Self {
        AffineMap {
            num_dims,
            num_symbols,
            results,
        }
    }

    /// `(d0, ..., d{dims-1}) -> (d{dims-results}, ..., d{dims-1})`: the
    /// trailing `results` dimensions map onto the result in order.
    /// Returns `None` if `results > dims`.
    pub fn minor_identity(dims: usize, results: usize) -> Option<Self> {
        if results > dims {
            return None;
        }
        let first = (dims - results) as u32;
        Some(AffineMap {
            num_dims: dims as u32,
            num_symbols: 0,
            results: (first..dims as u32).map(AffineExpr::Dim).collect(),
        })
    }

    pub fn is_minor_identity(&self) -> bool {
        let n = self.results.len() as u32;
        if self.num_symbols != 0 || n > self.num_dims {
            return false;
        }
        let first = self.num_dims - n;
        self.results
            .iter()
            .enumerate()
            .all(|(i, e)| *e == AffineExpr::Dim(first + i as u32))
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for d in 0..self.num_dims {
            if d > 0 {
                f.write_str(", ")?;
            }
            write!(f, "d{d}")?;
        }
        f.write_str(")")?;
        if self.num_symbols > 0 {
            f.write_str("[")?;
            for s in 0..self.num_symbols {
                if s > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "s{s}")?;
            }
            f.write_str("]")?;
        }
        f.write_str(" -> (")?;
        for (i, e) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{e}")?;
        }
        f.write_str(")")
    }
}

/// Role of one iteration dimension of a contraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorType {
    Parallel,
    Reduction,
}

impl fmt::Display for IteratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IteratorType::Parallel => f.write_str("parallel"),
            IteratorType::Reduction => f.write_str("reduction"),
        }
    }
}

// ── Attributes ─────────────────────────────────────────────────────────────

/// A typed scalar constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attr {
    Float { value: f64, ty: ElementType },
    Int { value: i64, ty: ElementType },
}

impl Attr {
    /// The zero of `ty` (`0.0` for floats, `0` for integers and index).
    pub fn zero(ty: ElementType) -> Self {
        if ty.is_float() {
            Attr::Float { value: 0.0, ty }
        } else {
            Attr::Int { value: 0, ty }
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Attr::Float { ty, .. } | Attr::Int { ty, .. } => *ty,
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Float { value, .. } => write!(f, "{value:?}"),
            Attr::Int { value, ty } if *ty == ElementType::I1 => {
                write!(f, "{}", if *value != 0 { "true" } else { "false" })
            }
            Attr::Int { value, .. } => write!(f, "{value}"),
        }
    }
}

// ── Instructions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    ExtF,
    TruncF,
    /// Between float formats of equal width (f16 and bf16).
    ConvertF,
    ExtSI,
    ExtUI,
    TruncI,
    SIToFP,
    UIToFP,
    FPToSI,
    FPToUI,
    IndexCast,
}

impl CastKind {
    /// Select the cast from `from` to `to`. `unsigned` picks the zero-extending
    /// / unsigned-conversion variants for integer operands and results.
    /// Returns `None` when no conversion is needed.
    pub fn select(from: ElementType, to: ElementType, unsigned: bool) -> Option<CastKind> {
        use ElementType::Index;
        if from == to {
            return None;
        }
        let kind = if from == Index || to == Index {
            CastKind::IndexCast
        } else if from.is_float() && to.is_float() {
            match to.bit_width().cmp(&from.bit_width()) {
                std::cmp::Ordering::Greater => CastKind::ExtF,
                std::cmp::Ordering::Less => CastKind::TruncF,
                std::cmp::Ordering::Equal => CastKind::ConvertF,
            }
        } else if from.is_integer() && to.is_integer() {
            if to.bit_width() > from.bit_width() {
                if unsigned {
                    CastKind::ExtUI
                } else {
                    CastKind::ExtSI
                }
            } else {
                CastKind::TruncI
            }
        } else if from.is_integer() {
            if unsigned {
                CastKind::UIToFP
            } else {
                CastKind::SIToFP
            }
        } else if unsigned {
            CastKind::FPToUI
        } else {
            CastKind::FPToSI
        };
        Some(kind)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CastKind::ExtF => "arith.extf",
            CastKind::TruncF => "arith.truncf",
            CastKind::ConvertF => "arith.convertf",
            CastKind::ExtSI => "arith.extsi",
            CastKind::ExtUI => "arith.extui",
            CastKind::TruncI => "arith.trunci",
            CastKind::SIToFP => "arith.sitofp",
            CastKind::UIToFP => "arith.uitofp",
            CastKind::FPToSI => "arith.fptosi",
            CastKind::FPToUI => "arith.fptoui",
            CastKind::IndexCast => "arith.index_cast",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Scalar constant, or a splat when the result type is a vector.
    Constant { value: Attr },
    TransferRead {
        source: Value,
        indices: Vec<Value>,
        permutation_map: AffineMap,
        padding: Value,
    },
    TransferWrite {
        value: Value,
        dest: Value,
        indices: Vec<Value>,
        permutation_map: AffineMap,
    },
    Broadcast { source: Value },
    Cast { kind: CastKind, source: Value },
    Contract {
        lhs: Value,
        rhs: Value,
        acc: Value,
        indexing_maps: Vec<AffineMap>,
        iterator_types: Vec<IteratorType>,
    },
    Return { values: Vec<Value> },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Constant { .. } => "arith.constant",
            Op::TransferRead { .. } => "vector.transfer_read",
            Op::TransferWrite { .. } => "vector.transfer_write",
            Op::Broadcast { .. } => "vector.broadcast",
            Op::Cast { kind, .. } => kind.mnemonic(),
            Op::Contract { .. } => "vector.contract",
            Op::Return { .. } => "return",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub result: Option<Value>,
    pub op: Op,
}

// ── Functions and modules ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FuncParam {
    pub name: String,
    pub ty: IrType,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<FuncParam>,
    /// Resolved grid sizes, one per grid dimension.
    pub grid: Vec<i64>,
    pub body: Vec<Instr>,
}

impl Function {
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.body.last(),
            Some(Instr {
                op: Op::Return { .. },
                ..
            })
        )
    }

    /// Instructions whose op name equals `name` (e.g. `"vector.contract"`).
    pub fn ops_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Instr> + 'a {
        self.body.iter().filter(move |i| i.op.name() == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub functions: Vec<Function>,
    value_types: Vec<IrType>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn new_value(&mut self, ty: IrType) -> Value {
        let id = ValueId(self.value_types.len() as u32);
        self.value_types.push(ty);
        Value(id)
    }

    pub fn value_type(&self, value: Value) -> Option<&IrType> {
        self.value_types.get(value.0.index())
    }

    pub fn value_count(&self) -> usize {
        self.value_types.len()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// SHA-256 of the textual form, hex-encoded. Stable across runs for the
    /// same input graph, bindings and options.
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.to_string().as_bytes())
    }

    fn ty(&self, value: Value) -> TypeRef<'_> {
        TypeRef(self.value_type(value))
    }

    fn fmt_instr(&self, f: &mut fmt::Formatter<'_>, instr: &Instr) -> fmt::Result {
        f.write_str("    ")?;
        if let Some(result) = instr.result {
            write!(f, "{result} = ")?;
        }
        let name = instr.op.name();
        match &instr.op {
            Op::Constant { value } => match self.result_ty(instr).0 {
                Some(ty) if matches!(ty, IrType::Vector(_)) => {
                    write!(f, "{name} dense<{value}> : {ty}")
                }
                _ => write!(f, "{name} {value} : {}", value.element_type()),
            },
            Op::TransferRead {
                source,
                indices,
                permutation_map,
                padding,
            } => {
                write!(f, "{name} {source}[{}], {padding} ", ValueList(indices))?;
                write!(f, "{{permutation_map = {permutation_map}}} : ")?;
                write!(f, "{}, {}", self.ty(*source), self.result_ty(instr))
            }
            Op::TransferWrite {
                value,
                dest,
                indices,
                permutation_map,
            } => {
                write!(f, "{name} {value}, {dest}[{}] ", ValueList(indices))?;
                write!(f, "{{permutation_map = {permutation_map}}} : ")?;
                write!(f, "{}, {}", self.ty(*value), self.ty(*dest))
            }
            Op::Broadcast { source } | Op::Cast { source, .. } => {
                write!(
                    f,
                    "{name} {source} : {} to {}",
                    self.ty(*source),
                    self.result_ty(instr)
                )
            }
            Op::Contract {
                lhs,
                rhs,
                acc,
                indexing_maps,
                iterator_types,
            } => {
                write!(f, "{name} {{indexing_maps = [")?;
                for (i, m) in indexing_maps.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str("], iterator_types = [")?;
                for (i, t) in iterator_types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{t}\"")?;
                }
                write!(
                    f,
                    "]}} {lhs}, {rhs}, {acc} : {}, {} into {}",
                    self.ty(*lhs),
                    self.ty(*rhs),
                    self.ty(*acc)
                )
            }
            Op::Return { values } => {
                if values.is_empty() {
                    write!(f, "{name}")
                } else {
                    write!(f, "{name} {}", ValueList(values))
                }
            }
        }
    }

    fn result_ty(&self, instr: &Instr) -> TypeRef<'_> {
        TypeRef(instr.result.and_then(|r| self.value_type(r)))
    }
}

/// Hex-encoded SHA-256 of `data` (64 characters).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut s = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

struct TypeRef<'a>(Option<&'a IrType>);

impl fmt::Display for TypeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ty) => write!(f, "{ty}"),
            None => f.write_str("<unknown>"),
        }
    }
}

struct ValueList<'a>(&'a [Value]);

impl fmt::Display for ValueList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {{")?;
        for func in &self.functions {
            write!(f, "  func.func @{}(", func.name)?;
            for (i, p) in func.params.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: {}", p.value, p.ty)?;
            }
            f.write_str(")")?;
            if !func.grid.is_empty() {
                let grid: Vec<String> = func.grid.iter().map(|g| g.to_string()).collect();
                write!(f, " attributes {{grid = [{}]}}", grid.join(", "))?;
            }
            writeln!(f, " {{")?;
            for instr in &func.body {
                self.fmt_instr(f, instr)?;
                writeln!(f)?;
            }
            writeln!(f, "  }}")?;
        }
        writeln!(f, "}}")
    }
}
