// indexing.rs — Symbols, index expressions, and the scoped indexing context
//
// An `IndexingContext` maps symbols to concrete integers for the duration of
// one lowering pass. At most one context is active per thread; it is
// acquired through a guard that releases on every exit path (including
// errors and unwinding), so a failed pass never leaks bindings into the next.
//
// Rebinding an already-bound symbol fails, even with an identical value.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::diag::{CodegenError, LowerError, UnboundSymbolError, ValidationError};

// ── Symbols ─────────────────────────────────────────────────────────────────

/// A named symbolic index variable (e.g. `M`, `BLOCK_K`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Index expressions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Division rounding toward negative infinity.
    FloorDiv,
    /// Remainder with the sign of the divisor.
    Mod,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::FloorDiv | BinOp::Mod => 2,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
        }
    }
}

/// A symbolic shape/index expression.
///
/// Serialized as its textual form and parsed back on load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndexExpr {
    Const(i64),
    Sym(Symbol),
    Neg(Box<IndexExpr>),
    Binary(BinOp, Box<IndexExpr>, Box<IndexExpr>),
}

impl IndexExpr {
    pub fn sym(name: &str) -> Self {
        IndexExpr::Sym(Symbol::new(name))
    }

    pub fn binary(op: BinOp, lhs: IndexExpr, rhs: IndexExpr) -> Self {
        IndexExpr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn parse(source: &str) -> Result<Self, ValidationError> {
        crate::parser::parse_index_expr(source)
    }

    /// Parse a list of expressions, e.g. a shape `["M", "K * 2"]`.
    pub fn parse_all<S: AsRef<str>>(sources: &[S]) -> Result<Vec<Self>, ValidationError> {
        sources.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            IndexExpr::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// Symbols referenced by the expression, in first-occurrence order.
    pub fn free_symbols(&self) -> Vec<&Symbol> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a Symbol>) {
        match self {
            IndexExpr::Const(_) => {}
            IndexExpr::Sym(s) => {
                if !out.contains(&s) {
                    out.push(s);
                }
            }
            IndexExpr::Neg(e) => e.collect_symbols(out),
            IndexExpr::Binary(_, l, r) => {
                l.collect_symbols(out);
                r.collect_symbols(out);
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            IndexExpr::Binary(op, _, _) => op.precedence(),
            IndexExpr::Neg(_) => 3,
            IndexExpr::Const(v) if *v < 0 => 3,
            IndexExpr::Const(_) | IndexExpr::Sym(_) => 4,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parenthesize: bool) -> fmt::Result {
        if parenthesize {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexExpr::Const(v) => write!(f, "{v}"),
            IndexExpr::Sym(s) => write!(f, "{s}"),
            IndexExpr::Neg(e) => {
                f.write_str("-")?;
                // A bare literal after "-" would read back as a negative constant.
                e.fmt_child(f, e.precedence() < 3 || matches!(**e, IndexExpr::Const(_)))
            }
            IndexExpr::Binary(op, l, r) => {
                let p = op.precedence();
                l.fmt_child(f, l.precedence() < p)?;
                write!(f, " {} ", op.symbol())?;
                r.fmt_child(f, r.precedence() <= p)
            }
        }
    }
}

impl From<i64> for IndexExpr {
    fn from(v: i64) -> Self {
        IndexExpr::Const(v)
    }
}

impl TryFrom<String> for IndexExpr {
    type Error = ValidationError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        IndexExpr::parse(&source)
    }
}

impl From<IndexExpr> for String {
    fn from(expr: IndexExpr) -> Self {
        expr.to_string()
    }
}

// ── Indexing context ────────────────────────────────────────────────────────

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Symbol bindings for one lowering pass. Obtain one through
/// [`IndexingContext::acquire`] or [`IndexingContext::scope`].
#[derive(Debug)]
pub struct IndexingContext {
    bindings: BTreeMap<Symbol, i64>,
}

/// Exclusive handle on the thread's active indexing context.
///
/// Dropping the guard releases the context. The guard is `!Send`: the
/// active flag it owns is thread-local.
#[derive(Debug)]
pub struct ContextGuard {
    ctx: IndexingContext,
    _thread_bound: PhantomData<*const ()>,
}

impl IndexingContext {
    /// Activate a fresh, empty context on this thread.
    pub fn acquire() -> Result<ContextGuard, LowerError> {
        ACTIVE.with(|active| {
            if active.get() {
                return Err(CodegenError::ContextAlreadyActive.into());
            }
            active.set(true);
            debug!("indexing context acquired");
            Ok(ContextGuard {
                ctx: IndexingContext {
                    bindings: BTreeMap::new(),
                },
                _thread_bound: PhantomData,
            })
        })
    }

    /// Run `f` with a fresh active context, releasing it afterwards.
    pub fn scope<R>(
        f: impl FnOnce(&mut IndexingContext) -> Result<R, LowerError>,
    ) -> Result<R, LowerError> {
        let mut guard = Self::acquire()?;
        f(&mut guard)
    }

    /// Whether a context is currently active on this thread.
    pub fn is_active() -> bool {
        ACTIVE.with(|active| active.get())
    }

    /// Record a concrete binding. Fails if the symbol is already bound.
    pub fn bind_constant(
        &mut self,
        symbol: impl Into<Symbol>,
        value: i64,
    ) -> Result<(), LowerError> {
        let symbol = symbol.into();
        if let Some(&existing) = self.bindings.get(&symbol) {
            return Err(CodegenError::SymbolAlreadyBound {
                symbol,
                existing,
                new: value,
            }
            .into());
        }
        trace!(symbol = %symbol, value, "symbol bound");
        self.bindings.insert(symbol, value);
        Ok(())
    }

    pub fn resolve(&self, symbol: &Symbol) -> Result<i64, UnboundSymbolError> {
        self.bindings
            .get(symbol)
            .copied()
            .ok_or_else(|| UnboundSymbolError {
                symbol: symbol.clone(),
            })
    }

    pub fn get(&self, symbol: &Symbol) -> Option<i64> {
        self.bindings.get(symbol).copied()
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&Symbol, i64)> {
        self.bindings.iter().map(|(s, v)| (s, *v))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Evaluate an expression under the current bindings.
    pub fn eval(&self, expr: &IndexExpr) -> Result<i64, LowerError> {
        let invalid = |reason: &str| -> LowerError {
            CodegenError::InvalidIndexExpr {
                expr: expr.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };
        match expr {
            IndexExpr::Const(v) => Ok(*v),
            IndexExpr::Sym(s) => Ok(self.resolve(s)?),
            IndexExpr::Neg(e) => self
                .eval(e)?
                .checked_neg()
                .ok_or_else(|| invalid("overflow")),
            IndexExpr::Binary(op, l, r) => {
                let a = self.eval(l)?;
                let b = self.eval(r)?;
                match op {
                    BinOp::Add => a.checked_add(b).ok_or_else(|| invalid("overflow")),
                    BinOp::Sub => a.checked_sub(b).ok_or_else(|| invalid("overflow")),
                    BinOp::Mul => a.checked_mul(b).ok_or_else(|| invalid("overflow")),
                    BinOp::FloorDiv => {
                        if b == 0 {
                            return Err(invalid("division by zero"));
                        }
                        floor_div(a, b).ok_or_else(|| invalid("overflow"))
                    }
                    BinOp::Mod => {
                        if b == 0 {
                            return Err(invalid("division by zero"));
                        }
                        floor_mod(a, b).ok_or_else(|| invalid("overflow"))
                    }
                }
            }
        }
    }

    pub fn eval_all(&self, exprs: &[IndexExpr]) -> Result<Vec<i64>, LowerError> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

impl Deref for ContextGuard {
    type Target = IndexingContext;

    fn deref(&self) -> &IndexingContext {
        &self.ctx
    }
}

impl DerefMut for ContextGuard {
    fn deref_mut(&mut self) -> &mut IndexingContext {
        &mut self.ctx
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(false));
        debug!(bindings = self.ctx.bindings.len(), "indexing context released");
    }
}
