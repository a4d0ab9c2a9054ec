// diag.rs — Error taxonomy for the lowering pass
//
// Three leaf categories, all fatal to the current pass:
//   - ValidationError: malformed operation arguments or graph structure,
//     detected before any lowering logic runs.
//   - CodegenError: unregistered ops, shape/rank mismatches, double binding,
//     subgraph capture arity, emitter misuse.
//   - UnboundSymbolError: a shape/grid/offset expression names a symbol with
//     no binding in the active indexing context.
// `LowerError::At` attaches the originating node and op kind.
//
// Codes are stable: once assigned, a code keeps its meaning.

use std::fmt;

use thiserror::Error;

use crate::graph::OpKind;
use crate::id::{GraphId, NodeId};
use crate::indexing::Symbol;

pub type Result<T> = std::result::Result<T, LowerError>;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0200`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const MALFORMED_ARGUMENTS: DiagCode = DiagCode("E0100");
    pub const MALFORMED_ARGUMENT_KIND: DiagCode = DiagCode("E0101");
    pub const INVALID_GRAPH: DiagCode = DiagCode("E0102");
    pub const INDEX_SYNTAX: DiagCode = DiagCode("E0103");

    pub const UNREGISTERED_OP: DiagCode = DiagCode("E0200");
    pub const UNIMPLEMENTED_OP: DiagCode = DiagCode("E0201");
    pub const DUPLICATE_HANDLER: DiagCode = DiagCode("E0202");
    pub const ALREADY_BOUND: DiagCode = DiagCode("E0203");
    pub const UNRESOLVED_NODE: DiagCode = DiagCode("E0204");
    pub const MULTIPLE_VALUES: DiagCode = DiagCode("E0205");
    pub const FREE_VAR_ARITY: DiagCode = DiagCode("E0206");
    pub const RANK_MISMATCH: DiagCode = DiagCode("E0207");
    pub const TYPE_MISMATCH: DiagCode = DiagCode("E0208");
    pub const INVALID_INDEX_EXPR: DiagCode = DiagCode("E0209");
    pub const EMITTER_STATE: DiagCode = DiagCode("E0210");
    pub const SUBGRAPH_DEPTH: DiagCode = DiagCode("E0211");
    pub const RESULT_INDEX: DiagCode = DiagCode("E0212");
    pub const UNKNOWN_REFERENCE: DiagCode = DiagCode("E0213");
    pub const INVALID_SHAPE: DiagCode = DiagCode("E0214");

    pub const UNBOUND_SYMBOL: DiagCode = DiagCode("E0300");
    pub const SYMBOL_ALREADY_BOUND: DiagCode = DiagCode("E0301");
    pub const CONTEXT_ALREADY_ACTIVE: DiagCode = DiagCode("E0302");
}

// ── Leaf errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed arguments: expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("malformed argument {position}: expected {expected}, got {found}")]
    ArgumentKind {
        position: usize,
        expected: &'static str,
        found: String,
    },

    #[error("invalid graph: {0}")]
    Graph(String),

    #[error("invalid index expression '{text}': {message}")]
    IndexSyntax { text: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("no handler registered for op '{op}'")]
    UnregisteredOp { op: OpKind },

    #[error("op '{op}' has no lowering")]
    UnimplementedOp { op: OpKind },

    #[error("handler for op '{op}' registered twice")]
    DuplicateHandler { op: OpKind },

    #[error("cannot rebind node {node}: already bound")]
    AlreadyBound { node: NodeId },

    #[error("node {node} has no bound value and is not a kernel parameter")]
    UnresolvedNode { node: NodeId },

    #[error("node {node} is bound to {count} values, expected exactly one")]
    MultipleValues { node: NodeId, count: usize },

    #[error("expected {expected} implicit capture args for {graph}, got {actual}")]
    FreeVarArity {
        graph: GraphId,
        expected: usize,
        actual: usize,
    },

    #[error("mismatched {what}: expected rank {expected}, got {actual}")]
    RankMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("cannot evaluate index expression '{expr}': {reason}")]
    InvalidIndexExpr { expr: String, reason: String },

    #[error("symbol '{symbol}' already bound to {existing}, cannot rebind to {new}")]
    SymbolAlreadyBound {
        symbol: Symbol,
        existing: i64,
        new: i64,
    },

    #[error("an indexing context is already active on this thread")]
    ContextAlreadyActive,

    #[error("cannot {operation} while emitter is {state}")]
    InvalidEmitterState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("subgraph nesting exceeds depth limit {limit}")]
    SubgraphDepthExceeded { limit: usize },

    #[error("result index {index} out of range for node {node} with {count} results")]
    ResultIndexOutOfRange {
        node: NodeId,
        index: i64,
        count: usize,
    },

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("{what} shape {dims:?} has a non-positive dimension")]
    InvalidShape { what: &'static str, dims: Vec<i64> },
}

impl CodegenError {
    /// Pass `dims` through if every dimension is positive. Rank 0 is valid.
    pub fn positive_shape(what: &'static str, dims: Vec<i64>) -> std::result::Result<Vec<i64>, CodegenError> {
        if dims.iter().all(|d| *d > 0) {
            Ok(dims)
        } else {
            Err(CodegenError::InvalidShape { what, dims })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unbound symbol '{symbol}'")]
pub struct UnboundSymbolError {
    pub symbol: Symbol,
}

// ── Site ─────────────────────────────────────────────────────────────────

/// The call node whose lowering failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub node: NodeId,
    pub name: String,
    pub op: OpKind,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' ({})", self.node, self.name, self.op)
    }
}

// ── Umbrella error ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Codegen,
    UnboundSymbol,
}

#[derive(Debug, Clone, Error)]
pub enum LowerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    UnboundSymbol(#[from] UnboundSymbolError),

    #[error("at {site}: {source}")]
    At {
        site: Site,
        source: Box<LowerError>,
    },
}

impl LowerError {
    /// Attach the originating call site. The innermost site wins: an error
    /// that already carries a site is returned unchanged.
    pub fn at(self, site: Site) -> Self {
        match self {
            LowerError::At { .. } => self,
            other => LowerError::At {
                site,
                source: Box::new(other),
            },
        }
    }

    /// The error without any attached site.
    pub fn root(&self) -> &LowerError {
        match self {
            LowerError::At { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn site(&self) -> Option<&Site> {
        match self {
            LowerError::At { site, .. } => Some(site),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.root() {
            LowerError::Validation(_) => ErrorClass::Validation,
            LowerError::Codegen(_) => ErrorClass::Codegen,
            LowerError::UnboundSymbol(_) => ErrorClass::UnboundSymbol,
            LowerError::At { .. } => unreachable!("root() strips sites"),
        }
    }

    pub fn as_codegen(&self) -> Option<&CodegenError> {
        match self.root() {
            LowerError::Codegen(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self.root() {
            LowerError::Validation(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_unbound_symbol(&self) -> Option<&UnboundSymbolError> {
        match self.root() {
            LowerError::UnboundSymbol(e) => Some(e),
            _ => None,
        }
    }

    pub fn code(&self) -> DiagCode {
        match self.root() {
            LowerError::Validation(e) => match e {
                ValidationError::Arity { .. } => codes::MALFORMED_ARGUMENTS,
                ValidationError::ArgumentKind { .. } => codes::MALFORMED_ARGUMENT_KIND,
                ValidationError::Graph(_) => codes::INVALID_GRAPH,
                ValidationError::IndexSyntax { .. } => codes::INDEX_SYNTAX,
            },
            LowerError::Codegen(e) => match e {
                CodegenError::UnregisteredOp { .. } => codes::UNREGISTERED_OP,
                CodegenError::UnimplementedOp { .. } => codes::UNIMPLEMENTED_OP,
                CodegenError::DuplicateHandler { .. } => codes::DUPLICATE_HANDLER,
                CodegenError::AlreadyBound { .. } => codes::ALREADY_BOUND,
                CodegenError::UnresolvedNode { .. } => codes::UNRESOLVED_NODE,
                CodegenError::MultipleValues { .. } => codes::MULTIPLE_VALUES,
                CodegenError::FreeVarArity { .. } => codes::FREE_VAR_ARITY,
                CodegenError::RankMismatch { .. } => codes::RANK_MISMATCH,
                CodegenError::TypeMismatch { .. } => codes::TYPE_MISMATCH,
                CodegenError::InvalidIndexExpr { .. } => codes::INVALID_INDEX_EXPR,
                CodegenError::SymbolAlreadyBound { .. } => codes::SYMBOL_ALREADY_BOUND,
                CodegenError::ContextAlreadyActive => codes::CONTEXT_ALREADY_ACTIVE,
                CodegenError::InvalidEmitterState { .. } => codes::EMITTER_STATE,
                CodegenError::SubgraphDepthExceeded { .. } => codes::SUBGRAPH_DEPTH,
                CodegenError::ResultIndexOutOfRange { .. } => codes::RESULT_INDEX,
                CodegenError::UnknownReference(_) => codes::UNKNOWN_REFERENCE,
                CodegenError::InvalidShape { .. } => codes::INVALID_SHAPE,
            },
            LowerError::UnboundSymbol(_) => codes::UNBOUND_SYMBOL,
            LowerError::At { .. } => unreachable!("root() strips sites"),
        }
    }

    /// One-line rendering with the stable code, e.g. `error[E0200]: ...`.
    pub fn render(&self) -> String {
        format!("error[{}]: {}", self.code(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Site {
        Site {
            node: NodeId(3),
            name: "mma_0".to_string(),
            op: OpKind::new("mma"),
        }
    }

    #[test]
    fn display_leaf_errors() {
        let e: LowerError = ValidationError::Arity {
            expected: 2,
            actual: 3,
        }
        .into();
        assert_eq!(
            e.to_string(),
            "malformed arguments: expected 2 arguments, got 3"
        );
        let e: LowerError = UnboundSymbolError {
            symbol: Symbol::new("M"),
        }
        .into();
        assert_eq!(e.to_string(), "unbound symbol 'M'");
    }

    #[test]
    fn site_wraps_once_and_innermost_wins() {
        let leaf: LowerError = CodegenError::UnregisteredOp {
            op: OpKind::new("frob"),
        }
        .into();
        let inner = leaf.at(site());
        let outer_site = Site {
            node: NodeId(9),
            name: "region_0".to_string(),
            op: OpKind::new("region"),
        };
        let outer = inner.at(outer_site);
        assert_eq!(outer.site().map(|s| s.node), Some(NodeId(3)));
        assert_eq!(
            outer.to_string(),
            "at n3 'mma_0' (mma): no handler registered for op 'frob'"
        );
        assert_eq!(outer.class(), ErrorClass::Codegen);
    }

    #[test]
    fn codes_follow_root() {
        let e = LowerError::from(CodegenError::RankMismatch {
            what: "slice assignment",
            expected: 2,
            actual: 1,
        })
        .at(site());
        assert_eq!(e.code(), codes::RANK_MISMATCH);
        assert_eq!(
            e.render(),
            "error[E0207]: at n3 'mma_0' (mma): mismatched slice assignment: expected rank 2, got 1"
        );
    }

    #[test]
    fn non_positive_dimension_is_an_invalid_shape() {
        assert_eq!(CodegenError::positive_shape("tile", vec![]), Ok(vec![]));
        assert_eq!(CodegenError::positive_shape("tile", vec![4, 1]), Ok(vec![4, 1]));
        let err = CodegenError::positive_shape("register", vec![4, 0]).unwrap_err();
        assert_eq!(
            LowerError::from(err).render(),
            "error[E0214]: register shape [4, 0] has a non-positive dimension"
        );
    }
}
