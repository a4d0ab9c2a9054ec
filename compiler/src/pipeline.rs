// pipeline.rs — One complete lowering pass
//
// Acquires an indexing context, binds the caller's symbols, binds the kernel
// signature, emits the root graph and finishes the function. The context is
// released on every exit path, so a failed pass leaves no bindings behind.
//
// Also reads kernel description files (JSON) and computes provenance for
// cache-key use.
//
// Preconditions: no indexing context is active on the calling thread.
// Postconditions: on success the module holds one terminated function.
// Failure modes: any `LowerError`; no partial module is returned.
// Side effects: tracing events only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::builder::ModuleBuilder;
use crate::diag::{LowerError, ValidationError};
use crate::emit::{EmitOptions, Emitter, FixedOffsets};
use crate::graph::Trace;
use crate::indexing::{IndexExpr, IndexingContext, Symbol};
use crate::lir::{sha256_hex, Module};
use crate::registry::OpRegistry;
use crate::signature::KernelSignature;

// ── Kernel description files ────────────────────────────────────────────────

/// A traced kernel plus its launch grid and default symbol bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub name: String,
    #[serde(default)]
    pub grid: Vec<IndexExpr>,
    #[serde(default)]
    pub bindings: BTreeMap<String, i64>,
    pub trace: Trace,
}

impl KernelDescriptor {
    /// Parse and validate a kernel description.
    pub fn from_json(text: &str) -> Result<Self, LowerError> {
        let desc: KernelDescriptor = serde_json::from_str(text).map_err(|e| {
            ValidationError::Graph(format!("malformed kernel description: {e}"))
        })?;
        desc.trace.validate()?;
        Ok(desc)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Options for lowering this kernel with its own name and bindings.
    pub fn options(&self) -> LowerOptions {
        LowerOptions {
            name: self.name.clone(),
            bindings: self
                .bindings
                .iter()
                .map(|(s, v)| (Symbol::new(s.as_str()), *v))
                .collect(),
            ..LowerOptions::default()
        }
    }
}

// ── Options and results ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LowerOptions {
    /// Name of the emitted function.
    pub name: String,
    pub emit: EmitOptions,
    /// Bound in order when the pass starts.
    pub bindings: Vec<(Symbol, i64)>,
    /// Start offsets for every access; zero when unset.
    pub offsets: Option<FixedOffsets>,
}

impl Default for LowerOptions {
    fn default() -> Self {
        LowerOptions {
            name: "kernel".to_string(),
            emit: EmitOptions::default(),
            bindings: Vec::new(),
            offsets: None,
        }
    }
}

impl LowerOptions {
    pub fn bind(mut self, symbol: &str, value: i64) -> Self {
        self.bindings.push((Symbol::new(symbol), value));
        self
    }
}

/// Provenance metadata for cache-key use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    /// SHA-256 of the trace listing.
    pub trace_hash: String,
    /// SHA-256 of the emitted IR text.
    pub module_fingerprint: String,
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn compute(trace: &Trace, module: &Module) -> Self {
        Provenance {
            trace_hash: sha256_hex(trace.to_string().as_bytes()),
            module_fingerprint: module.fingerprint(),
            compiler_version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Output of a successful pass.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub module: Module,
    /// Resolved grid sizes.
    pub grid: Vec<i64>,
    /// Number of call nodes dispatched to handlers.
    pub dispatched: usize,
    pub provenance: Provenance,
}

// ── Pass ────────────────────────────────────────────────────────────────────

/// Lower `trace`, launched over `grid`, into a fresh module.
#[instrument(skip_all, fields(kernel = %options.name))]
pub fn lower_kernel(
    trace: &Trace,
    grid: &[IndexExpr],
    registry: &OpRegistry,
    options: &LowerOptions,
) -> Result<Lowered, LowerError> {
    trace.validate()?;

    let mut idxc = IndexingContext::acquire()?;
    for (symbol, value) in &options.bindings {
        idxc.bind_constant(symbol.clone(), *value)?;
    }

    let mut builder = ModuleBuilder::new();
    let mut signature =
        KernelSignature::from_trace(trace, grid.to_vec()).bind(&mut builder, &options.name, &idxc)?;

    let dispatched = {
        let mut emitter = Emitter::new(trace, &mut signature, &mut builder, registry, &idxc)
            .with_options(options.emit.clone());
        if let Some(offsets) = &options.offsets {
            emitter = emitter.with_offsets(offsets.clone());
        }
        emitter.emit()?;
        emitter.finish()?;
        emitter.dispatched()
    };

    let grid = signature.grid().to_vec();
    let module = builder.into_module();
    let provenance = Provenance::compute(trace, &module);
    info!(
        instructions = module.functions.iter().map(|f| f.body.len()).sum::<usize>(),
        values = module.value_count(),
        fingerprint = %provenance.module_fingerprint,
        "kernel lowered"
    );
    Ok(Lowered {
        module,
        grid,
        dispatched,
        provenance,
    })
}

/// Lower a kernel description with `options`.
pub fn lower_descriptor(
    desc: &KernelDescriptor,
    registry: &OpRegistry,
    options: &LowerOptions,
) -> Result<Lowered, LowerError> {
    lower_kernel(&desc.trace, &desc.grid, registry, options)
}
