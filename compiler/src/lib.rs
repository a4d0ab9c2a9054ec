// wlc — Wave Lowering Compiler
//
// Library root. Lowers a traced tile-kernel graph into a vector IR module:
// indexing context → signature binding → per-node dispatch → finish.

pub mod binding;
pub mod builder;
pub mod diag;
pub mod emit;
pub mod graph;
pub mod handlers;
pub mod id;
pub mod indexing;
pub mod lexer;
pub mod lir;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod signature;
