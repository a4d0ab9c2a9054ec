use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wlc::emit::EmitOptions;
use wlc::indexing::Symbol;
use wlc::pipeline::{lower_descriptor, KernelDescriptor, LowerOptions};
use wlc::registry::OpRegistry;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Vector IR text
    Ir,
    /// Traced graph listing
    Graph,
    /// Kernel function signature
    Signature,
    /// Provenance JSON with the module fingerprint
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "wlc",
    version,
    about = "Wave Lowering Compiler — lowers traced tile-kernel graphs to vector IR"
)]
struct Cli {
    /// Kernel description (.json)
    kernel: PathBuf,

    /// Symbol binding SYM=VALUE (repeatable; overrides the file's bindings)
    #[arg(long = "bind", value_parser = parse_binding)]
    bind: Vec<(String, i64)>,

    /// Tile shape for reads, e.g. 16,16
    #[arg(long, value_delimiter = ',')]
    tile: Option<Vec<i64>>,

    /// Kernel function name (defaults to the file's name)
    #[arg(long)]
    name: Option<String>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Debug-level logging
    #[arg(long)]
    verbose: bool,
}

fn parse_binding(s: &str) -> Result<(String, i64), String> {
    let (sym, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SYM=VALUE, got '{s}'"))?;
    let value = value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid value for '{}': {e}", sym.trim()))?;
    Ok((sym.trim().to_string(), value))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "wlc=debug" } else { "wlc=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // ── Load kernel description ──
    let text = match std::fs::read_to_string(&cli.kernel) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("wlc: error: {}: {}", cli.kernel.display(), e);
            std::process::exit(2);
        }
    };
    let desc = match KernelDescriptor::from_json(&text) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("wlc: {}", e.render());
            std::process::exit(1);
        }
    };

    if let EmitStage::Graph = cli.emit {
        print!("{}", desc.trace);
        return;
    }

    // ── Options ──
    let mut bindings: BTreeMap<String, i64> = desc.bindings.clone();
    bindings.extend(cli.bind.iter().cloned());
    let mut emit = EmitOptions::default();
    if let Some(tile) = cli.tile {
        emit.tile_shape = tile;
    }
    let options = LowerOptions {
        name: cli.name.unwrap_or_else(|| desc.name.clone()),
        emit,
        bindings: bindings
            .into_iter()
            .map(|(s, v)| (Symbol::new(s), v))
            .collect(),
        offsets: None,
    };

    // ── Lower ──
    let registry = match OpRegistry::standard() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("wlc: {}", e.render());
            std::process::exit(1);
        }
    };
    let lowered = match lower_descriptor(&desc, &registry, &options) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("wlc: {}", e.render());
            std::process::exit(1);
        }
    };

    match cli.emit {
        EmitStage::Ir => print!("{}", lowered.module),
        EmitStage::Signature => {
            for func in &lowered.module.functions {
                println!("@{}", func.name);
                for p in &func.params {
                    println!("  {} {}: {}", p.value, p.name, p.ty);
                }
                println!("  grid = {:?}", func.grid);
            }
        }
        EmitStage::Fingerprint => match lowered.provenance.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("wlc: error: {e}");
                std::process::exit(2);
            }
        },
        EmitStage::Graph => {}
    }
}
