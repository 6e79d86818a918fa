use std::error::Error;
use std::path::PathBuf;

use clap::Parser;

use absint::front_end::loader;
use absint::middle_end::cfg::ControlFlowGraph;

/// Emit the control-flow graph of a compiled Solidity source unit as DOT.
#[derive(Parser)]
#[command(name = "cfg")]
struct Cli {
    /// Path to the AST JSON written by the compiler
    ast: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let unit = loader::load(&cli.ast)?.validate()?;
    let cfg = ControlFlowGraph::build(&unit)?;
    print!("{}", cfg.to_dot());
    Ok(())
}
