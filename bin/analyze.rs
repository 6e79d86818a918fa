use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use absint::commons::AnalysisError;
use absint::front_end::loader;
use absint::middle_end::analysis::collecting::{AnalysisConfig, CollectingSemantics};
use absint::middle_end::analysis::ConstValue;
use absint::middle_end::cfg::ControlFlowGraph;

/// Interval analysis of a compiled Solidity source unit.
#[derive(Parser)]
#[command(name = "analyze")]
struct Cli {
    /// Path to the AST JSON written by the compiler
    ast: PathBuf,

    /// Function to analyze; defaults to the first function in the unit
    #[arg(long)]
    function: Option<String>,

    /// Pin a parameter: NAME=<int>, NAME=<lo>:<hi>, or NAME=top (repeatable)
    #[arg(long = "const", value_name = "NAME=VALUE")]
    constants: Vec<String>,

    /// Apply widening at loop heads after this many rounds
    #[arg(long)]
    widen_after: Option<usize>,

    /// Abort after this many rounds without a fixed point
    #[arg(long, default_value_t = 10_000)]
    max_rounds: usize,

    /// Print only the states at this node
    #[arg(long)]
    point: Option<String>,
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false).without_time();
    Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt_layer)
        .init();
}

fn parse_constant(spec: &str) -> Result<(String, ConstValue), String> {
    let (name, value) = spec
        .split_once('=')
        .ok_or_else(|| format!("`{spec}` is not of the form NAME=VALUE"))?;
    let parse_int = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| format!("`{s}` is not an integer in `{spec}`"))
    };
    let value = if value == "top" {
        ConstValue::Top
    } else if let Some((lo, hi)) = value.split_once(':') {
        ConstValue::Range(parse_int(lo)?, parse_int(hi)?)
    } else {
        ConstValue::Int(parse_int(value)?)
    };
    Ok((name.to_string(), value))
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();

    let unit = loader::load(&cli.ast)?.validate()?;
    let cfg = ControlFlowGraph::build(&unit)?;

    let bounds = match &cli.function {
        Some(name) => cfg
            .function_bounds(name)
            .ok_or_else(|| format!("no function named `{name}` in the source unit"))?,
        None => cfg
            .functions()
            .into_iter()
            .next()
            .ok_or("the source unit defines no functions")?,
    };
    tracing::info!(function = %bounds.name, entry = %bounds.entry, "analyzing");

    let mut run =
        CollectingSemantics::new(&cfg, &bounds.entry, &bounds.exit).with_config(AnalysisConfig {
            widening_after: cli.widen_after,
            max_rounds: Some(cli.max_rounds),
        });
    for spec in &cli.constants {
        let (name, value) = parse_constant(spec)?;
        run.set_constant(&name, value);
    }

    match run.compute() {
        Ok(rounds) => println!("fixed point after {rounds} rounds\n"),
        // report whatever was computed before the budget ran out
        Err(AnalysisError::IterationBudgetExhausted(rounds)) => {
            eprintln!("warning: no fixed point after {rounds} rounds, states are not final\n");
        }
        Err(err) => return Err(err.into()),
    }

    let points: Vec<String> = match &cli.point {
        Some(point) => vec![point.clone()],
        None => run.states.node_ids().cloned().collect(),
    };
    for id in points {
        println!("== {id}");
        if let Some(state) = run.states.final_entry(&id) {
            print!("{}", indent(&run.render_state(state), "  entry  "));
        }
        if let Some(exits) = run.states.exit_map(&id, run.states.iteration()) {
            for (next, state) in exits {
                let prefix = format!("  exit[{next}]  ");
                print!("{}", indent(&run.render_state(state), &prefix));
            }
        }
    }

    Ok(())
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}\n"))
        .collect()
}
