use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use circuitry::expand::literal;
use circuitry::{CircuitDef, ConstantCache, Diagnostic, EngineConfig, Graph, ModuleRegistry, Session};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "circuitry")]
#[command(about = "Expand, compile and run block/circuit modules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Limits {
    /// JSON file with engine limits
    #[arg(long)]
    config: Option<PathBuf>,
    /// Step budget for one run
    #[arg(long)]
    budget: Option<u64>,
    /// Nodes processed before settling gives up
    #[arg(long)]
    ticks: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a circuit and run it
    Run {
        /// Path to the module JSON file
        module: PathBuf,
        /// Circuit to run
        circuit: String,
        /// Argument literal, once per circuit input
        #[arg(long = "arg")]
        args: Vec<String>,
        #[command(flatten)]
        limits: Limits,
    },
    /// Instantiate every circuit and report all diagnostics
    Check {
        /// Path to the module JSON file
        module: PathBuf,
        #[command(flatten)]
        limits: Limits,
    },
    /// Print the compiled instruction listing of a circuit
    Dump {
        /// Path to the module JSON file
        module: PathBuf,
        /// Circuit to compile
        circuit: String,
        #[command(flatten)]
        limits: Limits,
    },
    /// Evaluate a constant circuit and store its outputs
    Cache {
        /// Path to the module JSON file
        module: PathBuf,
        /// Circuit to evaluate
        circuit: String,
        /// Where to write the cache
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        limits: Limits,
    },
}

/// Circuit definitions as stored on disk.
#[derive(Debug, Deserialize)]
struct ModuleFile {
    circuits: Vec<CircuitDef>,
}

/// Session over the circuits in `module`, plus their names in file order.
fn load_session(module: &Path, limits: &Limits) -> Result<(Session, Vec<Arc<str>>)> {
    let mut config = match &limits.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&json).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(budget) = limits.budget {
        config.step_budget = budget;
    }
    if let Some(ticks) = limits.ticks {
        config.settle_limit = ticks;
    }

    let json = fs::read_to_string(module)
        .with_context(|| format!("reading module {}", module.display()))?;
    let file: ModuleFile = serde_json::from_str(&json)
        .with_context(|| format!("parsing module {}", module.display()))?;
    debug!("loaded {} circuits from {}", file.circuits.len(), module.display());
    let names = file.circuits.iter().map(|def| def.name.clone()).collect();
    let registry = ModuleRegistry::with_builtins().with_definitions(file.circuits);
    Ok((Session::with_config(Arc::new(registry), config), names))
}

fn report<'a>(diagnostics: impl IntoIterator<Item = &'a Diagnostic>) -> usize {
    let mut count = 0;
    for diagnostic in diagnostics {
        eprintln!("{}", diagnostic.render());
        count += 1;
    }
    count
}

fn run(module: &Path, circuit: &str, args: &[String], limits: &Limits) -> Result<ExitCode> {
    let (session, _) = load_session(module, limits)?;
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match literal::parse_auto(session.types(), arg) {
            Ok(value) => values.push(value),
            Err(diagnostic) => {
                report([&diagnostic]);
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    match session.run(circuit, values) {
        Ok(value) => {
            println!("{value}");
            Ok(ExitCode::SUCCESS)
        }
        Err(diagnostic) => {
            report([&diagnostic]);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn check(module: &Path, limits: &Limits) -> Result<ExitCode> {
    let (session, names) = load_session(module, limits)?;
    let mut failures = 0;
    for name in names {
        let mut graph = Graph::new(&session);
        if let Err(diagnostic) = graph.instantiate(&name, &[]) {
            failures += report([&diagnostic]);
            continue;
        }
        graph.settle(session.config().settle_limit);
        let found = report(graph.diagnostics());
        info!("{name}: {} nodes, {found} diagnostics", graph.node_count());
        failures += found;
    }
    if failures > 0 {
        eprintln!("{failures} diagnostics");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn dump(module: &Path, circuit: &str, limits: &Limits) -> Result<ExitCode> {
    let (session, _) = load_session(module, limits)?;
    match session.compile(circuit) {
        Ok(program) => {
            print!("{program}");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            report(&error.diagnostics);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cache(module: &Path, circuit: &str, out: &Path, limits: &Limits) -> Result<ExitCode> {
    let (session, _) = load_session(module, limits)?;
    let mut graph = Graph::new(&session);
    let root = match graph.instantiate(circuit, &[]) {
        Ok(root) => root,
        Err(diagnostic) => {
            report([&diagnostic]);
            return Ok(ExitCode::FAILURE);
        }
    };
    graph.settle(session.config().settle_limit);
    if report(graph.diagnostics()) > 0 {
        return Ok(ExitCode::FAILURE);
    }
    let cache = ConstantCache::capture(&graph, &root);
    if cache.values.len() != root.outputs.len() {
        eprintln!(
            "`{circuit}` is not constant: {} of {} outputs settled",
            cache.values.len(),
            root.outputs.len()
        );
        return Ok(ExitCode::FAILURE);
    }
    fs::write(out, cache.to_json()?).with_context(|| format!("writing {}", out.display()))?;
    eprintln!("Wrote {} values to {}", cache.values.len(), out.display());
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            module,
            circuit,
            args,
            limits,
        } => run(module, circuit, args, limits),
        Commands::Check { module, limits } => check(module, limits),
        Commands::Dump {
            module,
            circuit,
            limits,
        } => dump(module, circuit, limits),
        Commands::Cache {
            module,
            circuit,
            out,
            limits,
        } => cache(module, circuit, out, limits),
    }
}
