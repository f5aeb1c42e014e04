//! PortOpt CLI: optimize allocations from CSV return files.
//!
//! Commands:
//! - `optimize`: bootstrap (default), single or imputed optimization, JSON out
//! - `presets`: list the stock/bond benchmark mixes

mod csv_source;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use portopt_core::{
    select_user_assets, BenchmarkMix, ObjectiveChoice, ReturnMatrix, ReturnSource, WeightVector,
};
use portopt_runner::{compute_metrics, EngineConfig, Orchestrator};
use serde_json::{json, Value};
use tracing::info;

use crate::csv_source::CsvReturnSource;

#[derive(Parser)]
#[command(name = "portopt", about = "PortOpt CLI: robust long-only portfolio allocation")]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize weights over the selected assets and print them as JSON.
    Optimize(OptimizeArgs),
    /// List the benchmark-mix presets accepted by --objective.
    Presets,
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    /// CSV of periodic returns: date column, then one column per asset.
    #[arg(long)]
    returns: PathBuf,

    /// Assets to allocate across (comma separated).
    #[arg(long, value_delimiter = ',', required = true)]
    assets: Vec<String>,

    /// max-sharpe, a stock/bond mix such as 60/40, or vol:<target>.
    #[arg(long, default_value = "max-sharpe")]
    objective: String,

    /// CSV holding the benchmark columns. Defaults to the returns file.
    #[arg(long)]
    benchmark: Option<PathBuf>,

    /// Stock and bond benchmark columns, in that order.
    #[arg(long, value_delimiter = ',', default_value = "acwi,bnd")]
    benchmark_columns: Vec<String>,

    /// Bootstrap replicates (defaults to the config's bootstrap_count).
    #[arg(long)]
    bootstrap: Option<usize>,

    /// One optimization on the data as given, no resampling.
    #[arg(long, default_value_t = false, conflicts_with = "bootstrap")]
    single: bool,

    /// Imputed datasets. Imputation also runs whenever a selected asset has gaps.
    #[arg(long)]
    impute: Option<usize>,

    /// Seed for bootstrap / imputation. Fixed seeds reproduce results.
    #[arg(long)]
    seed: Option<u64>,

    /// Engine configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the JSON here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match cli.command {
        Commands::Optimize(args) => {
            let report = run_optimize(&args)?;
            let text = serde_json::to_string_pretty(&report)?;
            match &args.output {
                Some(path) => std::fs::write(path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{text}"),
            }
            Ok(())
        }
        Commands::Presets => {
            for mix in BenchmarkMix::presets() {
                let [stock, bond] = mix.weights();
                println!(
                    "{:>3.0}/{:<3.0} {mix}",
                    stock * 100.0,
                    bond * 100.0
                );
            }
            Ok(())
        }
    }
}

fn run_optimize(args: &OptimizeArgs) -> Result<Value> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let objective: ObjectiveChoice = args
        .objective
        .parse()
        .with_context(|| format!("invalid --objective '{}'", args.objective))?;

    let full = CsvReturnSource::new(&args.returns)
        .fetch_return_matrix()
        .context("failed to load returns")?;
    let (returns, has_missing) =
        select_user_assets(&args.assets, &full).context("failed to select assets")?;
    let benchmark = load_benchmark(args, &full, &objective)?;
    info!(
        assets = returns.n_cols(),
        periods = returns.n_rows(),
        has_missing,
        objective = %args.objective,
        "inputs loaded"
    );

    let orchestrator = Orchestrator::new(config)?;
    let engine = orchestrator.config();

    if has_missing || args.impute.is_some() {
        let count = args.impute.unwrap_or(engine.impute_count);
        let out = orchestrator.run_imputed(&objective, &returns, benchmark.as_ref(), count, args.seed)?;
        return Ok(json!({
            "mode": "imputed",
            "weights": named_weights(&returns, out.weights.as_ref()),
            "metrics": out.metrics,
            "report": out.report,
        }));
    }

    let (mode, out) = if args.single {
        ("single", orchestrator.run(&objective, &returns, benchmark.as_ref())?)
    } else {
        let count = args.bootstrap.unwrap_or(engine.bootstrap_count);
        (
            "bootstrap",
            orchestrator.run_bootstrap(&objective, &returns, benchmark.as_ref(), count, args.seed)?,
        )
    };
    let metrics = out
        .weights
        .as_ref()
        .map(|w| compute_metrics(&returns, w))
        .transpose()?;
    Ok(json!({
        "mode": mode,
        "weights": named_weights(&returns, out.weights.as_ref()),
        "metrics": metrics,
        "report": out.report,
    }))
}

/// Benchmark columns, only when the objective reads them.
fn load_benchmark(
    args: &OptimizeArgs,
    full: &ReturnMatrix,
    objective: &ObjectiveChoice,
) -> Result<Option<ReturnMatrix>> {
    if !objective.uses_benchmark() {
        return Ok(None);
    }
    let source = match &args.benchmark {
        Some(path) => CsvReturnSource::new(path)
            .fetch_return_matrix()
            .context("failed to load benchmark")?,
        None => full.clone(),
    };
    let bench = source
        .select_columns(&args.benchmark_columns)
        .context("failed to select benchmark columns")?;
    Ok(Some(bench))
}

fn named_weights(returns: &ReturnMatrix, weights: Option<&WeightVector>) -> Value {
    match weights {
        Some(w) => returns
            .columns()
            .iter()
            .zip(w)
            .map(|(name, x)| (name.clone(), json!(x)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
        None => Value::Null,
    }
}
