//! Batch driver for the scenweave engine: loads a normalized table plus the
//! optional auxiliary dictionaries, runs the pipeline against synthetic
//! maps and writes the flat emission records as JSON artifacts.

mod emit_files;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use scenweave_core::{run_batch_synthetic, BatchConfig, BatchOutput, RawTable};

#[derive(Debug, Parser)]
#[command(name = "scenweave", version = "0.1.0")]
#[command(about = "Generalize logical scenario tables into concrete simulator scenarios")]
struct Args {
    /// Normalized scenario table (JSON: {"columns": [...], "rows": [[...]]})
    #[arg(long)]
    table: PathBuf,

    /// Batch configuration file (JSON, partial documents allowed)
    #[arg(long)]
    config: Option<PathBuf>,

    /// User-settings overrides merged over the configuration (JSON object)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Output directory for behavior and road records
    #[arg(long, default_value = "out")]
    output: PathBuf,

    /// Worker pool size for artifact writing
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Print the rejection log after the run
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<BatchConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => BatchConfig::default(),
    };
    if let Some(path) = &args.settings {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let overrides: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        cfg = cfg
            .with_overrides(&overrides)
            .context("merging user settings over the configuration")?;
    }
    Ok(cfg)
}

fn print_summary(output: &BatchOutput, elapsed_secs: f64, verbose: bool) {
    let stats = output.stats;
    println!();
    println!("{}", "scenweave batch summary".bold());
    println!("  logical scenarios:   {}", stats.logical_count);
    println!("  expanded scenarios:  {}", stats.expanded_count);
    println!(
        "  surviving scenarios: {}",
        stats.surviving_count.to_string().green()
    );
    println!(
        "  rejected scenarios:  {}",
        stats.rejected_count.to_string().yellow()
    );
    println!("  synthetic maps:      {}", stats.map_count);
    println!("  elapsed:             {elapsed_secs:.2}s");

    if verbose && !output.rejections.is_empty() {
        println!();
        println!("{}", "rejections".bold());
        for (index, rejection) in output.rejections.iter() {
            println!(
                "  {index:>4}. {} [{:?}] {}",
                rejection.concrete_id, rejection.category, rejection.reason
            );
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let started = Instant::now();

    let cfg = load_config(&args)?;
    let text = fs::read_to_string(&args.table)
        .with_context(|| format!("reading table {}", args.table.display()))?;
    let table: RawTable = serde_json::from_str(&text)
        .with_context(|| format!("parsing table {}", args.table.display()))?;

    let output = run_batch_synthetic(&table, &cfg).context("running the batch")?;

    emit_files::write_artifacts(&output, &args.output, args.workers)
        .context("writing emission artifacts")?;

    print_summary(&output, started.elapsed().as_secs_f64(), args.verbose);
    Ok(())
}
