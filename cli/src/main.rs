//! CDP Simulator CLI
//!
//! Batch driver: loads a configuration, runs the simulation against the
//! in-memory ledger and writes one row per period.

use anyhow::{Context, Result};
use cdp_simulator_core_rs::ledger::MemoryLedger;
use cdp_simulator_core_rs::orchestrator::{Orchestrator, OrchestratorConfig, ResultsTable};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Csv,
    Json,
}

#[derive(Parser)]
#[command(name = "cdp-sim")]
#[command(about = "Agent-based simulator of a collateralized synthetic-asset market")]
#[command(version)]
struct Cli {
    /// TOML configuration file; missing keys take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of periods to simulate
    #[arg(short, long)]
    periods: Option<usize>,

    /// Master RNG seed
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of borrower agents
    #[arg(short, long)]
    agents: Option<usize>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: Format,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<OrchestratorConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => OrchestratorConfig::default(),
    };
    if let Some(periods) = cli.periods {
        config.periods = periods;
    }
    if let Some(seed) = cli.seed {
        config.rng_seed = seed;
    }
    if let Some(agents) = cli.agents {
        config.num_agents = agents;
    }
    Ok(config)
}

fn write_results(table: &ResultsTable, format: Format, output: Option<&PathBuf>) -> Result<()> {
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    match format {
        Format::Csv => table.write_csv(&mut out)?,
        Format::Json => writeln!(out, "{}", table.to_json()?)?,
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let config = load_config(&cli)?;
    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let ledger = MemoryLedger::new(config.ledger.clone(), config.collateral_price.initial);
    let mut orchestrator = Orchestrator::new(config, ledger)?;

    let e = orchestrator.expectations();
    info!(
        collateral_mean = e.collateral_mean,
        collateral_sd = e.collateral_sd,
        target_ratio_mean = e.target_ratio_mean,
        target_ratio_sd = e.target_ratio_sd,
        inattention_mean = e.inattention_mean,
        inattention_sd = e.inattention_sd,
        "opening distributions"
    );

    let mut table = ResultsTable::new(orchestrator.config_hash()?);
    let mut failure = None;
    while !orchestrator.is_complete() {
        match orchestrator.step() {
            Ok(record) => table.push(record),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    // partial results are still written before aborting
    write_results(&table, cli.format, cli.output.as_ref())?;

    if let Some(err) = failure {
        error!(periods_completed = table.len(), "simulation aborted");
        return Err(err).context("simulation aborted");
    }

    let totals = orchestrator.totals();
    info!(
        periods = table.len(),
        config_hash = %table.config_hash,
        synthetic_price = orchestrator.synthetic_price(),
        collateral_added = totals.collateral_added,
        collateral_liquidated = totals.collateral_liquidated,
        redeemed = totals.redeemed,
        "simulation complete"
    );
    Ok(())
}
