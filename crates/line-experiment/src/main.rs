//! Line Formation Experiment CLI.
//!
//! Commands:
//! - single: Run a single experiment
//! - grid: Run a full grid (protocols × swarm sizes × trials)
//! - layout: Print the initial positions a configuration produces

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use line_experiment::experiment::{ExperimentRunner, ExperimentRunnerConfig};
use line_experiment::results::GridResults;
use swarm_kernel::{ProtocolKind, SwarmConfig, TieBreakRule};

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "line-experiment")]
#[command(version)]
#[command(about = "Decentralized swarm line formation experiments")]
struct Cli {
    /// Base swarm configuration (TOML)
    #[arg(long, env = "LINE_EXPERIMENT_CONFIG")]
    config: Option<PathBuf>,

    /// Tie-break comparator: lowest_id, seeded, round_robin
    #[arg(long)]
    tie_break: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single experiment
    Single {
        /// Protocol to use
        #[arg(long, default_value = "climbing")]
        protocol: String,

        /// Number of agents
        #[arg(long, default_value = "30")]
        agents: usize,

        /// Maximum rounds (defaults to the configuration's bound)
        #[arg(long)]
        max_rounds: Option<u64>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write every committed table to this JSON file
        #[arg(long)]
        trace: Option<PathBuf>,
    },

    /// Run grid experiment
    Grid {
        /// Number of trials per configuration
        #[arg(long, default_value = "5")]
        trials: usize,

        /// Agent counts to test (comma-separated)
        #[arg(long, default_value = "8,16,32", value_delimiter = ',')]
        agents: Vec<usize>,

        /// Protocols to test (comma-separated). Default: both
        #[arg(long, value_delimiter = ',')]
        protocols: Option<Vec<String>>,

        /// Maximum rounds (defaults to the configuration's bound)
        #[arg(long)]
        max_rounds: Option<u64>,

        /// Seed of the first trial; trial i uses seed + i
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output file for results
        #[arg(long, default_value = "results.json")]
        output: PathBuf,
    },

    /// Print the initial layout
    Layout {
        /// Number of agents
        #[arg(long, default_value = "30")]
        agents: usize,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut base = match &cli.config {
        Some(path) => SwarmConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SwarmConfig::default(),
    };
    if let Some(rule) = &cli.tie_break {
        base.tie_break = parse_tie_break(rule)?;
    }

    match cli.command {
        Commands::Single {
            protocol,
            agents,
            max_rounds,
            seed,
            trace,
        } => {
            let protocol = parse_protocol(&protocol)?;
            let runner = ExperimentRunner::new(ExperimentRunnerConfig {
                max_rounds: max_rounds.unwrap_or(base.max_rounds),
                swarm: base,
                record_rounds: true,
            });

            let result = match &trace {
                Some(path) => {
                    let (result, tables) = runner.run_traced(protocol, agents, 0, seed)?;
                    let json = serde_json::to_string_pretty(&tables)?;
                    std::fs::write(path, json)
                        .with_context(|| format!("writing trace to {}", path.display()))?;
                    info!(tables = tables.len(), path = %path.display(), "Trace written");
                    result
                }
                None => runner.run(protocol, agents, 0, seed)?,
            };

            println!("\n=== Experiment Result ===");
            println!("Protocol: {}", result.config.protocol);
            println!("Agents: {}", result.config.agent_count);
            println!("Tie-break: {}", result.config.tie_break);
            println!("Seed: {}", result.config.seed);
            println!("Converged: {}", result.converged);
            println!("Rounds: {}", result.rounds);
            if let Some(order) = &result.line_order {
                let order: Vec<String> = order.iter().map(|id| id.to_string()).collect();
                println!("Line: {}", order.join(" - "));
            }

            if !result.event_counts.is_empty() {
                println!("\nEvents:");
                for (kind, count) in &result.event_counts {
                    println!("  {}: {}", kind, count);
                }
            }

            println!("\nPer-Round Metrics (every 10th):");
            println!(
                "{:>6} {:>8} {:>8} {:>8} {:>10}",
                "Round", "Chains", "Longest", "Events", "Moved"
            );
            for m in result
                .round_metrics
                .iter()
                .filter(|m| m.round % 10 == 0 || m.round == result.rounds)
            {
                println!(
                    "{:>6} {:>8} {:>8} {:>8} {:>10.3}",
                    m.round, m.chains, m.longest_chain, m.events, m.displacement
                );
            }
        }

        Commands::Grid {
            trials,
            agents,
            protocols,
            max_rounds,
            seed,
            output,
        } => {
            let protocols: Vec<ProtocolKind> = match protocols {
                Some(names) => names
                    .iter()
                    .map(|s| parse_protocol(s))
                    .collect::<Result<_>>()?,
                None => vec![ProtocolKind::Climbing, ProtocolKind::Merging],
            };
            info!(
                trials,
                protocols = protocols.len(),
                sizes = agents.len(),
                "Starting grid experiment"
            );

            let runner = ExperimentRunner::new(ExperimentRunnerConfig {
                max_rounds: max_rounds.unwrap_or(base.max_rounds),
                swarm: base,
                record_rounds: false,
            });

            let mut results = GridResults::new();
            let total = protocols.len() * agents.len() * trials;
            let mut completed = 0;

            for protocol in &protocols {
                for &agent_count in &agents {
                    for trial in 0..trials {
                        let trial_seed = seed.wrapping_add(trial as u64);
                        let result = runner.run(*protocol, agent_count, trial, Some(trial_seed))?;
                        completed += 1;
                        info!(
                            progress = format!("{}/{}", completed, total),
                            protocol = %protocol,
                            agents = agent_count,
                            trial,
                            converged = result.converged,
                            rounds = result.rounds,
                            "Completed run"
                        );
                        results.add(result);
                    }
                }
            }

            results.compute_summary();
            let output_path = timestamped_path(&output);
            results.save(&output_path)?;

            println!("\n=== Grid Experiment Complete ===");
            println!("Results saved to: {}", output_path.display());
            println!("\nSummary:");
            let mut keys: Vec<&String> = results.summary.keys().collect();
            keys.sort();
            for key in keys {
                let summary = &results.summary[key];
                println!(
                    "  {}: converged={:.1}% (±{:.1}), avg_rounds={:.1} (±{:.1}), range={}..{}",
                    key,
                    summary.convergence_rate * 100.0,
                    summary.convergence_rate_se * 100.0,
                    summary.avg_rounds,
                    summary.avg_rounds_se,
                    summary.min_rounds,
                    summary.max_rounds
                );
            }
        }

        Commands::Layout { agents, seed } => {
            let positions = base.layout.generate(agents, base.world_size, seed);
            println!("# layout={} agents={} seed={}", base.layout.name(), agents, seed);
            for (id, p) in positions.iter().enumerate() {
                println!("{:>4} {:>10.4} {:>10.4}", id, p.x, p.y);
            }
        }
    }

    Ok(())
}

fn parse_protocol(s: &str) -> Result<ProtocolKind> {
    match s.parse() {
        Ok(protocol) => Ok(protocol),
        Err(e) => bail!("{e}. Valid: climbing, merging"),
    }
}

fn parse_tie_break(s: &str) -> Result<TieBreakRule> {
    match s.to_lowercase().as_str() {
        "lowest_id" | "lowest" | "id" => Ok(TieBreakRule::LowestId),
        "seeded" | "random" => Ok(TieBreakRule::Seeded),
        "round_robin" | "rr" => Ok(TieBreakRule::RoundRobin),
        _ => bail!(
            "Unknown tie-break: {}. Valid: lowest_id, seeded, round_robin",
            s
        ),
    }
}
