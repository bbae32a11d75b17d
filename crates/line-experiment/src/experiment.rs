//! Experiment runner for line formation.
//!
//! Orchestrates the experiment lifecycle:
//! 1. Build the swarm configuration for a protocol, size and seed
//! 2. Lay out the swarm
//! 3. Drive rounds until convergence or the round bound
//! 4. Collect metrics and results

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use swarm_kernel::line;
use swarm_kernel::{ProtocolKind, RunOutcome, Swarm, SwarmConfig, SwarmSnapshot};

use crate::results::{ExperimentConfig, ExperimentResult, RoundMetrics};

/// Configuration for the experiment runner.
#[derive(Debug, Clone)]
pub struct ExperimentRunnerConfig {
    /// Base swarm configuration; protocol, size and seed are set per run
    pub swarm: SwarmConfig,
    /// Maximum rounds before reporting the run as stalled
    pub max_rounds: u64,
    /// Keep per-round metrics in the result
    pub record_rounds: bool,
}

impl Default for ExperimentRunnerConfig {
    fn default() -> Self {
        let swarm = SwarmConfig::default();
        Self {
            max_rounds: swarm.max_rounds,
            swarm,
            record_rounds: true,
        }
    }
}

/// Experiment runner.
pub struct ExperimentRunner {
    config: ExperimentRunnerConfig,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentRunnerConfig) -> Self {
        Self { config }
    }

    /// Swarm configuration for one run.
    pub fn swarm_config(&self, protocol: ProtocolKind, agent_count: usize, seed: u64) -> SwarmConfig {
        let mut swarm = self.config.swarm.clone();
        swarm.protocol = protocol;
        swarm.agent_count = agent_count;
        swarm.seed = seed;
        swarm.seed_agents = swarm.seed_agents.min(agent_count);
        swarm
    }

    /// Run a single experiment.
    pub fn run(
        &self,
        protocol: ProtocolKind,
        agent_count: usize,
        trial: usize,
        seed: Option<u64>,
    ) -> Result<ExperimentResult> {
        self.execute(protocol, agent_count, trial, seed, None)
    }

    /// Run a single experiment and keep every committed table, starting
    /// with the initial one.
    pub fn run_traced(
        &self,
        protocol: ProtocolKind,
        agent_count: usize,
        trial: usize,
        seed: Option<u64>,
    ) -> Result<(ExperimentResult, Vec<SwarmSnapshot>)> {
        let mut tables = Vec::new();
        let result = self.execute(protocol, agent_count, trial, seed, Some(&mut tables))?;
        Ok((result, tables))
    }

    fn execute(
        &self,
        protocol: ProtocolKind,
        agent_count: usize,
        trial: usize,
        seed: Option<u64>,
        mut tables: Option<&mut Vec<SwarmSnapshot>>,
    ) -> Result<ExperimentResult> {
        let seed = seed.unwrap_or_else(rand::random);
        let swarm_config = self.swarm_config(protocol, agent_count, seed);
        let mut swarm = Swarm::new(swarm_config.clone())
            .with_context(|| format!("invalid swarm configuration for {protocol} with {agent_count} agents"))?;

        info!(
            protocol = %protocol,
            agents = agent_count,
            trial,
            seed,
            "Starting experiment"
        );

        let started_at = Utc::now();
        if let Some(tables) = tables.as_deref_mut() {
            tables.push(swarm.snapshot());
        }

        let mut round_metrics = Vec::new();
        let mut event_counts: BTreeMap<String, usize> = BTreeMap::new();
        let record_rounds = self.config.record_rounds;

        let outcome = swarm.run_with(self.config.max_rounds, |result, agents| {
            for event in &result.events {
                *event_counts.entry(event.kind().to_string()).or_insert(0) += 1;
            }
            if record_rounds {
                let chains = line::chains(agents);
                round_metrics.push(RoundMetrics {
                    round: result.round,
                    census: result.census.clone(),
                    chains: chains.len(),
                    longest_chain: chains.iter().map(Vec::len).max().unwrap_or(0),
                    events: result.events.len(),
                    displacement: result.displacement,
                });
            }
            if let Some(tables) = tables.as_deref_mut() {
                tables.push(SwarmSnapshot {
                    round: result.round,
                    agents: agents.to_vec(),
                });
            }
            debug!(
                round = result.round,
                events = result.events.len(),
                displacement = result.displacement,
                "Round complete"
            );
        });

        let line_order = match outcome {
            RunOutcome::Converged { .. } => line::chain_order(swarm.agents()).ok(),
            RunOutcome::Stalled { rounds } => {
                warn!(rounds, seed, "Run stalled before forming a line");
                None
            }
        };

        Ok(ExperimentResult {
            config: ExperimentConfig {
                protocol: protocol.name().to_string(),
                agent_count,
                tie_break: swarm_config.tie_break.name().to_string(),
                layout: swarm_config.layout.name().to_string(),
                sensing_radius: swarm_config.sensing_radius,
                communication_radius: swarm_config.communication_radius,
                max_step: swarm_config.max_step,
                trial,
                seed,
            },
            started_at,
            ended_at: Utc::now(),
            rounds: outcome.rounds(),
            converged: outcome.converged(),
            line_order,
            event_counts,
            round_metrics,
        })
    }
}
