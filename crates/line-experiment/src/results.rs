//! Results collection and output for line formation experiments.
//!
//! Captures metrics like:
//! - Rounds to convergence
//! - Role census and displacement per round
//! - Protocol event counts (claims, contests, joins, splices)

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use swarm_kernel::{AgentId, Role};

/// Configuration echoed into every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Protocol name
    pub protocol: String,
    /// Number of agents
    pub agent_count: usize,
    /// Tie-break comparator name
    pub tie_break: String,
    /// Initial layout name
    pub layout: String,
    pub sensing_radius: f64,
    pub communication_radius: f64,
    pub max_step: f64,
    /// Trial number (for repeated experiments)
    pub trial: usize,
    /// Seed the run was laid out with
    pub seed: u64,
}

/// Metrics for a single round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub round: u64,
    /// Agents per role after the round
    pub census: BTreeMap<Role, usize>,
    /// Chains (including lone agents) after the round
    pub chains: usize,
    /// Length of the longest chain
    pub longest_chain: usize,
    /// Protocol events this round
    pub events: usize,
    /// Sum of applied displacement lengths
    pub displacement: f64,
}

/// Results from a single experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Experiment configuration
    pub config: ExperimentConfig,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub ended_at: DateTime<Utc>,
    /// Rounds executed
    pub rounds: u64,
    /// Whether the swarm reached a single line
    pub converged: bool,
    /// Line order front to back, when converged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_order: Option<Vec<AgentId>>,
    /// Protocol events over the whole run, by kind
    pub event_counts: BTreeMap<String, usize>,
    /// Per-round metrics
    pub round_metrics: Vec<RoundMetrics>,
}

/// Aggregate results from a grid experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridResults {
    /// All individual results
    pub results: Vec<ExperimentResult>,
    /// Summary statistics by configuration
    pub summary: HashMap<String, ConfigSummary>,
}

/// Summary statistics for a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub config_key: String,
    pub trials: usize,
    pub convergence_rate: f64,
    /// Standard error of convergence rate: sqrt(p(1-p)/n)
    pub convergence_rate_se: f64,
    /// 95% confidence interval for convergence rate: (lower, upper)
    pub convergence_rate_ci: (f64, f64),
    /// Mean rounds over converged runs (0 if none converged)
    pub avg_rounds: f64,
    /// Standard error of avg_rounds
    pub avg_rounds_se: f64,
    pub min_rounds: u64,
    pub max_rounds: u64,
}

impl GridResults {
    /// Create a new empty grid results.
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            summary: HashMap::new(),
        }
    }

    /// Add a result.
    pub fn add(&mut self, result: ExperimentResult) {
        self.results.push(result);
    }

    /// Key results are grouped under in the summary.
    pub fn config_key(config: &ExperimentConfig) -> String {
        format!(
            "{}:agents={}:tie_break={}",
            config.protocol, config.agent_count, config.tie_break
        )
    }

    /// Compute summary statistics.
    pub fn compute_summary(&mut self) {
        let mut by_config: HashMap<String, Vec<&ExperimentResult>> = HashMap::new();
        for result in &self.results {
            by_config
                .entry(Self::config_key(&result.config))
                .or_default()
                .push(result);
        }

        for (key, results) in by_config {
            let trials = results.len();
            let n = trials as f64;
            let converged: Vec<f64> = results
                .iter()
                .filter(|r| r.converged)
                .map(|r| r.rounds as f64)
                .collect();
            let convergence_rate = converged.len() as f64 / n;

            // Standard error for proportion: SE = sqrt(p(1-p)/n)
            let convergence_rate_se = if trials > 1 {
                (convergence_rate * (1.0 - convergence_rate) / n).sqrt()
            } else {
                0.0
            };

            // 95% CI: p ± 1.96 * SE, clamped to [0, 1]
            let z = 1.96;
            let convergence_rate_ci = (
                (convergence_rate - z * convergence_rate_se).max(0.0),
                (convergence_rate + z * convergence_rate_se).min(1.0),
            );

            let m = converged.len() as f64;
            let avg_rounds = if converged.is_empty() {
                0.0
            } else {
                converged.iter().sum::<f64>() / m
            };
            let avg_rounds_se = if converged.len() > 1 {
                let variance =
                    converged.iter().map(|r| (r - avg_rounds).powi(2)).sum::<f64>() / (m - 1.0);
                variance.sqrt() / m.sqrt()
            } else {
                0.0
            };

            let min_rounds = results.iter().map(|r| r.rounds).min().unwrap_or(0);
            let max_rounds = results.iter().map(|r| r.rounds).max().unwrap_or(0);

            self.summary.insert(
                key.clone(),
                ConfigSummary {
                    config_key: key,
                    trials,
                    convergence_rate,
                    convergence_rate_se,
                    convergence_rate_ci,
                    avg_rounds,
                    avg_rounds_se,
                    min_rounds,
                    max_rounds,
                },
            );
        }
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing results to {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading results from {}", path.display()))?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

impl Default for GridResults {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(trial: usize, converged: bool, rounds: u64) -> ExperimentResult {
        ExperimentResult {
            config: ExperimentConfig {
                protocol: "climbing".to_string(),
                agent_count: 8,
                tie_break: "lowest_id".to_string(),
                layout: "centered".to_string(),
                sensing_radius: 1.5,
                communication_radius: 1.5,
                max_step: 0.2,
                trial,
                seed: trial as u64,
            },
            started_at: Utc::now(),
            ended_at: Utc::now(),
            rounds,
            converged,
            line_order: None,
            event_counts: BTreeMap::new(),
            round_metrics: vec![],
        }
    }

    #[test]
    fn test_grid_results_summary() {
        let mut results = GridResults::new();
        results.add(result(0, true, 40));
        results.add(result(1, true, 60));
        results.add(result(2, false, 2000));
        results.compute_summary();

        let summary = results.summary.get("climbing:agents=8:tie_break=lowest_id").unwrap();
        assert_eq!(summary.trials, 3);
        assert!((summary.convergence_rate - 0.666).abs() < 0.01);
        assert!(summary.convergence_rate_se > 0.0);
        assert!(summary.convergence_rate_ci.0 <= summary.convergence_rate);
        assert!(summary.convergence_rate_ci.1 >= summary.convergence_rate);
        assert!((summary.avg_rounds - 50.0).abs() < 1e-9);
        assert_eq!(summary.min_rounds, 40);
        assert_eq!(summary.max_rounds, 2000);
    }

    #[test]
    fn test_save_and_load() {
        let mut results = GridResults::new();
        results.add(result(0, true, 12));
        results.compute_summary();

        let path = std::env::temp_dir().join(format!(
            "line-experiment-results-{}.json",
            std::process::id()
        ));
        results.save(&path).unwrap();
        let loaded = GridResults::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.results[0].rounds, 12);
        assert_eq!(loaded.summary.len(), 1);
    }
}
