//! Configuration types for the swarm.
//!
//! Loaded from TOML at runtime or built in code. Every field has a default,
//! so a file only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::InitialLayout;
use crate::protocol::ProtocolKind;
use crate::tiebreak::TieBreakRule;

/// Rejected configuration. Fatal to starting a simulation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent count must be at least 1")]
    NoAgents,

    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("spacing {spacing} must be below both the sensing ({sensing}) and communication ({communication}) radius")]
    SpacingOutOfRange {
        spacing: f64,
        sensing: f64,
        communication: f64,
    },

    #[error("max step {step} must be below the spacing {spacing}, or agents overshoot their slots")]
    StepTooLarge { step: f64, spacing: f64 },

    #[error("tolerance {tolerance} must be below half the spacing {spacing}")]
    ToleranceTooLarge { tolerance: f64, spacing: f64 },

    #[error("the climbing protocol needs at least one seed agent")]
    NoSeedAgents,

    #[error("{seeds} seed agents requested but the swarm has only {agents} agents")]
    TooManySeeds { seeds: usize, agents: usize },

    #[error("explicit layout has {positions} positions for {agents} agents")]
    LayoutMismatch { positions: usize, agents: usize },

    #[error("agent ids must run 0..{count} in table order")]
    AgentIds { count: usize },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level swarm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Number of agents
    pub agent_count: usize,

    /// Initial position distribution
    pub layout: InitialLayout,

    /// Side length of the square world used for layout and wandering
    pub world_size: f64,

    /// Radius within which relative positions are observed
    pub sensing_radius: f64,

    /// Radius within which published fields are received
    pub communication_radius: f64,

    /// Desired distance between consecutive line members
    pub spacing: f64,

    /// Maximum displacement per round
    pub max_step: f64,

    /// Distance within which a target position counts as reached
    pub tolerance: f64,

    /// Active line assembly protocol
    pub protocol: ProtocolKind,

    /// Comparator for colliding claims
    pub tie_break: TieBreakRule,

    /// Seed for layout, wandering and the seeded tie-break
    pub seed: u64,

    /// Number of agents (lowest ids) allowed to found a line when climbing
    pub seed_agents: usize,

    /// Rounds a yielding agent waits before claiming again
    pub cooldown_rounds: u32,

    /// Rounds without sight of a line before a free agent starts wandering
    pub patience_rounds: u32,

    /// Round bound after which a run is reported as not converged
    pub max_rounds: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            agent_count: 30,
            layout: InitialLayout::Centered { spread: 0.5 },
            world_size: 16.0,
            sensing_radius: 1.5,
            communication_radius: 1.5,
            spacing: 1.0,
            max_step: 0.2,
            tolerance: 0.1,
            protocol: ProtocolKind::Climbing,
            tie_break: TieBreakRule::LowestId,
            seed: 0,
            seed_agents: 1,
            cooldown_rounds: 3,
            patience_rounds: 20,
            max_rounds: 5_000,
        }
    }
}

impl SwarmConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file. The result is not validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check the configuration before a run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_count == 0 {
            return Err(ConfigError::NoAgents);
        }

        for (name, value) in [
            ("sensing_radius", self.sensing_radius),
            ("communication_radius", self.communication_radius),
            ("spacing", self.spacing),
            ("max_step", self.max_step),
            ("tolerance", self.tolerance),
            ("world_size", self.world_size),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if self.spacing >= self.sensing_radius || self.spacing >= self.communication_radius {
            return Err(ConfigError::SpacingOutOfRange {
                spacing: self.spacing,
                sensing: self.sensing_radius,
                communication: self.communication_radius,
            });
        }

        if self.max_step >= self.spacing {
            return Err(ConfigError::StepTooLarge {
                step: self.max_step,
                spacing: self.spacing,
            });
        }

        if self.tolerance >= self.spacing / 2.0 {
            return Err(ConfigError::ToleranceTooLarge {
                tolerance: self.tolerance,
                spacing: self.spacing,
            });
        }

        if self.protocol == ProtocolKind::Climbing && self.seed_agents == 0 {
            return Err(ConfigError::NoSeedAgents);
        }
        if self.seed_agents > self.agent_count {
            return Err(ConfigError::TooManySeeds {
                seeds: self.seed_agents,
                agents: self.agent_count,
            });
        }

        if let InitialLayout::Explicit { positions } = &self.layout {
            if positions.len() != self.agent_count {
                return Err(ConfigError::LayoutMismatch {
                    positions: positions.len(),
                    agents: self.agent_count,
                });
            }
        }

        Ok(())
    }

    /// Clearance climbers keep from line members while moving along it.
    pub fn clearance(&self) -> f64 {
        self.spacing * 0.5
    }
}
