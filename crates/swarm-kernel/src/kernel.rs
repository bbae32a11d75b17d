//! The swarm coordinator: one synchronous round at a time.
//!
//! The coordinator owns the only mutable state in the system, the committed
//! table of agents. A round reads the frozen table, computes every decision
//! from it, and replaces the table wholesale once all decisions are in, so
//! no agent ever observes a move made in the same round. Stopping between
//! rounds always leaves a consistent table behind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::agent::{Agent, AgentId, Role};
use crate::config::{ConfigError, SwarmConfig};
use crate::geometry::separate_coincident;
use crate::layout::InitialLayout;
use crate::protocol::{Protocol, RoundContext};
use crate::range::RangeModel;
use crate::tiebreak::TieBreak;

/// Something that happened to one agent in a round, derived by comparing
/// its committed state before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwarmEvent {
    /// A seed started a new line
    Founded { agent: AgentId },
    /// Started approaching a slot or junction
    Claimed { agent: AgentId },
    /// Detected a rival for the same slot
    Competed { agent: AgentId, rival: Option<AgentId> },
    /// Lost a contest and backed off
    Yielded { agent: AgentId },
    /// Climber settled behind the open end
    Joined {
        agent: AgentId,
        predecessor: AgentId,
        slot: Option<u32>,
    },
    /// Chain head linked behind another chain's tail
    Spliced { agent: AgentId, junction: AgentId },
    /// Left a minority line
    Dissolved { agent: AgentId, line: AgentId },
}

impl SwarmEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SwarmEvent::Founded { .. } => "founded",
            SwarmEvent::Claimed { .. } => "claimed",
            SwarmEvent::Competed { .. } => "competed",
            SwarmEvent::Yielded { .. } => "yielded",
            SwarmEvent::Joined { .. } => "joined",
            SwarmEvent::Spliced { .. } => "spliced",
            SwarmEvent::Dissolved { .. } => "dissolved",
        }
    }

    fn derive(before: &Agent, after: &Agent, out: &mut Vec<SwarmEvent>) {
        let agent = after.id;
        let (was, now) = (&before.memory, &after.memory);

        if let (Some(line), None) = (now.dissolved, was.dissolved) {
            out.push(SwarmEvent::Dissolved { agent, line });
            return;
        }

        if after.role == Role::Settled
            && before.role != Role::Settled
            && now.slot == Some(0)
            && now.predecessor.is_none()
        {
            out.push(SwarmEvent::Founded { agent });
        }

        if was.predecessor.is_none() {
            if let Some(predecessor) = now.predecessor {
                if before.role.is_climber() {
                    out.push(SwarmEvent::Joined {
                        agent,
                        predecessor,
                        slot: now.slot,
                    });
                } else {
                    out.push(SwarmEvent::Spliced {
                        agent,
                        junction: predecessor,
                    });
                }
            }
        }

        let claimed = match after.role {
            Role::Candidate => !before.role.is_climber(),
            Role::Merging => before.role != Role::Merging,
            _ => false,
        };
        if claimed {
            out.push(SwarmEvent::Claimed { agent });
        }

        if after.role == Role::Competing && before.role != Role::Competing {
            out.push(SwarmEvent::Competed {
                agent,
                rival: now.rival,
            });
        }

        if now.cooldown > 0 && was.cooldown == 0 {
            out.push(SwarmEvent::Yielded { agent });
        }
    }
}

/// Result of a single round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundResult {
    /// Round number, starting at 1
    pub round: u64,
    pub events: Vec<SwarmEvent>,
    /// Agents per role after the round
    pub census: BTreeMap<Role, usize>,
    /// Sum of applied displacement lengths
    pub displacement: f64,
    /// Swarm reached its terminal state
    pub converged: bool,
}

/// How a run ended. Stalling is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Converged { rounds: u64 },
    Stalled { rounds: u64 },
}

impl RunOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, RunOutcome::Converged { .. })
    }

    pub fn rounds(&self) -> u64 {
        match self {
            RunOutcome::Converged { rounds } | RunOutcome::Stalled { rounds } => *rounds,
        }
    }
}

/// The committed table at a round boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub round: u64,
    pub agents: Vec<Agent>,
}

/// The swarm coordinator.
#[derive(Debug)]
pub struct Swarm {
    config: SwarmConfig,
    protocol: Box<dyn Protocol>,
    tie_break: Box<dyn TieBreak>,
    range: RangeModel,
    agents: Vec<Agent>,
    round: u64,
}

impl Swarm {
    /// Validate `config` and lay out a fresh swarm of free agents.
    pub fn new(config: SwarmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut positions =
            config
                .layout
                .generate(config.agent_count, config.world_size, config.seed);
        separate_coincident(&mut positions);

        let agents = positions
            .into_iter()
            .enumerate()
            .map(|(id, position)| Agent::new(id, position))
            .collect();
        Ok(Self::assemble(config, agents))
    }

    /// Start from pre-built agents, e.g. pre-formed chains or scripted
    /// scenarios. The agent count and layout of `config` are replaced by
    /// the table; ids must equal table indices.
    pub fn from_agents(mut config: SwarmConfig, agents: Vec<Agent>) -> Result<Self, ConfigError> {
        if agents.iter().enumerate().any(|(i, a)| a.id != i) {
            return Err(ConfigError::AgentIds {
                count: agents.len(),
            });
        }
        config.agent_count = agents.len();
        config.layout = InitialLayout::Explicit {
            positions: agents.iter().map(|a| [a.position.x, a.position.y]).collect(),
        };
        config.validate()?;

        let mut agents = agents;
        let mut positions: Vec<_> = agents.iter().map(|a| a.position).collect();
        separate_coincident(&mut positions);
        for (agent, position) in agents.iter_mut().zip(positions) {
            agent.position = position;
        }
        Ok(Self::assemble(config, agents))
    }

    fn assemble(config: SwarmConfig, mut agents: Vec<Agent>) -> Self {
        let protocol = config.protocol.build();
        let tie_break = config.tie_break.build(config.seed, agents.len());
        for agent in &mut agents {
            protocol.initialize(agent, &config);
        }
        info!(
            protocol = protocol.name(),
            tie_break = tie_break.name(),
            agents = agents.len(),
            layout = config.layout.name(),
            "Swarm initialized"
        );
        Self {
            range: RangeModel::new(config.sensing_radius, config.communication_radius),
            config,
            protocol,
            tie_break,
            agents,
            round: 0,
        }
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Completed rounds.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn protocol_name(&self) -> &'static str {
        self.protocol.name()
    }

    pub fn snapshot(&self) -> SwarmSnapshot {
        SwarmSnapshot {
            round: self.round,
            agents: self.agents.clone(),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.protocol.is_terminal(&self.agents)
    }

    /// Run one synchronous round and commit it.
    pub fn step(&mut self) -> RoundResult {
        let round = self.round + 1;
        let views = self.range.views(&self.agents);
        let ctx = RoundContext {
            round,
            config: &self.config,
            tie_break: self.tie_break.as_ref(),
        };

        let mut displacement = 0.0;
        let mut next: Vec<Agent> = self
            .agents
            .iter()
            .zip(&views)
            .map(|(agent, view)| {
                let decision = self.protocol.decide(agent, view, &ctx);
                let movement = decision.movement.clamp_length(self.config.max_step);
                displacement += movement.length();
                trace!(
                    round,
                    agent = agent.id,
                    role = %decision.role,
                    neighbors = view.len(),
                    dx = movement.x,
                    dy = movement.y,
                    "Decision"
                );
                Agent {
                    id: agent.id,
                    position: agent.position + movement,
                    role: decision.role,
                    memory: decision.memory,
                }
            })
            .collect();

        let mut positions: Vec<_> = next.iter().map(|a| a.position).collect();
        if separate_coincident(&mut positions) > 0 {
            debug!(round, "Separated coincident agents");
            for (agent, position) in next.iter_mut().zip(positions) {
                agent.position = position;
            }
        }

        let mut events = Vec::new();
        for (before, after) in self.agents.iter().zip(&next) {
            SwarmEvent::derive(before, after, &mut events);
        }
        for event in &events {
            debug!(round, event = event.kind(), detail = ?event, "Protocol event");
        }

        self.agents = next;
        self.round = round;

        RoundResult {
            round,
            events,
            census: self.census(),
            displacement,
            converged: self.is_converged(),
        }
    }

    /// Step until the terminal state or until `max_rounds` rounds have run.
    pub fn run(&mut self, max_rounds: u64) -> RunOutcome {
        self.run_with(max_rounds, |_, _| {})
    }

    /// Like [`Swarm::run`], handing every round's result and committed
    /// table to `observe`.
    pub fn run_with(
        &mut self,
        max_rounds: u64,
        mut observe: impl FnMut(&RoundResult, &[Agent]),
    ) -> RunOutcome {
        info!(
            protocol = self.protocol.name(),
            agents = self.agents.len(),
            max_rounds,
            "Run started"
        );
        if self.is_converged() {
            info!(rounds = self.round, "Swarm already converged");
            return RunOutcome::Converged { rounds: self.round };
        }

        let start = self.round;
        while self.round - start < max_rounds {
            let result = self.step();
            observe(&result, &self.agents);
            if result.converged {
                info!(rounds = self.round, "Swarm converged");
                return RunOutcome::Converged { rounds: self.round };
            }
        }

        info!(rounds = self.round, census = ?self.census(), "Swarm did not converge");
        RunOutcome::Stalled { rounds: self.round }
    }

    fn census(&self) -> BTreeMap<Role, usize> {
        let mut census = BTreeMap::new();
        for agent in &self.agents {
            *census.entry(agent.role).or_insert(0) += 1;
        }
        census
    }
}
