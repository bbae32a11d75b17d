//! Agent types: identity, role, private memory and the published broadcast.
//!
//! An agent never reads another agent's [`Memory`]. What others learn about
//! it is the [`Broadcast`] built from its memory once per round and handed out
//! by the range model to agents within communication range.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec2;

/// Stable integer index of an agent, immutable for the run.
pub type AgentId = usize;

/// Role of an agent in the formation state machine.
///
/// The climbing protocol uses Free, Candidate, Climbing, Competing and
/// Settled. The merging protocol uses Free, Head, Tail, Settled and Merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Unattached. In merging this is a length-1 chain (head and tail at once).
    Free,
    /// Identified a line and a target slot, starting the approach
    Candidate,
    /// Moving along the line toward its open end
    Climbing,
    /// Detected a rival claiming the same slot this round
    Competing,
    /// Fixed member of a line or chain
    Settled,
    /// Front endpoint of a chain of length >= 2
    Head,
    /// Back endpoint of a chain of length >= 2
    Tail,
    /// Endpoint actively approaching another chain's endpoint
    Merging,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Free => "free",
            Role::Candidate => "candidate",
            Role::Climbing => "climbing",
            Role::Competing => "competing",
            Role::Settled => "settled",
            Role::Head => "head",
            Role::Tail => "tail",
            Role::Merging => "merging",
        }
    }

    /// Climbing roles between free and settled.
    pub fn is_climber(&self) -> bool {
        matches!(self, Role::Candidate | Role::Climbing | Role::Competing)
    }

    /// Roles that hold a place in a line or chain.
    pub fn is_placed(&self) -> bool {
        matches!(self, Role::Settled | Role::Head | Role::Tail)
    }

    /// Role implied by chain links alone.
    pub fn for_links(predecessor: Option<AgentId>, successor: Option<AgentId>) -> Role {
        match (predecessor, successor) {
            (None, None) => Role::Free,
            (None, Some(_)) => Role::Head,
            (Some(_), None) => Role::Tail,
            (Some(_), Some(_)) => Role::Settled,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private per-agent state. Only the fields copied into [`Broadcast`] are
/// ever visible to other agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Line neighbour toward the closed end / chain front
    pub predecessor: Option<AgentId>,
    /// Line neighbour toward the open end / chain back
    pub successor: Option<AgentId>,
    /// Slot index in a climbing line (founder is 0)
    pub slot: Option<u32>,
    /// Climbing: founder id of the line. Merging: chain label.
    pub line: Option<AgentId>,
    /// Climbing: slot this agent is trying to fill
    pub claim: Option<u32>,
    /// Merging: junction endpoint this agent is approaching
    pub target: Option<AgentId>,
    /// Joiner this open end currently accepts
    pub grant: Option<AgentId>,
    /// Strongest rival seen while competing
    pub rival: Option<AgentId>,
    /// Unit direction from predecessor to this agent
    pub heading: Option<Vec2>,
    /// Rounds left before the agent may claim again
    pub cooldown: u32,
    /// Consecutive rounds without sight of a line affiliate
    pub idle_rounds: u32,
    /// Direction of free wandering, radians
    pub wander_heading: f64,
    /// Line this agent left by dissolution, published while cooling down
    pub dissolved: Option<AgentId>,
    /// Chain label changed this round
    pub relabeled: bool,
    /// May found a new line
    pub seed: bool,
}

/// The publicly visible fields of an agent, refreshed once per round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub role: Role,
    pub line: Option<AgentId>,
    pub slot: Option<u32>,
    pub claim: Option<u32>,
    pub target: Option<AgentId>,
    pub predecessor: Option<AgentId>,
    pub successor: Option<AgentId>,
    pub grant: Option<AgentId>,
    pub heading: Option<Vec2>,
    pub dissolved: Option<AgentId>,
    pub relabeled: bool,
    pub seed: bool,
}

/// An agent in the swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub position: Vec2,
    pub role: Role,
    pub memory: Memory,
}

impl Agent {
    /// A free agent at `position`.
    pub fn new(id: AgentId, position: Vec2) -> Self {
        Self {
            id,
            position,
            role: Role::Free,
            memory: Memory::default(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    pub fn broadcast(&self) -> Broadcast {
        let m = &self.memory;
        Broadcast {
            role: self.role,
            line: m.line,
            slot: m.slot,
            claim: m.claim,
            target: m.target,
            predecessor: m.predecessor,
            successor: m.successor,
            grant: m.grant,
            heading: m.heading,
            dissolved: m.dissolved,
            relabeled: m.relabeled,
            seed: m.seed,
        }
    }
}

/// Output of one agent's transition for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub role: Role,
    pub memory: Memory,
    /// Requested displacement; the coordinator clamps it before applying.
    pub movement: Vec2,
}

impl Decision {
    pub fn stay(role: Role, memory: Memory) -> Self {
        Self {
            role,
            memory,
            movement: Vec2::ZERO,
        }
    }

    pub fn moving(role: Role, memory: Memory, movement: Vec2) -> Self {
        Self {
            role,
            memory,
            movement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_for_links() {
        assert_eq!(Role::for_links(None, None), Role::Free);
        assert_eq!(Role::for_links(None, Some(1)), Role::Head);
        assert_eq!(Role::for_links(Some(0), None), Role::Tail);
        assert_eq!(Role::for_links(Some(0), Some(2)), Role::Settled);
    }

    #[test]
    fn test_broadcast_hides_private_fields() {
        let agent = Agent::new(3, Vec2::new(1.0, 2.0)).with_memory(Memory {
            cooldown: 4,
            idle_rounds: 9,
            rival: Some(1),
            claim: Some(2),
            ..Memory::default()
        });
        let published = agent.broadcast();
        assert_eq!(published.claim, Some(2));
        assert_eq!(published.role, Role::Free);
        // cooldown, idle counter and rival have no broadcast counterpart
        let rendered = format!("{:?}", published);
        assert!(!rendered.contains("cooldown"));
        assert!(!rendered.contains("rival"));
    }
}
