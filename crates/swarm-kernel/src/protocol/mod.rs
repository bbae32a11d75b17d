//! Line assembly protocols and the motion helpers they share.
//!
//! A protocol is the transition function every agent runs once per round:
//! `(own state, own memory, neighbour view) -> (state', memory', movement)`.
//! It never sees another agent's memory and never fails; anything it cannot
//! make sense of degrades to holding still.

mod climbing;
mod merging;

pub use climbing::Climbing;
pub use merging::Merging;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentId, Broadcast, Decision};
use crate::config::SwarmConfig;
use crate::geometry::{fallback_direction, Vec2};
use crate::range::{Neighbor, NeighborView};
use crate::tiebreak::TieBreak;

/// Largest heading change per round while wandering, radians.
const WANDER_TURN: f64 = 0.6;

/// Everything an agent may consult besides its own state and its view.
#[derive(Debug, Clone, Copy)]
pub struct RoundContext<'a> {
    /// Round being computed, starting at 1
    pub round: u64,
    pub config: &'a SwarmConfig,
    pub tie_break: &'a dyn TieBreak,
}

impl RoundContext<'_> {
    pub fn step(&self) -> f64 {
        self.config.max_step
    }

    pub fn spacing(&self) -> f64 {
        self.config.spacing
    }

    pub fn tolerance(&self) -> f64 {
        self.config.tolerance
    }
}

/// A line assembly protocol.
pub trait Protocol: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Prepare an agent's memory before the first round.
    fn initialize(&self, agent: &mut Agent, config: &SwarmConfig);

    /// One agent's transition for one round.
    fn decide(&self, agent: &Agent, view: &NeighborView, ctx: &RoundContext<'_>) -> Decision;

    /// Swarm-wide terminal condition over a committed table.
    fn is_terminal(&self, agents: &[Agent]) -> bool;
}

/// Protocol selection in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    #[default]
    Climbing,
    Merging,
}

impl ProtocolKind {
    pub fn build(self) -> Box<dyn Protocol> {
        match self {
            ProtocolKind::Climbing => Box::new(Climbing),
            ProtocolKind::Merging => Box::new(Merging),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolKind::Climbing => "climbing",
            ProtocolKind::Merging => "merging",
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "climbing" | "climb" => Ok(ProtocolKind::Climbing),
            "merging" | "merge" => Ok(ProtocolKind::Merging),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Move toward `offset`, landing exactly on it when it is within one step.
pub(crate) fn approach(offset: Vec2, step: f64) -> Vec2 {
    offset.clamp_length(step)
}

/// Direction a line continues past `anchor`: its published heading, else
/// away from the observer, else a fixed per-id direction.
pub(crate) fn continuation(anchor: &Neighbor, published: &Broadcast, observer: AgentId) -> Vec2 {
    published
        .heading
        .and_then(Vec2::normalized)
        .or_else(|| (-anchor.offset).normalized())
        .unwrap_or_else(|| fallback_direction(observer))
}

/// Offset of the slot one spacing past `anchor` along the line.
pub(crate) fn slot_beyond(
    anchor: &Neighbor,
    published: &Broadcast,
    observer: AgentId,
    spacing: f64,
) -> Vec2 {
    anchor.offset + continuation(anchor, published, observer) * spacing
}

/// Unit direction from the predecessor to this agent.
pub(crate) fn heading_from(pred: &Neighbor) -> Option<Vec2> {
    (-pred.offset).normalized()
}

/// Keep a chained agent one spacing behind its predecessor, straightened
/// along the predecessor's heading. Zero once within tolerance.
pub(crate) fn spacing_correction(
    pred: &Neighbor,
    published: &Broadcast,
    observer: AgentId,
    ctx: &RoundContext<'_>,
) -> Vec2 {
    let target = slot_beyond(pred, published, observer, ctx.spacing());
    if target.length() <= ctx.tolerance() {
        Vec2::ZERO
    } else {
        approach(target, ctx.step())
    }
}

/// Repulsion away from placed agents closer than `clearance`.
pub(crate) fn clearance_push(view: &NeighborView, clearance: f64, observer: AgentId) -> Vec2 {
    let mut push = Vec2::ZERO;
    for (n, b) in view.communicating() {
        if !n.sensed || !b.role.is_placed() || n.distance >= clearance {
            continue;
        }
        let away = (-n.offset).normalize_or(fallback_direction(observer));
        push += away * (clearance - n.distance);
    }
    push
}

/// Seeded random walk that reflects at the world boundary.
///
/// An agent already outside the world (chained agents may trail out of it)
/// is turned back inward rather than reflected on every round.
/// Returns the new wander heading and the movement for this round.
pub(crate) fn wander(agent: &Agent, ctx: &RoundContext<'_>) -> (f64, Vec2) {
    let mut rng = ChaCha8Rng::seed_from_u64(
        ctx.config
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add((agent.id as u64) << 20)
            .wrapping_add(ctx.round),
    );
    let turned = agent.memory.wander_heading + rng.random_range(-WANDER_TURN..WANDER_TURN);
    let mut movement = Vec2::from_angle(turned) * ctx.step();

    let next = agent.position + movement;
    let world = ctx.config.world_size;
    if next.x < 0.0 {
        movement.x = movement.x.abs();
    } else if next.x > world {
        movement.x = -movement.x.abs();
    }
    if next.y < 0.0 {
        movement.y = movement.y.abs();
    } else if next.y > world {
        movement.y = -movement.y.abs();
    }
    let heading = if movement.is_finite() { movement.angle() } else { 0.0 };
    (heading, movement.clamp_length(ctx.step()))
}

/// Visible agents that publish `predecessor == observer`, nearest first.
pub(crate) fn followers<'v>(
    view: &'v NeighborView,
    observer: AgentId,
) -> impl Iterator<Item = (&'v Neighbor, &'v Broadcast)> {
    view.communicating()
        .filter(move |(_, b)| b.predecessor == Some(observer))
}

/// Re-check a successor link: keep it only while the successor is in range
/// and still names this agent as predecessor. Adopts a new follower when
/// the link is open.
pub(crate) fn confirm_successor(
    current: Option<AgentId>,
    view: &NeighborView,
    observer: AgentId,
    accept: impl Fn(&Broadcast) -> bool,
) -> Option<AgentId> {
    if let Some(succ) = current {
        if let Some((_, b)) = view.published(succ) {
            if b.predecessor == Some(observer) && accept(b) {
                return Some(succ);
            }
        }
    }
    followers(view, observer)
        .filter(|(_, b)| accept(b))
        .map(|(n, _)| n.id)
        .next()
}

/// Sticky reservation: keep the current grantee while it still claims,
/// otherwise pick the comparator's winner among claimants.
///
/// First grantee wins. A later claimant that outranks it does not take the
/// grant over; it waits until the grantee commits or drops its claim.
pub(crate) fn pick_grant(
    current: Option<AgentId>,
    claimants: &[AgentId],
    ctx: &RoundContext<'_>,
) -> Option<AgentId> {
    match current {
        Some(id) if claimants.contains(&id) => Some(id),
        _ => ctx.tie_break.winner(claimants, ctx.round),
    }
}
