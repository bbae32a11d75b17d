//! Climbing protocol: free agents climb along one growing line and attach at
//! its open end, one slot at a time.
//!
//! Roles: Free -> Candidate -> Climbing -> Settled, with Competing as the
//! detour taken when two climbers claim the same slot. The open end grants a
//! single joiner per slot using the configured comparator, and contenders run
//! the same comparator, so exactly one proceeds.

use tracing::trace;

use super::{
    approach, clearance_push, confirm_successor, continuation, heading_from, pick_grant,
    slot_beyond, spacing_correction, wander, Protocol, RoundContext,
};
use crate::agent::{Agent, AgentId, Broadcast, Decision, Memory, Role};
use crate::config::SwarmConfig;
use crate::geometry::Vec2;
use crate::line;
use crate::range::{Neighbor, NeighborView};

#[derive(Debug, Clone, Copy, Default)]
pub struct Climbing;

impl Protocol for Climbing {
    fn name(&self) -> &'static str {
        "climbing"
    }

    fn initialize(&self, agent: &mut Agent, config: &SwarmConfig) {
        agent.memory.seed = agent.id < config.seed_agents;
    }

    fn decide(&self, agent: &Agent, view: &NeighborView, ctx: &RoundContext<'_>) -> Decision {
        match agent.role {
            Role::Settled => settled(agent, view, ctx),
            Role::Candidate | Role::Climbing | Role::Competing => climber(agent, view, ctx),
            _ => free(agent, view, ctx),
        }
    }

    fn is_terminal(&self, agents: &[Agent]) -> bool {
        if agents.len() <= 1 {
            return true;
        }
        let Some(label) = agents[0].memory.line else {
            return false;
        };
        agents
            .iter()
            .all(|a| a.role == Role::Settled && a.memory.line == Some(label))
            && line::chain_order(agents).is_ok()
    }
}

/// The member of `line` with the highest visible slot, and the slot it
/// offers when it is the open end.
struct OpenEnd<'v> {
    anchor: &'v Neighbor,
    published: &'v Broadcast,
    claim: Option<u32>,
}

fn locate_open_end(view: &NeighborView, line: AgentId) -> Option<OpenEnd<'_>> {
    view.communicating()
        .filter(|(_, b)| b.role == Role::Settled && b.line == Some(line))
        .filter_map(|(n, b)| b.slot.map(|slot| (n, b, slot)))
        .max_by(|a, b| a.2.cmp(&b.2).then(b.0.id.cmp(&a.0.id)))
        .map(|(anchor, published, slot)| OpenEnd {
            anchor,
            published,
            claim: published.successor.is_none().then_some(slot + 1),
        })
}

/// Lowest line label with a visible settled member.
fn lowest_settled_line(view: &NeighborView) -> Option<AgentId> {
    view.communicating()
        .filter(|(_, b)| b.role == Role::Settled)
        .filter_map(|(_, b)| b.line)
        .min()
}

fn is_affiliate(b: &Broadcast) -> bool {
    b.line.is_some() && (b.role == Role::Settled || b.role.is_climber())
}

/// Movement of a climber toward its open end.
///
/// With a claim the agent heads straight for the free slot. Without one the
/// end is out of sight, so it follows the line's edge one clearance off to
/// the side it is already on.
fn climb_movement(agent: &Agent, view: &NeighborView, end: &OpenEnd<'_>, ctx: &RoundContext<'_>) -> Vec2 {
    let clearance = ctx.config.clearance();
    let mut target = slot_beyond(end.anchor, end.published, agent.id, ctx.spacing());

    if end.claim.is_none() {
        let along = continuation(end.anchor, end.published, agent.id);
        let side = if along.cross(-end.anchor.offset) >= 0.0 { 1.0 } else { -1.0 };
        target += Vec2::new(-along.y, along.x) * (side * clearance);
    }

    if target.length() <= ctx.step() {
        return target;
    }
    approach(target + clearance_push(view, clearance, agent.id), ctx.step())
}

/// Memory of an unattached agent, keeping only what survives detachment.
fn detached(memory: &Memory) -> Memory {
    Memory {
        cooldown: memory.cooldown,
        idle_rounds: memory.idle_rounds,
        wander_heading: memory.wander_heading,
        dissolved: memory.dissolved,
        seed: memory.seed,
        ..Memory::default()
    }
}

fn free(agent: &Agent, view: &NeighborView, ctx: &RoundContext<'_>) -> Decision {
    let mut memory = detached(&agent.memory);

    if memory.cooldown > 0 {
        memory.cooldown -= 1;
        if memory.cooldown == 0 {
            memory.dissolved = None;
        }
        return Decision::stay(Role::Free, memory);
    }

    if view.is_empty() {
        memory.idle_rounds = memory.idle_rounds.saturating_add(1);
        let (heading, movement) = wander(agent, ctx);
        memory.wander_heading = heading;
        return Decision::moving(Role::Free, memory, movement);
    }

    if let Some(line) = lowest_settled_line(view) {
        if let Some(end) = locate_open_end(view, line) {
            memory.line = Some(line);
            memory.claim = end.claim;
            memory.idle_rounds = 0;
            let movement = climb_movement(agent, view, &end, ctx);
            trace!(agent = agent.id, line, claim = ?end.claim, "Candidate for line");
            return Decision::moving(Role::Candidate, memory, movement);
        }
    }

    // Climbers without a visible settled member still mark where a line is.
    if let Some((nearest, _)) = view
        .communicating()
        .find(|(_, b)| b.role.is_climber() && b.line.is_some())
    {
        memory.idle_rounds = 0;
        let reach = ctx.spacing() + ctx.tolerance();
        let movement = if nearest.distance > reach {
            let stop = nearest.offset.normalize_or(Vec2::ZERO) * ctx.spacing();
            approach(nearest.offset - stop, ctx.step())
        } else {
            Vec2::ZERO
        };
        return Decision::moving(Role::Free, memory, movement);
    }

    if memory.seed && may_found(agent.id, view) {
        memory.line = Some(agent.id);
        memory.slot = Some(0);
        memory.idle_rounds = 0;
        trace!(agent = agent.id, "Founding a line");
        return Decision::stay(Role::Settled, memory);
    }

    memory.idle_rounds = memory.idle_rounds.saturating_add(1);
    if memory.idle_rounds > ctx.config.patience_rounds {
        let (heading, movement) = wander(agent, ctx);
        memory.wander_heading = heading;
        return Decision::moving(Role::Free, memory, movement);
    }
    Decision::stay(Role::Free, memory)
}

/// A free seed founds when it has company, no line is in sight, and no
/// lower free seed is visible.
fn may_found(id: AgentId, view: &NeighborView) -> bool {
    let mut company = false;
    for (n, b) in view.communicating() {
        if is_affiliate(b) {
            return false;
        }
        if b.role == Role::Free {
            if b.seed && n.id < id {
                return false;
            }
            company = true;
        }
    }
    company
}

fn climber(agent: &Agent, view: &NeighborView, ctx: &RoundContext<'_>) -> Decision {
    let mut memory = agent.memory.clone();

    let Some(line) = memory.line else {
        return Decision::stay(Role::Free, detached(&memory));
    };
    let abandoned = view.communicating().any(|(_, b)| {
        b.dissolved == Some(line) || (is_affiliate(b) && b.line.is_some_and(|l| l < line))
    });
    let end = if abandoned { None } else { locate_open_end(view, line) };
    let Some(end) = end else {
        trace!(agent = agent.id, line, "Lost the line");
        let mut memory = detached(&memory);
        memory.idle_rounds = 0;
        return Decision::stay(Role::Free, memory);
    };

    memory.claim = end.claim;
    let rivals: Vec<AgentId> = match end.claim {
        Some(claim) => view
            .communicating()
            .filter(|(_, b)| b.role.is_climber() && b.line == Some(line) && b.claim == Some(claim))
            .map(|(n, _)| n.id)
            .collect(),
        None => Vec::new(),
    };

    // The grantee leads outright. Otherwise the comparator decides, unless the
    // open end has already granted one of the rivals.
    let granted = end.published.grant == Some(agent.id);
    let rival_granted = end.published.grant.is_some_and(|g| rivals.contains(&g));
    let leads = granted
        || (!rival_granted
            && rivals
                .iter()
                .all(|r| ctx.tie_break.outranks(agent.id, *r, ctx.round)));

    match agent.role {
        Role::Competing if !rivals.is_empty() => {
            if leads {
                memory.rival = None;
                let movement = climb_movement(agent, view, &end, ctx);
                Decision::moving(Role::Climbing, memory, movement)
            } else {
                let mut memory = detached(&memory);
                memory.cooldown = ctx.config.cooldown_rounds;
                memory.rival = ctx.tie_break.winner(&rivals, ctx.round);
                trace!(agent = agent.id, line, rival = ?memory.rival, "Yielding slot");
                Decision::stay(Role::Free, memory)
            }
        }
        // A leading climber keeps its course; late arrivals yield to it.
        Role::Candidate | Role::Climbing
            if !rivals.is_empty() && (agent.role == Role::Candidate || !leads) =>
        {
            memory.rival = ctx.tie_break.winner(&rivals, ctx.round);
            trace!(agent = agent.id, line, rival = ?memory.rival, "Contested slot");
            Decision::stay(Role::Competing, memory)
        }
        Role::Climbing => {
            memory.rival = None;
            if let Some(slot) = end.claim.filter(|_| granted) {
                let target = slot_beyond(end.anchor, end.published, agent.id, ctx.spacing());
                let occupied = view.communicating().any(|(_, b)| {
                    b.role == Role::Settled && b.line == Some(line) && b.slot == Some(slot)
                });
                if target.length() <= ctx.tolerance() && !occupied {
                    memory.slot = Some(slot);
                    memory.predecessor = Some(end.anchor.id);
                    memory.successor = None;
                    memory.heading = heading_from(end.anchor);
                    memory.claim = None;
                    memory.grant = None;
                    memory.idle_rounds = 0;
                    trace!(agent = agent.id, line, slot, "Joined line");
                    return Decision::moving(Role::Settled, memory, approach(target, ctx.step()));
                }
            }
            let movement = climb_movement(agent, view, &end, ctx);
            Decision::moving(Role::Climbing, memory, movement)
        }
        // Candidate without rivals, or a competitor whose rivals are gone
        _ => {
            memory.rival = None;
            let movement = climb_movement(agent, view, &end, ctx);
            Decision::moving(Role::Climbing, memory, movement)
        }
    }
}

fn settled(agent: &Agent, view: &NeighborView, ctx: &RoundContext<'_>) -> Decision {
    let mut memory = agent.memory.clone();
    let Some(line) = memory.line else {
        return free(agent, view, ctx);
    };

    let lower_line = view
        .communicating()
        .any(|(_, b)| is_affiliate(b) && b.line.is_some_and(|l| l < line));
    let neighbour_left = [memory.predecessor, memory.successor]
        .into_iter()
        .flatten()
        .any(|id| {
            view.published(id)
                .is_some_and(|(_, b)| b.dissolved == Some(line))
        });
    let predecessor = match memory.predecessor {
        Some(pred) => match view.published(pred) {
            Some((n, b)) if b.role == Role::Settled && b.line == Some(line) => Some((n, b)),
            _ => return dissolve(agent, line, ctx),
        },
        None => None,
    };
    if lower_line || neighbour_left {
        return dissolve(agent, line, ctx);
    }

    memory.successor = confirm_successor(memory.successor, view, agent.id, |b| {
        b.role == Role::Settled && b.line == Some(line)
    });

    memory.grant = match (memory.successor, memory.slot) {
        (None, Some(slot)) => {
            let claimants: Vec<AgentId> = view
                .communicating()
                .filter(|(_, b)| {
                    b.role.is_climber() && b.line == Some(line) && b.claim == Some(slot + 1)
                })
                .map(|(n, _)| n.id)
                .collect();
            pick_grant(memory.grant, &claimants, ctx)
        }
        _ => None,
    };

    let movement = match predecessor {
        Some((n, b)) => {
            memory.heading = heading_from(n).or(memory.heading);
            spacing_correction(n, b, agent.id, ctx)
        }
        None => Vec2::ZERO,
    };
    Decision::moving(Role::Settled, memory, movement)
}

fn dissolve(agent: &Agent, line: AgentId, ctx: &RoundContext<'_>) -> Decision {
    trace!(agent = agent.id, line, "Dissolving");
    let memory = Memory {
        cooldown: ctx.config.cooldown_rounds.max(1),
        dissolved: Some(line),
        wander_heading: agent.memory.wander_heading,
        seed: agent.memory.seed,
        ..Memory::default()
    };
    Decision::stay(Role::Free, memory)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, ctx, views};
    use super::*;

    fn decide_all(agents: &[Agent], config: &SwarmConfig, round: u64) -> Vec<Decision> {
        let views = views(agents, config);
        let ctx = ctx(config, round);
        agents
            .iter()
            .zip(&views)
            .map(|(a, v)| Climbing.decide(a, v, &ctx))
            .collect()
    }

    fn founder() -> Agent {
        Agent::new(0, Vec2::ZERO)
            .with_role(Role::Settled)
            .with_memory(Memory {
                line: Some(0),
                slot: Some(0),
                seed: true,
                ..Memory::default()
            })
    }

    fn climber_at(id: AgentId, x: f64, y: f64, role: Role) -> Agent {
        Agent::new(id, Vec2::new(x, y))
            .with_role(role)
            .with_memory(Memory {
                line: Some(0),
                claim: Some(1),
                ..Memory::default()
            })
    }

    #[test]
    fn test_free_seed_founds_with_company() {
        let config = config();
        let mut seed = Agent::new(0, Vec2::ZERO);
        seed.memory.seed = true;
        let other = Agent::new(1, Vec2::new(1.0, 0.0));
        let decisions = decide_all(&[seed, other], &config, 1);

        assert_eq!(decisions[0].role, Role::Settled);
        assert_eq!(decisions[0].memory.slot, Some(0));
        assert_eq!(decisions[0].memory.line, Some(0));
        assert_eq!(decisions[1].role, Role::Free);
    }

    #[test]
    fn test_lone_seed_does_not_found() {
        let config = config();
        let mut seed = Agent::new(0, Vec2::ZERO);
        seed.memory.seed = true;
        let decisions = decide_all(&[seed], &config, 1);
        assert_eq!(decisions[0].role, Role::Free);
    }

    #[test]
    fn test_free_agent_claims_open_end() {
        let config = config();
        let agents = [founder(), Agent::new(1, Vec2::new(1.2, 0.0))];
        let decisions = decide_all(&agents, &config, 1);

        assert_eq!(decisions[1].role, Role::Candidate);
        assert_eq!(decisions[1].memory.claim, Some(1));
        assert_eq!(decisions[1].memory.line, Some(0));
        // target is one spacing from the founder, straight back toward it
        assert!((decisions[1].movement.x + 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_candidate_with_rival_competes() {
        let config = config();
        let agents = [
            founder(),
            climber_at(1, 0.8, 0.6, Role::Candidate),
            climber_at(2, 0.8, -0.6, Role::Candidate),
        ];
        let decisions = decide_all(&agents, &config, 2);
        assert_eq!(decisions[1].role, Role::Competing);
        assert_eq!(decisions[2].role, Role::Competing);
        assert_eq!(decisions[1].memory.rival, Some(2));
        // the open end reserves the slot for the comparator's winner
        assert_eq!(decisions[0].memory.grant, Some(1));
    }

    #[test]
    fn test_competition_has_one_winner() {
        let config = config();
        let mut end = founder();
        end.memory.grant = Some(1);
        let agents = [
            end,
            climber_at(1, 0.8, 0.6, Role::Competing),
            climber_at(2, 0.8, -0.6, Role::Competing),
        ];
        let decisions = decide_all(&agents, &config, 3);

        assert_eq!(decisions[1].role, Role::Climbing);
        assert_eq!(decisions[2].role, Role::Free);
        assert_eq!(decisions[2].memory.cooldown, config.cooldown_rounds);
        assert_eq!(decisions[2].memory.claim, None);
    }

    #[test]
    fn test_granted_climber_commits() {
        let config = config();
        let mut end = founder();
        end.memory.grant = Some(1);
        let agents = [end, climber_at(1, 1.0, 0.05, Role::Climbing)];
        let decisions = decide_all(&agents, &config, 4);

        let joined = &decisions[1];
        assert_eq!(joined.role, Role::Settled);
        assert_eq!(joined.memory.slot, Some(1));
        assert_eq!(joined.memory.predecessor, Some(0));
        assert_eq!(joined.memory.line, Some(0));
    }

    #[test]
    fn test_granted_climber_ignores_returning_rival() {
        let config = config();
        let mut end = founder();
        end.memory.grant = Some(1);
        let agents = [
            end,
            climber_at(1, 1.0, 0.05, Role::Climbing),
            climber_at(2, 0.8, -0.6, Role::Candidate),
        ];
        let decisions = decide_all(&agents, &config, 9);

        assert_eq!(decisions[1].role, Role::Settled);
        assert_eq!(decisions[1].memory.slot, Some(1));
        assert_eq!(decisions[2].role, Role::Competing);
        assert_eq!(decisions[2].memory.rival, Some(1));
    }

    #[test]
    fn test_leading_climber_keeps_climbing() {
        let config = config();
        let agents = [
            founder(),
            climber_at(1, 1.3, 0.5, Role::Climbing),
            climber_at(2, 0.8, -0.6, Role::Candidate),
        ];
        let decisions = decide_all(&agents, &config, 9);
        assert_eq!(decisions[1].role, Role::Climbing);
        assert_eq!(decisions[1].memory.rival, None);
        assert!(decisions[1].movement.length() > 0.0);
    }

    #[test]
    fn test_outranked_climber_competes() {
        let config = config();
        let agents = [
            founder(),
            climber_at(1, 0.8, -0.6, Role::Candidate),
            climber_at(2, 1.3, 0.5, Role::Climbing),
        ];
        let decisions = decide_all(&agents, &config, 9);
        assert_eq!(decisions[2].role, Role::Competing);
        assert_eq!(decisions[2].memory.rival, Some(1));
    }

    #[test]
    fn test_grantee_keeps_slot_over_better_ranked_arrival() {
        let config = config();
        let mut end = founder();
        end.memory.grant = Some(2);
        let agents = [
            end,
            climber_at(1, 0.8, -0.6, Role::Competing),
            climber_at(2, 1.3, 0.5, Role::Climbing),
        ];
        let decisions = decide_all(&agents, &config, 9);

        assert_eq!(decisions[0].memory.grant, Some(2));
        assert_eq!(decisions[2].role, Role::Climbing);
        assert_eq!(decisions[1].role, Role::Free);
        assert_eq!(decisions[1].memory.rival, Some(2));
    }

    #[test]
    fn test_ungranted_climber_waits() {
        let config = config();
        let agents = [founder(), climber_at(1, 1.0, 0.0, Role::Climbing)];
        let decisions = decide_all(&agents, &config, 4);
        assert_eq!(decisions[1].role, Role::Climbing);
    }

    #[test]
    fn test_end_adopts_successor_and_drops_grant() {
        let config = config();
        let mut end = founder();
        end.memory.grant = Some(1);
        let joined = Agent::new(1, Vec2::new(1.0, 0.0))
            .with_role(Role::Settled)
            .with_memory(Memory {
                line: Some(0),
                slot: Some(1),
                predecessor: Some(0),
                ..Memory::default()
            });
        let decisions = decide_all(&[end, joined], &config, 5);
        assert_eq!(decisions[0].memory.successor, Some(1));
        assert_eq!(decisions[0].memory.grant, None);
    }

    #[test]
    fn test_minority_line_dissolves() {
        let config = config();
        let minority = Agent::new(5, Vec2::new(1.0, 0.0))
            .with_role(Role::Settled)
            .with_memory(Memory {
                line: Some(5),
                slot: Some(0),
                ..Memory::default()
            });
        let decisions = decide_all(&[founder(), minority], &config, 1);
        assert_eq!(decisions[1].role, Role::Free);
        assert_eq!(decisions[1].memory.dissolved, Some(5));
        assert!(decisions[1].memory.cooldown > 0);
        assert_eq!(decisions[0].role, Role::Settled);
    }

    #[test]
    fn test_cooldown_ignores_lines() {
        let config = config();
        let mut waiting = Agent::new(1, Vec2::new(1.0, 0.0));
        waiting.memory.cooldown = 2;
        let decisions = decide_all(&[founder(), waiting], &config, 1);
        assert_eq!(decisions[1].role, Role::Free);
        assert_eq!(decisions[1].memory.cooldown, 1);
        assert_eq!(decisions[1].movement, Vec2::ZERO);
    }
}
