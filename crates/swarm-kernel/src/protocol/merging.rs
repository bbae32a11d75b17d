//! Merging protocol: chains splice head-to-tail into longer chains.
//!
//! Every agent starts as a chain of length one labelled with its own id.
//! A chain's head approaches the tail of a chain with a lower label, the
//! tail grants one approaching head at a time, and on abutment the head
//! links itself behind the tail. Labels and head/tail roles then ripple
//! along the joined chain one hop per round.
//!
//! Labels never drop below the label of a chain's head, and a head only
//! approaches strictly lower labels, so a chain can never splice onto
//! itself and simultaneous splices never close a cycle. Spliced links are
//! never dropped; a chain stretched past communication range closes up again.

use tracing::trace;

use super::{
    approach, clearance_push, confirm_successor, heading_from, pick_grant, slot_beyond,
    spacing_correction, wander, Protocol, RoundContext,
};
use crate::agent::{Agent, AgentId, Broadcast, Decision, Memory, Role};
use crate::config::SwarmConfig;
use crate::geometry::Vec2;
use crate::line;
use crate::range::{Neighbor, NeighborView};

/// Agent ids run from zero, so no chain can carry a lower label.
const LOWEST_LABEL: AgentId = 0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Merging;

impl Protocol for Merging {
    fn name(&self) -> &'static str {
        "merging"
    }

    fn initialize(&self, agent: &mut Agent, _config: &SwarmConfig) {
        if agent.memory.line.is_none() {
            agent.memory.line = Some(agent.id);
        }
        if agent.role != Role::Merging {
            agent.role = Role::for_links(agent.memory.predecessor, agent.memory.successor);
        }
    }

    fn decide(&self, agent: &Agent, view: &NeighborView, ctx: &RoundContext<'_>) -> Decision {
        let id = agent.id;
        let mut memory = agent.memory.clone();
        let mut label = memory.line.unwrap_or(id);

        memory.successor = hold_successor(memory.successor, view, id);
        let pred = memory.predecessor.and_then(|p| view.published(p));
        let succ = memory.successor.and_then(|s| view.published(s));
        // The chain is stretched behind this agent; wait for it to close up.
        let stretched = memory.successor.is_some() && succ.is_none();

        memory.relabeled = false;
        if let Some(lower) = pred.and_then(|(_, b)| b.line).filter(|l| *l < label) {
            label = lower;
            memory.relabeled = true;
        }
        memory.line = Some(label);

        // Heading points down the chain toward its tail. Out of range it
        // keeps its last value.
        if let Some((n, _)) = pred {
            memory.heading = heading_from(n);
        } else if memory.predecessor.is_none() {
            memory.heading = match (memory.successor, succ) {
                (_, Some((n, _))) => n.offset.normalized(),
                (Some(_), None) => memory.heading,
                (None, None) => None,
            };
        }

        memory.grant = if memory.successor.is_none() {
            let claimants: Vec<AgentId> = view
                .communicating()
                .filter(|(_, b)| b.role == Role::Merging && b.target == Some(id))
                .map(|(n, _)| n.id)
                .collect();
            pick_grant(memory.grant, &claimants, ctx)
        } else {
            None
        };

        if memory.predecessor.is_some() {
            memory.target = None;
            memory.cooldown = memory.cooldown.saturating_sub(1);
            let role = Role::for_links(memory.predecessor, memory.successor);
            let movement = match pred {
                _ if stretched => Vec2::ZERO,
                Some((n, b)) => spacing_correction(n, b, id, ctx),
                None => {
                    trace!(agent = id, predecessor = ?memory.predecessor, "Predecessor out of range");
                    memory
                        .heading
                        .map(|h| approach(-h * ctx.spacing(), ctx.step()))
                        .unwrap_or(Vec2::ZERO)
                }
            };
            return Decision::moving(role, memory, movement);
        }

        // From here on the agent is the head of its chain.
        let resting = Role::for_links(None, memory.successor);
        if memory.cooldown > 0 {
            memory.cooldown -= 1;
            memory.target = None;
            return Decision::stay(resting, memory);
        }

        let compatible = |b: &Broadcast| {
            b.successor.is_none()
                && b.line.is_some_and(|l| l < label)
                && (b.grant.is_none() || b.grant == Some(id))
        };
        let junction = memory
            .target
            .and_then(|t| view.published(t))
            .filter(|(_, b)| compatible(b))
            .or_else(|| view.communicating().find(|(_, b)| compatible(b)));

        let Some((tail, published)) = junction else {
            memory.target = None;
            return seek(agent, view, memory, resting, label, stretched, ctx);
        };
        memory.idle_rounds = 0;

        let granted = published.grant == Some(id);
        if !granted {
            let outranked = view.communicating().any(|(n, b)| {
                b.role == Role::Merging
                    && b.target == Some(tail.id)
                    && ctx.tie_break.outranks(n.id, id, ctx.round)
            });
            if outranked {
                trace!(agent = id, junction = tail.id, "Yielding junction");
                memory.target = None;
                memory.cooldown = ctx.config.cooldown_rounds;
                return Decision::stay(resting, memory);
            }
        }

        let abut = slot_beyond(tail, published, id, ctx.spacing());
        let junction_taken = view
            .communicating()
            .any(|(_, b)| b.predecessor == Some(tail.id));
        if granted && abut.length() <= ctx.tolerance() && !junction_taken {
            memory.predecessor = Some(tail.id);
            memory.target = None;
            memory.line = published.line;
            memory.relabeled = true;
            memory.heading = heading_from(tail);
            memory.grant = None;
            trace!(agent = id, junction = tail.id, label = ?published.line, "Spliced");
            let role = Role::for_links(memory.predecessor, memory.successor);
            return Decision::moving(role, memory, approach(abut, ctx.step()));
        }

        memory.target = Some(tail.id);
        Decision::moving(Role::Merging, memory, approach(abut, ctx.step()))
    }

    fn is_terminal(&self, agents: &[Agent]) -> bool {
        if agents.len() <= 1 {
            return true;
        }
        let label = agents[0].memory.line;
        agents.iter().all(|a| {
            a.role == Role::for_links(a.memory.predecessor, a.memory.successor)
                && a.memory.line == label
                && !a.memory.relabeled
        }) && line::chain_order(agents).is_ok()
    }
}

/// Keep a successor link until the successor is seen naming someone else.
/// Adopts a new follower when the link is open.
fn hold_successor(
    current: Option<AgentId>,
    view: &NeighborView,
    id: AgentId,
) -> Option<AgentId> {
    match current {
        Some(succ)
            if !view
                .published(succ)
                .is_some_and(|(_, b)| b.predecessor != Some(id)) =>
        {
            Some(succ)
        }
        _ => confirm_successor(None, view, id, |_| true),
    }
}

/// No compatible tail in sight.
///
/// The head follows a visible lower-labelled chain toward its back end. With
/// nothing lower in sight it explores, its followers trailing behind. The
/// chain labelled with the lowest id has nothing lower to find, so it holds
/// still and the others come to it.
fn seek(
    agent: &Agent,
    view: &NeighborView,
    mut memory: Memory,
    role: Role,
    label: AgentId,
    stretched: bool,
    ctx: &RoundContext<'_>,
) -> Decision {
    if stretched {
        return Decision::stay(role, memory);
    }

    let lower = |b: &Broadcast| b.line.is_some_and(|l| l < label);
    let frontier = view.communicating().find(|(_, b)| {
        lower(b) && b.successor.is_some_and(|s| view.published(s).is_none())
    });
    if let Some((n, b)) = frontier {
        memory.idle_rounds = 0;
        let clearance = ctx.config.clearance();
        let target = slot_beyond(n, b, agent.id, ctx.spacing());
        let movement = approach(target + clearance_push(view, clearance, agent.id), ctx.step());
        return Decision::moving(role, memory, movement);
    }

    // A lower chain is in sight but its tail is taken for now.
    if view.communicating().any(|(_, b)| lower(b)) {
        memory.idle_rounds = 0;
        return Decision::stay(role, memory);
    }
    if label == LOWEST_LABEL {
        return Decision::stay(role, memory);
    }

    memory.idle_rounds = memory.idle_rounds.saturating_add(1);
    if view.is_empty() || memory.idle_rounds > ctx.config.patience_rounds {
        let (heading, movement) = wander(agent, ctx);
        memory.wander_heading = heading;
        return Decision::moving(role, memory, movement);
    }
    Decision::stay(role, memory)
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
            .map(|(a, v)| Merging.decide(a, v, &ctx))
            .collect()
    }

    fn member(id: AgentId, x: f64, y: f64, memory: Memory) -> Agent {
        let role = Role::for_links(memory.predecessor, memory.successor);
        Agent::new(id, Vec2::new(x, y)).with_role(role).with_memory(memory)
    }

    fn lone(id: AgentId, x: f64, y: f64) -> Agent {
        member(
            id,
            x,
            y,
            Memory {
                line: Some(id),
                ..Memory::default()
            },
        )
    }

    #[test]
    fn test_initialize_labels_with_own_id() {
        let mut agent = Agent::new(4, Vec2::ZERO);
        Merging.initialize(&mut agent, &config());
        assert_eq!(agent.memory.line, Some(4));
        assert_eq!(agent.role, Role::Free);
    }

    #[test]
    fn test_higher_label_approaches_lower() {
        let config = config();
        let decisions = decide_all(&[lone(0, 0.0, 0.0), lone(1, 1.2, 0.0)], &config, 1);

        assert_eq!(decisions[1].role, Role::Merging);
        assert_eq!(decisions[1].memory.target, Some(0));
        assert_eq!(decisions[0].role, Role::Free);
        assert_eq!(decisions[0].memory.target, None);
    }

    #[test]
    fn test_junction_grants_comparator_winner() {
        let config = config();
        let mut a = lone(2, 0.8, 0.6);
        a.role = Role::Merging;
        a.memory.target = Some(0);
        let mut b = lone(3, 0.8, -0.6);
        b.role = Role::Merging;
        b.memory.target = Some(0);
        let decisions = decide_all(&[lone(0, 0.0, 0.0), a, b], &config, 1);

        assert_eq!(decisions[0].memory.grant, Some(2));
        // without a grant yet, the outranked rival backs off
        assert_eq!(decisions[2].memory.cooldown, config.cooldown_rounds);
        assert_eq!(decisions[2].memory.target, None);
        assert_eq!(decisions[1].role, Role::Merging);
    }

    #[test]
    fn test_granted_head_splices_and_takes_label() {
        let config = config();
        let mut junction = lone(0, 0.0, 0.0);
        junction.memory.grant = Some(1);
        let mut head = lone(1, 1.02, 0.0);
        head.role = Role::Merging;
        head.memory.target = Some(0);
        let decisions = decide_all(&[junction, head], &config, 3);

        let spliced = &decisions[1];
        assert_eq!(spliced.memory.predecessor, Some(0));
        assert_eq!(spliced.memory.line, Some(0));
        assert!(spliced.memory.relabeled);
        assert_eq!(spliced.role, Role::Tail);
    }

    #[test]
    fn test_chain_never_targets_own_tail() {
        let config = config();
        let head = member(
            0,
            0.0,
            0.0,
            Memory {
                line: Some(0),
                successor: Some(1),
                ..Memory::default()
            },
        );
        let tail = member(
            1,
            1.0,
            0.0,
            Memory {
                line: Some(0),
                predecessor: Some(0),
                ..Memory::default()
            },
        );
        let decisions = decide_all(&[head, tail], &config, 1);
        assert_eq!(decisions[0].role, Role::Head);
        assert_eq!(decisions[0].memory.target, None);
        assert_eq!(decisions[1].role, Role::Tail);
    }

    #[test]
    fn test_stray_follower_keeps_link_and_steers_back() {
        let config = config();
        let head = member(
            0,
            0.0,
            0.0,
            Memory {
                line: Some(0),
                successor: Some(1),
                heading: Some(Vec2::new(1.0, 0.0)),
                ..Memory::default()
            },
        );
        let stray = member(
            1,
            1.7,
            0.0,
            Memory {
                line: Some(0),
                predecessor: Some(0),
                heading: Some(Vec2::new(1.0, 0.0)),
                ..Memory::default()
            },
        );
        let decisions = decide_all(&[head, stray], &config, 7);

        assert_eq!(decisions[1].role, Role::Tail);
        assert_eq!(decisions[1].memory.predecessor, Some(0));
        assert!(decisions[1].movement.x < 0.0);
        assert!((decisions[1].movement.length() - config.max_step).abs() < 1e-9);

        // the head waits for its follower instead of dropping it
        assert_eq!(decisions[0].role, Role::Head);
        assert_eq!(decisions[0].memory.successor, Some(1));
        assert_eq!(decisions[0].movement, Vec2::ZERO);
    }

    #[test]
    fn test_head_follows_lower_chain_toward_its_tail() {
        let config = config();
        let front = member(
            0,
            0.0,
            0.0,
            Memory {
                line: Some(0),
                successor: Some(1),
                heading: Some(Vec2::new(1.0, 0.0)),
                ..Memory::default()
            },
        );
        let middle = member(
            1,
            1.3,
            0.0,
            Memory {
                line: Some(0),
                predecessor: Some(0),
                successor: Some(2),
                heading: Some(Vec2::new(1.0, 0.0)),
                ..Memory::default()
            },
        );
        let back = member(
            2,
            2.6,
            0.0,
            Memory {
                line: Some(0),
                predecessor: Some(1),
                heading: Some(Vec2::new(1.0, 0.0)),
                ..Memory::default()
            },
        );
        let mut seeker = lone(5, 1.0, 1.0);
        seeker.memory.idle_rounds = 7;
        let decisions = decide_all(&[front, middle, back, seeker], &config, 1);

        let seeking = &decisions[3];
        assert_eq!(seeking.memory.target, None);
        assert_eq!(seeking.memory.idle_rounds, 0);
        assert!(seeking.movement.x > 0.0 && seeking.movement.y < 0.0);
    }

    #[test]
    fn test_head_with_follower_explores_after_patience() {
        let config = config();
        let head = member(
            3,
            8.0,
            8.0,
            Memory {
                line: Some(3),
                successor: Some(4),
                idle_rounds: config.patience_rounds,
                ..Memory::default()
            },
        );
        let follower = member(
            4,
            9.0,
            8.0,
            Memory {
                line: Some(3),
                predecessor: Some(3),
                ..Memory::default()
            },
        );
        let decisions = decide_all(&[head, follower], &config, 30);

        assert_eq!(decisions[0].role, Role::Head);
        assert!((decisions[0].movement.length() - config.max_step).abs() < 1e-9);
        assert_eq!(decisions[0].memory.heading, Some(Vec2::new(1.0, 0.0)));
    }

    #[test]
    fn test_lowest_label_chain_holds_still() {
        let config = config();
        let head = member(
            0,
            8.0,
            8.0,
            Memory {
                line: Some(0),
                successor: Some(1),
                idle_rounds: config.patience_rounds * 4,
                ..Memory::default()
            },
        );
        let follower = member(
            1,
            9.0,
            8.0,
            Memory {
                line: Some(0),
                predecessor: Some(0),
                ..Memory::default()
            },
        );
        let decisions = decide_all(&[head, follower], &config, 30);
        assert_eq!(decisions[0].movement, Vec2::ZERO);
        assert_eq!(decisions[1].movement, Vec2::ZERO);
    }

    #[test]
    fn test_label_ripples_one_hop_per_round() {
        let config = config();
        let front = member(
            2,
            0.0,
            0.0,
            Memory {
                line: Some(0),
                predecessor: None,
                successor: Some(3),
                ..Memory::default()
            },
        );
        let middle = member(
            3,
            1.0,
            0.0,
            Memory {
                line: Some(2),
                predecessor: Some(2),
                successor: Some(4),
                ..Memory::default()
            },
        );
        let back = member(
            4,
            2.0,
            0.0,
            Memory {
                line: Some(3),
                predecessor: Some(3),
                ..Memory::default()
            },
        );
        let decisions = decide_all(&[front, middle, back], &config, 1);
        assert_eq!(decisions[1].memory.line, Some(0));
        assert!(decisions[1].memory.relabeled);
        assert_eq!(decisions[2].memory.line, Some(2));
        assert!(decisions[2].memory.relabeled);
    }

    #[test]
    fn test_terminal_requires_settled_labels() {
        let mut chain: Vec<Agent> = (0..3)
            .map(|i| {
                member(
                    i,
                    i as f64,
                    0.0,
                    Memory {
                        line: Some(0),
                        predecessor: i.checked_sub(1),
                        successor: (i < 2).then_some(i + 1),
                        ..Memory::default()
                    },
                )
            })
            .collect();
        assert!(Merging.is_terminal(&chain));
        chain[2].memory.relabeled = true;
        assert!(!Merging.is_terminal(&chain));
    }
}
