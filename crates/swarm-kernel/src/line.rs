//! Line and chain extraction from the committed table.
//!
//! The line is never stored anywhere. It only exists as the pairwise
//! predecessor/successor links agents keep in their own memory, so this
//! module reconstructs it (and checks it) from the outside.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::agent::{Agent, AgentId, Role};

/// Why a table does not form one ordered line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("agent {0} links to unknown agent {1}")]
    UnknownAgent(AgentId, AgentId),

    #[error("agent {agent} names {successor} as successor, but {successor} does not point back")]
    OneSidedLink { agent: AgentId, successor: AgentId },

    #[error("agents {first} and {second} both follow agent {shared}")]
    SharedPredecessor {
        shared: AgentId,
        first: AgentId,
        second: AgentId,
    },

    #[error("predecessor links form a cycle through agent {0}")]
    Cycle(AgentId),

    #[error("expected exactly one front agent, found {0}")]
    Fronts(usize),

    #[error("line covers {covered} of {total} agents")]
    Incomplete { covered: usize, total: usize },

    #[error("slot {slot} of line {line} is held by agents {first} and {second}")]
    DuplicateSlot {
        line: AgentId,
        slot: u32,
        first: AgentId,
        second: AgentId,
    },
}

/// Check link consistency: links point at known agents, no agent has two
/// followers, and following predecessors never loops.
pub fn check_links(agents: &[Agent]) -> Result<(), LineError> {
    let index: HashMap<AgentId, &Agent> = agents.iter().map(|a| (a.id, a)).collect();
    let mut followed_by: HashMap<AgentId, AgentId> = HashMap::new();

    for agent in agents {
        if let Some(pred) = agent.memory.predecessor {
            if !index.contains_key(&pred) {
                return Err(LineError::UnknownAgent(agent.id, pred));
            }
            if let Some(first) = followed_by.insert(pred, agent.id) {
                return Err(LineError::SharedPredecessor {
                    shared: pred,
                    first: first.min(agent.id),
                    second: first.max(agent.id),
                });
            }
        }
        if let Some(succ) = agent.memory.successor {
            if !index.contains_key(&succ) {
                return Err(LineError::UnknownAgent(agent.id, succ));
            }
        }
    }

    for agent in agents {
        let mut seen = BTreeSet::new();
        let mut current = agent;
        while let Some(pred) = current.memory.predecessor {
            if !seen.insert(current.id) {
                return Err(LineError::Cycle(current.id));
            }
            match index.get(&pred) {
                Some(next) => current = *next,
                None => break,
            }
        }
    }
    Ok(())
}

/// No two settled agents of the same line hold the same slot.
pub fn check_slots(agents: &[Agent]) -> Result<(), LineError> {
    let mut holders: HashMap<(AgentId, u32), AgentId> = HashMap::new();
    for agent in agents.iter().filter(|a| a.role == Role::Settled) {
        if let (Some(line), Some(slot)) = (agent.memory.line, agent.memory.slot) {
            if let Some(first) = holders.insert((line, slot), agent.id) {
                return Err(LineError::DuplicateSlot {
                    line,
                    slot,
                    first: first.min(agent.id),
                    second: first.max(agent.id),
                });
            }
        }
    }
    Ok(())
}

/// Maximal chains following mutual links, each listed front to back.
///
/// A chain starts at any agent without a confirmed predecessor; agents that
/// only sit on a cycle are not reported.
pub fn chains(agents: &[Agent]) -> Vec<Vec<AgentId>> {
    let index: HashMap<AgentId, &Agent> = agents.iter().map(|a| (a.id, a)).collect();
    let confirmed_next = |agent: &Agent| -> Option<AgentId> {
        let succ = agent.memory.successor?;
        let next = index.get(&succ)?;
        (next.memory.predecessor == Some(agent.id)).then_some(succ)
    };
    let has_confirmed_pred = |agent: &Agent| -> bool {
        agent
            .memory
            .predecessor
            .and_then(|p| index.get(&p))
            .is_some_and(|p| confirmed_next(*p) == Some(agent.id))
    };

    let mut out = Vec::new();
    for front in agents.iter().filter(|a| !has_confirmed_pred(*a)) {
        let mut chain = vec![front.id];
        let mut current: &Agent = front;
        while let Some(next) = confirmed_next(current) {
            if chain.len() > agents.len() {
                break;
            }
            chain.push(next);
            match index.get(&next) {
                Some(agent) => current = *agent,
                None => break,
            }
        }
        out.push(chain);
    }
    out
}

/// Order of the single line covering every agent, front to back.
///
/// Fails unless exactly one agent has no predecessor and following mutual
/// successor links from it visits every agent once.
pub fn chain_order(agents: &[Agent]) -> Result<Vec<AgentId>, LineError> {
    check_links(agents)?;

    let fronts: Vec<&Agent> = agents
        .iter()
        .filter(|a| a.memory.predecessor.is_none())
        .collect();
    if fronts.len() != 1 {
        return Err(LineError::Fronts(fronts.len()));
    }

    let index: HashMap<AgentId, &Agent> = agents.iter().map(|a| (a.id, a)).collect();
    let mut order = vec![fronts[0].id];
    let mut current = fronts[0];
    while let Some(succ) = current.memory.successor {
        let Some(next) = index.get(&succ) else {
            return Err(LineError::UnknownAgent(current.id, succ));
        };
        if next.memory.predecessor != Some(current.id) {
            return Err(LineError::OneSidedLink {
                agent: current.id,
                successor: succ,
            });
        }
        if order.len() >= agents.len() {
            return Err(LineError::Cycle(succ));
        }
        order.push(succ);
        current = *next;
    }

    if order.len() != agents.len() {
        return Err(LineError::Incomplete {
            covered: order.len(),
            total: agents.len(),
        });
    }
    Ok(order)
}

/// Head and tail role holders among the members of `chain`.
pub fn endpoint_roles(agents: &[Agent], chain: &[AgentId]) -> (usize, usize) {
    let members: BTreeSet<AgentId> = chain.iter().copied().collect();
    agents
        .iter()
        .filter(|a| members.contains(&a.id))
        .fold((0, 0), |(heads, tails), a| match a.role {
            Role::Head => (heads + 1, tails),
            Role::Tail => (heads, tails + 1),
            _ => (heads, tails),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Memory;
    use crate::geometry::Vec2;

    fn linked(id: AgentId, pred: Option<AgentId>, succ: Option<AgentId>) -> Agent {
        Agent::new(id, Vec2::new(id as f64, 0.0))
            .with_role(Role::Settled)
            .with_memory(Memory {
                predecessor: pred,
                successor: succ,
                ..Memory::default()
            })
    }

    #[test]
    fn test_chain_order_of_valid_line() {
        let agents = vec![
            linked(0, Some(2), None),
            linked(1, None, Some(2)),
            linked(2, Some(1), Some(0)),
        ];
        assert_eq!(chain_order(&agents).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_detects_shared_predecessor() {
        let agents = vec![
            linked(0, None, Some(1)),
            linked(1, Some(0), None),
            linked(2, Some(0), None),
        ];
        assert_eq!(
            check_links(&agents),
            Err(LineError::SharedPredecessor {
                shared: 0,
                first: 1,
                second: 2
            })
        );
    }

    #[test]
    fn test_detects_cycle() {
        let agents = vec![linked(0, Some(1), Some(1)), linked(1, Some(0), Some(0))];
        assert!(matches!(check_links(&agents), Err(LineError::Cycle(_))));
        assert!(chain_order(&agents).is_err());
    }

    #[test]
    fn test_two_chains_are_not_a_line() {
        let agents = vec![
            linked(0, None, Some(1)),
            linked(1, Some(0), None),
            linked(2, None, Some(3)),
            linked(3, Some(2), None),
        ];
        assert_eq!(chain_order(&agents), Err(LineError::Fronts(2)));
        assert_eq!(chains(&agents), vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_one_sided_successor_is_not_followed() {
        // 1 still waits for its successor to be confirmed
        let agents = vec![linked(0, None, None), linked(1, Some(0), None)];
        assert_eq!(chains(&agents), vec![vec![0], vec![1]]);
        assert!(matches!(chain_order(&agents), Err(LineError::Incomplete { .. })));
    }

    #[test]
    fn test_duplicate_slots_rejected() {
        let mut a = linked(0, None, None);
        a.memory.line = Some(0);
        a.memory.slot = Some(1);
        let mut b = linked(1, None, None);
        b.memory.line = Some(0);
        b.memory.slot = Some(1);
        assert!(matches!(
            check_slots(&[a, b]),
            Err(LineError::DuplicateSlot { slot: 1, .. })
        ));
    }
}
