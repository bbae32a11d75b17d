//! Competing mechanism: a pure comparator over colliding claims.
//!
//! Whenever two or more agents claim the same attachment point, every party
//! involved (the claimants themselves and the endpoint granting the slot)
//! evaluates the same comparator on the same published ids, so they all reach
//! the same verdict without exchanging anything else.
//!
//! The comparator only orders claimants that arrive together. Once an
//! endpoint has granted its slot, the grantee keeps it for as long as it
//! keeps claiming, even if a better-ranked agent shows up later.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Total order over claimants. Lower priority value wins; equal priorities
/// fall back to the lower id.
pub trait TieBreak: Send + Sync + std::fmt::Debug {
    /// Name used in logs and results.
    fn name(&self) -> &str;

    /// Priority of `id` in `round`. Lower wins.
    fn priority(&self, id: AgentId, round: u64) -> u64;

    fn compare(&self, a: AgentId, b: AgentId, round: u64) -> Ordering {
        self.priority(a, round)
            .cmp(&self.priority(b, round))
            .then(a.cmp(&b))
    }

    /// `a` beats `b`.
    fn outranks(&self, a: AgentId, b: AgentId, round: u64) -> bool {
        self.compare(a, b, round) == Ordering::Less
    }

    /// Best claimant among `ids`.
    fn winner(&self, ids: &[AgentId], round: u64) -> Option<AgentId> {
        ids.iter()
            .copied()
            .min_by(|a, b| self.compare(*a, *b, round))
    }
}

/// Lower stable identity wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestId;

impl TieBreak for LowestId {
    fn name(&self) -> &str {
        "lowest_id"
    }

    fn priority(&self, id: AgentId, _round: u64) -> u64 {
        id as u64
    }
}

/// Randomised-with-seed order, fixed for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct SeededOrder {
    pub seed: u64,
}

impl TieBreak for SeededOrder {
    fn name(&self) -> &str {
        "seeded"
    }

    fn priority(&self, id: AgentId, _round: u64) -> u64 {
        splitmix64(self.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

/// Priority rotates by one position every round.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobin {
    pub swarm_size: usize,
}

impl TieBreak for RoundRobin {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn priority(&self, id: AgentId, round: u64) -> u64 {
        let n = self.swarm_size.max(1) as u64;
        (id as u64 % n + n - round % n) % n
    }
}

/// Comparator selection in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakRule {
    #[default]
    LowestId,
    Seeded,
    RoundRobin,
}

impl TieBreakRule {
    pub fn build(self, seed: u64, swarm_size: usize) -> Box<dyn TieBreak> {
        match self {
            TieBreakRule::LowestId => Box::new(LowestId),
            TieBreakRule::Seeded => Box::new(SeededOrder { seed }),
            TieBreakRule::RoundRobin => Box::new(RoundRobin { swarm_size }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TieBreakRule::LowestId => "lowest_id",
            TieBreakRule::Seeded => "seeded",
            TieBreakRule::RoundRobin => "round_robin",
        }
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_id_wins() {
        let rule = LowestId;
        assert!(rule.outranks(2, 5, 0));
        assert!(!rule.outranks(5, 2, 0));
        assert_eq!(rule.winner(&[7, 3, 9], 11), Some(3));
        assert_eq!(rule.winner(&[], 0), None);
    }

    #[test]
    fn test_comparators_are_antisymmetric() {
        let rules: Vec<Box<dyn TieBreak>> = vec![
            Box::new(LowestId),
            Box::new(SeededOrder { seed: 42 }),
            Box::new(RoundRobin { swarm_size: 6 }),
        ];
        for rule in &rules {
            for round in 0..8 {
                for a in 0..6 {
                    for b in 0..6 {
                        if a == b {
                            assert!(!rule.outranks(a, b, round));
                        } else {
                            assert_ne!(rule.outranks(a, b, round), rule.outranks(b, a, round));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_round_robin_rotates() {
        let rule = RoundRobin { swarm_size: 4 };
        assert_eq!(rule.winner(&[0, 1, 2, 3], 0), Some(0));
        assert_eq!(rule.winner(&[0, 1, 2, 3], 1), Some(1));
        assert_eq!(rule.winner(&[0, 1, 2, 3], 3), Some(3));
        assert_eq!(rule.winner(&[0, 1, 2, 3], 4), Some(0));
    }

    #[test]
    fn test_seeded_order_depends_on_seed_only() {
        let a = SeededOrder { seed: 1 };
        let b = SeededOrder { seed: 1 };
        let ids: Vec<AgentId> = (0..20).collect();
        assert_eq!(a.winner(&ids, 0), b.winner(&ids, 99));
    }
}
