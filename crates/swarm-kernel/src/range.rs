//! Geometry & range model: who senses and who hears whom this round.
//!
//! The range model is a pure function of the committed position table and the
//! two radii. It is the only place an agent's [`Broadcast`] leaves the agent,
//! and only toward agents within communication range.

use crate::agent::{Agent, AgentId, Broadcast, Role};
use crate::geometry::Vec2;

/// One neighbour as seen from the observing agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: AgentId,
    /// Neighbour position minus observer position
    pub offset: Vec2,
    pub distance: f64,
    /// Within sensing radius
    pub sensed: bool,
    /// Published fields, present only within communication radius
    pub broadcast: Option<Broadcast>,
}

impl Neighbor {
    pub fn role(&self) -> Option<Role> {
        self.broadcast.as_ref().map(|b| b.role)
    }
}

/// Read-only snapshot of an agent's surroundings for one round.
///
/// Neighbours are ordered by distance, then id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborView {
    pub neighbors: Vec<Neighbor>,
}

impl NeighborView {
    pub fn new(mut neighbors: Vec<Neighbor>) -> Self {
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        Self { neighbors }
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn get(&self, id: AgentId) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.id == id)
    }

    /// Neighbours within sensing radius.
    pub fn sensed(&self) -> impl Iterator<Item = &Neighbor> {
        self.neighbors.iter().filter(|n| n.sensed)
    }

    /// Neighbours within communication radius, with their published fields.
    pub fn communicating(&self) -> impl Iterator<Item = (&Neighbor, &Broadcast)> {
        self.neighbors
            .iter()
            .filter_map(|n| n.broadcast.as_ref().map(|b| (n, b)))
    }

    /// Published fields of a specific neighbour, if within communication range.
    pub fn published(&self, id: AgentId) -> Option<(&Neighbor, &Broadcast)> {
        self.communicating().find(|(n, _)| n.id == id)
    }
}

/// Distance-threshold neighbourhood graphs over agent positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeModel {
    pub sensing_radius: f64,
    pub communication_radius: f64,
}

impl RangeModel {
    pub fn new(sensing_radius: f64, communication_radius: f64) -> Self {
        Self {
            sensing_radius,
            communication_radius,
        }
    }

    fn reach(&self) -> f64 {
        self.sensing_radius.max(self.communication_radius)
    }

    /// Neighbour views for every agent, indexed like `agents`.
    pub fn views(&self, agents: &[Agent]) -> Vec<NeighborView> {
        let broadcasts: Vec<Broadcast> = agents.iter().map(Agent::broadcast).collect();
        let reach = self.reach();

        let mut lists: Vec<Vec<Neighbor>> = vec![Vec::new(); agents.len()];
        for i in 0..agents.len() {
            for j in (i + 1)..agents.len() {
                let offset = agents[j].position - agents[i].position;
                let distance = offset.length();
                if !distance.is_finite() || distance > reach {
                    continue;
                }
                let sensed = distance <= self.sensing_radius;
                let hears = distance <= self.communication_radius;

                lists[i].push(Neighbor {
                    id: agents[j].id,
                    offset,
                    distance,
                    sensed,
                    broadcast: hears.then(|| broadcasts[j].clone()),
                });
                lists[j].push(Neighbor {
                    id: agents[i].id,
                    offset: -offset,
                    distance,
                    sensed,
                    broadcast: hears.then(|| broadcasts[i].clone()),
                });
            }
        }

        lists.into_iter().map(NeighborView::new).collect()
    }
}
