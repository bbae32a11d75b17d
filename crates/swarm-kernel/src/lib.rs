//! Swarm Kernel: decentralized line formation for point-like robots.
//!
//! Every agent sees only what lies within its sensing and communication
//! radii and decides its next role and move from that alone. Two protocols
//! assemble the line: climbing, where agents attach one by one at the open
//! end of a growing line and settle conflicting claims with a pluggable
//! comparator, and merging, where short chains splice head-to-tail.

pub mod agent;
pub mod config;
pub mod geometry;
pub mod kernel;
pub mod layout;
pub mod line;
pub mod protocol;
pub mod range;
pub mod tiebreak;

pub use agent::{Agent, AgentId, Broadcast, Decision, Memory, Role};
pub use config::{ConfigError, SwarmConfig};
pub use geometry::Vec2;
pub use kernel::{RoundResult, RunOutcome, Swarm, SwarmEvent, SwarmSnapshot};
pub use layout::InitialLayout;
pub use line::LineError;
pub use protocol::{Climbing, Merging, Protocol, ProtocolKind, RoundContext};
pub use range::{Neighbor, NeighborView, RangeModel};
pub use tiebreak::{LowestId, RoundRobin, SeededOrder, TieBreak, TieBreakRule};
