//! Line Experiment: drives the swarm kernel round by round and records how
//! each protocol converges.
//!
//! This crate provides:
//! - A runner that plays one protocol on one swarm until a line forms or the
//!   round bound is hit
//! - Per-round metrics and JSON result files
//! - Grid sweeps over protocols, swarm sizes and trials with summary statistics

pub mod experiment;
pub mod results;
