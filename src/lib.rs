//! Feasibility and cost core for combinatorial timetabling solvers.
//!
//! The crate maintains two coupled structures for one candidate solution: an
//! incremental unweighted bipartite [matching] between atomic demands and
//! atomic capacity units, and a [monitor] DAG aggregating constraint
//! violation costs. A [`Solution`](solution::Solution) owns one of each and
//! keeps them consistent: every unsatisfiable demand node drives its weight
//! into the monitor graph, so "how infeasible is this timetable and why" is
//! always one cheap query away while a solver mutates the timetable.

pub mod cost;
pub mod matching;
pub mod monitor;
pub mod solution;

pub use crate::cost::{cost, hard_cost, soft_cost, Cost, HARD_COST_WEIGHT, MAX_COST};
pub use crate::matching::{
    DemandChunkId, DemandNodeId, Domain, DomainChange, HallSet, Matching, SupplyChunkId,
    SupplyNodeId,
};
pub use crate::monitor::{Category, MonitorGraph, MonitorId, TraceId};
pub use crate::solution::Solution;
