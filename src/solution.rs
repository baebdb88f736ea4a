//! A solution couples one [`Matching`] to one [`MonitorGraph`].
//!
//! The matching drives demand-node leaf costs into the monitor graph, so
//! every matching mutation needs mutable access to both halves; this facade
//! owns both and forwards the combined operations. Monitor-only structure
//! (groups, links, leaf monitors for external cost sources) is reachable
//! through [`monitors_mut`](Solution::monitors_mut).
//!
//! Concurrent exploration works by copy, not by sharing: [`snapshot`]
//! (Solution::snapshot) hands out a fully independent deep copy that can be
//! mutated on another thread and discarded or swapped back wholesale.

use crate::cost::Cost;
use crate::matching::{
    DemandChunkId, DemandNodeId, Domain, DomainChange, HallSet, Matching, SupplyChunkId,
    SupplyNodeId,
};
use crate::monitor::{Category, MonitorGraph, MonitorId, TraceId};

/// One matching plus the monitor graph aggregating its costs.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    matching: Matching,
    monitors: MonitorGraph,
}

impl Solution {
    pub fn new() -> Solution {
        Solution::default()
    }

    pub fn matching(&self) -> &Matching {
        &self.matching
    }

    pub fn monitors(&self) -> &MonitorGraph {
        &self.monitors
    }

    /// Mutable access to the monitor graph, for building group structure and
    /// for leaf monitors of external cost sources. Leaf monitors owned by
    /// demand nodes have their cost managed by the matching; do not set it
    /// directly.
    pub fn monitors_mut(&mut self) -> &mut MonitorGraph {
        &mut self.monitors
    }

    /*
     * Supply and demand registries
     */

    pub fn add_supply_chunk(&mut self, back: usize) -> SupplyChunkId {
        self.matching.add_supply_chunk(back)
    }

    pub fn add_supply_node(&mut self, sc: SupplyChunkId, back: usize) -> SupplyNodeId {
        self.matching.add_supply_node(sc, back)
    }

    pub fn add_demand_chunk(
        &mut self,
        base: usize,
        increment: usize,
        domain: Domain,
        back: usize,
    ) -> DemandChunkId {
        self.matching.add_demand_chunk(base, increment, domain, back)
    }

    pub fn delete_demand_chunk(&mut self, dc: DemandChunkId) {
        self.matching.delete_demand_chunk(dc)
    }

    pub fn add_demand_node(
        &mut self,
        dc: DemandChunkId,
        domain: Domain,
        category: Category,
        weight: Cost,
        back: usize,
    ) -> DemandNodeId {
        self.matching
            .add_demand_node(&mut self.monitors, dc, domain, category, weight, back)
    }

    pub fn delete_demand_node(&mut self, dn: DemandNodeId) {
        self.matching.delete_demand_node(&mut self.monitors, dn)
    }

    pub fn set_demand_chunk_base(&mut self, dc: DemandChunkId, base: usize) {
        self.matching
            .set_demand_chunk_base(&mut self.monitors, dc, base)
    }

    pub fn set_demand_chunk_increment(&mut self, dc: DemandChunkId, increment: usize) {
        self.matching
            .set_demand_chunk_increment(&mut self.monitors, dc, increment)
    }

    pub fn set_demand_chunk_domain(
        &mut self,
        dc: DemandChunkId,
        domain: Domain,
        change: DomainChange,
    ) {
        self.matching
            .set_demand_chunk_domain(&mut self.monitors, dc, domain, change)
    }

    pub fn set_demand_node_domain(
        &mut self,
        dn: DemandNodeId,
        domain: Domain,
        change: DomainChange,
    ) {
        self.matching
            .set_demand_node_domain(&mut self.monitors, dn, domain, change)
    }

    /*
     * Matching queries
     */

    pub fn unmatched_count(&mut self) -> usize {
        self.matching.unmatched_count(&mut self.monitors)
    }

    pub fn unmatched_demand_node(&mut self, i: usize) -> DemandNodeId {
        self.matching.unmatched_demand_node(&mut self.monitors, i)
    }

    pub fn mark_begin(&mut self) {
        self.matching.mark_begin(&mut self.monitors)
    }

    pub fn mark_end(&mut self, assert_unchanged: bool) {
        self.matching.mark_end(&mut self.monitors, assert_unchanged)
    }

    pub fn hall_set_count(&mut self) -> usize {
        self.matching.hall_set_count(&mut self.monitors)
    }

    pub fn hall_set(&mut self, i: usize) -> &HallSet {
        self.matching.hall_set(&mut self.monitors, i)
    }

    pub fn competitors(&mut self, dn: DemandNodeId) -> &[DemandNodeId] {
        self.matching.competitors(&mut self.monitors, dn)
    }

    /*
     * Traces
     */

    pub fn trace_make(&mut self, gm: MonitorId) -> TraceId {
        self.monitors.trace_make(gm)
    }

    /// Begin tracing, after bringing the matching up to date so the recorded
    /// initial cost is the settled one.
    pub fn trace_begin(&mut self, t: TraceId) {
        self.matching.unmatched_count(&mut self.monitors);
        self.monitors.trace_begin(t)
    }

    /// End tracing, after bringing the matching up to date so every pending
    /// cost movement is observed by the trace before it closes.
    pub fn trace_end(&mut self, t: TraceId) {
        self.matching.unmatched_count(&mut self.monitors);
        self.monitors.trace_end(t)
    }

    pub fn trace_delete(&mut self, t: TraceId) {
        if self.monitors.has_active_traces() {
            self.matching.unmatched_count(&mut self.monitors);
        }
        self.monitors.trace_delete(t)
    }

    pub fn trace_init_cost(&self, t: TraceId) -> Cost {
        self.monitors.trace_init_cost(t)
    }

    /// Trace content queries force the matching up to date first, so lazy
    /// re-matching cannot hide cost movements from the caller.
    pub fn trace_monitor_count(&mut self, t: TraceId) -> usize {
        self.matching.unmatched_count(&mut self.monitors);
        self.monitors.trace_monitor_count(t)
    }

    pub fn trace_monitor(&mut self, t: TraceId, i: usize) -> MonitorId {
        self.matching.unmatched_count(&mut self.monitors);
        self.monitors.trace_monitor(t, i)
    }

    pub fn trace_monitor_init_cost(&mut self, t: TraceId, i: usize) -> Cost {
        self.matching.unmatched_count(&mut self.monitors);
        self.monitors.trace_monitor_init_cost(t, i)
    }

    /*
     * Copying
     */

    /// A fully independent deep copy. Stable indices make the copy exact:
    /// every cross-reference is an index into the solution's own arenas, so
    /// shared structure is preserved without any translation table. Fatal if
    /// a trace is still active or a mutation is in progress.
    pub fn snapshot(&self) -> Solution {
        assert!(
            !self.monitors.has_active_traces(),
            "snapshot: a trace is still active"
        );
        assert!(
            !self.matching.mutation_in_progress(),
            "snapshot: a mutation is in progress"
        );
        self.clone()
    }

    /// Multi-line dump of the matching state for developer diagnosis.
    pub fn debug_string(&self, verbosity: u32) -> String {
        self.matching.debug_string(verbosity)
    }
}

#[cfg(test)]
mod tests;
