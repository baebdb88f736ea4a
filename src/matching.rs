//! Incremental unweighted bipartite matching between demand and supply nodes.
//!
//! Supply nodes are atomic capacity units, demand nodes atomic requirements.
//! Both come in chunks sharing an affine addressing scheme: a demand node
//! reaches the supply node at absolute index
//! `chunk.base + chunk.increment * chunk_domain_element + node_domain_element`
//! for every combination of its chunk's domain and its own domain.
//!
//! The matching is maintained lazily. Edits (adding nodes, changing domains)
//! only adjust a cached lower bound on the number of unmatchable demand
//! nodes; the next query brings the matching up to date with a breadth-first
//! augmenting-path search over exactly the nodes that need it. When demand
//! cannot be met, the maximal deficiency witnesses (Hall sets) are derived on
//! request by a union-find decomposition, rebuilt from scratch each time.
//!
//! Each demand node owns a leaf monitor in the solution's [`MonitorGraph`]:
//! its cost is the node's weight while the node is unmatched and 0 while it
//! is matched, so every assign/deassign drives exactly one cost propagation.

use crate::cost::Cost;
use crate::monitor::{Category, MonitorGraph, MonitorId};
use log::debug;
use smallvec::SmallVec;

/// Relative offsets a demand node (or chunk) may map to. Domains are short
/// in practice, so they are kept inline.
pub type Domain = SmallVec<[u16; 8]>;

/// Stable handle of a supply chunk within one [`Matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupplyChunkId(pub usize);

/// Stable handle of a supply node; doubles as its absolute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SupplyNodeId(pub usize);

/// Stable handle of a demand chunk within one [`Matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DemandChunkId(pub usize);

/// Stable handle of a demand node within one [`Matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DemandNodeId(pub usize);

/// How a new domain relates to the old one. Decides whether an existing
/// assignment survives the edit and whether the cached lower bound on the
/// unmatched count may be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainChange {
    /// The new domain contains only points of the old one. The true minimum
    /// unmatched count cannot have decreased, so the bound is kept; the
    /// assignment is kept if its target is still reachable.
    ToSubset,
    /// The new domain contains every point of the old one. The assignment is
    /// kept; the bound is decremented since the enlarged domain may admit
    /// one more match.
    ToSuperset,
    /// No relationship may be assumed: deassign and decrement the bound.
    ToOther,
}

#[derive(Debug, Clone)]
struct SupplyChunk {
    /// Global supply-node count at creation time; demand chunks address
    /// supply nodes relative to this.
    base: usize,
    nodes: Vec<SupplyNodeId>,
    back: usize,
}

#[derive(Debug, Clone)]
struct SupplyNode {
    chunk: SupplyChunkId,
    visit: u64,
    occupant: Option<DemandNodeId>,
    hall_set: Option<usize>,
    /// Which element of the reaching node's domain led here during the
    /// current search round.
    test_index: usize,
    back: usize,
}

#[derive(Debug, Clone)]
struct DemandChunk {
    base: usize,
    increment: usize,
    domain: Domain,
    nodes: Vec<DemandNodeId>,
    back: usize,
}

#[derive(Debug, Clone)]
struct DemandNode {
    chunk: DemandChunkId,
    domain: Domain,
    assigned: Option<SupplyNodeId>,
    /// Domain index that produced the last successful assignment; trying it
    /// first often avoids a full search. `usize::MAX` until the first one.
    asst_index: usize,
    unmatched_pos: usize,
    bfs_parent: Option<DemandNodeId>,
    hall_set: Option<usize>,
    monitor: MonitorId,
    weight: Cost,
    back: usize,
}

/// A maximal unsatisfiable witness: a set of demand nodes whose combined
/// reachable supply is strictly smaller than the set itself.
#[derive(Debug, Clone)]
pub struct HallSet {
    /// Union-find parent index; self means root. Member lists are only
    /// meaningful at roots.
    parent: usize,
    supply_nodes: Vec<SupplyNodeId>,
    demand_nodes: Vec<DemandNodeId>,
}

impl HallSet {
    pub fn supply_nodes(&self) -> &[SupplyNodeId] {
        &self.supply_nodes
    }

    pub fn demand_nodes(&self) -> &[DemandNodeId] {
        &self.demand_nodes
    }
}

/// The matching itself: registries of supply and demand, the unmatched list,
/// the cached lower bound, and the lazily derived Hall sets.
///
/// Every operation that can change demand-node costs takes the owning
/// solution's [`MonitorGraph`] so the cost change propagates immediately.
#[derive(Debug, Clone, Default)]
pub struct Matching {
    supply_chunks: Vec<SupplyChunk>,
    supply_nodes: Vec<SupplyNode>,
    demand_chunks: Vec<Option<DemandChunk>>,
    free_demand_chunks: Vec<usize>,
    demand_nodes: Vec<Option<DemandNode>>,
    free_demand_nodes: Vec<usize>,
    demand_node_count: usize,
    /// Visit epoch for de-duplicating work within one search round. Never
    /// reset; nodes are "unvisited" simply by being behind the counter.
    visit: u64,
    unmatched: Vec<DemandNodeId>,
    /// Never exceeds the true minimum unmatched count; exact right after
    /// `make_clean`.
    lower_bound: usize,
    /// Mutation-in-progress flag, checked in debug builds only.
    active: bool,
    marks: Vec<usize>,
    hall_sets: Vec<HallSet>,
    hall_roots: Vec<usize>,
    competitors: Vec<DemandNodeId>,
    bfs_queue: Vec<DemandNodeId>,
}

impl Matching {
    pub fn new() -> Matching {
        Matching::default()
    }

    fn begin_mutation(&mut self) {
        debug_assert!(!self.active, "re-entrant operation on matching");
        self.active = true;
    }

    fn end_mutation(&mut self) {
        self.active = false;
    }

    pub(crate) fn mutation_in_progress(&self) -> bool {
        self.active
    }

    fn demand(&self, dn: DemandNodeId) -> &DemandNode {
        self.demand_nodes[dn.0].as_ref().expect("stale demand node id")
    }

    fn demand_mut(&mut self, dn: DemandNodeId) -> &mut DemandNode {
        self.demand_nodes[dn.0].as_mut().expect("stale demand node id")
    }

    fn dchunk(&self, dc: DemandChunkId) -> &DemandChunk {
        self.demand_chunks[dc.0].as_ref().expect("stale demand chunk id")
    }

    fn dchunk_mut(&mut self, dc: DemandChunkId) -> &mut DemandChunk {
        self.demand_chunks[dc.0].as_mut().expect("stale demand chunk id")
    }

    /*
     * Supply registry
     */

    /// Create a supply chunk; its base is the current supply-node count.
    pub fn add_supply_chunk(&mut self, back: usize) -> SupplyChunkId {
        self.supply_chunks.push(SupplyChunk {
            base: self.supply_nodes.len(),
            nodes: Vec::new(),
            back,
        });
        SupplyChunkId(self.supply_chunks.len() - 1)
    }

    /// Append one supply node to a chunk.
    pub fn add_supply_node(&mut self, sc: SupplyChunkId, back: usize) -> SupplyNodeId {
        let id = SupplyNodeId(self.supply_nodes.len());
        self.supply_nodes.push(SupplyNode {
            chunk: sc,
            visit: 0,
            occupant: None,
            hall_set: None,
            test_index: 0,
            back,
        });
        self.supply_chunks[sc.0].nodes.push(id);
        id
    }

    pub fn supply_chunk_count(&self) -> usize {
        self.supply_chunks.len()
    }

    pub fn supply_node_count(&self) -> usize {
        self.supply_nodes.len()
    }

    pub fn supply_chunk_base(&self, sc: SupplyChunkId) -> usize {
        self.supply_chunks[sc.0].base
    }

    pub fn supply_chunk_nodes(&self, sc: SupplyChunkId) -> &[SupplyNodeId] {
        &self.supply_chunks[sc.0].nodes
    }

    pub fn supply_chunk_back(&self, sc: SupplyChunkId) -> usize {
        self.supply_chunks[sc.0].back
    }

    pub fn supply_node_occupant(&self, sn: SupplyNodeId) -> Option<DemandNodeId> {
        self.supply_nodes[sn.0].occupant
    }

    pub fn supply_node_chunk(&self, sn: SupplyNodeId) -> SupplyChunkId {
        self.supply_nodes[sn.0].chunk
    }

    pub fn supply_node_back(&self, sn: SupplyNodeId) -> usize {
        self.supply_nodes[sn.0].back
    }

    /*
     * Demand registry
     */

    pub fn add_demand_chunk(
        &mut self,
        base: usize,
        increment: usize,
        domain: Domain,
        back: usize,
    ) -> DemandChunkId {
        let chunk = DemandChunk {
            base,
            increment,
            domain,
            nodes: Vec::new(),
            back,
        };
        match self.free_demand_chunks.pop() {
            Some(slot) => {
                self.demand_chunks[slot] = Some(chunk);
                DemandChunkId(slot)
            }
            None => {
                self.demand_chunks.push(Some(chunk));
                DemandChunkId(self.demand_chunks.len() - 1)
            }
        }
    }

    /// Delete an empty demand chunk and recycle its slot.
    pub fn delete_demand_chunk(&mut self, dc: DemandChunkId) {
        assert!(
            self.dchunk(dc).nodes.is_empty(),
            "delete_demand_chunk: chunk still has demand nodes"
        );
        self.demand_chunks[dc.0] = None;
        self.free_demand_chunks.push(dc.0);
    }

    pub fn demand_chunk_count(&self) -> usize {
        self.demand_chunks.iter().filter(|c| c.is_some()).count()
    }

    pub fn demand_chunk_base(&self, dc: DemandChunkId) -> usize {
        self.dchunk(dc).base
    }

    pub fn demand_chunk_increment(&self, dc: DemandChunkId) -> usize {
        self.dchunk(dc).increment
    }

    pub fn demand_chunk_domain(&self, dc: DemandChunkId) -> &[u16] {
        &self.dchunk(dc).domain
    }

    pub fn demand_chunk_nodes(&self, dc: DemandChunkId) -> &[DemandNodeId] {
        &self.dchunk(dc).nodes
    }

    pub fn demand_chunk_back(&self, dc: DemandChunkId) -> usize {
        self.dchunk(dc).back
    }

    /// Change a demand chunk's base. Addressing changes for every member
    /// node, so this is a `ToOther` edit on each of them; a no-op if the
    /// base is unchanged.
    pub fn set_demand_chunk_base(
        &mut self,
        monitors: &mut MonitorGraph,
        dc: DemandChunkId,
        base: usize,
    ) {
        self.begin_mutation();
        if self.dchunk(dc).base != base {
            self.dchunk_mut(dc).base = base;
            let nodes = self.dchunk(dc).nodes.clone();
            for dn in nodes {
                self.domain_has_changed(monitors, dn, DomainChange::ToOther);
            }
        }
        self.end_mutation();
    }

    /// Change a demand chunk's increment; same contract as
    /// [`set_demand_chunk_base`](Matching::set_demand_chunk_base).
    pub fn set_demand_chunk_increment(
        &mut self,
        monitors: &mut MonitorGraph,
        dc: DemandChunkId,
        increment: usize,
    ) {
        self.begin_mutation();
        if self.dchunk(dc).increment != increment {
            self.dchunk_mut(dc).increment = increment;
            let nodes = self.dchunk(dc).nodes.clone();
            for dn in nodes {
                self.domain_has_changed(monitors, dn, DomainChange::ToOther);
            }
        }
        self.end_mutation();
    }

    /// Replace a demand chunk's domain, applying `change` to every member.
    pub fn set_demand_chunk_domain(
        &mut self,
        monitors: &mut MonitorGraph,
        dc: DemandChunkId,
        domain: Domain,
        change: DomainChange,
    ) {
        self.begin_mutation();
        self.dchunk_mut(dc).domain = domain;
        let nodes = self.dchunk(dc).nodes.clone();
        for dn in nodes {
            self.domain_has_changed(monitors, dn, change);
        }
        self.end_mutation();
    }

    /// Create a demand node together with its leaf monitor and enqueue it as
    /// unmatched, driving the monitor's cost from 0 to `weight`.
    pub fn add_demand_node(
        &mut self,
        monitors: &mut MonitorGraph,
        dc: DemandChunkId,
        domain: Domain,
        category: Category,
        weight: Cost,
        back: usize,
    ) -> DemandNodeId {
        self.begin_mutation();
        let monitor = monitors.add_leaf(category, back);
        let node = DemandNode {
            chunk: dc,
            domain,
            assigned: None,
            asst_index: usize::MAX,
            unmatched_pos: 0,
            bfs_parent: None,
            hall_set: None,
            monitor,
            weight,
            back,
        };
        let id = match self.free_demand_nodes.pop() {
            Some(slot) => {
                self.demand_nodes[slot] = Some(node);
                DemandNodeId(slot)
            }
            None => {
                self.demand_nodes.push(Some(node));
                DemandNodeId(self.demand_nodes.len() - 1)
            }
        };
        self.dchunk_mut(dc).nodes.push(id);
        self.demand_node_count += 1;
        self.add_unmatched(monitors, id);
        self.end_mutation();
        id
    }

    /// Delete a demand node: release its assignment (or take it off the
    /// unmatched list, dropping its cost to 0), remove it from its chunk,
    /// lower the bound, recycle its slot, and delete its leaf monitor.
    pub fn delete_demand_node(&mut self, monitors: &mut MonitorGraph, dn: DemandNodeId) {
        self.begin_mutation();
        self.demand_node_count -= 1;
        if let Some(sn) = self.demand(dn).assigned {
            self.supply_nodes[sn.0].occupant = None;
            self.demand_mut(dn).assigned = None;
        } else {
            self.remove_unmatched(monitors, dn);
        }
        let dc = self.demand(dn).chunk;
        let nodes = &mut self.dchunk_mut(dc).nodes;
        let pos = nodes
            .iter()
            .position(|&x| x == dn)
            .expect("delete_demand_node: node not in its chunk");
        nodes.remove(pos);
        if self.lower_bound > 0 {
            self.lower_bound -= 1;
        }
        let monitor = self.demand(dn).monitor;
        monitors.delete_monitor(monitor);
        self.demand_nodes[dn.0] = None;
        self.free_demand_nodes.push(dn.0);
        self.end_mutation();
    }

    pub fn demand_node_count(&self) -> usize {
        self.demand_node_count
    }

    pub fn demand_node_domain(&self, dn: DemandNodeId) -> &[u16] {
        &self.demand(dn).domain
    }

    pub fn demand_node_chunk(&self, dn: DemandNodeId) -> DemandChunkId {
        self.demand(dn).chunk
    }

    pub fn demand_node_monitor(&self, dn: DemandNodeId) -> MonitorId {
        self.demand(dn).monitor
    }

    pub fn demand_node_weight(&self, dn: DemandNodeId) -> Cost {
        self.demand(dn).weight
    }

    pub fn demand_node_back(&self, dn: DemandNodeId) -> usize {
        self.demand(dn).back
    }

    /// The supply node this demand node currently holds, if any. Not forced
    /// up to date; query [`unmatched_count`](Matching::unmatched_count)
    /// first for an exact picture.
    pub fn demand_node_assignment(&self, dn: DemandNodeId) -> Option<SupplyNodeId> {
        self.demand(dn).assigned
    }

    /// Replace one demand node's own domain, applying `change`.
    pub fn set_demand_node_domain(
        &mut self,
        monitors: &mut MonitorGraph,
        dn: DemandNodeId,
        domain: Domain,
        change: DomainChange,
    ) {
        self.begin_mutation();
        self.demand_mut(dn).domain = domain;
        self.domain_has_changed(monitors, dn, change);
        self.end_mutation();
    }

    /// Whether `target` is reachable from `dn` under the current addressing.
    fn can_reach(&self, dn: DemandNodeId, target: SupplyNodeId) -> bool {
        let node = self.demand(dn);
        let chunk = self.dchunk(node.chunk);
        for &cd in &chunk.domain {
            let base = chunk.base + chunk.increment * cd as usize;
            for &d in &node.domain {
                if base + d as usize == target.0 {
                    return true;
                }
            }
        }
        false
    }

    /// Adjust the bound and the assignment after `dn`'s addressing changed.
    fn domain_has_changed(
        &mut self,
        monitors: &mut MonitorGraph,
        dn: DemandNodeId,
        change: DomainChange,
    ) {
        // a subset cannot lower the true minimum unmatched count; anything
        // else can lower it by one, and the bound must stay below the truth
        if change != DomainChange::ToSubset && self.lower_bound > 0 {
            self.lower_bound -= 1;
        }
        let deassign = match change {
            DomainChange::ToSuperset => false,
            DomainChange::ToSubset => match self.demand(dn).assigned {
                Some(sn) => !self.can_reach(dn, sn),
                None => false,
            },
            DomainChange::ToOther => true,
        };
        if deassign {
            if let Some(sn) = self.demand(dn).assigned {
                self.supply_nodes[sn.0].occupant = None;
                self.demand_mut(dn).assigned = None;
                self.add_unmatched(monitors, dn);
            }
        }
    }

    /*
     * Unmatched list
     */

    fn add_unmatched(&mut self, monitors: &mut MonitorGraph, dn: DemandNodeId) {
        debug_assert!(self.demand(dn).assigned.is_none(), "add_unmatched internal error");
        let pos = self.unmatched.len();
        self.demand_mut(dn).unmatched_pos = pos;
        self.unmatched.push(dn);
        let (monitor, weight) = {
            let node = self.demand(dn);
            (node.monitor, node.weight)
        };
        debug_assert_eq!(monitors.cost(monitor), 0, "add_unmatched internal error");
        if weight > 0 {
            monitors.change_cost(monitor, weight);
        }
    }

    fn remove_unmatched(&mut self, monitors: &mut MonitorGraph, dn: DemandNodeId) {
        let pos = self.demand(dn).unmatched_pos;
        debug_assert_eq!(self.unmatched[pos], dn, "remove_unmatched internal error");
        let moved = self.unmatched.pop().expect("remove_unmatched internal error");
        if moved != dn {
            self.unmatched[pos] = moved;
            self.demand_mut(moved).unmatched_pos = pos;
        }
        let monitor = self.demand(dn).monitor;
        if monitors.cost(monitor) > 0 {
            monitors.change_cost(monitor, 0);
        }
    }

    /*
     * Solving
     */

    /// Try to find and apply an augmenting path from the unassigned demand
    /// node `start`, breadth first. Supply nodes already stamped with the
    /// current visit epoch are skipped, so consecutive failing searches that
    /// share an epoch never re-explore each other's ground.
    fn assign_bfs(&mut self, start: DemandNodeId) -> bool {
        let visit = self.visit;
        let mut queue = std::mem::take(&mut self.bfs_queue);
        queue.clear();
        queue.push(start);
        self.demand_mut(start).bfs_parent = None;
        let mut head = 0;
        let mut success = false;
        'search: while head < queue.len() {
            let cur = queue[head];
            head += 1;
            let (chunk_id, ndom) = {
                let node = self.demand(cur);
                (node.chunk, node.domain.clone())
            };
            let (base, increment, cdom) = {
                let chunk = self.dchunk(chunk_id);
                (chunk.base, chunk.increment, chunk.domain.clone())
            };
            for &cd in &cdom {
                let b = base + increment * cd as usize;
                for (j, &d) in ndom.iter().enumerate() {
                    let sn = b + d as usize;
                    if self.supply_nodes[sn].visit < visit {
                        self.supply_nodes[sn].visit = visit;
                        self.supply_nodes[sn].test_index = j;
                        match self.supply_nodes[sn].occupant {
                            None => {
                                // free supply node found: unwind the search
                                // tree, flipping every assignment on the path
                                let mut d_id = cur;
                                let mut s = sn;
                                loop {
                                    let prev = self.demand(d_id).assigned;
                                    self.supply_nodes[s].occupant = Some(d_id);
                                    let test_index = self.supply_nodes[s].test_index;
                                    let node = self.demand_mut(d_id);
                                    node.assigned = Some(SupplyNodeId(s));
                                    node.asst_index = test_index;
                                    match self.demand(d_id).bfs_parent {
                                        Some(p) => {
                                            d_id = p;
                                            s = prev.expect("assign_bfs internal error").0;
                                        }
                                        None => break,
                                    }
                                }
                                success = true;
                                break 'search;
                            }
                            Some(occ) => {
                                self.demand_mut(occ).bfs_parent = Some(cur);
                                queue.push(occ);
                            }
                        }
                    }
                }
            }
        }
        self.bfs_queue = queue;
        success
    }

    /// Bring the matching up to date by attempting to assign each unmatched
    /// demand node. No work when the cached bound already equals the
    /// unmatched count.
    ///
    /// Unmatched nodes are retried in reverse insertion order, first via the
    /// node's last successful domain element, then via the full search. The
    /// visit epoch is bumped only when the preceding attempt succeeded (a
    /// failed search leaves marks worth keeping), and the loop stops as soon
    /// as the bound is proven tight. Any previously built Hall sets are
    /// discarded, being derived from the old matching.
    fn make_clean(&mut self, monitors: &mut MonitorGraph) {
        if self.lower_bound >= self.unmatched.len() {
            return;
        }
        debug!(
            "re-matching {} unmatched demand nodes (lower bound {})",
            self.unmatched.len(),
            self.lower_bound
        );
        let mut visit_inc_needed_next = true;
        let mut i = self.unmatched.len();
        while i > 0 {
            i -= 1;
            let dn = self.unmatched[i];
            debug_assert!(self.demand(dn).assigned.is_none(), "make_clean internal error");

            // a previously successful element of dn's domain may work again
            let asst_index = self.demand(dn).asst_index;
            if asst_index < self.demand(dn).domain.len() {
                let elem = self.demand(dn).domain[asst_index] as usize;
                let chunk_id = self.demand(dn).chunk;
                let (base, increment, cdom) = {
                    let chunk = self.dchunk(chunk_id);
                    (chunk.base, chunk.increment, chunk.domain.clone())
                };
                for &cd in &cdom {
                    let sn = base + increment * cd as usize + elem;
                    if self.supply_nodes[sn].occupant.is_none() {
                        self.supply_nodes[sn].occupant = Some(dn);
                        self.demand_mut(dn).assigned = Some(SupplyNodeId(sn));
                        break;
                    }
                }
            }

            if self.demand(dn).assigned.is_none() {
                if visit_inc_needed_next {
                    self.visit += 1;
                }
                visit_inc_needed_next = self.assign_bfs(dn);
            }

            if self.demand(dn).assigned.is_some() {
                self.remove_unmatched(monitors, dn);
                if self.lower_bound == self.unmatched.len() {
                    break;
                }
            }
        }
        self.lower_bound = self.unmatched.len();
        self.hall_sets.clear();
        self.hall_roots.clear();
    }

    /// The exact number of unsatisfiable demand nodes, bringing the matching
    /// up to date first.
    pub fn unmatched_count(&mut self, monitors: &mut MonitorGraph) -> usize {
        self.begin_mutation();
        self.make_clean(monitors);
        self.end_mutation();
        self.lower_bound
    }

    /// The i'th unsatisfiable demand node, bringing the matching up to date
    /// first.
    pub fn unmatched_demand_node(
        &mut self,
        monitors: &mut MonitorGraph,
        i: usize,
    ) -> DemandNodeId {
        self.begin_mutation();
        self.make_clean(monitors);
        self.end_mutation();
        self.unmatched[i]
    }

    /*
     * Marks
     */

    /// Begin a bracketed sequence of edits, saving the exact unmatched count.
    pub fn mark_begin(&mut self, monitors: &mut MonitorGraph) {
        let count = self.unmatched_count(monitors);
        self.marks.push(count);
    }

    /// End a bracketed sequence of edits. With `assert_unchanged`, the
    /// caller claims its edits cancelled out: the saved bound is restored
    /// and, after re-solving, must prove exact again. This is a sanity
    /// check, not a rollback.
    pub fn mark_end(&mut self, monitors: &mut MonitorGraph, assert_unchanged: bool) {
        let lower_bound = self
            .marks
            .pop()
            .expect("mark_end with no matching call to mark_begin");
        if assert_unchanged {
            self.begin_mutation();
            self.lower_bound = lower_bound;
            self.make_clean(monitors);
            assert!(
                self.lower_bound == lower_bound,
                "mark_end: matching did not return to its marked state"
            );
            self.end_mutation();
        }
    }

    /*
     * Hall sets
     */

    fn hall_root(sets: &[HallSet], mut h: usize) -> usize {
        while sets[h].parent != h {
            h = sets[h].parent;
        }
        h
    }

    /// Compress the path from `h` to its root, returning the root.
    fn hall_compress(sets: &mut [HallSet], h: usize) -> usize {
        let root = Self::hall_root(sets, h);
        let mut cur = h;
        while sets[cur].parent != root {
            let next = sets[cur].parent;
            sets[cur].parent = root;
            cur = next;
        }
        root
    }

    /// Union the set containing `h` into `root`, which must be a root.
    fn hall_union(sets: &mut [HallSet], root: usize, h: usize) -> usize {
        let other_root = Self::hall_root(sets, h);
        sets[other_root].parent = root;
        Self::hall_compress(sets, h)
    }

    /// Explore the matching graph from the unmatched node `start` as an
    /// assignment search would, claiming every node met for `root` (or
    /// unioning in a previously claimed node's set). The matching is maximal
    /// here, so the traversal can never meet a free supply node; checked.
    fn hall_assign(&mut self, start: DemandNodeId, root: usize) {
        let mut stack = vec![start];
        while let Some(dn) = stack.pop() {
            if let Some(h) = self.demand(dn).hall_set {
                if h != root {
                    let r = Self::hall_union(&mut self.hall_sets, root, h);
                    self.demand_mut(dn).hall_set = Some(r);
                }
                continue;
            }
            self.demand_mut(dn).hall_set = Some(root);
            let (chunk_id, ndom) = {
                let node = self.demand(dn);
                (node.chunk, node.domain.clone())
            };
            let (base, increment, cdom) = {
                let chunk = self.dchunk(chunk_id);
                (chunk.base, chunk.increment, chunk.domain.clone())
            };
            for &cd in &cdom {
                let b = base + increment * cd as usize;
                for &d in &ndom {
                    let sn = b + d as usize;
                    assert!(
                        self.supply_nodes[sn].occupant.is_some(),
                        "hall_assign: free supply node under a maximal matching"
                    );
                    match self.supply_nodes[sn].hall_set {
                        Some(h) => {
                            if h != root {
                                let r = Self::hall_union(&mut self.hall_sets, root, h);
                                self.supply_nodes[sn].hall_set = Some(r);
                            }
                        }
                        None => {
                            self.supply_nodes[sn].hall_set = Some(root);
                            let occ = self.supply_nodes[sn]
                                .occupant
                                .expect("hall_assign internal error");
                            stack.push(occ);
                        }
                    }
                }
            }
        }
    }

    /// Rebuild the Hall sets from scratch: one traversal per unclaimed
    /// unmatched node, merging overlapping witnesses via union-find, then a
    /// compression pass collecting members at the roots. Absorbed sets must
    /// end empty; every surviving root must be a strict deficiency witness.
    fn build_hall_sets(&mut self) {
        self.hall_sets.clear();
        self.hall_roots.clear();
        for sn in &mut self.supply_nodes {
            sn.hall_set = None;
        }
        for node in self.demand_nodes.iter_mut().flatten() {
            node.hall_set = None;
        }

        let unmatched = self.unmatched.clone();
        for dn in unmatched {
            if self.demand(dn).hall_set.is_none() {
                debug_assert!(self.demand(dn).assigned.is_none(), "build_hall_sets internal error");
                let root = self.hall_sets.len();
                self.hall_sets.push(HallSet {
                    parent: root,
                    supply_nodes: Vec::new(),
                    demand_nodes: Vec::new(),
                });
                self.hall_assign(dn, root);
            }
        }

        for i in 0..self.supply_nodes.len() {
            if let Some(h) = self.supply_nodes[i].hall_set {
                let root = Self::hall_compress(&mut self.hall_sets, h);
                self.supply_nodes[i].hall_set = Some(root);
                self.hall_sets[root].supply_nodes.push(SupplyNodeId(i));
            }
        }
        for i in 0..self.demand_nodes.len() {
            let h = self.demand_nodes[i].as_ref().and_then(|n| n.hall_set);
            if let Some(h) = h {
                let root = Self::hall_compress(&mut self.hall_sets, h);
                if let Some(node) = self.demand_nodes[i].as_mut() {
                    node.hall_set = Some(root);
                }
                self.hall_sets[root].demand_nodes.push(DemandNodeId(i));
            }
        }

        for i in 0..self.hall_sets.len() {
            let hs = &self.hall_sets[i];
            if hs.parent == i {
                assert!(
                    hs.demand_nodes.len() > hs.supply_nodes.len(),
                    "build_hall_sets: root set is not a deficiency witness"
                );
                self.hall_roots.push(i);
            } else {
                debug_assert!(
                    hs.demand_nodes.is_empty() && hs.supply_nodes.is_empty(),
                    "build_hall_sets: absorbed set kept members"
                );
            }
        }
        debug!(
            "built {} hall sets over {} unmatched demand nodes",
            self.hall_roots.len(),
            self.unmatched.len()
        );
    }

    /// Hall sets are valid only while the matching is unchanged: after
    /// `make_clean`, an empty root list with unmatched nodes present means
    /// they have to be rebuilt.
    fn ensure_hall_sets(&mut self, monitors: &mut MonitorGraph) {
        self.begin_mutation();
        self.make_clean(monitors);
        if self.hall_roots.is_empty() && !self.unmatched.is_empty() {
            self.build_hall_sets();
        }
        self.end_mutation();
    }

    /// The number of maximal deficiency witnesses, brought up to date first.
    pub fn hall_set_count(&mut self, monitors: &mut MonitorGraph) -> usize {
        self.ensure_hall_sets(monitors);
        self.hall_roots.len()
    }

    /// The i'th maximal deficiency witness, brought up to date first.
    pub fn hall_set(&mut self, monitors: &mut MonitorGraph, i: usize) -> &HallSet {
        self.ensure_hall_sets(monitors);
        &self.hall_sets[self.hall_roots[i]]
    }

    /*
     * Competitors
     */

    /// All demand nodes transitively competing with the unmatched node `dn`
    /// for the same capacity: the closure of `dn` under "reachable supply
    /// node" followed by "its current occupant". The slice is valid until
    /// the next call.
    pub fn competitors(
        &mut self,
        monitors: &mut MonitorGraph,
        dn: DemandNodeId,
    ) -> &[DemandNodeId] {
        self.begin_mutation();
        self.make_clean(monitors);
        self.end_mutation();
        assert!(
            self.demand(dn).assigned.is_none(),
            "competitors: demand node is not unmatched"
        );
        self.visit += 1;
        let visit = self.visit;
        self.competitors.clear();
        self.competitors.push(dn);
        let mut i = 0;
        while i < self.competitors.len() {
            let cur = self.competitors[i];
            i += 1;
            let (chunk_id, ndom) = {
                let node = self.demand(cur);
                (node.chunk, node.domain.clone())
            };
            let (base, increment, cdom) = {
                let chunk = self.dchunk(chunk_id);
                (chunk.base, chunk.increment, chunk.domain.clone())
            };
            for &cd in &cdom {
                let b = base + increment * cd as usize;
                for &d in &ndom {
                    let sn = b + d as usize;
                    if self.supply_nodes[sn].visit < visit {
                        self.supply_nodes[sn].visit = visit;
                        let occ = self.supply_nodes[sn]
                            .occupant
                            .expect("competitors internal error");
                        self.competitors.push(occ);
                    }
                }
            }
        }
        &self.competitors
    }

    /*
     * Debug
     */

    /// Multi-line textual dump for developer diagnosis. Verbosity 1 prints
    /// the summary line, 2 adds unmatched demand nodes, 3 all demand nodes,
    /// 4 addressing details. The raw state is printed; no re-solve happens.
    pub fn debug_string(&self, verbosity: u32) -> String {
        let mut res = format!(
            "[ Matching (lower bound {}, unmatched {})",
            self.lower_bound,
            self.unmatched.len()
        );
        if verbosity >= 2 {
            for (ci, slot) in self.demand_chunks.iter().enumerate() {
                let dc = match slot {
                    Some(dc) => dc,
                    None => continue,
                };
                if verbosity >= 4 {
                    res.push_str(&format!(
                        "\n  chunk {}: {} + {} * {:?}",
                        ci, dc.base, dc.increment, &dc.domain[..]
                    ));
                }
                for &dn in &dc.nodes {
                    let node = self.demand(dn);
                    if verbosity >= 3 || node.assigned.is_none() {
                        match node.assigned {
                            Some(sn) => {
                                res.push_str(&format!("\n  demand {} -> supply {}", dn.0, sn.0))
                            }
                            None => res.push_str(&format!("\n  demand {} unmatched", dn.0)),
                        }
                        if verbosity >= 4 {
                            res.push_str(&format!(" domain {:?}", &node.domain[..]));
                        }
                    }
                }
            }
            res.push('\n');
        }
        res.push_str(" ]");
        res
    }
}
