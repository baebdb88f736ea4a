//! Hierarchical cost aggregation over a DAG of monitors.
//!
//! A monitor is a cost source: leaf monitors have their cost set from outside
//! (demand nodes of the matching engine are one such source), group monitors
//! aggregate the costs of their children. A monitor may report to several
//! parents, so the structure is a DAG rather than a tree; adding a child that
//! would close a cycle is a fatal error. Each group keeps its aggregate cost
//! and its *defect list*, the subset of children with non-zero cost, up to
//! date incrementally: a leaf cost change fans out to every ancestor in one
//! synchronous call chain.
//!
//! Links between parents and children are arena records recycled through a
//! free list, carrying their positions in both endpoint lists so that removal
//! is O(1) swap-with-last on either side.

use crate::cost::{self, Cost};
use log::debug;

/// Stable handle of a monitor within one [`MonitorGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(pub usize);

/// Stable handle of a trace within one [`MonitorGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceId(pub usize);

/// Category tag of a leaf monitor, used to break down cost by origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Category(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkId(usize);

#[derive(Debug, Clone)]
struct Link {
    parent: MonitorId,
    child: MonitorId,
    /// Position of this link in the parent's child list.
    parent_index: usize,
    /// Position of this link in the parent's defect list, while the child
    /// has non-zero cost.
    defect_index: Option<usize>,
    /// Position of this link in the child's parent list.
    child_index: usize,
}

#[derive(Debug, Clone)]
enum MonitorKind {
    Leaf,
    Group {
        label: String,
        child_links: Vec<LinkId>,
        defect_links: Vec<LinkId>,
        traces: Vec<TraceId>,
    },
}

#[derive(Debug, Clone)]
struct Monitor {
    category: Category,
    cost: Cost,
    lower_bound: Cost,
    parent_links: Vec<LinkId>,
    kind: MonitorKind,
    /// Opaque caller reference, not interpreted here.
    back: usize,
}

/// A passive observer of cost changes beneath one group monitor.
///
/// While active, the trace records every direct child of its group monitor
/// that changes cost, together with the child's cost *before* its first
/// change, plus the group's own cost when tracing began.
#[derive(Debug, Clone)]
struct Trace {
    group: MonitorId,
    group_init_cost: Cost,
    active: bool,
    monitors: Vec<MonitorId>,
    init_costs: Vec<Cost>,
}

/// Arena of monitors, links and traces owned by one solution.
#[derive(Debug, Clone, Default)]
pub struct MonitorGraph {
    monitors: Vec<Option<Monitor>>,
    free_monitors: Vec<usize>,
    links: Vec<Link>,
    free_links: Vec<LinkId>,
    traces: Vec<Trace>,
    free_traces: Vec<TraceId>,
}

impl MonitorGraph {
    pub fn new() -> MonitorGraph {
        MonitorGraph::default()
    }

    fn monitor(&self, m: MonitorId) -> &Monitor {
        self.monitors[m.0].as_ref().expect("stale monitor id")
    }

    fn monitor_mut(&mut self, m: MonitorId) -> &mut Monitor {
        self.monitors[m.0].as_mut().expect("stale monitor id")
    }

    fn alloc(&mut self, monitor: Monitor) -> MonitorId {
        match self.free_monitors.pop() {
            Some(slot) => {
                self.monitors[slot] = Some(monitor);
                MonitorId(slot)
            }
            None => {
                self.monitors.push(Some(monitor));
                MonitorId(self.monitors.len() - 1)
            }
        }
    }

    /// Create a leaf monitor with cost 0.
    pub fn add_leaf(&mut self, category: Category, back: usize) -> MonitorId {
        self.alloc(Monitor {
            category,
            cost: 0,
            lower_bound: 0,
            parent_links: Vec::new(),
            kind: MonitorKind::Leaf,
            back,
        })
    }

    /// Create a group monitor with no children and cost 0.
    pub fn add_group(&mut self, category: Category, label: &str) -> MonitorId {
        self.alloc(Monitor {
            category,
            cost: 0,
            lower_bound: 0,
            parent_links: Vec::new(),
            kind: MonitorKind::Group {
                label: String::from(label),
                child_links: Vec::new(),
                defect_links: Vec::new(),
                traces: Vec::new(),
            },
            back: 0,
        })
    }

    pub fn cost(&self, m: MonitorId) -> Cost {
        self.monitor(m).cost
    }

    pub fn lower_bound(&self, m: MonitorId) -> Cost {
        self.monitor(m).lower_bound
    }

    /// Set the lower bound of a monitor that has not been linked to any
    /// parent yet (bounds propagate at link time).
    pub fn set_lower_bound(&mut self, m: MonitorId, lower_bound: Cost) {
        assert!(
            self.monitor(m).parent_links.is_empty(),
            "set_lower_bound: monitor already has parents"
        );
        self.monitor_mut(m).lower_bound = lower_bound;
    }

    pub fn category(&self, m: MonitorId) -> Category {
        self.monitor(m).category
    }

    pub fn back(&self, m: MonitorId) -> usize {
        self.monitor(m).back
    }

    pub fn set_back(&mut self, m: MonitorId, back: usize) {
        self.monitor_mut(m).back = back;
    }

    pub fn is_group(&self, m: MonitorId) -> bool {
        matches!(self.monitor(m).kind, MonitorKind::Group { .. })
    }

    pub fn group_label(&self, m: MonitorId) -> &str {
        match &self.monitor(m).kind {
            MonitorKind::Group { label, .. } => label,
            MonitorKind::Leaf => panic!("group_label: monitor is not a group"),
        }
    }

    pub fn parent_count(&self, m: MonitorId) -> usize {
        self.monitor(m).parent_links.len()
    }

    pub fn parent(&self, m: MonitorId, i: usize) -> MonitorId {
        self.links[self.monitor(m).parent_links[i].0].parent
    }

    pub fn child_count(&self, gm: MonitorId) -> usize {
        self.group_children(gm).len()
    }

    pub fn child(&self, gm: MonitorId, i: usize) -> MonitorId {
        self.links[self.group_children(gm)[i].0].child
    }

    pub fn defect_count(&self, gm: MonitorId) -> usize {
        self.group_defects(gm).len()
    }

    pub fn defect(&self, gm: MonitorId, i: usize) -> MonitorId {
        self.links[self.group_defects(gm)[i].0].child
    }

    pub fn has_child(&self, gm: MonitorId, child: MonitorId) -> bool {
        self.find_parent_link(child, gm).is_some()
    }

    fn group_children(&self, gm: MonitorId) -> &Vec<LinkId> {
        match &self.monitor(gm).kind {
            MonitorKind::Group { child_links, .. } => child_links,
            MonitorKind::Leaf => panic!("monitor is not a group"),
        }
    }

    fn group_defects(&self, gm: MonitorId) -> &Vec<LinkId> {
        match &self.monitor(gm).kind {
            MonitorKind::Group { defect_links, .. } => defect_links,
            MonitorKind::Leaf => panic!("monitor is not a group"),
        }
    }

    fn group_traces(&self, gm: MonitorId) -> &Vec<TraceId> {
        match &self.monitor(gm).kind {
            MonitorKind::Group { traces, .. } => traces,
            MonitorKind::Leaf => panic!("monitor is not a group"),
        }
    }

    /// The number of distinct upward paths from `lower` to `higher`.
    ///
    /// Monitor graphs are shallow in practice, so the recursion over parent
    /// links is cheap; this is what makes the cycle check affordable.
    fn path_count(&self, lower: MonitorId, higher: MonitorId) -> usize {
        if lower == higher {
            return 1;
        }
        self.monitor(lower)
            .parent_links
            .iter()
            .map(|&l| self.path_count(self.links[l.0].parent, higher))
            .sum()
    }

    fn find_parent_link(&self, child: MonitorId, gm: MonitorId) -> Option<LinkId> {
        self.monitor(child)
            .parent_links
            .iter()
            .copied()
            .find(|&l| self.links[l.0].parent == gm)
    }

    fn alloc_link(&mut self, link: Link) -> LinkId {
        match self.free_links.pop() {
            Some(id) => {
                self.links[id.0] = link;
                id
            }
            None => {
                self.links.push(link);
                LinkId(self.links.len() - 1)
            }
        }
    }

    /// Add `child` as a child of group monitor `gm`.
    ///
    /// The child's lower bound is propagated up through all ancestor paths,
    /// and if the child currently has non-zero cost the cost delta fans out
    /// the same way and the child becomes a defect of `gm`.
    pub fn add_child(&mut self, gm: MonitorId, child: MonitorId) {
        assert!(
            !(self.is_group(child) && self.path_count(gm, child) >= 1),
            "add_child: operation would create a monitor cycle"
        );
        let parent_index = self.group_children(gm).len();
        let child_index = self.monitor(child).parent_links.len();
        let link = self.alloc_link(Link {
            parent: gm,
            child,
            parent_index,
            defect_index: None,
            child_index,
        });
        match &mut self.monitor_mut(gm).kind {
            MonitorKind::Group { child_links, .. } => child_links.push(link),
            MonitorKind::Leaf => panic!("add_child: parent is not a group monitor"),
        }
        self.monitor_mut(child).parent_links.push(link);

        let child_lb = self.monitor(child).lower_bound;
        if child_lb > 0 {
            self.change_lower_bound(gm, child_lb);
        }
        let child_cost = self.monitor(child).cost;
        if child_cost > 0 {
            self.group_change_cost(gm, child, link, 0, child_cost);
        }
    }

    /// Remove `child` from group monitor `gm`, the inverse of `add_child`.
    pub fn delete_child(&mut self, gm: MonitorId, child: MonitorId) {
        let link = match self.find_parent_link(child, gm) {
            Some(l) => l,
            None => panic!("delete_child: monitor is not a child of this group"),
        };
        let child_cost = self.monitor(child).cost;
        if child_cost > 0 {
            self.group_change_cost(gm, child, link, child_cost, 0);
        }
        let child_lb = self.monitor(child).lower_bound;
        if child_lb > 0 {
            self.change_lower_bound(gm, -child_lb);
        }

        // unhook from the child's parent list, swap-with-last
        let child_index = self.links[link.0].child_index;
        let parent_links = &mut self.monitor_mut(child).parent_links;
        debug_assert_eq!(parent_links[child_index], link);
        let moved = parent_links.pop().expect("delete_child internal error");
        if moved != link {
            parent_links[child_index] = moved;
            self.links[moved.0].child_index = child_index;
        }

        // unhook from the group's child list, swap-with-last
        let parent_index = self.links[link.0].parent_index;
        let child_links = match &mut self.monitor_mut(gm).kind {
            MonitorKind::Group { child_links, .. } => child_links,
            MonitorKind::Leaf => unreachable!(),
        };
        debug_assert_eq!(child_links[parent_index], link);
        let moved = child_links.pop().expect("delete_child internal error");
        if moved != link {
            child_links[parent_index] = moved;
            self.links[moved.0].parent_index = parent_index;
        }

        self.free_links.push(link);
    }

    /// Delete a monitor: detach all children (groups only), detach it from
    /// all of its parents, and recycle its slot. Fatal if a trace is active
    /// on it.
    pub fn delete_monitor(&mut self, m: MonitorId) {
        if self.is_group(m) {
            assert!(
                self.group_traces(m).is_empty(),
                "delete_monitor: monitor is currently being traced"
            );
            while self.child_count(m) > 0 {
                let child = self.child(m, 0);
                self.delete_child(m, child);
            }
        }
        while !self.monitor(m).parent_links.is_empty() {
            let parent = self.links[self.monitor(m).parent_links[0].0].parent;
            self.delete_child(parent, m);
        }
        self.monitors[m.0] = None;
        self.free_monitors.push(m.0);
    }

    /// Move every child of `gm` up to every parent of `gm`, then delete `gm`.
    pub fn bypass_and_delete(&mut self, gm: MonitorId) {
        debug!("bypassing group monitor {:?} ({})", gm, self.group_label(gm));
        let parents: Vec<MonitorId> = self
            .monitor(gm)
            .parent_links
            .iter()
            .map(|&l| self.links[l.0].parent)
            .collect();
        let children: Vec<MonitorId> = self
            .group_children(gm)
            .iter()
            .map(|&l| self.links[l.0].child)
            .collect();
        for &p in &parents {
            for &c in &children {
                self.add_child(p, c);
            }
        }
        self.delete_monitor(gm);
    }

    /// Set the cost of a monitor directly and fan the change out to every
    /// parent. This is the entry point for leaf cost sources; group costs
    /// change only through their children.
    pub fn change_cost(&mut self, m: MonitorId, new_cost: Cost) {
        assert!(new_cost >= 0, "change_cost: cost must be non-negative");
        let old_cost = self.monitor(m).cost;
        if new_cost == old_cost {
            return;
        }
        let parents = self.monitor(m).parent_links.clone();
        for link in parents {
            let parent = self.links[link.0].parent;
            self.group_change_cost(parent, m, link, old_cost, new_cost);
        }
        self.monitor_mut(m).cost = new_cost;
    }

    /// Tell `gm` that its child behind `link` changed cost from `old_cost`
    /// to `new_cost`: notify active traces of the pre-change cost, shift the
    /// aggregate by the delta, move the child into or out of the defect
    /// list, and recurse into every parent of `gm`.
    fn group_change_cost(
        &mut self,
        gm: MonitorId,
        child: MonitorId,
        link: LinkId,
        old_cost: Cost,
        new_cost: Cost,
    ) {
        debug_assert_eq!(self.group_children(gm)[self.links[link.0].parent_index], link);
        let trace_ids = self.group_traces(gm).clone();
        for t in trace_ids {
            self.trace_change_cost(t, child, old_cost);
        }
        let delta = new_cost - old_cost;
        self.monitor_mut(gm).cost += delta;
        if old_cost == 0 {
            self.add_defect(gm, link);
        } else if new_cost == 0 {
            self.delete_defect(gm, link);
        }
        let gm_cost = self.monitor(gm).cost;
        let parents = self.monitor(gm).parent_links.clone();
        for l in parents {
            let parent = self.links[l.0].parent;
            self.group_change_cost(parent, gm, l, gm_cost - delta, gm_cost);
        }
    }

    fn change_lower_bound(&mut self, gm: MonitorId, delta: Cost) {
        self.monitor_mut(gm).lower_bound += delta;
        let parents = self.monitor(gm).parent_links.clone();
        for l in parents {
            let parent = self.links[l.0].parent;
            self.change_lower_bound(parent, delta);
        }
    }

    fn add_defect(&mut self, gm: MonitorId, link: LinkId) {
        debug_assert!(self.links[link.0].defect_index.is_none());
        let defect_links = match &mut self.monitor_mut(gm).kind {
            MonitorKind::Group { defect_links, .. } => defect_links,
            MonitorKind::Leaf => unreachable!(),
        };
        let index = defect_links.len();
        defect_links.push(link);
        self.links[link.0].defect_index = Some(index);
    }

    fn delete_defect(&mut self, gm: MonitorId, link: LinkId) {
        let index = self.links[link.0]
            .defect_index
            .expect("delete_defect internal error");
        let defect_links = match &mut self.monitor_mut(gm).kind {
            MonitorKind::Group { defect_links, .. } => defect_links,
            MonitorKind::Leaf => unreachable!(),
        };
        debug_assert_eq!(defect_links[index], link);
        let moved = defect_links.pop().expect("delete_defect internal error");
        if moved != link {
            defect_links[index] = moved;
            self.links[moved.0].defect_index = Some(index);
        }
        self.links[link.0].defect_index = None;
    }

    /// Cost and defect count of leaf monitors of one category in the subtree
    /// under `gm`, following defect links only (zero-cost children cannot
    /// contribute). Group monitors themselves are never counted, so summing
    /// over all leaf categories yields exactly `cost(gm)`.
    pub fn cost_by_type(&self, gm: MonitorId, category: Category) -> (Cost, usize) {
        let mut total = 0;
        let mut defects = 0;
        for &l in self.group_defects(gm) {
            let child = self.links[l.0].child;
            match self.monitor(child).kind {
                MonitorKind::Group { .. } => {
                    let (c, d) = self.cost_by_type(child, category);
                    total += c;
                    defects += d;
                }
                MonitorKind::Leaf => {
                    if self.monitor(child).category == category {
                        total += self.monitor(child).cost;
                        defects += 1;
                    }
                }
            }
        }
        (total, defects)
    }

    /// True if any trace in the graph is currently active.
    pub fn has_active_traces(&self) -> bool {
        self.traces.iter().any(|t| t.active)
    }

    /// Create a trace for group monitor `gm`, initially inactive.
    pub fn trace_make(&mut self, gm: MonitorId) -> TraceId {
        assert!(self.is_group(gm), "trace_make: monitor is not a group");
        let trace = Trace {
            group: gm,
            group_init_cost: 0,
            active: false,
            monitors: Vec::new(),
            init_costs: Vec::new(),
        };
        match self.free_traces.pop() {
            Some(id) => {
                self.traces[id.0] = trace;
                id
            }
            None => {
                self.traces.push(trace);
                TraceId(self.traces.len() - 1)
            }
        }
    }

    pub fn trace_begin(&mut self, t: TraceId) {
        assert!(
            !self.traces[t.0].active,
            "trace_begin called twice with no intervening trace_end"
        );
        let gm = self.traces[t.0].group;
        let init_cost = self.monitor(gm).cost;
        {
            let trace = &mut self.traces[t.0];
            trace.group_init_cost = init_cost;
            trace.active = true;
            trace.monitors.clear();
            trace.init_costs.clear();
        }
        match &mut self.monitor_mut(gm).kind {
            MonitorKind::Group { traces, .. } => traces.push(t),
            MonitorKind::Leaf => unreachable!(),
        }
    }

    pub fn trace_end(&mut self, t: TraceId) {
        assert!(
            self.traces[t.0].active,
            "trace_end with no matching call to trace_begin"
        );
        self.traces[t.0].active = false;
        let gm = self.traces[t.0].group;
        let traces = match &mut self.monitor_mut(gm).kind {
            MonitorKind::Group { traces, .. } => traces,
            MonitorKind::Leaf => unreachable!(),
        };
        let pos = traces
            .iter()
            .position(|&x| x == t)
            .expect("trace_end internal error");
        traces.remove(pos);
    }

    /// Delete a trace, ending it first if it is still active.
    pub fn trace_delete(&mut self, t: TraceId) {
        if self.traces[t.0].active {
            self.trace_end(t);
        }
        self.free_traces.push(t);
    }

    fn trace_change_cost(&mut self, t: TraceId, m: MonitorId, old_cost: Cost) {
        let trace = &mut self.traces[t.0];
        if !trace.monitors.contains(&m) {
            trace.monitors.push(m);
            trace.init_costs.push(old_cost);
        }
    }

    /// The cost of the traced group monitor at the time tracing started.
    pub fn trace_init_cost(&self, t: TraceId) -> Cost {
        self.traces[t.0].group_init_cost
    }

    /// The number of children of the traced monitor that changed cost during
    /// the most recent trace.
    pub fn trace_monitor_count(&self, t: TraceId) -> usize {
        self.traces[t.0].monitors.len()
    }

    pub fn trace_monitor(&self, t: TraceId, i: usize) -> MonitorId {
        self.traces[t.0].monitors[i]
    }

    /// The cost the i'th changed monitor had before its first change.
    pub fn trace_monitor_init_cost(&self, t: TraceId, i: usize) -> Cost {
        self.traces[t.0].init_costs[i]
    }

    /// Multi-line textual dump for developer diagnosis. Verbosity 1 prints
    /// one line per monitor, 2 adds children and defects of groups.
    pub fn debug_string(&self, m: MonitorId, verbosity: u32) -> String {
        let mon = self.monitor(m);
        let mut res = match &mon.kind {
            MonitorKind::Leaf => format!(
                "Leaf {} cat {} cost {}",
                m.0,
                mon.category.0,
                cost::show(mon.cost)
            ),
            MonitorKind::Group {
                label,
                child_links,
                defect_links,
                ..
            } => format!(
                "Group {} \"{}\" cost {} ({} children, {} defects)",
                m.0,
                label,
                cost::show(mon.cost),
                child_links.len(),
                defect_links.len()
            ),
        };
        if verbosity >= 2 {
            if let MonitorKind::Group { child_links, .. } = &mon.kind {
                for &l in child_links {
                    let child = self.links[l.0].child;
                    let defect = self.links[l.0].defect_index.is_some();
                    res.push_str(&format!(
                        "\n  {}{}",
                        if defect { "* " } else { "  " },
                        self.debug_string(child, 1)
                    ));
                }
            }
        }
        res
    }
}

#[cfg(test)]
mod tests;
