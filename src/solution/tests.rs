use super::*;
use crate::cost::cost;
use smallvec::smallvec;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three demand nodes of weight 0.00005 over three supply nodes, but with
/// all demand initially crowded onto supply node 0, and their leaf monitors
/// collected under one group.
fn crowded_solution() -> (Solution, MonitorId, [DemandNodeId; 3]) {
    init_logging();
    let mut s = Solution::new();
    let sc = s.add_supply_chunk(0);
    for i in 0..3 {
        s.add_supply_node(sc, i);
    }
    let dc = s.add_demand_chunk(0, 0, smallvec![0], 0);
    let mut nodes = [DemandNodeId(0); 3];
    for slot in nodes.iter_mut() {
        *slot = s.add_demand_node(dc, smallvec![0], Category(0), cost(0, 5), 0);
    }
    let root = s.monitors_mut().add_group(Category(0), "demand");
    for &dn in nodes.iter() {
        let leaf = s.matching().demand_node_monitor(dn);
        s.monitors_mut().add_child(root, leaf);
    }
    (s, root, nodes)
}

#[test]
fn group_cost_falls_as_capacity_opens_up() {
    let (mut s, root, nodes) = crowded_solution();
    assert_eq!(s.unmatched_count(), 2);
    assert_eq!(s.monitors().cost(root), cost(0, 10));
    assert_eq!(s.monitors().defect_count(root), 2);

    // widen one crowded node onto free capacity
    s.set_demand_node_domain(nodes[1], smallvec![0, 1], DomainChange::ToSuperset);
    assert_eq!(s.unmatched_count(), 1);
    assert_eq!(s.monitors().cost(root), cost(0, 5));

    s.set_demand_node_domain(nodes[2], smallvec![0, 2], DomainChange::ToSuperset);
    assert_eq!(s.unmatched_count(), 0);
    assert_eq!(s.monitors().cost(root), 0);
    assert_eq!(s.monitors().defect_count(root), 0);
}

#[test]
fn matched_plus_unmatched_accounts_for_all_demand() {
    let (mut s, _root, nodes) = crowded_solution();
    let unmatched = s.unmatched_count();
    let assigned = nodes
        .iter()
        .filter(|&&dn| s.matching().demand_node_assignment(dn).is_some())
        .count();
    assert_eq!(assigned + unmatched, s.matching().demand_node_count());
}

#[test]
fn snapshot_is_independent_of_the_original() {
    let (mut s, root, nodes) = crowded_solution();
    assert_eq!(s.unmatched_count(), 2);

    let mut copy = s.snapshot();
    assert_eq!(copy.unmatched_count(), 2);
    assert_eq!(copy.monitors().cost(root), cost(0, 10));

    // fixing the original leaves the copy at its old cost
    s.set_demand_node_domain(nodes[1], smallvec![0, 1], DomainChange::ToSuperset);
    s.set_demand_node_domain(nodes[2], smallvec![0, 2], DomainChange::ToSuperset);
    assert_eq!(s.unmatched_count(), 0);
    assert_eq!(s.monitors().cost(root), 0);
    assert_eq!(copy.unmatched_count(), 2);
    assert_eq!(copy.monitors().cost(root), cost(0, 10));

    // and mutating the copy leaves the original alone
    let extra = copy.add_demand_node(
        copy.matching().demand_node_chunk(nodes[0]),
        smallvec![0],
        Category(0),
        cost(1, 0),
        0,
    );
    assert_eq!(copy.unmatched_count(), 3);
    assert_eq!(s.unmatched_count(), 0);
    assert_eq!(s.matching().demand_node_count(), 3);
    copy.delete_demand_node(extra);
    assert_eq!(copy.unmatched_count(), 2);
}

#[test]
fn snapshot_preserves_shared_monitor_structure() {
    let (s, root, nodes) = crowded_solution();
    let copy = s.snapshot();
    assert_eq!(copy.monitors().child_count(root), 3);
    for &dn in nodes.iter() {
        let leaf = copy.matching().demand_node_monitor(dn);
        assert!(copy.monitors().has_child(root, leaf));
    }
}

#[test]
#[should_panic(expected = "a trace is still active")]
fn snapshot_under_an_active_trace_panics() {
    let (mut s, root, _nodes) = crowded_solution();
    let t = s.trace_make(root);
    s.trace_begin(t);
    let _ = s.snapshot();
}

#[test]
fn trace_queries_force_pending_rematching() {
    let (mut s, root, nodes) = crowded_solution();
    assert_eq!(s.unmatched_count(), 2);
    let t = s.trace_make(root);
    s.trace_begin(t);
    assert_eq!(s.trace_init_cost(t), cost(0, 10));

    // the widening alone changes no cost; the fix only lands when the
    // matching is next brought up to date, which the trace query forces
    s.set_demand_node_domain(nodes[1], smallvec![0, 1], DomainChange::ToSuperset);
    assert_eq!(s.trace_monitor_count(t), 1);
    let changed = s.trace_monitor(t, 0);
    assert_eq!(s.trace_monitor_init_cost(t, 0), cost(0, 5));
    assert_eq!(s.monitors().cost(changed), 0);

    s.trace_end(t);
    s.trace_delete(t);
}

#[test]
fn mark_bracket_through_the_facade() {
    let (mut s, _root, _nodes) = crowded_solution();
    assert_eq!(s.unmatched_count(), 2);
    s.mark_begin();
    let dc = s.add_demand_chunk(0, 0, smallvec![0], 0);
    let tmp = s.add_demand_node(dc, smallvec![1, 2], Category(0), cost(1, 0), 0);
    s.delete_demand_node(tmp);
    s.delete_demand_chunk(dc);
    s.mark_end(true);
    assert_eq!(s.unmatched_count(), 2);
}

#[test]
fn hall_sets_through_the_facade() {
    let (mut s, _root, _nodes) = crowded_solution();
    assert_eq!(s.hall_set_count(), 1);
    let hs = s.hall_set(0);
    assert_eq!(hs.demand_nodes().len(), 3);
    assert_eq!(hs.supply_nodes().len(), 1);
}

#[test]
fn debug_string_shows_the_summary_line() {
    let (mut s, _root, _nodes) = crowded_solution();
    assert_eq!(s.unmatched_count(), 2);
    assert!(s.debug_string(1).contains("lower bound 2"));
}
