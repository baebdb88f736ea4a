use super::*;
use crate::cost::cost;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn graph_with_group() -> (MonitorGraph, MonitorId) {
    init_logging();
    let mut g = MonitorGraph::new();
    let root = g.add_group(Category(0), "root");
    (g, root)
}

fn leaf_under(g: &mut MonitorGraph, gm: MonitorId, category: u16) -> MonitorId {
    let leaf = g.add_leaf(Category(category), 0);
    g.add_child(gm, leaf);
    leaf
}

#[test]
fn leaf_cost_change_reaches_the_group() {
    let (mut g, root) = graph_with_group();
    let leaf = leaf_under(&mut g, root, 1);
    assert_eq!(g.cost(root), 0);
    assert_eq!(g.defect_count(root), 0);

    g.change_cost(leaf, cost(0, 3));
    assert_eq!(g.cost(root), cost(0, 3));
    assert_eq!(g.defect_count(root), 1);
    assert_eq!(g.defect(root, 0), leaf);

    g.change_cost(leaf, 0);
    assert_eq!(g.cost(root), 0);
    assert_eq!(g.defect_count(root), 0);
}

#[test]
fn defect_list_survives_swap_removal() {
    let (mut g, root) = graph_with_group();
    let a = leaf_under(&mut g, root, 1);
    let b = leaf_under(&mut g, root, 1);
    let c = leaf_under(&mut g, root, 1);
    for &leaf in [a, b, c].iter() {
        g.change_cost(leaf, cost(0, 1));
    }
    assert_eq!(g.defect_count(root), 3);

    // removing the first defect swaps the last one into its slot; the
    // moved link's recorded position must follow
    g.change_cost(a, 0);
    assert_eq!(g.defect_count(root), 2);
    g.change_cost(c, 0);
    assert_eq!(g.defect_count(root), 1);
    assert_eq!(g.defect(root, 0), b);
    assert_eq!(g.cost(root), cost(0, 1));
}

#[test]
fn shared_child_is_counted_by_every_parent() {
    let (mut g, root) = graph_with_group();
    let g1 = g.add_group(Category(0), "g1");
    let g2 = g.add_group(Category(0), "g2");
    g.add_child(root, g1);
    g.add_child(root, g2);
    let leaf = g.add_leaf(Category(1), 0);
    g.add_child(g1, leaf);
    g.add_child(g2, leaf);
    assert_eq!(g.parent_count(leaf), 2);

    g.change_cost(leaf, cost(1, 0));
    assert_eq!(g.cost(g1), cost(1, 0));
    assert_eq!(g.cost(g2), cost(1, 0));
    assert_eq!(g.cost(root), cost(2, 0), "both paths reach the root");

    g.change_cost(leaf, 0);
    assert_eq!(g.cost(root), 0);
}

#[test]
#[should_panic(expected = "monitor cycle")]
fn linking_an_ancestor_as_child_panics() {
    let (mut g, root) = graph_with_group();
    let mid = g.add_group(Category(0), "mid");
    g.add_child(root, mid);
    g.add_child(mid, root);
}

#[test]
fn adding_a_costly_child_shifts_the_parent() {
    let (mut g, root) = graph_with_group();
    let leaf = g.add_leaf(Category(1), 0);
    g.change_cost(leaf, cost(0, 5));
    assert_eq!(g.cost(root), 0);

    g.add_child(root, leaf);
    assert_eq!(g.cost(root), cost(0, 5));
    assert_eq!(g.defect_count(root), 1);
    assert!(g.has_child(root, leaf));

    g.delete_child(root, leaf);
    assert_eq!(g.cost(root), 0);
    assert_eq!(g.defect_count(root), 0);
    assert!(!g.has_child(root, leaf));
    assert_eq!(g.cost(leaf), cost(0, 5), "the leaf itself is untouched");
}

#[test]
fn cost_by_type_partitions_the_total() {
    let (mut g, root) = graph_with_group();
    let mid = g.add_group(Category(0), "mid");
    g.add_child(root, mid);
    let a = leaf_under(&mut g, root, 1);
    let b = leaf_under(&mut g, mid, 1);
    let c = leaf_under(&mut g, mid, 2);
    g.change_cost(a, cost(1, 0));
    g.change_cost(b, cost(0, 2));
    g.change_cost(c, cost(0, 7));

    let (c1, d1) = g.cost_by_type(root, Category(1));
    assert_eq!((c1, d1), (cost(1, 2), 2));
    let (c2, d2) = g.cost_by_type(root, Category(2));
    assert_eq!((c2, d2), (cost(0, 7), 1));
    assert_eq!(c1 + c2, g.cost(root), "categories partition the total cost");
    let (c3, d3) = g.cost_by_type(root, Category(3));
    assert_eq!((c3, d3), (0, 0));
}

#[test]
fn lower_bounds_propagate_at_link_time() {
    let (mut g, root) = graph_with_group();
    let mid = g.add_group(Category(0), "mid");
    g.add_child(root, mid);
    let leaf = g.add_leaf(Category(1), 0);
    g.set_lower_bound(leaf, cost(1, 0));

    g.add_child(mid, leaf);
    assert_eq!(g.lower_bound(mid), cost(1, 0));
    assert_eq!(g.lower_bound(root), cost(1, 0));

    g.delete_child(mid, leaf);
    assert_eq!(g.lower_bound(mid), 0);
    assert_eq!(g.lower_bound(root), 0);
}

#[test]
fn bypass_reattaches_children_to_grandparents() {
    let (mut g, root) = graph_with_group();
    let mid = g.add_group(Category(0), "mid");
    g.add_child(root, mid);
    let a = leaf_under(&mut g, mid, 1);
    let b = leaf_under(&mut g, mid, 1);
    g.change_cost(a, cost(0, 1));
    g.change_cost(b, cost(0, 2));
    assert_eq!(g.cost(root), cost(0, 3));

    g.bypass_and_delete(mid);
    assert_eq!(g.child_count(root), 2);
    assert!(g.has_child(root, a) && g.has_child(root, b));
    assert_eq!(g.cost(root), cost(0, 3), "total cost is preserved");
    assert_eq!(g.defect_count(root), 2);
}

#[test]
fn deleting_a_group_detaches_both_ends() {
    let (mut g, root) = graph_with_group();
    let mid = g.add_group(Category(0), "mid");
    g.add_child(root, mid);
    let a = leaf_under(&mut g, mid, 1);
    g.change_cost(a, cost(0, 4));
    assert_eq!(g.cost(root), cost(0, 4));

    g.delete_monitor(mid);
    assert_eq!(g.child_count(root), 0);
    assert_eq!(g.cost(root), 0);
    assert_eq!(g.parent_count(a), 0);
    assert_eq!(g.cost(a), cost(0, 4));
}

#[test]
fn monitor_slots_are_recycled() {
    let (mut g, root) = graph_with_group();
    let a = leaf_under(&mut g, root, 1);
    g.delete_child(root, a);
    g.delete_monitor(a);
    let b = g.add_leaf(Category(2), 9);
    assert_eq!(b, a, "freed slot is reused");
    assert_eq!(g.category(b), Category(2));
    assert_eq!(g.back(b), 9);
}

#[test]
fn trace_records_pre_change_costs_once() {
    let (mut g, root) = graph_with_group();
    let a = leaf_under(&mut g, root, 1);
    let b = leaf_under(&mut g, root, 1);
    g.change_cost(a, cost(0, 2));

    let t = g.trace_make(root);
    g.trace_begin(t);
    assert_eq!(g.trace_init_cost(t), cost(0, 2));

    g.change_cost(a, cost(0, 5));
    g.change_cost(a, cost(0, 1));
    g.change_cost(b, cost(1, 0));
    assert_eq!(g.trace_monitor_count(t), 2, "each child recorded once");
    let mut recorded = vec![
        (g.trace_monitor(t, 0), g.trace_monitor_init_cost(t, 0)),
        (g.trace_monitor(t, 1), g.trace_monitor_init_cost(t, 1)),
    ];
    recorded.sort_by_key(|&(m, _)| m.0);
    let mut expected = vec![(a, cost(0, 2)), (b, 0)];
    expected.sort_by_key(|&(m, _)| m.0);
    assert_eq!(recorded, expected);

    g.trace_end(t);
    g.change_cost(b, 0);
    assert_eq!(g.trace_monitor_count(t), 2, "nothing recorded after the end");
    g.trace_delete(t);
}

#[test]
fn trace_sees_changes_through_nested_groups() {
    let (mut g, root) = graph_with_group();
    let mid = g.add_group(Category(0), "mid");
    g.add_child(root, mid);
    let leaf = leaf_under(&mut g, mid, 1);

    let t = g.trace_make(root);
    g.trace_begin(t);
    g.change_cost(leaf, cost(0, 1));
    // the root's direct child is mid; that is what the trace records
    assert_eq!(g.trace_monitor_count(t), 1);
    assert_eq!(g.trace_monitor(t, 0), mid);
    assert_eq!(g.trace_monitor_init_cost(t, 0), 0);
    g.trace_end(t);
}

#[test]
fn deleting_an_active_trace_ends_it() {
    let (mut g, root) = graph_with_group();
    let t = g.trace_make(root);
    g.trace_begin(t);
    assert!(g.has_active_traces());
    g.trace_delete(t);
    assert!(!g.has_active_traces());
    // the group is no longer traced and may be deleted
    g.delete_monitor(root);
}

#[test]
#[should_panic(expected = "currently being traced")]
fn deleting_a_traced_monitor_panics() {
    let (mut g, root) = graph_with_group();
    let t = g.trace_make(root);
    g.trace_begin(t);
    g.delete_monitor(root);
}

#[test]
#[should_panic(expected = "trace_begin called twice")]
fn beginning_an_active_trace_panics() {
    let (mut g, root) = graph_with_group();
    let t = g.trace_make(root);
    g.trace_begin(t);
    g.trace_begin(t);
}

#[test]
fn debug_string_marks_defects() {
    let (mut g, root) = graph_with_group();
    let a = leaf_under(&mut g, root, 1);
    leaf_under(&mut g, root, 1);
    g.change_cost(a, cost(1, 0));
    let dump = g.debug_string(root, 2);
    assert!(dump.contains("root"), "dump was: {}", dump);
    assert!(dump.contains("1 defects"), "dump was: {}", dump);
}
