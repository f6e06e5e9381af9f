use crate::{NodeId, Session};
use approx::assert_relative_eq;
use fg_core::{Error, SessionConfig, VarId, Variable};
use std::collections::BTreeSet;

fn param(session: &mut Session, name: &str, value: f64) -> VarId {
    session.add_variable(Variable::with_limits(name, value, 0.1, -10.0, 10.0))
}

/// root -> (mid -> leaf), sibling
fn three_level(session: &mut Session) -> (NodeId, NodeId, NodeId, NodeId) {
    let root = session.add_node("root", None);
    let mid = session.add_node("mid", None);
    let leaf = session.add_node("leaf", None);
    let sibling = session.add_node("sibling", None);
    session.add_component(root, mid).unwrap();
    session.add_component(mid, leaf).unwrap();
    session.add_component(root, sibling).unwrap();
    (root, mid, leaf, sibling)
}

#[test]
fn test_slots_are_smallest_available() {
    let mut s = Session::default();
    let n1 = s.add_node("n1", None);
    let n2 = s.add_node("n2", None);
    let a = param(&mut s, "a", 1.0);
    let b = param(&mut s, "b", 2.0);
    let c = param(&mut s, "c", 3.0);

    assert_eq!(s.register_parameter(n1, a).unwrap(), 0);
    assert_eq!(s.register_parameter(n1, b).unwrap(), 1);
    assert_eq!(s.register_parameter(n2, c).unwrap(), 2);
    // a is also referenced from n2, so releasing it needs both nodes.
    assert_eq!(s.register_parameter(n2, a).unwrap(), 0);

    s.unregister_parameter(n1, a).unwrap();
    assert_eq!(s.variable(a).unwrap().slot(), Some(0));
    s.unregister_parameter(n2, a).unwrap();
    s.unregister_parameter(n2, c).unwrap();
    assert_eq!(s.variable(a).unwrap().slot(), None);
    assert_eq!(s.variable(c).unwrap().slot(), None);

    let d = param(&mut s, "d", 4.0);
    assert_eq!(s.register_parameter(n2, d).unwrap(), 0);
    let e = param(&mut s, "e", 5.0);
    assert_eq!(s.register_parameter(n2, e).unwrap(), 2);
    assert_eq!(s.registry().total_params(), 3);
}

#[test]
fn test_register_is_idempotent_per_node() {
    let mut s = Session::default();
    let n = s.add_node("n", None);
    let a = param(&mut s, "a", 1.0);
    let first = s.register_parameter(n, a).unwrap();
    let second = s.register_parameter(n, a).unwrap();
    assert_eq!(first, second);
    assert_eq!(s.node(n).unwrap().parameter_list(), &[a]);
    assert_eq!(s.registry().referencing_nodes(a).unwrap().len(), 1);
}

#[test]
fn test_register_stale_variable_is_null_argument() {
    let mut s = Session::default();
    let n = s.add_node("n", None);
    let a = param(&mut s, "a", 1.0);
    s.remove_variable(a).unwrap();
    assert!(matches!(s.register_parameter(n, a), Err(Error::NullArgument(_))));
    // Unregistering and observing a stale handle are silent.
    s.unregister_parameter(n, a).unwrap();
    s.register_observable(n, a).unwrap();
    assert!(s.node(n).unwrap().observable_list().is_empty());
}

#[test]
fn test_unregister_cascades_through_subtree() {
    let mut s = Session::default();
    let (root, mid, leaf, sibling) = three_level(&mut s);
    let v = param(&mut s, "v", 1.0);
    for n in [root, mid, leaf, sibling] {
        s.register_parameter(n, v).unwrap();
    }

    s.unregister_parameter(mid, v).unwrap();
    assert!(s.node(mid).unwrap().parameter_list().is_empty());
    assert!(s.node(leaf).unwrap().parameter_list().is_empty());
    assert_eq!(s.node(root).unwrap().parameter_list(), &[v]);
    assert_eq!(s.node(sibling).unwrap().parameter_list(), &[v]);
    assert_eq!(s.variable(v).unwrap().slot(), Some(0));

    s.unregister_parameter(root, v).unwrap();
    assert!(s.node(sibling).unwrap().parameter_list().is_empty());
    assert_eq!(s.variable(v).unwrap().slot(), None);
    assert!(!s.registry().is_registered(v));
}

#[test]
fn test_slot_held_while_any_node_references() {
    let mut s = Session::default();
    let nodes: Vec<NodeId> = (0..3).map(|i| s.add_node(format!("n{i}"), None)).collect();
    let v = param(&mut s, "v", 1.0);
    for n in &nodes {
        s.register_parameter(*n, v).unwrap();
    }
    for (i, n) in nodes.iter().enumerate() {
        assert_eq!(s.variable(v).unwrap().slot(), Some(0), "released early at node {i}");
        s.unregister_parameter(*n, v).unwrap();
    }
    assert_eq!(s.variable(v).unwrap().index(), -1);
}

#[test]
fn test_parameter_and_observable_unions() {
    let mut s = Session::default();
    let (root, mid, leaf, sibling) = three_level(&mut s);
    let shared = param(&mut s, "shared", 0.0);
    let a = param(&mut s, "a", 0.0);
    let b = param(&mut s, "b", 0.0);
    let c = param(&mut s, "c", 0.0);
    let x = s.add_variable(Variable::observable("x", 0.0, 1.0));
    let y = s.add_variable(Variable::observable("y", 0.0, 1.0));

    s.register_parameter(root, shared).unwrap();
    s.register_parameter(mid, a).unwrap();
    s.register_parameter(leaf, shared).unwrap();
    s.register_parameter(leaf, b).unwrap();
    s.register_parameter(sibling, c).unwrap();
    s.register_observable(leaf, x).unwrap();
    s.register_observable(sibling, x).unwrap();
    s.register_observable(sibling, y).unwrap();

    assert_eq!(s.parameters(root).unwrap(), BTreeSet::from([shared, a, b, c]));
    assert_eq!(s.parameters(mid).unwrap(), BTreeSet::from([shared, a, b]));
    assert_eq!(s.observables(root).unwrap(), BTreeSet::from([x, y]));
    assert_eq!(s.observables(mid).unwrap(), BTreeSet::from([x]));
}

#[test]
fn test_register_observable_keeps_order_and_skips_duplicates() {
    let mut s = Session::default();
    let x = s.add_variable(Variable::observable("x", 0.0, 1.0));
    let y = s.add_variable(Variable::observable("y", 0.0, 1.0));
    let n = s.add_node("n", Some(y));
    s.register_observable(n, x).unwrap();
    s.register_observable(n, y).unwrap();
    assert_eq!(s.node(n).unwrap().observable_list(), &[y, x]);
    assert!(!s.registry().is_registered(x));
}

#[test]
fn test_parameter_by_name_prefers_own_then_depth_first() {
    let mut s = Session::default();
    let (root, mid, leaf, sibling) = three_level(&mut s);
    let deep = param(&mut s, "mu", 1.0);
    let shallow = param(&mut s, "mu", 2.0);
    let own = param(&mut s, "sigma", 3.0);
    s.register_parameter(leaf, deep).unwrap();
    s.register_parameter(sibling, shallow).unwrap();
    s.register_parameter(mid, own).unwrap();

    assert_eq!(s.parameter_by_name(root, "mu").unwrap(), Some(deep));
    assert_eq!(s.parameter_by_name(sibling, "mu").unwrap(), Some(shallow));
    assert_eq!(s.parameter_by_name(root, "sigma").unwrap(), Some(own));
    assert_eq!(s.parameter_by_name(root, "tau").unwrap(), None);
}

#[test]
fn test_check_init_status_is_preorder() {
    let mut s = Session::default();
    let (root, mid, leaf, sibling) = three_level(&mut s);
    for n in [leaf, sibling, root] {
        s.node_mut(n).unwrap().set_properly_initialised(false);
    }
    assert_eq!(s.check_init_status(root).unwrap(), vec!["root", "leaf", "sibling"]);
    assert_eq!(s.check_init_status(mid).unwrap(), vec!["leaf"]);
    assert!(matches!(
        s.ensure_initialised(root),
        Err(Error::Misconfiguration(names)) if names.len() == 3
    ));
}

#[test]
fn test_parameters_changed_is_not_recursive() {
    let mut s = Session::default();
    let (root, mid, _, _) = three_level(&mut s);
    let p = param(&mut s, "p", 1.0);
    let q = param(&mut s, "q", 1.0);
    s.register_parameter(root, p).unwrap();
    s.register_parameter(mid, q).unwrap();

    s.set_parameter_value(q, 2.0).unwrap();
    assert!(s.parameters_changed(mid).unwrap());
    assert!(!s.parameters_changed(root).unwrap());

    s.variable_mut(p).unwrap().set_value(5.0);
    assert!(s.parameters_changed(root).unwrap());
}

#[test]
fn test_constants_capacity_boundary() {
    let mut s = Session::new(SessionConfig::with_max_params(10)).unwrap();
    let n = s.add_node("n", None);
    // 1 + 9 reaches max_params exactly.
    assert!(matches!(
        s.register_constants(n, 9),
        Err(Error::CapacityExceeded { what: "constants", requested: 10, capacity: 10 })
    ));
    assert_eq!(s.register_constants(n, 8).unwrap(), 1);
    assert_eq!(s.node(n).unwrap().c_index(), 1);
    assert_eq!(s.registry().total_constants(), 9);
    assert!(s.register_constants(n, 1).is_err());
}

#[test]
fn test_recursive_normalisation_reaches_every_node() {
    let mut s = Session::default();
    let (root, mid, leaf, sibling) = three_level(&mut s);
    let a = param(&mut s, "a", 1.0);
    s.register_parameter(leaf, a).unwrap();
    s.initialise_indices(root).unwrap();

    s.recursive_set_normalisation(root, 0.25).unwrap();
    for n in [root, mid, leaf, sibling] {
        let off = s.node(n).unwrap().parameters_offset();
        assert_relative_eq!(s.slots().normalisation()[off], 0.25);
    }
}

#[test]
fn test_initialise_indices_layout() {
    let mut s = Session::default();
    let x = s.add_variable(Variable::observable("x", 0.0, 1.0));
    let root = s.add_node("root", Some(x));
    let child = s.add_node("child", None);
    s.add_component(root, child).unwrap();
    let a = param(&mut s, "a", 1.0);
    let b = param(&mut s, "b", 1.0);
    s.register_parameter(root, a).unwrap();
    s.register_parameter(root, b).unwrap();
    s.register_parameter(child, b).unwrap();

    assert_eq!(s.initialise_indices(root).unwrap(), 0);
    assert_eq!(&s.slots().indices()[..7], &[2, 0, 1, 1, 1, 1, 0]);
    assert_eq!(s.node(child).unwrap().parameters_offset(), 4);

    // Same layout again: rewritten in place.
    s.initialise_indices(root).unwrap();
    assert_eq!(s.registry().index_cursor(), 7);
}

#[test]
fn test_add_component_rejects_cycles() {
    let mut s = Session::default();
    let (root, mid, leaf, _) = three_level(&mut s);
    assert!(matches!(s.add_component(leaf, root), Err(Error::Validation(_))));
    assert!(matches!(s.add_component(mid, mid), Err(Error::Validation(_))));
    // Sharing a child is fine.
    s.add_component(root, leaf).unwrap();
    assert_eq!(s.node(root).unwrap().components().len(), 3);
}

#[test]
fn test_remove_node_unregisters_and_detaches() {
    let mut s = Session::default();
    let (root, mid, leaf, _) = three_level(&mut s);
    let a = param(&mut s, "a", 1.0);
    let b = param(&mut s, "b", 1.0);
    s.register_parameter(mid, a).unwrap();
    s.register_parameter(leaf, a).unwrap();
    s.register_parameter(leaf, b).unwrap();

    let removed = s.remove_node(mid).unwrap();
    assert_eq!(removed.name(), "mid");
    assert!(s.node(mid).is_none());
    assert!(!s.node(root).unwrap().components().contains(&mid));
    // The cascade purged a from leaf as well; b is untouched.
    assert_eq!(s.variable(a).unwrap().slot(), None);
    assert_eq!(s.node(leaf).unwrap().parameter_list(), &[b]);
    assert!(s.remove_variable(a).is_ok());
    assert!(matches!(s.remove_variable(b), Err(Error::Validation(_))));
}

#[test]
fn test_integration_fineness_regenerates_ranges() {
    let mut s = Session::default();
    let x = s.add_variable(Variable::observable("x", 0.0, 10.0));
    let mut yv = Variable::observable("y", -1.0, 1.0);
    yv.num_bins = 40;
    let y = s.add_variable(yv);
    let n = s.add_node("n", Some(x));
    s.register_observable(n, y).unwrap();

    s.set_integration_fineness(n, 0).unwrap();
    assert_eq!(s.node(n).unwrap().norm_ranges(), &[0.0, 10.0, 100.0, -1.0, 1.0, 40.0]);
    s.set_integration_fineness(n, 250).unwrap();
    assert_eq!(s.node(n).unwrap().integration_bins(), 250);
    assert_eq!(s.node(n).unwrap().norm_ranges(), &[0.0, 10.0, 250.0, -1.0, 1.0, 250.0]);

    s.set_events_per_task(n, 64).unwrap();
    assert_eq!(s.node(n).unwrap().events_per_task(), 64);
}

#[test]
fn test_sync_and_dump_report_slot_values() {
    let mut s = Session::default();
    let n = s.add_node("gauss", None);
    let mu = param(&mut s, "mu", 1.5);
    let sigma = param(&mut s, "sigma", 0.5);
    s.register_parameter(n, mu).unwrap();
    s.register_parameter(n, sigma).unwrap();
    s.sync_params().unwrap();
    assert_eq!(&s.slots().params()[..2], &[1.5, 0.5]);

    let dump = s.diagnostic_dump("nan in normalisation", Some(n));
    let (name, pars) = dump.node.as_ref().unwrap();
    assert_eq!(name, "gauss");
    assert_eq!(pars.len(), 2);
    assert_eq!(dump.params, vec![1.5, 0.5]);
    let text = dump.to_string();
    assert!(text.contains("nan in normalisation"));
    assert!(text.contains("mu (0)"));
    assert!(text.contains("Parameters (2) :\n1.5 0.5\n"));

    let err = s.abort_with_dump("nan in normalisation", Some(n));
    assert!(matches!(err, Error::Computation(_)));
}

#[test]
fn test_cloned_registered_variable_gets_its_own_slot() {
    let mut s = Session::default();
    let n = s.add_node("n", None);
    let a = param(&mut s, "a", 1.0);
    assert_eq!(s.register_parameter(n, a).unwrap(), 0);

    let copy = s.variable(a).unwrap().clone();
    let b = s.add_variable(copy);
    assert_eq!(s.register_parameter(n, b).unwrap(), 1);
    assert_eq!(s.registry().total_params(), 2);

    s.unregister_parameter(n, b).unwrap();
    assert_eq!(s.variable(a).unwrap().slot(), Some(0));
    assert_eq!(s.registry().total_params(), 1);
}

#[test]
fn test_slot_not_handed_out_by_registry_is_ignored() {
    let mut s = Session::default();
    let n = s.add_node("n", None);

    let mut pre = Variable::new("pre", 0.0);
    pre.set_slot(Some(1));
    let pre = s.add_variable(pre);
    assert_eq!(s.register_parameter(n, pre).unwrap(), 0);

    let x = param(&mut s, "x", 0.0);
    s.variable_mut(x).unwrap().set_slot(Some(0));
    assert_eq!(s.register_parameter(n, x).unwrap(), 1);

    // Unregistering a variable nobody references must not free a live slot.
    let stray = param(&mut s, "stray", 0.0);
    s.variable_mut(stray).unwrap().set_slot(Some(0));
    s.unregister_parameter(n, stray).unwrap();
    s.set_parameter_value(stray, 99.0).unwrap();
    assert_eq!(s.slots().params()[0], 0.0);

    let y = param(&mut s, "y", 0.0);
    assert_eq!(s.register_parameter(n, y).unwrap(), 2);
    assert_eq!(s.variable(pre).unwrap().slot(), Some(0));
}

#[test]
fn test_update_variables_marks_only_moved_parameters() {
    let mut s = Session::default();
    let n = s.add_node("gauss", None);
    let mu = param(&mut s, "mu", 1.5);
    let sigma = param(&mut s, "sigma", 0.5);
    s.register_parameter(n, mu).unwrap();
    s.register_parameter(n, sigma).unwrap();
    s.sync_params().unwrap();
    let registered: Vec<VarId> = s.registry().registered_variables().collect();
    assert_eq!(registered.len(), 2);

    s.update_variables().unwrap();
    assert!(!s.parameters_changed(n).unwrap());

    s.registry_mut().slots_mut().set_param(1, 0.75).unwrap();
    s.update_variables().unwrap();
    assert!(!s.variable(mu).unwrap().changed());
    assert!(s.variable(sigma).unwrap().changed());
    assert_relative_eq!(s.variable(sigma).unwrap().value, 0.75);
    assert!(s.parameters_changed(n).unwrap());
}

#[test]
fn test_index_block_reused_until_it_outgrows_its_space() {
    let mut s = Session::default();
    let x = s.add_variable(Variable::observable("x", 0.0, 1.0));
    let root = s.add_node("root", Some(x));
    let a = param(&mut s, "a", 1.0);
    let b = param(&mut s, "b", 1.0);
    let c = param(&mut s, "c", 1.0);
    s.register_parameter(root, a).unwrap();
    s.register_parameter(root, b).unwrap();
    s.initialise_indices(root).unwrap();
    assert_eq!(s.registry().index_cursor(), 4);

    // Shrinking and regrowing within the original block stays in place.
    for _ in 0..5 {
        s.unregister_parameter(root, b).unwrap();
        assert_eq!(s.initialise_indices(root).unwrap(), 0);
        assert_eq!(&s.slots().indices()[..3], &[1, 0, 1]);
        s.register_parameter(root, b).unwrap();
        assert_eq!(s.initialise_indices(root).unwrap(), 0);
    }
    assert_eq!(s.registry().index_cursor(), 4);

    s.register_parameter(root, c).unwrap();
    assert_eq!(s.initialise_indices(root).unwrap(), 4);
    assert_eq!(&s.slots().indices()[4..9], &[3, 0, 1, 2, 1]);
    assert_eq!(s.registry().index_cursor(), 9);
}
