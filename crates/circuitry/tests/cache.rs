mod common;

use circuitry::{CircuitDef, ConstantCache, Graph, Value};
use common::{block, int_block, session};

fn table() -> CircuitDef {
    CircuitDef::new("table")
        .outputs(["n", "pair"])
        .block(int_block("n", "3"))
        .block(
            circuitry::BlockDescriptor::new("float")
                .outputs(["f"])
                .arguments(["2.5"]),
        )
        .block(block("pack", ["n", "f"], ["pair"]))
}

#[test]
fn constant_outputs_restore_without_expansion() {
    let first = session([table()]);
    let mut graph = Graph::new(&first);
    let root = graph.instantiate("table", &[]).unwrap();
    assert!(graph.settle(1000));
    let cache = ConstantCache::capture(&graph, &root);
    assert_eq!(cache.values.len(), 2);
    assert_eq!(cache.version, ConstantCache::VERSION);

    let json = serde_json::to_string(&cache).unwrap();
    let loaded: ConstantCache = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded, cache);

    let second = session([table()]);
    let mut graph = Graph::new(&second);
    let root = graph.instantiate_cached("table", &loaded).unwrap();
    assert!(root.expansion.is_none());
    assert_eq!(graph.expansion_count(), 0);
    assert!(graph.settle(1000));

    assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(3));
    let pair = graph.output(root.outputs[1]).unwrap();
    assert_eq!(pair.element(1).unwrap().as_float(), Some(2.5));
}

#[test]
fn stale_caches_are_ignored() {
    let session = session([table()]);
    let mut graph = Graph::new(&session);
    let root = graph.instantiate("table", &[]).unwrap();
    assert!(graph.settle(1000));
    let mut cache = ConstantCache::capture(&graph, &root);
    cache.version += 1;

    let mut graph = Graph::new(&session);
    let root = graph.instantiate_cached("table", &cache).unwrap();
    assert!(root.expansion.is_some());
}

#[test]
fn circuits_with_inputs_are_never_cached() {
    let session = session([CircuitDef::new("id")
        .inputs(["x"])
        .outputs(["x_out"])
        .block(block("neg", ["x"], ["x_out"]))]);
    let cache = ConstantCache::new("id");
    let mut graph = Graph::new(&session);
    let root = graph.instantiate_cached("id", &cache).unwrap();
    assert!(root.expansion.is_some());
    assert_eq!(root.params.len(), 1);
}

#[test]
fn malformed_aggregates_fall_back_to_expansion() {
    let session = session([table()]);
    let mut graph = Graph::new(&session);
    let root = graph.instantiate("table", &[]).unwrap();
    assert!(graph.settle(1000));
    let mut cache = ConstantCache::capture(&graph, &root);
    let pair = cache.values.get_mut("pair").unwrap();
    assert_eq!(pair.elements.len(), 2);
    pair.elements.clear();

    let mut graph = Graph::new(&session);
    let root = graph.instantiate_cached("table", &cache).unwrap();
    assert!(root.expansion.is_some());
    assert!(graph.settle(1000));
    let pair = graph.output(root.outputs[1]).unwrap();
    assert_eq!(pair.elements().len(), 2);
}
