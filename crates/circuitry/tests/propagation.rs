mod common;

use circuitry::graph::Behavior;
use circuitry::{CircuitDef, Graph, Value};
use common::{block, int_block, session};

#[test]
fn unchanged_outputs_do_not_wake_consumers() {
    let session = session([]);
    let types = session.types();
    let mut graph = Graph::new(&session);
    let source = graph.add_node(Behavior::Const(Value::int(types, 1)), 0);
    let sink = graph.add_node(Behavior::Pass, 1);
    graph.connect(sink, 0, Some(source));
    assert!(graph.settle(100));

    assert!(graph.update_output(source, Some(Value::int(types, 2))));
    assert_eq!(graph.pending(), 1);
    assert!(!graph.update_output(source, Some(Value::int(types, 2))));
    assert_eq!(graph.pending(), 1);

    assert!(!graph.tick(10));
    assert_eq!(graph.output(sink).and_then(Value::as_int), Some(2));
    assert!(graph.is_settled());
}

#[test]
fn ticks_process_bounded_batches() {
    let session = session([]);
    let types = session.types();
    let mut graph = Graph::new(&session);
    let mut previous = graph.add_node(Behavior::Const(Value::int(types, 7)), 0);
    for _ in 0..5 {
        let next = graph.add_node(Behavior::Pass, 1);
        graph.connect(next, 0, Some(previous));
        previous = next;
    }
    assert!(graph.tick(2));
    assert!(graph.output(previous).is_none());
    assert!(graph.settle(100));
    assert_eq!(graph.output(previous).and_then(Value::as_int), Some(7));
}

#[test]
fn parameters_preview_through_the_circuit() {
    let session = session([CircuitDef::new("inc")
        .inputs(["x"])
        .outputs(["y"])
        .block(int_block("one", "1"))
        .block(block("add", ["x", "one"], ["y"]))]);
    let mut graph = Graph::new(&session);
    let root = graph.instantiate("inc", &[]).unwrap();
    assert!(graph.settle(1000));
    assert!(graph.output(root.outputs[0]).is_none());

    graph.set_preview(root.params[0], Value::int(session.types(), 41));
    assert!(graph.settle(1000));
    assert_eq!(graph.output(root.outputs[0]).and_then(Value::as_int), Some(42));
    assert!(graph.diagnostics().is_empty());
}

#[test]
fn impure_natives_wait_for_run_time() {
    let session = session([CircuitDef::new("shout")
        .outputs(["done"])
        .block(int_block("x", "3"))
        .block(block("print", ["x"], ["done"]))]);
    let mut graph = Graph::new(&session);
    let root = graph.instantiate("shout", &[]).unwrap();
    assert!(graph.settle(1000));
    assert!(graph.output(root.outputs[0]).is_none());
    assert!(graph.diagnostics().is_empty());
}

#[test]
fn diagnostics_collect_every_failing_node() {
    let session = session([CircuitDef::new("broken")
        .outputs(["a", "b"])
        .block(block("neg", ["nowhere"], ["a"]))
        .block(block("not", ["elsewhere"], ["b"]))]);
    let mut graph = Graph::new(&session);
    graph.instantiate("broken", &[]).unwrap();
    assert!(graph.settle(1000));
    let mut messages: Vec<String> = graph
        .take_diagnostics()
        .into_iter()
        .map(|diagnostic| diagnostic.message)
        .collect();
    messages.sort();
    assert_eq!(
        messages,
        ["unresolved link `elsewhere`", "unresolved link `nowhere`"]
    );
    assert!(graph.diagnostics().is_empty());
}

#[test]
fn removing_a_macro_output_tears_the_expansion_down() {
    let session = session([
        CircuitDef::new("twice")
            .inputs(["x"])
            .outputs(["y"])
            .block(block("add", ["x", "x"], ["y"])),
        CircuitDef::new("main")
            .outputs(["out"])
            .block(int_block("three", "3"))
            .block(block("twice", ["three"], ["out"])),
    ]);
    let mut graph = Graph::new(&session);
    let root = graph.instantiate("main", &[]).unwrap();
    assert!(graph.settle(1000));
    assert_eq!(graph.expansion_count(), 2);

    let macro_output = graph.node(root.outputs[0]).unwrap().inputs[0].unwrap();
    graph.remove(macro_output);
    assert_eq!(graph.expansion_count(), 1);
    assert!(graph.settle(1000));
    assert!(graph.output(root.outputs[0]).is_none());
}
