//! Shared circuits and helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use circuitry::{BlockDescriptor, CircuitDef, EngineConfig, ModuleRegistry, Session, Value};

pub fn block<'a>(
    block_type: &str,
    inputs: impl IntoIterator<Item = &'a str>,
    outputs: impl IntoIterator<Item = &'a str>,
) -> BlockDescriptor {
    BlockDescriptor::new(block_type).inputs(inputs).outputs(outputs)
}

/// Literal block `int` producing `value` on `output`.
pub fn int_block(output: &str, value: &str) -> BlockDescriptor {
    BlockDescriptor::new("int")
        .outputs([output])
        .arguments([value])
}

pub fn session(definitions: impl IntoIterator<Item = CircuitDef>) -> Session {
    Session::new(Arc::new(
        ModuleRegistry::with_builtins().with_definitions(definitions),
    ))
}

pub fn session_with(registry: ModuleRegistry, config: EngineConfig) -> Session {
    Session::with_config(Arc::new(registry), config)
}

pub fn ints(session: &Session, values: &[i64]) -> Vec<Value> {
    values
        .iter()
        .map(|value| Value::int(session.types(), *value))
        .collect()
}

/// `s = a + b + c`.
pub fn sum3() -> CircuitDef {
    CircuitDef::new("sum3")
        .inputs(["a", "b", "c"])
        .outputs(["s"])
        .block(block("add", ["a", "b"], ["ab"]))
        .block(block("add", ["ab", "c"], ["s"]))
}

/// Counts down from `n`, returning how many iterations decremented.
pub fn countdown() -> CircuitDef {
    CircuitDef::new("countdown")
        .inputs(["n"])
        .outputs(["count"])
        .block(int_block("zero", "0"))
        .block(int_block("one", "1"))
        .block(block("pack", ["n", "zero"], ["init"]))
        .block(block("begin", ["init"], ["state"]))
        .block(block("unpack", ["state"], ["k", "c"]))
        .block(block("gt", ["k", "zero"], ["more"]))
        .block(block("sub", ["k", "one"], ["k1"]))
        .block(block("add", ["c", "one"], ["c1"]))
        .block(block("pack", ["k1", "c1"], ["next"]))
        .block(block("end", ["state", "next", "more"], ["done"]))
        .block(
            BlockDescriptor::new("unpack")
                .inputs(["done"])
                .outputs(["count"])
                .arguments(["1"]),
        )
}
