mod common;

use circuitry::types::{PointerFlags, Primitive};
use circuitry::{BlockDescriptor, CircuitDef, DiagnosticKind, TypeRegistry, Value};
use common::{block, ints, session};

#[test]
fn structurally_equal_types_are_identical() {
    let types = TypeRegistry::new();
    let int = types.primitive(Primitive::I64);
    let float = types.primitive(Primitive::F64);

    let first = types.struct_of([int.clone(), types.vector_of(&float, 4, true).unwrap()]);
    let second = types.struct_of([int.clone(), types.vector_of(&float, 4, true).unwrap()]);
    assert_eq!(first, second);
    assert_eq!(first.id(), second.id());

    assert_ne!(types.vector_of(&float, 4, true).unwrap(), types.vector_of(&float, 4, false).unwrap());
    assert_ne!(
        types.pointer_to(Some(&int), PointerFlags::READ_ONLY),
        types.pointer_to(Some(&int), PointerFlags::NONE)
    );
    assert_eq!(types.pointer_to(None, PointerFlags::NONE).to_string(), "*void");
}

#[test]
fn packed_values_unpack_by_index() {
    let session = session([]);
    let types = session.types();
    let packed = Value::pack(types, ints(&session, &[4, 5]));
    assert_eq!(packed.element(1).unwrap().as_int(), Some(5));

    let error = packed.element(2).unwrap_err();
    assert_eq!(error.kind, DiagnosticKind::Type);
    assert!(error.message.starts_with("too few elements"), "{}", error.message);
}

#[test]
fn unpacking_past_the_end_fails_at_run_time() {
    let session = session([CircuitDef::new("third")
        .inputs(["a", "b"])
        .outputs(["x"])
        .block(block("pack", ["a", "b"], ["pair"]))
        .block(
            BlockDescriptor::new("unpack")
                .inputs(["pair"])
                .outputs(["x"])
                .arguments(["2"]),
        )]);
    let error = session.run("third", ints(&session, &[1, 2])).unwrap_err();
    assert_eq!(error.kind, DiagnosticKind::Type);
    assert!(error.message.contains("too few elements"));
    assert_eq!(error.locator.circuit.as_deref(), Some("third"));
    assert!(error.locator.address.is_some());
}

#[test]
fn unpack_block_splits_every_output() {
    let session = session([CircuitDef::new("swap")
        .inputs(["a", "b"])
        .outputs(["y", "x"])
        .block(block("pack", ["a", "b"], ["pair"]))
        .block(block("unpack", ["pair"], ["x", "y"]))]);
    let result = session.run("swap", ints(&session, &[1, 2])).unwrap();
    assert_eq!(result.element(0).unwrap().as_int(), Some(2));
    assert_eq!(result.element(1).unwrap().as_int(), Some(1));
}

#[test]
fn oversized_type_literal_is_refused_at_compile() {
    let session = session([CircuitDef::new("big").outputs(["v"]).block(
        BlockDescriptor::new("type")
            .outputs(["v"])
            .arguments(["<i64; 3000000000>"]),
    )]);
    let error = session.compile("big").unwrap_err();
    assert_eq!(&*error.circuit, "big");
    assert!(
        error
            .diagnostics
            .iter()
            .any(|diagnostic| diagnostic.kind == DiagnosticKind::Definition
                && diagnostic.message.contains("too large"))
    );
}
