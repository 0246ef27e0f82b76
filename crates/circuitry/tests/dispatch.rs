mod common;

use std::sync::Arc;

use circuitry::types::Primitive;
use circuitry::{Arity, DiagnosticKind, Interpreter, NativeFn, Value};
use common::session;

fn names(name: &str) -> Vec<Arc<str>> {
    vec![Arc::from(name)]
}

#[test]
fn mixed_numbers_dispatch_through_reversed_methods() {
    let session = session([]);
    let types = session.types();
    let mut interp = Interpreter::new(&session);
    let half = Value::float(types, 1.5);
    let two = Value::int(types, 2);

    let sum = interp.dispatch(&names("add"), &[half.clone(), two.clone()]).unwrap();
    assert_eq!(sum.as_float(), Some(3.5));

    // `i64` has no float addition, so the operands swap into `f64.radd`.
    let sum = interp.dispatch(&names("add"), &[two.clone(), half.clone()]).unwrap();
    assert_eq!(sum.as_float(), Some(3.5));

    let one = Value::int(types, 1);
    let difference = interp
        .dispatch(&names("sub"), &[one, Value::float(types, 2.5)])
        .unwrap();
    assert_eq!(difference.as_float(), Some(-1.5));

    let less = interp.dispatch(&names("lt"), &[two, half]).unwrap();
    assert_eq!(less.as_bool(), Some(false));
}

#[test]
fn unsupported_operands_name_both_types() {
    let session = session([]);
    let types = session.types();
    let mut interp = Interpreter::new(&session);
    let error = interp
        .dispatch(
            &names("add"),
            &[Value::text(types, "a"), Value::bool(types, true)],
        )
        .unwrap_err();
    assert_eq!(error.kind, DiagnosticKind::Dispatch);
    assert_eq!(
        error.message,
        "inputs don't support operator `add`: *const u8 and bool"
    );
}

#[test]
fn later_names_are_tried_in_order() {
    let session = session([]);
    let types = session.types();
    let mut interp = Interpreter::new(&session);
    let args = [Value::bool(types, true), Value::bool(types, false)];
    let names: Vec<Arc<str>> = vec![Arc::from("add"), Arc::from("or")];
    let result = interp.dispatch(&names, &args).unwrap();
    assert_eq!(result.as_bool(), Some(true));
}

#[test]
fn single_field_wrappers_are_transparent() {
    let session = session([]);
    let types = session.types();
    let int = types.primitive(Primitive::I64);
    let wrapped = Value::composite(types.struct_of([int]), vec![Value::int(types, 5)]).unwrap();

    let mut interp = Interpreter::new(&session);
    let sum = interp
        .dispatch(&names("add"), &[wrapped, Value::int(types, 3)])
        .unwrap();
    assert_eq!(sum.as_int(), Some(8));
}

#[test]
fn text_concatenates() {
    let session = session([]);
    let types = session.types();
    let mut interp = Interpreter::new(&session);
    let joined = interp
        .dispatch(
            &names("add"),
            &[Value::text(types, "circ"), Value::text(types, "uit")],
        )
        .unwrap();
    assert_eq!(joined.as_text(), Some("circuit"));
}

#[test]
fn integer_overflow_is_a_resource_error() {
    let session = session([]);
    let types = session.types();
    let mut interp = Interpreter::new(&session);
    let error = interp
        .dispatch(
            &names("add"),
            &[Value::int(types, i64::MAX), Value::int(types, 1)],
        )
        .unwrap_err();
    assert_eq!(error.kind, DiagnosticKind::Resource);
}

#[test]
fn user_types_fall_through_to_the_right_operand() {
    let session = session([]);
    let types = session.types();
    let int = types.primitive(Primitive::I64);
    let left = types.named_struct_of([("ax".into(), int.clone()), ("ay".into(), int.clone())], None);
    let right = types.named_struct_of([("bx".into(), int.clone()), ("by".into(), int)], None);

    let only_left = left.clone();
    let add = NativeFn::new("add", Arity::Exact(2), |args| Ok(Value::int(args.types(), 1)))
        .accepting(move |args| args.iter().all(|arg| *arg.ty() == only_left));
    types.define_method(&left, "add", Arc::new(add));
    // Receives the operands swapped: right first.
    let radd = NativeFn::new("radd", Arity::Exact(2), |args| {
        let first = args.elements(0)?[0].as_int().unwrap_or_default();
        let second = args.elements(1)?[0].as_int().unwrap_or_default();
        Ok(Value::int(args.types(), first * 10 + second))
    });
    types.define_method(&right, "radd", Arc::new(radd));

    let a = Value::composite(left, vec![Value::int(types, 1), Value::int(types, 0)]).unwrap();
    let b = Value::composite(right, vec![Value::int(types, 2), Value::int(types, 0)]).unwrap();
    let mut interp = Interpreter::new(&session);

    let same = interp.dispatch(&names("add"), &[a.clone(), a.clone()]).unwrap();
    assert_eq!(same.as_int(), Some(1));
    let mixed = interp.dispatch(&names("add"), &[a.clone(), b.clone()]).unwrap();
    assert_eq!(mixed.as_int(), Some(21));

    let error = interp.dispatch(&names("add"), &[b, a]).unwrap_err();
    assert_eq!(error.kind, DiagnosticKind::Dispatch);
}
