//! Virtual methods for the built-in types and the default natives.

use std::sync::Arc;

use super::{Arity, NativeFn};
use crate::diagnostics::Diagnostic;
use crate::types::{Primitive, Type, TypeRegistry};
use crate::value::Value;

type IntArithmetic = fn(i64, i64) -> Option<i64>;
type FloatArithmetic = fn(f64, f64) -> f64;
type Compare<T> = fn(&T, &T) -> bool;

const INT_ARITHMETIC: [(&str, IntArithmetic); 7] = [
    ("add", i64::checked_add),
    ("sub", i64::checked_sub),
    ("mul", i64::checked_mul),
    ("div", i64::checked_div),
    ("rem", i64::checked_rem),
    ("min", |a, b| Some(a.min(b))),
    ("max", |a, b| Some(a.max(b))),
];

const FLOAT_ARITHMETIC: [(&str, FloatArithmetic); 7] = [
    ("add", |a, b| a + b),
    ("sub", |a, b| a - b),
    ("mul", |a, b| a * b),
    ("div", |a, b| a / b),
    ("rem", |a, b| a % b),
    ("min", f64::min),
    ("max", f64::max),
];

const INT_COMPARE: [(&str, Compare<i64>); 6] = [
    ("lt", i64::lt),
    ("le", i64::le),
    ("gt", i64::gt),
    ("ge", i64::ge),
    ("eq", i64::eq),
    ("ne", i64::ne),
];

const FLOAT_COMPARE: [(&str, Compare<f64>); 6] = [
    ("lt", f64::lt),
    ("le", f64::le),
    ("gt", f64::gt),
    ("ge", f64::ge),
    ("eq", f64::eq),
    ("ne", f64::ne),
];

fn is(primitive: Primitive) -> impl Fn(&Value) -> bool + Copy {
    move |value| value.is_primitive(primitive)
}

fn number(value: &Value) -> bool {
    value.is_primitive(Primitive::F64) || value.is_primitive(Primitive::I64)
}

fn define(types: &TypeRegistry, ty: &Type, method: NativeFn) {
    let name = crate::interp::Op::name(&method).to_string();
    types.define_method(ty, &name, Arc::new(method));
}

/// Register the operator methods of `i64`, `f64`, `bool`, text and labels.
pub fn install(types: &TypeRegistry) {
    let int = types.primitive(Primitive::I64);
    let float = types.primitive(Primitive::F64);
    let boolean = types.primitive(Primitive::Bool);
    let label = types.primitive(Primitive::Label);
    let text = types.text();

    let both_ints = |args: &[Value]| args.iter().all(is(Primitive::I64));
    for (name, apply) in INT_ARITHMETIC {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            apply(args.int(0)?, args.int(1)?)
                .map(|result| Value::int(args.types(), result))
                .ok_or_else(|| Diagnostic::resource(format!("`{name}` overflowed or divided by zero")))
        });
        define(types, &int, method.accepting(both_ints));
    }
    for (name, compare) in INT_COMPARE {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            Ok(Value::bool(args.types(), compare(&args.int(0)?, &args.int(1)?)))
        });
        define(types, &int, method.accepting(both_ints));
    }
    define(
        types,
        &int,
        NativeFn::new("neg", Arity::Exact(1), |args| {
            args.int(0)?
                .checked_neg()
                .map(|result| Value::int(args.types(), result))
                .ok_or_else(|| Diagnostic::resource("`neg` overflowed"))
        }),
    );

    // Floats take integers on either side; `r` variants see the operands swapped.
    let float_first = |args: &[Value]| args.len() == 2 && is(Primitive::F64)(&args[0]) && number(&args[1]);
    for (name, apply) in FLOAT_ARITHMETIC {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            Ok(Value::float(args.types(), apply(args.float(0)?, args.float(1)?)))
        });
        define(types, &float, method.accepting(float_first));
        let reversed = format!("r{name}");
        let method = NativeFn::new(&reversed, Arity::Exact(2), move |args| {
            Ok(Value::float(args.types(), apply(args.float(1)?, args.float(0)?)))
        });
        define(types, &float, method.accepting(float_first));
    }
    for (name, compare) in FLOAT_COMPARE {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            Ok(Value::bool(args.types(), compare(&args.float(0)?, &args.float(1)?)))
        });
        define(types, &float, method.accepting(float_first));
        let reversed = format!("r{name}");
        let method = NativeFn::new(&reversed, Arity::Exact(2), move |args| {
            Ok(Value::bool(args.types(), compare(&args.float(1)?, &args.float(0)?)))
        });
        define(types, &float, method.accepting(float_first));
    }
    define(
        types,
        &float,
        NativeFn::new("neg", Arity::Exact(1), |args| {
            Ok(Value::float(args.types(), -args.float(0)?))
        }),
    );

    let both_bools = |args: &[Value]| args.iter().all(is(Primitive::Bool));
    let logic: [(&str, fn(bool, bool) -> bool); 4] = [
        ("and", |a, b| a && b),
        ("or", |a, b| a || b),
        ("eq", |a, b| a == b),
        ("ne", |a, b| a != b),
    ];
    for (name, apply) in logic {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            Ok(Value::bool(args.types(), apply(args.bool(0)?, args.bool(1)?)))
        });
        define(types, &boolean, method.accepting(both_bools));
    }
    define(
        types,
        &boolean,
        NativeFn::new("not", Arity::Exact(1), |args| {
            Ok(Value::bool(args.types(), !args.bool(0)?))
        }),
    );

    let both_texts = |args: &[Value]| args.iter().all(|arg| arg.as_text().is_some());
    define(
        types,
        &text,
        NativeFn::new("add", Arity::Exact(2), |args| {
            let joined = format!("{}{}", args.text(0)?, args.text(1)?);
            Ok(Value::text(args.types(), &joined))
        })
        .accepting(both_texts),
    );
    let ordering: [(&str, fn(&str, &str) -> bool); 3] = [("eq", str::eq), ("ne", str::ne), ("lt", str::lt)];
    for (name, compare) in ordering {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            Ok(Value::bool(args.types(), compare(args.text(0)?, args.text(1)?)))
        });
        define(types, &text, method.accepting(both_texts));
    }

    let both_labels = |args: &[Value]| args.iter().all(is(Primitive::Label));
    for (name, equal) in [("eq", true), ("ne", false)] {
        let method = NativeFn::new(name, Arity::Exact(2), move |args| {
            let same = args.get(0)?.raw() == args.get(1)?.raw();
            Ok(Value::bool(args.types(), same == equal))
        });
        define(types, &label, method.accepting(both_labels));
    }
}

/// Natives every registry starts with.
pub fn natives() -> Vec<NativeFn> {
    vec![
        NativeFn::new("len", Arity::Exact(1), |args| {
            let value = args.get(0)?;
            let len = match value.as_text() {
                Some(text) => text.len(),
                None => value.elements().len(),
            };
            Ok(Value::int(args.types(), len as i64))
        }),
        NativeFn::new("print", Arity::AtLeast(0), |args| {
            let line = args
                .values()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
            Ok(Value::void(args.types()))
        })
        .impure(),
    ]
}
