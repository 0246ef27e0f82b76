//! Parsers for literal block arguments.
//!
//! Every parser reports failures as definition diagnostics carrying the
//! argument text and the offending span, so they can be rendered as a report.

use chumsky::prelude::*;

use crate::diagnostics::Diagnostic;
use crate::types::{PointerFlags, Primitive, Type, TypeRegistry};
use crate::value::Value;

pub type ParseError<'src> = Rich<'src, char>;
type Extra<'src> = extra::Err<ParseError<'src>>;

/// Argument tags understood by [`parse`].
pub const TAGS: [&str; 7] = ["int", "float", "bool", "text", "label", "type", "auto"];

/// Parsed type literal, resolved against a registry afterwards.
#[derive(Debug, Clone, PartialEq)]
enum TypeExpr<'src> {
    Named(&'src str, SimpleSpan),
    Vector(Box<TypeExpr<'src>>, u32, bool, SimpleSpan),
    Struct(Vec<(Option<&'src str>, TypeExpr<'src>)>),
    Pointer(PointerFlags, Box<TypeExpr<'src>>),
    Function(Vec<TypeExpr<'src>>, Box<TypeExpr<'src>>),
}

fn identifier<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    any()
        .filter(|character: &char| character.is_ascii_alphabetic() || *character == '_')
        .then(
            any()
                .filter(|character: &char| character.is_ascii_alphanumeric() || *character == '_')
                .repeated(),
        )
        .to_slice()
}

fn int<'src>() -> impl Parser<'src, &'src str, i64, Extra<'src>> + Clone {
    just('-')
        .or_not()
        .then(text::int(10))
        .to_slice()
        .try_map(|digits: &str, span| {
            digits
                .parse::<i64>()
                .map_err(|error| Rich::custom(span, error.to_string()))
        })
}

fn float<'src>() -> impl Parser<'src, &'src str, f64, Extra<'src>> + Clone {
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10));
    just('-')
        .or_not()
        .then(text::int(10))
        .then(just('.').then(text::digits(10)).or_not())
        .then(exponent.or_not())
        .to_slice()
        .try_map(|number: &str, span| {
            number
                .parse::<f64>()
                .map_err(|error| Rich::custom(span, error.to_string()))
        })
}

fn boolean<'src>() -> impl Parser<'src, &'src str, bool, Extra<'src>> + Clone {
    choice((just("true").to(true), just("false").to(false)))
}

fn quoted<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let escape = just('\\').ignore_then(choice((
        just('n').to('\n'),
        just('t').to('\t'),
        just('"').to('"'),
        just('\\').to('\\'),
    )));
    none_of("\\\"")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
}

fn label<'src>() -> impl Parser<'src, &'src str, &'src str, Extra<'src>> + Clone {
    just('#').ignore_then(identifier())
}

fn type_expr<'src>() -> impl Parser<'src, &'src str, TypeExpr<'src>, Extra<'src>> + Clone {
    recursive(|ty| {
        let count = text::int(10).try_map(|digits: &str, span| {
            digits
                .parse::<u32>()
                .map_err(|error| Rich::custom(span, error.to_string()))
        });

        let sized = |open: char, close: char, simd: bool| {
            ty.clone()
                .padded()
                .then_ignore(just(';'))
                .then(count.clone().padded())
                .delimited_by(just(open), just(close))
                .map_with(move |(elem, count), extra| {
                    TypeExpr::Vector(Box::new(elem), count, simd, extra.span())
                })
        };

        let field = identifier()
            .then_ignore(just(':').padded())
            .or_not()
            .then(ty.clone())
            .padded();
        let structure = field
            .separated_by(just(','))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('{').then(text::whitespace()), just('}'))
            .map(TypeExpr::Struct);

        let qualifier = choice((
            just("const").to(PointerFlags::READ_ONLY),
            just("nocapture").to(PointerFlags::NO_CAPTURE),
        ))
        .then_ignore(text::whitespace().at_least(1));
        let pointer = just('*')
            .ignore_then(
                qualifier
                    .repeated()
                    .collect::<Vec<_>>()
                    .map(|flags| flags.into_iter().fold(PointerFlags::NONE, |all, flag| all | flag)),
            )
            .then(ty.clone())
            .map(|(flags, target)| TypeExpr::Pointer(flags, Box::new(target)));

        let function = just("fn")
            .ignore_then(
                ty.clone()
                    .padded()
                    .separated_by(just(','))
                    .collect::<Vec<_>>()
                    .delimited_by(just('('), just(')')),
            )
            .then_ignore(just("->").padded())
            .then(ty.clone())
            .map(|(params, ret)| TypeExpr::Function(params, Box::new(ret)));

        let named = identifier().map_with(|name, extra| TypeExpr::Named(name, extra.span()));

        choice((
            function,
            pointer,
            sized('[', ']', false),
            sized('<', '>', true),
            structure,
            named,
        ))
    })
}

fn run<'src, T>(
    parser: impl Parser<'src, &'src str, T, Extra<'src>>,
    tag: &str,
    text: &'src str,
) -> Result<T, Diagnostic> {
    parser
        .padded()
        .then_ignore(end())
        .parse(text)
        .into_result()
        .map_err(|errors| match errors.into_iter().next() {
            Some(error) => Diagnostic::definition(format!("invalid {tag} literal `{text}`: {error}"))
                .with_literal(text, error.span().into_range()),
            None => Diagnostic::definition(format!("invalid {tag} literal `{text}`")),
        })
}

fn build(types: &TypeRegistry, text: &str, expr: &TypeExpr) -> Result<Type, Diagnostic> {
    Ok(match expr {
        TypeExpr::Named(name, span) => match *name {
            "void" => types.void(),
            "text" => types.text(),
            other => match Primitive::from_name(other) {
                Some(primitive) => types.primitive(primitive),
                None => {
                    return Err(Diagnostic::definition(format!("unknown type `{other}`"))
                        .with_literal(text, span.into_range()));
                }
            },
        },
        TypeExpr::Vector(elem, count, simd, span) => types
            .vector_of(&build(types, text, elem)?, *count, *simd)
            .map_err(|error| error.with_literal(text, span.into_range()))?,
        TypeExpr::Struct(fields) => {
            let named = fields.iter().all(|(name, _)| name.is_some());
            let mut built = Vec::with_capacity(fields.len());
            for (name, field) in fields {
                built.push((*name, build(types, text, field)?));
            }
            let ty = if named && !built.is_empty() {
                types.named_struct_of(
                    built
                        .into_iter()
                        .map(|(name, ty)| (name.unwrap_or_default().into(), ty)),
                    None,
                )
            } else {
                types.struct_of(built.into_iter().map(|(_, ty)| ty))
            };
            ty.check_cells()
                .map_err(|error| error.with_literal(text, 0..text.len()))?;
            ty
        }
        TypeExpr::Pointer(flags, target) => match target.as_ref() {
            TypeExpr::Named("void", _) => types.pointer_to(None, *flags),
            target => types.pointer_to(Some(&build(types, text, target)?), *flags),
        },
        TypeExpr::Function(params, ret) => {
            let ret = build(types, text, ret)?;
            let params = params
                .iter()
                .map(|param| build(types, text, param))
                .collect::<Result<Vec<_>, _>>()?;
            types.function_of(&ret, params)
        }
    })
}

pub fn parse_int(text: &str) -> Result<i64, Diagnostic> {
    run(int(), "int", text)
}

pub fn parse_float(text: &str) -> Result<f64, Diagnostic> {
    run(float(), "float", text)
}

pub fn parse_bool(text: &str) -> Result<bool, Diagnostic> {
    run(boolean(), "bool", text)
}

pub fn parse_text(text: &str) -> Result<String, Diagnostic> {
    run(quoted(), "text", text)
}

pub fn parse_type(types: &TypeRegistry, text: &str) -> Result<Type, Diagnostic> {
    let expr = run(type_expr(), "type", text)?;
    build(types, text, &expr)
}

/// Literal `text` read according to `tag`.
///
/// A `type` literal evaluates to the zero value of that type, which is how
/// prototypes reach blocks that dispatch on a type.
pub fn parse(types: &TypeRegistry, tag: &str, text: &str) -> Result<Value, Diagnostic> {
    match tag {
        "int" => parse_int(text).map(|value| Value::int(types, value)),
        "float" => parse_float(text).map(|value| Value::float(types, value)),
        "bool" => parse_bool(text).map(|value| Value::bool(types, value)),
        "text" => parse_text(text).map(|value| Value::text(types, &value)),
        "label" => run(label(), "label", text).map(|name| Value::label(types, name)),
        "type" => parse_type(types, text).map(|ty| Value::zero(&ty)),
        "auto" => parse_auto(types, text),
        other => Err(Diagnostic::definition(format!(
            "unknown literal kind `{other}`, expected one of {}",
            TAGS.join(", ")
        ))),
    }
}

/// First of int, float, bool, text, label, type that reads `text`.
pub fn parse_auto(types: &TypeRegistry, text: &str) -> Result<Value, Diagnostic> {
    let mut last_error = None;
    for tag in ["int", "float", "bool", "text", "label", "type"] {
        match parse(types, tag, text) {
            Ok(value) => return Ok(value),
            Err(error) => last_error = Some(error),
        }
    }
    let error = Diagnostic::definition(format!("cannot read `{text}` as a literal"))
        .with_literal(text, 0..text.len());
    Err(match last_error {
        Some(Diagnostic {
            literal: Some(literal),
            message,
            ..
        }) if message.starts_with("unknown type") => Diagnostic {
            literal: Some(literal),
            ..error
        },
        _ => error,
    })
}
