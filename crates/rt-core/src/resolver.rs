//! Multi-pass resolution of replacement templates
//!
//! Each pass replaces every expression in the current element list: dice
//! arithmetic becomes its decimal result, references become the value of a
//! freshly rolled row. A referenced value that is itself a template is
//! spliced in and expands on the next pass. Resolution stops when nothing
//! is left to expand or the depth limit runs out; whatever is still
//! unresolved is rendered back as `${...}` source text.

use crate::diagnostic::{Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::expression::{Element, Expression, Origin, RefTarget, Reference, ReplacementTemplate, Value, PREV_ROW};
use crate::table::Row;
use rand::RngCore;
use std::path::Path;

/// Default number of resolution passes
pub const DEFAULT_DEPTH: usize = 100;

/// Where the resolver gets rows, randomness, and a place to report problems.
pub trait RowSource {
    /// Roll the table at `path` and return a copy of the row.
    fn roll_row(&mut self, path: &Path) -> Result<Row>;

    fn rng(&mut self) -> &mut dyn RngCore;

    fn sink(&self) -> &dyn DiagnosticSink;
}

/// Resolve `template` to its final text.
pub fn resolve<S: RowSource + ?Sized>(
    template: &ReplacementTemplate,
    source: &mut S,
    depth_limit: usize,
) -> Result<String> {
    // every element keeps the file and line it was loaded from
    let mut elements = located(template);
    let mut previous: Option<Row> = None;

    for pass in 1..=depth_limit {
        if !elements.iter().any(|(element, _)| element.is_expression()) {
            break;
        }

        let mut output = Vec::with_capacity(elements.len());
        for (element, origin) in elements {
            let expr = match element {
                Element::Literal(_) => {
                    output.push((element, origin));
                    continue;
                }
                Element::Expr(expr) => expr,
            };

            match &expr {
                Expression::DiceArith(arith) => match arith.evaluate(source.rng()) {
                    Ok(number) => output.push((Element::Literal(number.to_string()), origin)),
                    Err(e) => {
                        let diagnostic =
                            Diagnostic::resolve(pass, &expr.to_string(), e, "keeping source text");
                        report(source.sink(), diagnostic, origin.as_ref());
                        output.push((Element::Literal(expr.to_string()), origin));
                    }
                },
                Expression::Ref(reference) => {
                    let value = match reference.target() {
                        RefTarget::Previous => {
                            let row = previous.as_ref().ok_or_else(|| Error::Resolve {
                                pass,
                                op: expr.to_string(),
                                message: format!("'{PREV_ROW}' must not be the first reference"),
                            })?;
                            field_value(row, reference, pass, origin.as_ref(), source.sink())
                        }
                        RefTarget::Table { path, .. } => {
                            let row = source.roll_row(path).map_err(|e| match e {
                                Error::FileRead { .. } | Error::Io(_) => Error::Resolve {
                                    pass,
                                    op: expr.to_string(),
                                    message: format!("failed to open file: {e}"),
                                },
                                other => other,
                            })?;
                            let value = field_value(&row, reference, pass, origin.as_ref(), source.sink());
                            previous = Some(row);
                            value
                        }
                    };

                    match value {
                        Value::Text(text) => output.push((Element::Literal(text), None)),
                        Value::Template(nested) => output.extend(located(&nested)),
                    }
                }
            }
        }
        elements = output;
    }

    Ok(elements.iter().map(|(element, _)| element.to_string()).collect())
}

fn located(template: &ReplacementTemplate) -> Vec<(Element, Option<Origin>)> {
    template
        .elements()
        .iter()
        .map(|element| (element.clone(), template.origin().cloned()))
        .collect()
}

fn report(sink: &dyn DiagnosticSink, diagnostic: Diagnostic, origin: Option<&Origin>) {
    sink.emit(match origin {
        Some(origin) => diagnostic.at(&origin.path, origin.line),
        None => diagnostic,
    });
}

/// Resolve a field value. Plain text comes back unchanged.
pub fn resolve_value<S: RowSource + ?Sized>(value: &Value, source: &mut S, depth_limit: usize) -> Result<String> {
    match value {
        Value::Text(text) => Ok(text.clone()),
        Value::Template(template) => resolve(template, source, depth_limit),
    }
}

/// Resolve every field of `row`.
pub fn resolve_row<S: RowSource + ?Sized>(row: &Row, source: &mut S, depth_limit: usize) -> Result<Row<String>> {
    row.try_map(|_, value| resolve_value(value, source, depth_limit))
}

/// Value of the referenced field. A missing or absent field falls back to
/// the row's first field.
fn field_value(
    row: &Row,
    reference: &Reference,
    pass: usize,
    origin: Option<&Origin>,
    sink: &dyn DiagnosticSink,
) -> Value {
    let first = || {
        row.first()
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| Value::Text(String::new()))
    };

    let Some(field) = reference.field() else {
        return first();
    };
    match row.get(field) {
        Some(value) => value.clone(),
        None => {
            let op = format!("${{{}}}", reference.raw());
            let diagnostic = Diagnostic::resolve(
                pass,
                &op,
                format!("row has no field '{field}'"),
                "using the first field",
            );
            report(sink, diagnostic, origin);
            first()
        }
    }
}
