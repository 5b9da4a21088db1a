//! Table-driven test expansion: map a `Run(tc.name, ...)` inside a range loop
//! back to the literal rows it iterates.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::subtests::Scope;
use super::FileIndex;
use crate::core::matcher::{
    CaseName, ElementType, FieldDecl, RangeLoop, RangeSource, RunCall, StructDecl, TableLiteral,
    TableRow, TableShape,
};
use crate::tree::Span;

static NAME_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(name|test_?name|desc|description|title|scenario|case)$")
        .expect("valid name pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Case {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Default)]
pub(crate) struct Resolved {
    pub cases: Vec<Case>,
    /// Rows whose name could not be determined.
    pub skipped: Vec<(Span, String)>,
}

/// Struct declarations of a package, for positional rows of named types.
pub(crate) struct StructCatalog<'a> {
    decls: Vec<(&'a Path, Span, &'a StructDecl)>,
}

impl<'a> StructCatalog<'a> {
    pub(crate) fn new(files: &'a [FileIndex]) -> Self {
        let decls = files
            .iter()
            .flat_map(|file| {
                file.structs
                    .iter()
                    .map(move |(span, decl)| (file.path.as_path(), *span, decl))
            })
            .collect();
        Self { decls }
    }

    /// Field order of `name`, preferring the nearest declaration above
    /// `before` in the same file (types are often declared inside the test).
    fn fields(&self, name: &str, file: &Path, before: usize) -> Option<&'a [FieldDecl]> {
        self.decls
            .iter()
            .filter(|(path, span, decl)| {
                decl.name == name && *path == file && span.start_byte < before
            })
            .max_by_key(|(_, span, _)| span.start_byte)
            .or_else(|| self.decls.iter().find(|(_, _, decl)| decl.name == name))
            .map(|&(_, _, decl)| decl.fields.as_slice())
    }
}

#[derive(Clone, Copy)]
enum Mode<'c> {
    /// `tc.field` on the range value.
    Field(&'c str),
    /// The range key of a map.
    Key,
    /// The range value itself (slice of strings).
    Element,
}

pub(crate) fn resolve(
    file: &FileIndex,
    structs: &StructCatalog<'_>,
    call_span: Span,
    call: &RunCall,
    scope: &Scope,
) -> Result<Resolved, String> {
    let (loop_span, range) = file
        .loops
        .iter()
        .filter(|(span, range)| range.body.contains(&call_span) && scope.body.contains(span))
        .max_by_key(|(span, _)| span.start_byte)
        .ok_or_else(|| format!("{} is not bound by an enclosing range loop", describe(call)))?;

    let mode = match &call.case_name {
        CaseName::Field { var, field } if range.value.as_deref() == Some(var.as_str()) => {
            Mode::Field(field.as_str())
        }
        CaseName::Ident(var) if range.key.as_deref() == Some(var.as_str()) => Mode::Key,
        CaseName::Ident(var) if range.value.as_deref() == Some(var.as_str()) => Mode::Element,
        _ => return Err(format!("{} is not a range loop variable", describe(call))),
    };

    let (literal_span, literal) = find_literal(file, loop_span, range)
        .ok_or_else(|| format!("cannot find the table ranged over by {}", describe(call)))?;

    let order: Option<&[FieldDecl]> = match &literal.element {
        ElementType::Anonymous(fields) => Some(fields),
        ElementType::Named(name) => structs.fields(name, &file.path, literal_span.start_byte),
        ElementType::String | ElementType::Other => None,
    };

    let mut resolved = Resolved::default();
    for row in &literal.rows {
        let name = match mode {
            Mode::Key if literal.shape == TableShape::Map => {
                row.key.as_ref().and_then(|key| key.as_str()).map(str::to_string)
            }
            Mode::Key => return Err("range key of a slice is not a case name".to_string()),
            Mode::Element => row.value.as_ref().and_then(|value| value.as_str()).map(str::to_string),
            Mode::Field(field) => field_case_name(row, field, order),
        };
        match name {
            Some(name) => resolved.cases.push(Case {
                name,
                span: row.span,
            }),
            None => resolved
                .skipped
                .push((row.span, "table case name is not a string literal".to_string())),
        }
    }
    Ok(resolved)
}

/// The literal a range loop iterates. A named table must be bound inside the
/// test that holds the loop, or at package level, and must not be rebound
/// between its declaration and the loop.
fn find_literal<'f>(
    file: &'f FileIndex,
    loop_span: &Span,
    range: &RangeLoop,
) -> Option<(&'f Span, &'f TableLiteral)> {
    let found = match &range.source {
        RangeSource::Literal(span) => file.literals.iter().find(|(s, _)| s == span),
        RangeSource::Ident(name) => {
            let test_body = enclosing_test_body(file, loop_span);
            let candidate = file
                .literals
                .iter()
                .filter(|(span, literal)| {
                    literal.var.as_deref() == Some(name.as_str())
                        && span.start_byte < loop_span.start_byte
                        && (literal.top_level || test_body.is_some_and(|body| body.contains(span)))
                })
                .max_by_key(|(span, _)| span.start_byte)?;
            let rebound = file.bindings.iter().any(|(decl, bound)| {
                bound.name == *name
                    && test_body.is_some_and(|body| body.contains(decl))
                    && decl.start_byte > candidate.0.start_byte
                    && decl.start_byte < loop_span.start_byte
                    && !decl.contains(&candidate.0)
            });
            (!rebound).then_some(candidate)
        }
        RangeSource::Other => None,
    };
    found.map(|(span, literal)| (span, literal))
}

/// Body of the test function or suite method containing `span`.
fn enclosing_test_body(file: &FileIndex, span: &Span) -> Option<Span> {
    file.functions
        .iter()
        .map(|(_, func)| func.body)
        .chain(file.methods.iter().map(|(_, method)| method.body))
        .find(|body| body.contains(span))
}

/// Name of one struct row: the field the `Run` call reads. A keyed row that
/// leaves it out runs under the zero value `""`. Positional rows of an unknown
/// type fall back to a name-like field, then the first string field.
fn field_case_name(row: &TableRow, field: &str, order: Option<&[FieldDecl]>) -> Option<String> {
    let keyed = row.fields.iter().any(|f| f.key.is_some());
    if keyed {
        return match row.fields.iter().find(|f| f.key.as_deref() == Some(field)) {
            Some(value) => value.value.as_str().map(str::to_string),
            None => Some(String::new()),
        };
    }

    let value_at = |idx: usize| row.fields.get(idx).and_then(|f| f.value.as_str());
    match order {
        Some(order) => {
            if let Some(idx) = order.iter().position(|decl| decl.name == field) {
                return value_at(idx).map(str::to_string);
            }
            order
                .iter()
                .position(|decl| NAME_LIKE.is_match(&decl.name) && decl.is_string)
                .or_else(|| order.iter().position(|decl| decl.is_string))
                .and_then(value_at)
                .map(str::to_string)
        }
        None => row
            .fields
            .iter()
            .find_map(|f| f.value.as_str())
            .map(str::to_string),
    }
}

fn describe(call: &RunCall) -> String {
    match &call.case_name {
        CaseName::Field { var, field } => format!("`{var}.{field}`"),
        CaseName::Ident(name) => format!("`{name}`"),
        CaseName::Literal(name) => format!("{name:?}"),
        CaseName::Unsupported(expr) => format!("`{expr}`"),
    }
}
