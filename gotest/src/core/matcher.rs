//! Syntax matcher: turns one Go source file into flat match records.
//!
//! Records carry only what the tree builder needs. No cross-record resolution
//! happens here; a literal may appear twice (with and without its variable)
//! and a `Run` call is reported whatever its operand is.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, instrument};
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use super::naming::{is_test_name, unquote};
use super::queries;
use crate::tree::Span;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("failed to load Go grammar")]
    Language(#[from] tree_sitter::LanguageError),
    #[error("invalid {name} query")]
    Query {
        name: &'static str,
        #[source]
        source: tree_sitter::QueryError,
    },
    #[error("parser produced no syntax tree")]
    Parse,
}

/// Produces match records for one file's source text.
pub trait Matcher {
    fn match_source(&self, source: &str) -> Result<Vec<MatchRecord>, MatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub span: Span,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchKind {
    Import(Import),
    StructDecl(StructDecl),
    TestFunction(TestFunction),
    Method(Method),
    RunCall(RunCall),
    SuiteRun(SuiteRun),
    TableLiteral(TableLiteral),
    RangeLoop(RangeLoop),
    LocalBinding(LocalBinding),
}

impl MatchKind {
    pub fn label(&self) -> &'static str {
        match self {
            MatchKind::Import(_) => "import",
            MatchKind::StructDecl(_) => "struct",
            MatchKind::TestFunction(_) => "test function",
            MatchKind::Method(_) => "method",
            MatchKind::RunCall(_) => "run call",
            MatchKind::SuiteRun(_) => "suite run",
            MatchKind::TableLiteral(_) => "table literal",
            MatchKind::RangeLoop(_) => "range loop",
            MatchKind::LocalBinding(_) => "binding",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub alias: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub is_string: bool,
}

/// A possibly package-qualified type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub package: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    /// Named fields in declaration order.
    pub fields: Vec<FieldDecl>,
    pub embeds: Vec<TypeRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionStyle {
    Test,
    Example,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFunction {
    pub name: String,
    pub style: FunctionStyle,
    /// Name of the `*testing.T` parameter, if usable.
    pub binding: Option<String>,
    pub body: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub receiver: Option<String>,
    pub receiver_type: String,
    pub body: Span,
}

/// How a `Run` call names its subtest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseName {
    Literal(String),
    Field { var: String, field: String },
    Ident(String),
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackBinding {
    /// No parameters: the enclosing handle stays in effect.
    Inherit,
    Bound(String),
    Unbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    pub binding: CallbackBinding,
    pub body: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCall {
    pub operand: String,
    pub case_name: CaseName,
    pub callback: Option<Callback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRun {
    pub operand: String,
    pub suite_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableShape {
    Slice,
    Map,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Named(String),
    Anonymous(Vec<FieldDecl>),
    String,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralValue {
    Str(String),
    Other(String),
}

impl LiteralValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LiteralValue::Str(value) => Some(value),
            LiteralValue::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowField {
    pub key: Option<String>,
    pub value: LiteralValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub span: Span,
    /// Map key, for map literals.
    pub key: Option<LiteralValue>,
    /// Whole element, when it is not itself a struct literal.
    pub value: Option<LiteralValue>,
    pub fields: Vec<RowField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLiteral {
    pub var: Option<String>,
    /// Declared outside every function (a package-level `var`).
    pub top_level: bool,
    pub shape: TableShape,
    pub element: ElementType,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSource {
    Ident(String),
    Literal(Span),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeLoop {
    pub key: Option<String>,
    pub value: Option<String>,
    pub source: RangeSource,
    pub body: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBinding {
    pub name: String,
    /// Block the name is visible in.
    pub scope: Span,
}

#[derive(Debug, Clone, Copy)]
enum QueryKind {
    Imports,
    Structs,
    Functions,
    Methods,
    RunCalls,
    Literals,
    RangeLoops,
    Bindings,
}

impl QueryKind {
    const ALL: [QueryKind; 8] = [
        QueryKind::Imports,
        QueryKind::Structs,
        QueryKind::Functions,
        QueryKind::Methods,
        QueryKind::RunCalls,
        QueryKind::Literals,
        QueryKind::RangeLoops,
        QueryKind::Bindings,
    ];

    fn source(self) -> &'static str {
        match self {
            QueryKind::Imports => queries::IMPORTS,
            QueryKind::Structs => queries::STRUCTS,
            QueryKind::Functions => queries::FUNCTIONS,
            QueryKind::Methods => queries::METHODS,
            QueryKind::RunCalls => queries::RUN_CALLS,
            QueryKind::Literals => queries::LITERALS,
            QueryKind::RangeLoops => queries::RANGE_LOOPS,
            QueryKind::Bindings => queries::BINDINGS,
        }
    }

    fn name(self) -> &'static str {
        match self {
            QueryKind::Imports => "imports",
            QueryKind::Structs => "structs",
            QueryKind::Functions => "functions",
            QueryKind::Methods => "methods",
            QueryKind::RunCalls => "run calls",
            QueryKind::Literals => "literals",
            QueryKind::RangeLoops => "range loops",
            QueryKind::Bindings => "bindings",
        }
    }
}

/// Tree-sitter backed matcher for Go sources. Queries are compiled once; a
/// parser is created per file.
pub struct GoMatcher {
    language: Language,
    queries: Vec<(QueryKind, Query)>,
}

impl GoMatcher {
    pub fn new() -> Result<Self, MatchError> {
        let language: Language = tree_sitter_go::LANGUAGE.into();
        let queries = QueryKind::ALL
            .iter()
            .map(|kind| {
                Query::new(&language, kind.source())
                    .map(|query| (*kind, query))
                    .map_err(|source| MatchError::Query {
                        name: kind.name(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { language, queries })
    }
}

impl Matcher for GoMatcher {
    #[instrument(skip_all, fields(bytes = source.len()))]
    fn match_source(&self, source: &str) -> Result<Vec<MatchRecord>, MatchError> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;
        let syntax = parser.parse(source, None).ok_or(MatchError::Parse)?;
        let root = syntax.root_node();

        let mut records = Vec::new();
        for (kind, query) in &self.queries {
            let names = query.capture_names();
            let mut cursor = QueryCursor::new();
            let mut matches = cursor.matches(query, root, source.as_bytes());
            while let Some(m) = matches.next() {
                let captures: HashMap<&str, Node> = m
                    .captures
                    .iter()
                    .map(|cap| (names[cap.index as usize], cap.node))
                    .collect();
                if let Some(record) = extract(*kind, &captures, source) {
                    records.push(record);
                }
            }
        }

        records.sort_by_key(|record| (record.span.start_byte, std::cmp::Reverse(record.span.end_byte)));
        debug!(records = records.len(), "matched source");
        Ok(records)
    }
}

fn extract(kind: QueryKind, captures: &HashMap<&str, Node>, src: &str) -> Option<MatchRecord> {
    match kind {
        QueryKind::Imports => {
            let node = *captures.get("import")?;
            let path = unquote(text(node.child_by_field_name("path")?, src))?;
            let alias = node
                .child_by_field_name("name")
                .map(|alias| text(alias, src).to_string());
            record(node, MatchKind::Import(Import { alias, path }))
        }
        QueryKind::Structs => {
            let decl = *captures.get("decl")?;
            let name = text(*captures.get("name")?, src).to_string();
            let (fields, embeds) = struct_fields(*captures.get("struct")?, src);
            record(decl, MatchKind::StructDecl(StructDecl { name, fields, embeds }))
        }
        QueryKind::Functions => {
            let func = *captures.get("func")?;
            let name = text(*captures.get("name")?, src);
            let params = *captures.get("params")?;
            let (style, binding) = if is_test_name(name, "Test") {
                (FunctionStyle::Test, testing_param(params, src)?)
            } else if is_test_name(name, "Example") && named_children(params).is_empty() {
                (FunctionStyle::Example, None)
            } else {
                return None;
            };
            record(
                func,
                MatchKind::TestFunction(TestFunction {
                    name: name.to_string(),
                    style,
                    binding,
                    body: span_of(*captures.get("body")?),
                }),
            )
        }
        QueryKind::Methods => {
            let method = *captures.get("method")?;
            let name = text(*captures.get("name")?, src);
            if !name.starts_with("Test") {
                return None;
            }
            let decl = named_children(*captures.get("receiver")?)
                .into_iter()
                .find(|child| child.kind() == "parameter_declaration")?;
            let receiver = decl
                .child_by_field_name("name")
                .map(|node| text(node, src))
                .filter(|name| *name != "_")
                .map(str::to_string);
            let receiver_type = base_type_name(decl.child_by_field_name("type")?, src)?;
            record(
                method,
                MatchKind::Method(Method {
                    name: name.to_string(),
                    receiver,
                    receiver_type,
                    body: span_of(*captures.get("body")?),
                }),
            )
        }
        QueryKind::RunCalls => {
            let call = *captures.get("call")?;
            let operand = text(*captures.get("operand")?, src).to_string();
            let args = named_children(*captures.get("args")?);
            let [first, second] = args.as_slice() else {
                return None;
            };
            let kind = match second.kind() {
                "func_literal" => MatchKind::RunCall(RunCall {
                    operand,
                    case_name: case_name(*first, src),
                    callback: Some(callback(*second, src)),
                }),
                "identifier" | "selector_expression" => MatchKind::RunCall(RunCall {
                    operand,
                    case_name: case_name(*first, src),
                    callback: None,
                }),
                _ => MatchKind::SuiteRun(SuiteRun {
                    operand,
                    suite_type: suite_instance_type(*second, src)?,
                }),
            };
            record(call, kind)
        }
        QueryKind::Literals => {
            let literal = *captures.get("literal")?;
            let var = captures.get("var").map(|node| text(*node, src).to_string());
            record(literal, MatchKind::TableLiteral(table_literal(literal, var, src)?))
        }
        QueryKind::RangeLoops => {
            let range = *captures.get("range")?;
            let names: Vec<Option<String>> = range
                .child_by_field_name("left")
                .map(|left| {
                    named_children(left)
                        .into_iter()
                        .map(|node| Some(text(node, src)).filter(|name| *name != "_").map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let right = range.child_by_field_name("right")?;
            let source = match right.kind() {
                "identifier" => RangeSource::Ident(text(right, src).to_string()),
                "composite_literal" => RangeSource::Literal(span_of(right)),
                _ => RangeSource::Other,
            };
            record(
                *captures.get("loop")?,
                MatchKind::RangeLoop(RangeLoop {
                    key: names.first().cloned().flatten(),
                    value: names.get(1).cloned().flatten(),
                    source,
                    body: span_of(*captures.get("body")?),
                }),
            )
        }
        QueryKind::Bindings => {
            let name = text(*captures.get("name")?, src);
            if name == "_" {
                return None;
            }
            let decl = *captures.get("decl")?;
            let scope = enclosing_scope(decl).map_or_else(|| span_of(decl), span_of);
            record(
                decl,
                MatchKind::LocalBinding(LocalBinding {
                    name: name.to_string(),
                    scope,
                }),
            )
        }
    }
}

fn record(node: Node, kind: MatchKind) -> Option<MatchRecord> {
    Some(MatchRecord {
        span: span_of(node),
        kind,
    })
}

pub(crate) fn span_of(node: Node) -> Span {
    Span {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
    }
}

fn text<'s>(node: Node, src: &'s str) -> &'s str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// Innermost block (explicit or implicit) a declaration is scoped to.
fn enclosing_scope(node: Node) -> Option<Node> {
    std::iter::successors(node.parent(), |cur| cur.parent()).find(|cur| {
        matches!(
            cur.kind(),
            "block"
                | "if_statement"
                | "for_statement"
                | "expression_switch_statement"
                | "type_switch_statement"
                | "select_statement"
                | "expression_case"
                | "type_case"
                | "default_case"
                | "communication_case"
                | "source_file"
        )
    })
}

/// Nearest function, method or closure around `node`.
fn enclosing_function(node: Node) -> Option<Node> {
    std::iter::successors(node.parent(), |cur| cur.parent()).find(|cur| {
        matches!(
            cur.kind(),
            "function_declaration" | "method_declaration" | "func_literal"
        )
    })
}

/// Strip a `literal_element` wrapper, if present.
fn unwrap_element(node: Node) -> Node {
    if node.kind() == "literal_element" {
        named_children(node).into_iter().next().unwrap_or(node)
    } else {
        node
    }
}

/// Returns the `*testing.T` parameter binding, or `None` when the signature is
/// not a test signature.
fn testing_param(params: Node, src: &str) -> Option<Option<String>> {
    let decls: Vec<Node> = named_children(params)
        .into_iter()
        .filter(|child| child.kind() == "parameter_declaration")
        .collect();
    let [decl] = decls.as_slice() else {
        return None;
    };
    let ty: String = text(decl.child_by_field_name("type")?, src)
        .split_whitespace()
        .collect();
    if !(ty.starts_with('*') && ty.ends_with(".T")) {
        return None;
    }
    Some(
        decl.child_by_field_name("name")
            .map(|node| text(node, src))
            .filter(|name| *name != "_")
            .map(str::to_string),
    )
}

fn base_type_name(node: Node, src: &str) -> Option<String> {
    match node.kind() {
        "type_identifier" => Some(text(node, src).to_string()),
        "pointer_type" => base_type_name(*named_children(node).first()?, src),
        "generic_type" => base_type_name(node.child_by_field_name("type")?, src),
        _ => None,
    }
}

fn type_ref(node: Node, src: &str) -> Option<TypeRef> {
    match node.kind() {
        "type_identifier" => Some(TypeRef {
            package: None,
            name: text(node, src).to_string(),
        }),
        "qualified_type" => Some(TypeRef {
            package: Some(text(node.child_by_field_name("package")?, src).to_string()),
            name: text(node.child_by_field_name("name")?, src).to_string(),
        }),
        "pointer_type" => type_ref(*named_children(node).first()?, src),
        _ => None,
    }
}

fn struct_fields(struct_type: Node, src: &str) -> (Vec<FieldDecl>, Vec<TypeRef>) {
    let mut fields = Vec::new();
    let mut embeds = Vec::new();
    let Some(list) = named_children(struct_type)
        .into_iter()
        .find(|child| child.kind() == "field_declaration_list")
    else {
        return (fields, embeds);
    };
    for decl in named_children(list) {
        if decl.kind() != "field_declaration" {
            continue;
        }
        let Some(ty) = decl.child_by_field_name("type") else {
            continue;
        };
        let mut cursor = decl.walk();
        let names: Vec<String> = decl
            .children_by_field_name("name", &mut cursor)
            .map(|node| text(node, src).to_string())
            .collect();
        if names.is_empty() {
            embeds.extend(type_ref(ty, src));
            continue;
        }
        let is_string = text(ty, src) == "string";
        fields.extend(names.into_iter().map(|name| FieldDecl { name, is_string }));
    }
    (fields, embeds)
}

fn case_name(node: Node, src: &str) -> CaseName {
    match node.kind() {
        "interpreted_string_literal" | "raw_string_literal" => match unquote(text(node, src)) {
            Some(name) => CaseName::Literal(name),
            None => CaseName::Unsupported(text(node, src).to_string()),
        },
        "selector_expression" => {
            let operand = node.child_by_field_name("operand");
            let field = node.child_by_field_name("field");
            match (operand, field) {
                (Some(operand), Some(field)) if operand.kind() == "identifier" => CaseName::Field {
                    var: text(operand, src).to_string(),
                    field: text(field, src).to_string(),
                },
                _ => CaseName::Unsupported(text(node, src).to_string()),
            }
        }
        "identifier" => CaseName::Ident(text(node, src).to_string()),
        _ => CaseName::Unsupported(text(node, src).to_string()),
    }
}

fn callback(func: Node, src: &str) -> Callback {
    let decls: Vec<Node> = func
        .child_by_field_name("parameters")
        .map(named_children)
        .unwrap_or_default()
        .into_iter()
        .filter(|child| child.kind() == "parameter_declaration")
        .collect();
    let binding = match decls.first() {
        None => CallbackBinding::Inherit,
        Some(decl) => match decl.child_by_field_name("name") {
            Some(name) if text(name, src) != "_" => {
                CallbackBinding::Bound(text(name, src).to_string())
            }
            _ => CallbackBinding::Unbound,
        },
    };
    Callback {
        binding,
        body: func.child_by_field_name("body").map(span_of).unwrap_or_else(|| span_of(func)),
    }
}

fn suite_instance_type(node: Node, src: &str) -> Option<String> {
    match node.kind() {
        "call_expression" => {
            let function = node.child_by_field_name("function")?;
            if text(function, src) != "new" {
                return None;
            }
            let arg = *named_children(node.child_by_field_name("arguments")?).first()?;
            matches!(arg.kind(), "identifier" | "type_identifier").then(|| text(arg, src).to_string())
        }
        "unary_expression" => suite_instance_type(node.child_by_field_name("operand")?, src),
        "composite_literal" => base_type_name(node.child_by_field_name("type")?, src),
        _ => None,
    }
}

fn table_literal(literal: Node, var: Option<String>, src: &str) -> Option<TableLiteral> {
    let ty = literal.child_by_field_name("type")?;
    let (shape, element) = match ty.kind() {
        "slice_type" | "array_type" | "implicit_length_array_type" => {
            (TableShape::Slice, ty.child_by_field_name("element")?)
        }
        "map_type" => (TableShape::Map, ty.child_by_field_name("value")?),
        _ => return None,
    };
    let body = literal.child_by_field_name("body")?;
    let rows = named_children(body)
        .into_iter()
        .map(|row| table_row(row, shape, src))
        .collect();
    Some(TableLiteral {
        var,
        top_level: enclosing_function(literal).is_none(),
        shape,
        element: element_type(element, src),
        rows,
    })
}

fn element_type(node: Node, src: &str) -> ElementType {
    match node.kind() {
        "type_identifier" if text(node, src) == "string" => ElementType::String,
        "type_identifier" => ElementType::Named(text(node, src).to_string()),
        "struct_type" => ElementType::Anonymous(struct_fields(node, src).0),
        "pointer_type" => named_children(node)
            .first()
            .map(|inner| element_type(*inner, src))
            .unwrap_or(ElementType::Other),
        _ => ElementType::Other,
    }
}

fn table_row(node: Node, shape: TableShape, src: &str) -> TableRow {
    let span = span_of(node);
    let (key, value) = if node.kind() == "keyed_element" {
        let parts = named_children(node);
        let key = match shape {
            TableShape::Map => parts.first().map(|key| literal_value(unwrap_element(*key), src)),
            TableShape::Slice => None,
        };
        (key, parts.get(1).map(|value| unwrap_element(*value)))
    } else {
        (None, Some(unwrap_element(node)))
    };

    let mut row = TableRow {
        span,
        key,
        value: None,
        fields: Vec::new(),
    };
    let Some(value) = value else {
        return row;
    };
    match struct_body(value) {
        Some(body) => row.fields = row_fields(body, src),
        None => row.value = Some(literal_value(value, src)),
    }
    row
}

/// The `{...}` body of a struct-like row: bare, typed, or address-of.
fn struct_body(node: Node) -> Option<Node> {
    match node.kind() {
        "literal_value" => Some(node),
        "composite_literal" => node.child_by_field_name("body"),
        "unary_expression" => struct_body(node.child_by_field_name("operand")?),
        _ => None,
    }
}

fn row_fields(body: Node, src: &str) -> Vec<RowField> {
    named_children(body)
        .into_iter()
        .map(|element| {
            if element.kind() == "keyed_element" {
                let parts = named_children(element);
                let key = parts
                    .first()
                    .map(|key| text(unwrap_element(*key), src).to_string());
                let value = parts
                    .get(1)
                    .map(|value| literal_value(unwrap_element(*value), src))
                    .unwrap_or_else(|| LiteralValue::Other(String::new()));
                RowField { key, value }
            } else {
                RowField {
                    key: None,
                    value: literal_value(unwrap_element(element), src),
                }
            }
        })
        .collect()
}

fn literal_value(node: Node, src: &str) -> LiteralValue {
    let raw = text(node, src);
    match node.kind() {
        "interpreted_string_literal" | "raw_string_literal" => match unquote(raw) {
            Some(value) => LiteralValue::Str(value),
            None => LiteralValue::Other(raw.to_string()),
        },
        _ => LiteralValue::Other(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(source: &str) -> Vec<MatchRecord> {
        GoMatcher::new()
            .expect("matcher")
            .match_source(source)
            .expect("match source")
    }

    fn kinds<T>(source: &str, pick: impl Fn(MatchKind) -> Option<T>) -> Vec<T> {
        records(source).into_iter().filter_map(|r| pick(r.kind)).collect()
    }

    #[test]
    fn test_functions_require_testing_signature() {
        let src = r#"package demo

import "testing"

func TestMain(m *testing.M) {}
func TestOne(t *testing.T) {}
func Testlower(t *testing.T) {}
func BenchmarkX(b *testing.B) {}
func FuzzX(f *testing.F) {}
func ExampleHello() {}
func helper(t *testing.T) {}
"#;
        let functions = kinds(src, |kind| match kind {
            MatchKind::TestFunction(func) => Some((func.name, func.style, func.binding)),
            _ => None,
        });
        assert_eq!(
            functions,
            vec![
                ("TestOne".to_string(), FunctionStyle::Test, Some("t".to_string())),
                ("ExampleHello".to_string(), FunctionStyle::Example, None),
            ]
        );
    }

    #[test]
    fn run_calls_capture_name_and_callback_binding() {
        let src = r#"package demo

import "testing"

func TestOne(t *testing.T) {
	t.Run("literal name", func(t *testing.T) {})
	t.Run(tc.name, func(_ *testing.T) {})
	t.Run(name, helper)
	x.Run("other", func() {})
}
"#;
        let calls = kinds(src, |kind| match kind {
            MatchKind::RunCall(call) => Some(call),
            _ => None,
        });
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].case_name, CaseName::Literal("literal name".into()));
        assert_eq!(
            calls[0].callback.as_ref().map(|cb| cb.binding.clone()),
            Some(CallbackBinding::Bound("t".into()))
        );
        assert_eq!(
            calls[1].case_name,
            CaseName::Field {
                var: "tc".into(),
                field: "name".into()
            }
        );
        assert_eq!(
            calls[1].callback.as_ref().map(|cb| cb.binding.clone()),
            Some(CallbackBinding::Unbound)
        );
        assert_eq!(calls[2].case_name, CaseName::Ident("name".into()));
        assert!(calls[2].callback.is_none());
        assert_eq!(calls[3].operand, "x");
        assert_eq!(
            calls[3].callback.as_ref().map(|cb| cb.binding.clone()),
            Some(CallbackBinding::Inherit)
        );
    }

    #[test]
    fn suite_structs_and_runners_are_reported() {
        let src = r#"package demo

import (
	"testing"

	customSuite "github.com/stretchr/testify/suite"
)

type MySuite struct {
	customSuite.Suite
	name string
}

func (x *MySuite) TestThing() {}

func TestMySuite(t *testing.T) {
	customSuite.Run(t, new(MySuite))
	customSuite.Run(t, &MySuite{})
}
"#;
        let all = records(src);
        let import = all.iter().find_map(|r| match &r.kind {
            MatchKind::Import(import) if import.path.contains("testify") => Some(import.clone()),
            _ => None,
        });
        assert_eq!(
            import,
            Some(Import {
                alias: Some("customSuite".into()),
                path: "github.com/stretchr/testify/suite".into()
            })
        );

        let decl = all.iter().find_map(|r| match &r.kind {
            MatchKind::StructDecl(decl) => Some(decl.clone()),
            _ => None,
        });
        let decl = decl.expect("struct decl");
        assert_eq!(
            decl.embeds,
            vec![TypeRef {
                package: Some("customSuite".into()),
                name: "Suite".into()
            }]
        );
        assert_eq!(
            decl.fields,
            vec![FieldDecl {
                name: "name".into(),
                is_string: true
            }]
        );

        let method = all.iter().find_map(|r| match &r.kind {
            MatchKind::Method(method) => Some(method.clone()),
            _ => None,
        });
        let method = method.expect("method");
        assert_eq!(method.receiver.as_deref(), Some("x"));
        assert_eq!(method.receiver_type, "MySuite");

        let runs: Vec<SuiteRun> = all
            .into_iter()
            .filter_map(|r| match r.kind {
                MatchKind::SuiteRun(run) => Some(run),
                _ => None,
            })
            .collect();
        assert_eq!(runs.len(), 2);
        assert!(runs
            .iter()
            .all(|run| run.operand == "customSuite" && run.suite_type == "MySuite"));
    }

    #[test]
    fn table_literals_keep_rows_and_bound_variable() {
        let src = r#"package demo

import "testing"

func TestTable(t *testing.T) {
	tests := []struct {
		name string
		want int
	}{
		{name: "first", want: 1},
		{"second", 2},
	}
	for _, tt := range tests {
		t.Run(tt.name, func(t *testing.T) {})
	}
}
"#;
        let all = records(src);
        let literals: Vec<TableLiteral> = all
            .iter()
            .filter_map(|r| match &r.kind {
                MatchKind::TableLiteral(lit) => Some(lit.clone()),
                _ => None,
            })
            .collect();
        assert!(literals.iter().any(|lit| lit.var.as_deref() == Some("tests")));
        assert!(literals.iter().any(|lit| lit.var.is_none()));

        let table = literals
            .iter()
            .find(|lit| lit.var.is_some())
            .expect("bound literal");
        assert_eq!(table.shape, TableShape::Slice);
        assert!(matches!(&table.element, ElementType::Anonymous(fields) if fields.len() == 2));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].fields[0].key.as_deref(), Some("name"));
        assert_eq!(table.rows[0].fields[0].value.as_str(), Some("first"));
        assert_eq!(table.rows[1].fields[0].key, None);
        assert_eq!(table.rows[1].fields[0].value.as_str(), Some("second"));
        assert_eq!(table.rows[1].span.start_line, 11);

        let loop_ = all.iter().find_map(|r| match &r.kind {
            MatchKind::RangeLoop(l) => Some(l.clone()),
            _ => None,
        });
        let loop_ = loop_.expect("range loop");
        assert_eq!(loop_.key, None);
        assert_eq!(loop_.value.as_deref(), Some("tt"));
        assert_eq!(loop_.source, RangeSource::Ident("tests".into()));
    }

    #[test]
    fn map_literals_report_keys() {
        let src = r#"package demo

func TestMap(t *testing.T) {
	cases := map[string]int{
		"one": 1,
		"two": 2,
	}
	_ = cases
}
"#;
        let table = kinds(src, |kind| match kind {
            MatchKind::TableLiteral(lit) if lit.var.is_some() => Some(lit),
            _ => None,
        })
        .pop()
        .expect("map literal");
        assert_eq!(table.shape, TableShape::Map);
        let keys: Vec<_> = table
            .rows
            .iter()
            .filter_map(|row| row.key.as_ref().and_then(LiteralValue::as_str))
            .collect();
        assert_eq!(keys, vec!["one", "two"]);
    }
}
