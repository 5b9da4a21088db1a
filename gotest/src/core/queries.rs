//! Tree-sitter queries over Go test files.
//!
//! Queries only select candidate syntax; the matcher filters and decodes the
//! captured nodes. Composite literals are matched twice on purpose (once with
//! the variable they are bound to, once bare) and deduplicated downstream.

pub(crate) const IMPORTS: &str = "(import_spec) @import";

pub(crate) const STRUCTS: &str = r#"
(type_spec
  name: (type_identifier) @name
  type: (struct_type) @struct) @decl
"#;

pub(crate) const FUNCTIONS: &str = r#"
(function_declaration
  name: (identifier) @name
  parameters: (parameter_list) @params
  body: (block) @body) @func
"#;

pub(crate) const METHODS: &str = r#"
(method_declaration
  receiver: (parameter_list) @receiver
  name: (field_identifier) @name
  body: (block) @body) @method
"#;

pub(crate) const RUN_CALLS: &str = r#"
(call_expression
  function: (selector_expression
    operand: (identifier) @operand
    field: (field_identifier) @method)
  arguments: (argument_list) @args
  (#eq? @method "Run")) @call
"#;

pub(crate) const LITERALS: &str = r#"
(short_var_declaration
  left: (expression_list . (identifier) @var)
  right: (expression_list . (composite_literal) @literal))
(var_spec
  name: (identifier) @var
  value: (expression_list . (composite_literal) @literal))
(assignment_statement
  left: (expression_list . (identifier) @var)
  right: (expression_list . (composite_literal) @literal))
(composite_literal) @literal
"#;

pub(crate) const RANGE_LOOPS: &str = r#"
(for_statement
  (range_clause) @range
  body: (block) @body) @loop
"#;

pub(crate) const BINDINGS: &str = r#"
(short_var_declaration
  left: (expression_list (identifier) @name)) @decl
(var_spec
  name: (identifier) @name) @decl
"#;
