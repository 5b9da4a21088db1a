//! Subtest discovery inside one test body.
//!
//! Only `Run` calls on the handle bound in the current scope count. A call on
//! any other operand (`x.Run`, `router.Run`) is ordinary code.

use tracing::debug;

use super::tables;
use super::{FileIndex, PackageBuilder};
use crate::core::matcher::{CallbackBinding, CaseName, RunCall};
use crate::core::naming::rewrite_subtest_name;
use crate::tree::{NodeId, NodeKind, Span};

/// A test body and the name its test handle is bound to.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub binding: Option<String>,
    pub body: Span,
}

impl PackageBuilder<'_> {
    pub(super) fn add_subtests(&mut self, file: &FileIndex, parent: NodeId, scope: &Scope) {
        let Some(binding) = scope.binding.as_deref() else {
            return;
        };
        for (span, call) in direct_calls(file, scope.body) {
            if call.operand != binding {
                debug!(operand = %call.operand, line = span.start_line, "ignoring Run on another operand");
                continue;
            }
            if shadowed(file, scope, binding, span) {
                debug!(operand = %call.operand, line = span.start_line, "test handle shadowed before Run");
                continue;
            }
            let child = call.callback.as_ref().map(|callback| Scope {
                binding: match &callback.binding {
                    CallbackBinding::Inherit => scope.binding.clone(),
                    CallbackBinding::Bound(name) => Some(name.clone()),
                    CallbackBinding::Unbound => None,
                },
                body: callback.body,
            });

            match &call.case_name {
                CaseName::Literal(name) => {
                    self.add_case(file, parent, NodeKind::Subtest, name, *span, child.as_ref());
                }
                CaseName::Field { .. } | CaseName::Ident(_) => {
                    match tables::resolve(file, &self.structs, *span, call, scope) {
                        Ok(resolved) => {
                            for (row, reason) in resolved.skipped {
                                self.warn_unresolved(file, row, reason);
                            }
                            for case in resolved.cases {
                                self.add_case(
                                    file,
                                    parent,
                                    NodeKind::TableCase,
                                    &case.name,
                                    case.span,
                                    child.as_ref(),
                                );
                            }
                        }
                        Err(reason) => self.warn_unresolved(file, *span, reason),
                    }
                }
                CaseName::Unsupported(expr) => {
                    self.warn_unresolved(file, *span, format!("unsupported subtest name `{expr}`"));
                }
            }
        }
    }

    fn add_case(
        &mut self,
        file: &FileIndex,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
        span: Span,
        scope: Option<&Scope>,
    ) {
        let mut run_path = self.tree.node(parent).run_path.clone();
        run_path.push(rewrite_subtest_name(name));
        let node = self.insert(parent, kind, name, run_path, span);
        if let Some(scope) = scope {
            self.add_subtests(file, node, scope);
        }
    }
}

/// `Run` calls inside `body` that are not nested in another call's callback.
fn direct_calls(file: &FileIndex, body: Span) -> Vec<&(Span, RunCall)> {
    let inside: Vec<&(Span, RunCall)> = file
        .run_calls
        .iter()
        .filter(|(span, _)| body.contains(span) && *span != body)
        .collect();
    inside
        .iter()
        .filter(|(span, _)| {
            !inside.iter().any(|(_, other)| {
                other
                    .callback
                    .as_ref()
                    .is_some_and(|callback| callback.body.contains(span))
            })
        })
        .copied()
        .collect()
}

/// Whether `binding` is redeclared inside `scope` before `call`, in a block
/// that is still open at the call.
fn shadowed(file: &FileIndex, scope: &Scope, binding: &str, call: &Span) -> bool {
    file.bindings.iter().any(|(decl, local)| {
        local.name == binding
            && scope.body.contains(decl)
            && decl.start_byte < call.start_byte
            && local.scope.contains(call)
    })
}
