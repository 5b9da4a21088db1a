//! Position tree builder.
//!
//! Joins the match records of every file in a package into one package
//! subtree. Records are first bucketed per file (dropping overlap duplicates),
//! then resolved package-wide: suite membership and runners need all files,
//! subtests and table cases only their own file.

mod subtests;
mod suites;
mod tables;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::invariants::validate_tree;
use super::matcher::{
    Import, LocalBinding, MatchKind, MatchRecord, Method, RangeLoop, RunCall, StructDecl,
    SuiteRun, TableLiteral, TestFunction,
};
use crate::tree::{Insertion, NodeDraft, NodeId, NodeKind, Span, Tree};

use subtests::Scope;
use suites::SuiteIndex;
use tables::StructCatalog;

/// Import path of the testify suite package.
pub const TESTIFY_SUITE_IMPORT: &str = "github.com/stretchr/testify/suite";

pub const DEFAULT_GAP_THRESHOLD: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Lines allowed between consecutive suite methods before the later one
    /// is placed at file level.
    pub gap_threshold: u32,
    pub testify: bool,
    pub warn_duplicates: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            gap_threshold: DEFAULT_GAP_THRESHOLD,
            testify: true,
            warn_duplicates: true,
        }
    }
}

/// Matched source of one test file.
#[derive(Debug, Clone)]
pub struct FileInput {
    pub path: PathBuf,
    pub span: Span,
    pub records: Vec<MatchRecord>,
}

impl FileInput {
    pub fn new(path: PathBuf, source: &str, records: Vec<MatchRecord>) -> Self {
        let lines = source.lines().count().max(1) as u32;
        Self {
            path,
            span: Span {
                start_byte: 0,
                end_byte: source.len(),
                start_line: 1,
                end_line: lines,
            },
            records,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageInput {
    pub import_path: String,
    pub dir: PathBuf,
    /// Argument handed to `go test` for this package.
    pub arg: String,
    pub files: Vec<FileInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    UnresolvedCase {
        file: PathBuf,
        line: u32,
        reason: String,
    },
    MissingSuiteRunner {
        suite: String,
    },
    DuplicateName {
        id: String,
    },
    Invariant {
        message: String,
    },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::UnresolvedCase { file, line, reason } => {
                write!(f, "{}:{line}: {reason}", file.display())
            }
            BuildWarning::MissingSuiteRunner { suite } => {
                write!(f, "suite {suite} has no runner function; using the type name")
            }
            BuildWarning::DuplicateName { id } => write!(f, "duplicate test name renamed to {id}"),
            BuildWarning::Invariant { message } => write!(f, "tree invariant violated: {message}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub tree: Tree,
    pub warnings: Vec<BuildWarning>,
}

/// Build the test tree for `packages`. Packages become roots in import path
/// order; files are ordered by name.
#[instrument(skip_all, fields(packages = packages.len()))]
pub fn build_tree(mut packages: Vec<PackageInput>, options: &BuildOptions) -> BuildOutput {
    packages.sort_by(|a, b| a.import_path.cmp(&b.import_path));
    let mut tree = Tree::new();
    let mut warnings = Vec::new();
    for package in packages {
        build_package(&mut tree, &mut warnings, options, package);
    }
    for message in validate_tree(&tree) {
        warn!(%message, "tree invariant violated");
        warnings.push(BuildWarning::Invariant { message });
    }
    debug!(nodes = tree.len(), warnings = warnings.len(), "built test tree");
    BuildOutput { tree, warnings }
}

fn build_package(
    tree: &mut Tree,
    warnings: &mut Vec<BuildWarning>,
    options: &BuildOptions,
    package: PackageInput,
) {
    let mut inputs = package.files;
    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    let files: Vec<FileIndex> = inputs.into_iter().map(FileIndex::new).collect();

    let suites = if options.testify {
        SuiteIndex::resolve(&files)
    } else {
        SuiteIndex::default()
    };
    for suite in suites.without_runner(&files) {
        warn!(package = %package.import_path, %suite, "suite has no runner function");
        warnings.push(BuildWarning::MissingSuiteRunner { suite });
    }

    let root = tree.add_package(&package.import_path, &package.dir, &package.arg);
    let mut builder = PackageBuilder {
        tree,
        warnings,
        options,
        package: root,
        suites,
        structs: StructCatalog::new(&files),
    };
    for file in &files {
        builder.build_file(file);
    }
}

/// Records of one file, bucketed by kind.
#[derive(Debug, Default)]
pub(crate) struct FileIndex {
    pub path: PathBuf,
    pub span: Span,
    pub imports: Vec<(Span, Import)>,
    pub structs: Vec<(Span, StructDecl)>,
    pub functions: Vec<(Span, TestFunction)>,
    pub methods: Vec<(Span, Method)>,
    pub run_calls: Vec<(Span, RunCall)>,
    pub suite_runs: Vec<(Span, SuiteRun)>,
    pub literals: Vec<(Span, TableLiteral)>,
    pub loops: Vec<(Span, RangeLoop)>,
    pub bindings: Vec<(Span, LocalBinding)>,
}

impl FileIndex {
    fn new(input: FileInput) -> Self {
        let mut index = FileIndex {
            path: input.path,
            span: input.span,
            ..FileIndex::default()
        };
        for record in input.records {
            let span = record.span;
            match record.kind {
                MatchKind::Import(import) => push_unique(&mut index.imports, span, import),
                MatchKind::StructDecl(decl) => push_unique(&mut index.structs, span, decl),
                MatchKind::TestFunction(func) => push_unique(&mut index.functions, span, func),
                MatchKind::Method(method) => push_unique(&mut index.methods, span, method),
                MatchKind::RunCall(call) => push_unique(&mut index.run_calls, span, call),
                MatchKind::SuiteRun(run) => push_unique(&mut index.suite_runs, span, run),
                MatchKind::RangeLoop(range) => push_unique(&mut index.loops, span, range),
                MatchKind::LocalBinding(binding) => {
                    push_unique(&mut index.bindings, span, binding);
                }
                MatchKind::TableLiteral(literal) => {
                    match index.literals.iter_mut().find(|(existing, _)| *existing == span) {
                        Some((_, existing)) => {
                            if existing.var.is_none() {
                                existing.var = literal.var;
                            }
                        }
                        None => index.literals.push((span, literal)),
                    }
                }
            }
        }
        index
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<(Span, T)>, span: Span, item: T) {
    if !items.iter().any(|(s, existing)| *s == span && *existing == item) {
        items.push((span, item));
    }
}

enum TopLevel<'f> {
    Function(Span, &'f TestFunction),
    Namespace {
        suite: &'f str,
        span: Span,
        methods: Vec<&'f (Span, Method)>,
    },
    Flattened {
        suite: &'f str,
        method: &'f (Span, Method),
    },
}

impl TopLevel<'_> {
    fn start(&self) -> usize {
        match self {
            TopLevel::Function(span, _) | TopLevel::Namespace { span, .. } => span.start_byte,
            TopLevel::Flattened { method, .. } => method.0.start_byte,
        }
    }
}

pub(crate) struct PackageBuilder<'a> {
    tree: &'a mut Tree,
    warnings: &'a mut Vec<BuildWarning>,
    options: &'a BuildOptions,
    package: NodeId,
    suites: SuiteIndex,
    structs: StructCatalog<'a>,
}

impl PackageBuilder<'_> {
    fn build_file(&mut self, file: &FileIndex) {
        let file_node = self.tree.add_file(self.package, &file.path, file.span);

        let mut by_suite: BTreeMap<&str, Vec<&(Span, Method)>> = BTreeMap::new();
        for entry in &file.methods {
            if self.suites.is_suite(&entry.1.receiver_type) {
                by_suite.entry(entry.1.receiver_type.as_str()).or_default().push(entry);
            }
        }

        let mut items = Vec::new();
        let mut absorbed: HashSet<&str> = HashSet::new();
        for (suite, mut methods) in by_suite {
            methods.sort_by_key(|(span, _)| span.start_byte);
            let mut nested = Vec::new();
            let mut prev_end: Option<u32> = None;
            for entry in methods {
                let gap = prev_end.map(|end| entry.0.start_line.saturating_sub(end));
                prev_end = Some(entry.0.end_line);
                match gap {
                    Some(gap) if gap > self.options.gap_threshold => {
                        debug!(%suite, method = %entry.1.name, gap, "suite method placed at file level");
                        items.push(TopLevel::Flattened { suite, method: entry });
                    }
                    _ => nested.push(entry),
                }
            }

            let mut spans: Vec<Span> = nested.iter().map(|(span, _)| *span).collect();
            spans.extend(
                file.structs
                    .iter()
                    .filter(|(_, decl)| decl.name == suite)
                    .map(|(span, _)| *span),
            );
            if let Some(runner) = self.suites.runner(suite) {
                for (span, func) in &file.functions {
                    if func.name == runner {
                        absorbed.insert(func.name.as_str());
                        spans.push(*span);
                    }
                }
            }
            items.push(TopLevel::Namespace {
                suite,
                span: union(&spans),
                methods: nested,
            });
        }
        for (span, func) in &file.functions {
            if !absorbed.contains(func.name.as_str()) {
                items.push(TopLevel::Function(*span, func));
            }
        }
        items.sort_by_key(TopLevel::start);

        for item in items {
            match item {
                TopLevel::Function(span, func) => {
                    let node = self.insert(
                        file_node,
                        NodeKind::Test,
                        &func.name,
                        vec![func.name.clone()],
                        span,
                    );
                    self.add_subtests(
                        file,
                        node,
                        &Scope {
                            binding: func.binding.clone(),
                            body: func.body,
                        },
                    );
                }
                TopLevel::Namespace {
                    suite,
                    span,
                    methods,
                } => {
                    let segment = self.suites.segment(suite);
                    let namespace =
                        self.insert(file_node, NodeKind::Namespace, suite, vec![segment], span);
                    for method in methods {
                        self.add_method(file, namespace, suite, method);
                    }
                }
                TopLevel::Flattened { suite, method } => {
                    self.add_method(file, file_node, suite, method);
                }
            }
        }
    }

    fn add_method(&mut self, file: &FileIndex, parent: NodeId, suite: &str, method: &(Span, Method)) {
        let (span, method) = method;
        let run_path = vec![self.suites.segment(suite), method.name.clone()];
        let node = self.insert(parent, NodeKind::Test, &method.name, run_path, *span);
        self.add_subtests(
            file,
            node,
            &Scope {
                binding: method.receiver.clone(),
                body: method.body,
            },
        );
    }

    fn insert(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        name: &str,
        run_path: Vec<String>,
        span: Span,
    ) -> NodeId {
        let insertion = self.tree.add_child(
            parent,
            NodeDraft {
                kind,
                name: name.to_string(),
                run_path,
                span,
            },
        );
        if let Insertion::Disambiguated(id) = insertion {
            if self.options.warn_duplicates {
                let id = self.tree.node(id).id.clone();
                warn!(%id, "duplicate test name");
                self.warnings.push(BuildWarning::DuplicateName { id });
            }
        }
        insertion.id()
    }

    fn warn_unresolved(&mut self, file: &FileIndex, span: Span, reason: String) {
        warn!(file = %file.path.display(), line = span.start_line, %reason, "dropping subtest");
        self.warnings.push(BuildWarning::UnresolvedCase {
            file: file.path.clone(),
            line: span.start_line,
            reason,
        });
    }
}

fn union(spans: &[Span]) -> Span {
    let mut iter = spans.iter();
    let Some(first) = iter.next() else {
        return Span::default();
    };
    iter.fold(*first, |acc, span| {
        let (start_byte, start_line) = if span.start_byte < acc.start_byte {
            (span.start_byte, span.start_line)
        } else {
            (acc.start_byte, acc.start_line)
        };
        let (end_byte, end_line) = if span.end_byte > acc.end_byte {
            (span.end_byte, span.end_line)
        } else {
            (acc.end_byte, acc.end_line)
        };
        Span {
            start_byte,
            end_byte,
            start_line,
            end_line,
        }
    })
}
