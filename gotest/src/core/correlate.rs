//! Maps the `go test -json` event stream onto tree nodes.
//!
//! The correlator is a pure state machine: the session feeds it decoded
//! events and it updates a [`ResultSet`], returning [`Progress`] notices for
//! whoever is watching.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, instrument};

use super::aggregate::aggregate;
use super::classifier::{diagnose, find_source_ref, DiagnosticTarget, OutputClassifier};
use super::events::{sanitize_output, Action, TestEvent};
use super::types::{Diagnostic, ResultSet, RunStatus, Severity};
use crate::tree::{NodeId, NodeKind, Tree};

/// Run-name lookup restricted to the nodes a session covers.
#[derive(Debug, Default)]
pub struct EventIndex {
    packages: HashMap<String, NodeId>,
    by_name: HashMap<(NodeId, String), Vec<NodeId>>,
}

impl EventIndex {
    pub fn new(tree: &Tree, covered: &[NodeId]) -> Self {
        let mut index = Self::default();
        for info in tree.packages() {
            if covered.contains(&info.node) {
                index.packages.insert(info.import_path.clone(), info.node);
            }
        }
        for id in covered {
            let node = tree.node(*id);
            if let Some(run_name) = node.run_name() {
                index
                    .by_name
                    .entry((tree.package_root(*id), run_name))
                    .or_default()
                    .push(*id);
            }
        }
        index
    }

    /// Package root for an event. With a single covered package, events
    /// naming an unknown package (a `_test` variant, say) fall back to it.
    pub fn package(&self, import_path: Option<&str>) -> Option<NodeId> {
        if let Some(root) = import_path.and_then(|path| self.packages.get(path)) {
            return Some(*root);
        }
        if self.packages.len() == 1 {
            return self.packages.values().next().copied();
        }
        None
    }

    pub fn lookup(&self, package: NodeId, run_name: &str) -> &[NodeId] {
        self.by_name
            .get(&(package, run_name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Nodes for the longest known prefix of `run_name` (dynamic subtests
    /// report under names the source never spells out).
    pub fn nearest(&self, package: NodeId, run_name: &str) -> &[NodeId] {
        let mut name = run_name;
        while let Some((parent, _)) = name.rsplit_once('/') {
            let found = self.lookup(package, parent);
            if !found.is_empty() {
                return found;
            }
            name = parent;
        }
        &[]
    }
}

/// What changed after one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Started(NodeId),
    Output { node: NodeId, line: String },
    Finished { node: NodeId, status: RunStatus },
}

/// How the tool process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEnd {
    pub cancelled: bool,
    pub exit_code: Option<i32>,
    /// `-run` pattern used, for the zero-match message.
    pub run_pattern: Option<String>,
}

#[derive(Debug, Default)]
struct PackageState {
    saw_test: bool,
    failed: bool,
    build_failed: bool,
    build_output: Vec<String>,
}

pub struct Correlator<'t> {
    tree: &'t Tree,
    index: EventIndex,
    covered: Vec<NodeId>,
    classifier: &'t dyn OutputClassifier,
    sanitize: bool,
    running: Vec<NodeId>,
    reported: HashSet<NodeId>,
    packages: BTreeMap<NodeId, PackageState>,
    stderr: Vec<String>,
}

impl<'t> Correlator<'t> {
    pub fn new(
        tree: &'t Tree,
        covered: Vec<NodeId>,
        classifier: &'t dyn OutputClassifier,
        sanitize: bool,
    ) -> Self {
        Self {
            index: EventIndex::new(tree, &covered),
            tree,
            covered,
            classifier,
            sanitize,
            running: Vec::new(),
            reported: HashSet::new(),
            packages: BTreeMap::new(),
            stderr: Vec::new(),
        }
    }

    pub fn covered(&self) -> &[NodeId] {
        &self.covered
    }

    /// Clear previous results of every covered node.
    pub fn begin(&self, results: &mut ResultSet) {
        results.reset(&self.covered);
    }

    /// Lines the tool wrote to stderr, kept for failures that produce no
    /// structured events.
    pub fn record_stderr(&mut self, line: &str) {
        let line = line.trim_end();
        if !line.is_empty() {
            self.stderr.push(line.to_string());
        }
    }

    pub fn apply(&mut self, event: &TestEvent, results: &mut ResultSet) -> Vec<Progress> {
        let package_path = event.package_path();
        let Some(root) = self.index.package(package_path) else {
            debug!(package = ?package_path, "event for an untracked package");
            return Vec::new();
        };
        let output = event.output.as_deref().map(|text| {
            if self.sanitize {
                sanitize_output(text)
            } else {
                text.to_string()
            }
        });

        match event.action {
            Action::BuildOutput => {
                if let Some(line) = output {
                    self.state(root).build_output.push(line);
                }
                return Vec::new();
            }
            Action::BuildFail => {
                self.state(root).build_failed = true;
                return Vec::new();
            }
            _ => {}
        }

        let Some(test) = event.test.as_deref() else {
            return self.apply_package(root, event, output, results);
        };
        self.state(root).saw_test = true;

        let nodes = self.index.lookup(root, test).to_vec();
        if nodes.is_empty() {
            if let (Action::Output, Some(line)) = (event.action, output) {
                let owners = self.index.nearest(root, test).to_vec();
                return owners
                    .into_iter()
                    .map(|node| self.output(node, &line, results))
                    .collect();
            }
            debug!(test, action = ?event.action, "no node for reported test");
            return Vec::new();
        }

        let mut progress = Vec::new();
        for node in nodes {
            match event.action {
                Action::Run => {
                    results.set_status(node, RunStatus::Running);
                    self.reported.insert(node);
                    if !self.running.contains(&node) {
                        self.running.push(node);
                    }
                    progress.push(Progress::Started(node));
                }
                Action::Output => {
                    if let Some(line) = &output {
                        progress.push(self.output(node, line, results));
                    }
                }
                Action::Pass | Action::Fail | Action::Skip => {
                    let status = match event.action {
                        Action::Pass => RunStatus::Passed,
                        Action::Fail => RunStatus::Failed,
                        _ => RunStatus::Skipped,
                    };
                    self.finish_node(node, status, event.elapsed, results);
                    progress.push(Progress::Finished { node, status });
                }
                _ => {}
            }
        }
        progress
    }

    fn apply_package(
        &mut self,
        root: NodeId,
        event: &TestEvent,
        output: Option<String>,
        results: &mut ResultSet,
    ) -> Vec<Progress> {
        match event.action {
            Action::Output => {
                let Some(line) = output else {
                    return Vec::new();
                };
                // Output printed while a test is mid-flight but reported
                // without a test name belongs to that test.
                let owner = self
                    .running
                    .iter()
                    .rev()
                    .find(|node| self.tree.package_root(**node) == root)
                    .copied()
                    .unwrap_or(root);
                vec![self.output(owner, &line, results)]
            }
            Action::Fail => {
                let state = self.state(root);
                state.failed = true;
                if event.failed_build.is_some() {
                    state.build_failed = true;
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn output(&mut self, node: NodeId, line: &str, results: &mut ResultSet) -> Progress {
        results.append_output(node, line);
        Progress::Output {
            node,
            line: line.to_string(),
        }
    }

    fn state(&mut self, root: NodeId) -> &mut PackageState {
        self.packages.entry(root).or_default()
    }

    fn finish_node(
        &mut self,
        node: NodeId,
        status: RunStatus,
        elapsed: Option<f64>,
        results: &mut ResultSet,
    ) {
        self.running.retain(|id| *id != node);
        self.reported.insert(node);
        let target = self.diagnostic_target(node);
        let diagnostics = results
            .get(node)
            .map(|result| diagnose(&result.output, self.classifier, &target))
            .unwrap_or_default();
        let entry = results.entry(node);
        entry.status = status;
        entry.elapsed = elapsed
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);
        entry.diagnostics = diagnostics;
    }

    fn diagnostic_target(&self, node: NodeId) -> DiagnosticTarget {
        let position = &self.tree.node(node).position;
        let file_name = self
            .tree
            .file_of(node)
            .and_then(|_| position.file.file_name())
            .map(|name| name.to_string_lossy().into_owned());
        DiagnosticTarget {
            file_name,
            line: position.start_line(),
        }
    }

    /// The tool could not be started at all.
    pub fn fail_launch(&mut self, message: &str, results: &mut ResultSet) {
        for root in self.covered_roots() {
            self.fail_package(root, &[message.to_string()], results);
        }
        aggregate(self.tree, results, &self.covered);
    }

    /// Settle everything still open once the stream has ended, then
    /// aggregate.
    #[instrument(skip_all, fields(cancelled = end.cancelled, exit_code = ?end.exit_code))]
    pub fn finish(
        mut self,
        end: &StreamEnd,
        target: Option<NodeId>,
        results: &mut ResultSet,
    ) -> Vec<Progress> {
        let mut progress = Vec::new();
        let mut broken: Vec<NodeId> = Vec::new();

        let roots = self.covered_roots();
        for root in &roots {
            let state = self.packages.remove(root).unwrap_or_default();
            if state.build_failed || (state.failed && !state.saw_test && !state.build_output.is_empty()) {
                let mut lines: Vec<String> = state
                    .build_output
                    .iter()
                    .map(|line| line.trim_end().to_string())
                    .filter(|line| !line.is_empty())
                    .collect();
                if lines.is_empty() {
                    lines = self.stderr.clone();
                }
                self.fail_package(*root, &lines, results);
                broken.push(*root);
            } else if state.failed && !state.saw_test {
                // The binary died before any test ran (TestMain, init).
                let output = results.get(*root).map(|r| r.output.clone()).unwrap_or_default();
                let place = DiagnosticTarget {
                    file_name: None,
                    line: 1,
                };
                let mut diagnostics = diagnose(&output, self.classifier, &place);
                if diagnostics.is_empty() {
                    diagnostics.push(Diagnostic::error("package failed before running tests", 1));
                }
                let entry = results.entry(*root);
                entry.status = RunStatus::Failed;
                entry.diagnostics.extend(diagnostics);
                broken.push(*root);
            } else if !self.packages_seen(*root, results)
                && !end.cancelled
                && end.exit_code.is_some_and(|code| code != 0)
            {
                let lines = self.stderr.clone();
                self.fail_package(*root, &lines, results);
                broken.push(*root);
            }
        }

        let open = std::mem::take(&mut self.running);
        for node in open {
            let status = if end.cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Failed
            };
            let place = self.diagnostic_target(node);
            let entry = results.entry(node);
            entry.status = status;
            if status == RunStatus::Failed {
                entry.diagnostics.push(Diagnostic::error(
                    "test did not report a result before the process exited",
                    place.line,
                ));
            }
            progress.push(Progress::Finished { node, status });
        }

        if let Some(target) = target {
            let package_level = self.tree.node(target).kind == NodeKind::Package;
            let matched = self
                .tree
                .subtree(target)
                .iter()
                .any(|node| self.reported.contains(node));
            let root = self.tree.package_root(target);
            if !end.cancelled && !package_level && !matched && !broken.contains(&root) {
                let line = self.tree.node(target).position.start_line();
                let message = match &end.run_pattern {
                    Some(pattern) => format!("no tests matched run pattern `{pattern}`"),
                    None => "no tests matched".to_string(),
                };
                let entry = results.entry(target);
                entry.status = RunStatus::Failed;
                entry.diagnostics.push(Diagnostic::error(message, line));
                progress.push(Progress::Finished {
                    node: target,
                    status: RunStatus::Failed,
                });
            }
        }

        aggregate(self.tree, results, &self.covered);
        progress
    }

    fn packages_seen(&self, root: NodeId, results: &ResultSet) -> bool {
        self.tree
            .subtree(root)
            .iter()
            .any(|node| self.reported.contains(node) || results.get(*node).is_some_and(|r| !r.output.is_empty()))
    }

    fn covered_roots(&self) -> Vec<NodeId> {
        self.tree
            .roots()
            .iter()
            .copied()
            .filter(|root| self.covered.contains(root))
            .collect()
    }

    /// Fail every covered node of a package that never ran, with one
    /// diagnostic on the root pointing at the first source reference.
    fn fail_package(&mut self, root: NodeId, lines: &[String], results: &mut ResultSet) {
        for node in self.tree.subtree(root) {
            if self.covered.contains(&node) {
                results.set_status(node, RunStatus::Failed);
            }
        }
        self.running.retain(|node| self.tree.package_root(*node) != root);

        let message = if lines.is_empty() {
            "package failed to build".to_string()
        } else {
            lines.join("\n")
        };
        let location = lines.iter().find_map(|line| find_source_ref(line));
        let diagnostic = Diagnostic {
            severity: Severity::Error,
            message,
            line: location.as_ref().map_or(1, |found| found.line),
            file: location.map(|found| found.file),
        };
        results.push_diagnostic(root, diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::PatternClassifier;
    use crate::core::events::decode_line;
    use crate::tree::{NodeDraft, Span};
    use std::path::Path;

    struct Fixture {
        tree: Tree,
        pkg: NodeId,
        test: NodeId,
        sub: NodeId,
        other: NodeId,
    }

    fn fixture() -> Fixture {
        let mut tree = Tree::new();
        let pkg = tree.add_package("example.com/a", Path::new("/m/a"), "./a");
        let file = tree.add_file(pkg, Path::new("/m/a/a_test.go"), Span::default());
        let add = |tree: &mut Tree, parent: NodeId, kind: NodeKind, path: &[&str], line: u32| {
            tree.add_child(
                parent,
                NodeDraft {
                    kind,
                    name: path.last().copied().unwrap_or_default().to_string(),
                    run_path: path.iter().map(|s| s.to_string()).collect(),
                    span: Span {
                        start_byte: line as usize * 100,
                        end_byte: line as usize * 100 + 50,
                        start_line: line,
                        end_line: line + 3,
                    },
                },
            )
            .id()
        };
        let test = add(&mut tree, file, NodeKind::Test, &["TestA"], 5);
        let sub = add(&mut tree, test, NodeKind::Subtest, &["TestA", "sub"], 6);
        let other = add(&mut tree, file, NodeKind::Test, &["TestB"], 20);
        Fixture {
            tree,
            pkg,
            test,
            sub,
            other,
        }
    }

    fn feed(correlator: &mut Correlator<'_>, results: &mut ResultSet, lines: &[&str]) {
        for line in lines {
            if let Some(event) = decode_line(line) {
                correlator.apply(&event, results);
            }
        }
    }

    #[test]
    fn statuses_output_and_diagnostics_land_on_nodes() {
        let fx = fixture();
        let classifier = PatternClassifier::default();
        let covered = fx.tree.subtree(fx.pkg);
        let mut results = ResultSet::new();
        let mut correlator = Correlator::new(&fx.tree, covered, &classifier, false);
        feed(
            &mut correlator,
            &mut results,
            &[
                r#"{"Action":"start","Package":"example.com/a"}"#,
                r#"{"Action":"run","Package":"example.com/a","Test":"TestA"}"#,
                r#"{"Action":"run","Package":"example.com/a","Test":"TestA/sub"}"#,
                r#"{"Action":"output","Package":"example.com/a","Test":"TestA/sub","Output":"    a_test.go:7: got 1, want 2\n"}"#,
                r#"{"Action":"fail","Package":"example.com/a","Test":"TestA/sub","Elapsed":0.5}"#,
                r#"{"Action":"fail","Package":"example.com/a","Test":"TestA","Elapsed":0.02}"#,
                r#"{"Action":"run","Package":"example.com/a","Test":"TestB"}"#,
                r#"{"Action":"pass","Package":"example.com/a","Test":"TestB","Elapsed":0}"#,
                r#"{"Action":"fail","Package":"example.com/a","Elapsed":0.03}"#,
            ],
        );
        correlator.finish(&StreamEnd::default(), None, &mut results);

        assert_eq!(results.status(fx.sub), RunStatus::Failed);
        assert_eq!(results.status(fx.other), RunStatus::Passed);
        assert_eq!(results.status(fx.pkg), RunStatus::Failed);
        let sub = results.get(fx.sub).expect("sub result");
        assert_eq!(sub.elapsed, Some(Duration::from_millis(500)));
        assert_eq!(sub.diagnostics.len(), 1);
        assert_eq!(sub.diagnostics[0].line, 7);
        assert_eq!(sub.diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn dynamic_subtest_output_goes_to_nearest_known_ancestor() {
        let fx = fixture();
        let classifier = PatternClassifier::default();
        let mut results = ResultSet::new();
        let mut correlator =
            Correlator::new(&fx.tree, fx.tree.subtree(fx.pkg), &classifier, false);
        feed(
            &mut correlator,
            &mut results,
            &[
                r#"{"Action":"run","Package":"example.com/a","Test":"TestB"}"#,
                r#"{"Action":"run","Package":"example.com/a","Test":"TestB/generated_1"}"#,
                r#"{"Action":"output","Package":"example.com/a","Test":"TestB/generated_1","Output":"hello\n"}"#,
            ],
        );
        let output = &results.get(fx.other).expect("TestB result").output;
        assert_eq!(output, &vec!["hello\n".to_string()]);
    }

    #[test]
    fn build_failure_fails_the_package_with_a_located_diagnostic() {
        let fx = fixture();
        let classifier = PatternClassifier::default();
        let mut results = ResultSet::new();
        let mut correlator =
            Correlator::new(&fx.tree, fx.tree.subtree(fx.pkg), &classifier, false);
        feed(
            &mut correlator,
            &mut results,
            &[
                r##"{"ImportPath":"example.com/a [example.com/a.test]","Action":"build-output","Output":"# example.com/a [example.com/a.test]\n"}"##,
                r#"{"ImportPath":"example.com/a [example.com/a.test]","Action":"build-output","Output":"./a_test.go:9:2: undefined: missing\n"}"#,
                r#"{"ImportPath":"example.com/a [example.com/a.test]","Action":"build-fail"}"#,
                r#"{"Action":"fail","Package":"example.com/a","Elapsed":0,"FailedBuild":"example.com/a [example.com/a.test]"}"#,
            ],
        );
        correlator.finish(
            &StreamEnd {
                exit_code: Some(1),
                ..StreamEnd::default()
            },
            None,
            &mut results,
        );

        for node in [fx.pkg, fx.test, fx.sub, fx.other] {
            assert_eq!(results.status(node), RunStatus::Failed);
        }
        let diagnostic = &results.get(fx.pkg).expect("package result").diagnostics[0];
        assert_eq!(diagnostic.line, 9);
        assert_eq!(diagnostic.file.as_deref(), Some("./a_test.go"));
        assert!(diagnostic.message.contains("undefined: missing"));
    }

    #[test]
    fn cancellation_and_exit_settle_running_nodes() {
        let fx = fixture();
        let classifier = PatternClassifier::default();
        let run = [r#"{"Action":"run","Package":"example.com/a","Test":"TestA"}"#];

        let mut results = ResultSet::new();
        let mut correlator =
            Correlator::new(&fx.tree, fx.tree.subtree(fx.pkg), &classifier, false);
        feed(&mut correlator, &mut results, &run);
        correlator.finish(
            &StreamEnd {
                cancelled: true,
                ..StreamEnd::default()
            },
            None,
            &mut results,
        );
        assert_eq!(results.status(fx.test), RunStatus::Cancelled);
        assert_eq!(results.status(fx.other), RunStatus::NotRun);

        let mut results = ResultSet::new();
        let mut correlator =
            Correlator::new(&fx.tree, fx.tree.subtree(fx.pkg), &classifier, false);
        feed(&mut correlator, &mut results, &run);
        correlator.finish(
            &StreamEnd {
                exit_code: Some(2),
                ..StreamEnd::default()
            },
            None,
            &mut results,
        );
        assert_eq!(results.status(fx.test), RunStatus::Failed);
        assert!(!results.get(fx.test).expect("result").diagnostics.is_empty());
    }

    #[test]
    fn target_with_no_matching_events_fails() {
        let fx = fixture();
        let classifier = PatternClassifier::default();
        let mut covered: Vec<NodeId> = fx.tree.ancestors(fx.other).collect();
        covered.push(fx.other);
        covered.sort_unstable();
        let mut results = ResultSet::new();
        let mut correlator = Correlator::new(&fx.tree, covered, &classifier, false);
        feed(
            &mut correlator,
            &mut results,
            &[
                r#"{"Action":"output","Package":"example.com/a","Output":"testing: warning: no tests to run\n"}"#,
                r#"{"Action":"pass","Package":"example.com/a","Elapsed":0}"#,
            ],
        );
        correlator.finish(
            &StreamEnd {
                run_pattern: Some("^TestB$".into()),
                exit_code: Some(0),
                ..StreamEnd::default()
            },
            Some(fx.other),
            &mut results,
        );

        let result = results.get(fx.other).expect("target result");
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.diagnostics[0].message.contains("^TestB$"));
        assert_eq!(results.status(fx.test), RunStatus::NotRun);
    }
}
