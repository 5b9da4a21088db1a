//! Run-pattern compilation: which packages to test and which `-run` filter
//! selects a target node.

use serde::Serialize;
use thiserror::Error;

use crate::tree::{NodeId, NodeKind, Tree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("node {0:?} is not part of this tree")]
    UnknownNode(NodeId),
    #[error("{0} contains no tests")]
    Empty(String),
    #[error("the tree has no packages")]
    NoPackages,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageTarget {
    pub import_path: String,
    /// Argument passed to `go test`.
    pub arg: String,
}

/// What to run: the packages and the optional `-run` pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationSpec {
    pub target: Option<NodeId>,
    pub packages: Vec<PackageTarget>,
    pub run_pattern: Option<String>,
}

impl InvocationSpec {
    /// Arguments after the tool name: `test -json [-run P] [extra] pkgs...`.
    pub fn command_args(&self, extra: &[String]) -> Vec<String> {
        let mut args = vec!["test".to_string(), "-json".to_string()];
        if let Some(pattern) = &self.run_pattern {
            args.push("-run".to_string());
            args.push(pattern.clone());
        }
        args.extend(extra.iter().cloned());
        args.extend(self.packages.iter().map(|package| package.arg.clone()));
        args
    }
}

/// `^name$` with regex metacharacters escaped.
pub fn anchored(segment: &str) -> String {
    format!("^{}$", regex::escape(segment))
}

/// One anchored regex per run path segment, joined by `/`.
pub fn path_pattern(run_path: &[String]) -> String {
    run_path
        .iter()
        .map(|segment| anchored(segment))
        .collect::<Vec<_>>()
        .join("/")
}

/// Compile the invocation for `target`, or every package when `None`.
pub fn compile(tree: &Tree, target: Option<NodeId>) -> Result<InvocationSpec, PatternError> {
    let Some(target) = target else {
        if tree.packages().is_empty() {
            return Err(PatternError::NoPackages);
        }
        return Ok(InvocationSpec {
            target: None,
            packages: tree.packages().iter().map(package_target).collect(),
            run_pattern: None,
        });
    };

    let node = tree.get(target).ok_or(PatternError::UnknownNode(target))?;
    let root = tree.package_root(target);
    let package = tree
        .package_info(root)
        .ok_or(PatternError::UnknownNode(target))?;

    let run_pattern = match node.kind {
        NodeKind::Package => None,
        NodeKind::File => {
            let mut names: Vec<&str> = Vec::new();
            for child in tree.children(target) {
                if let Some(first) = tree.node(*child).run_path.first() {
                    if !names.contains(&first.as_str()) {
                        names.push(first);
                    }
                }
            }
            if names.is_empty() {
                return Err(PatternError::Empty(node.id.clone()));
            }
            let alternatives: Vec<String> = names.iter().map(|name| regex::escape(name)).collect();
            Some(format!("^({})$", alternatives.join("|")))
        }
        _ => Some(path_pattern(&node.run_path)),
    };

    Ok(InvocationSpec {
        target: Some(target),
        packages: vec![package_target(package)],
        run_pattern,
    })
}

/// Nodes whose results a run of `target` can change: the target's subtree and
/// its ancestors (or everything when running the whole tree).
pub fn covered_nodes(tree: &Tree, target: Option<NodeId>) -> Vec<NodeId> {
    match target {
        None => tree.iter().map(|(id, _)| id).collect(),
        Some(target) => {
            let mut nodes: Vec<NodeId> = tree.ancestors(target).collect();
            nodes.extend(tree.subtree(target));
            nodes.sort_unstable();
            nodes
        }
    }
}

fn package_target(info: &crate::tree::PackageInfo) -> PackageTarget {
    PackageTarget {
        import_path: info.import_path.clone(),
        arg: info.arg.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeDraft, Span};
    use std::path::Path;

    fn span(line: u32) -> Span {
        Span {
            start_byte: line as usize * 10,
            end_byte: line as usize * 10 + 5,
            start_line: line,
            end_line: line,
        }
    }

    fn add(tree: &mut Tree, parent: NodeId, kind: NodeKind, name: &str, path: &[&str], line: u32) -> NodeId {
        tree.add_child(
            parent,
            NodeDraft {
                kind,
                name: name.into(),
                run_path: path.iter().map(|s| s.to_string()).collect(),
                span: span(line),
            },
        )
        .id()
    }

    #[test]
    fn segments_are_anchored_and_escaped() {
        let mut tree = Tree::new();
        let pkg = tree.add_package("example.com/a", Path::new("/m/a"), "./a");
        let file = tree.add_file(pkg, Path::new("/m/a/a_test.go"), span(1));
        let test = add(&mut tree, file, NodeKind::Test, "TestAdd", &["TestAdd"], 3);
        let case = add(
            &mut tree,
            test,
            NodeKind::TableCase,
            "1+1 (x)",
            &["TestAdd", "1+1_(x)"],
            4,
        );

        let spec = compile(&tree, Some(case)).expect("compile");
        assert_eq!(spec.run_pattern.as_deref(), Some(r"^TestAdd$/^1\+1_\(x\)$"));
        assert_eq!(
            spec.command_args(&["-count=1".to_string()]),
            vec!["test", "-json", "-run", r"^TestAdd$/^1\+1_\(x\)$", "-count=1", "./a"]
        );
    }

    #[test]
    fn namespace_flattened_method_and_file_targets() {
        let mut tree = Tree::new();
        let pkg = tree.add_package("example.com/s", Path::new("/m/s"), "./s");
        let file = tree.add_file(pkg, Path::new("/m/s/gaps_test.go"), span(1));
        let ns = add(&mut tree, file, NodeKind::Namespace, "GapSuite", &["TestGapSuite"], 10);
        add(&mut tree, ns, NodeKind::Test, "TestFirst", &["TestGapSuite", "TestFirst"], 15);
        let third = add(&mut tree, file, NodeKind::Test, "TestThird", &["TestGapSuite", "TestThird"], 51);
        add(&mut tree, file, NodeKind::Test, "TestOther", &["TestOther"], 70);

        let ns_spec = compile(&tree, Some(ns)).expect("namespace");
        assert_eq!(ns_spec.run_pattern.as_deref(), Some("^TestGapSuite$"));

        let third_spec = compile(&tree, Some(third)).expect("flattened");
        assert_eq!(third_spec.run_pattern.as_deref(), Some("^TestGapSuite$/^TestThird$"));

        let file_spec = compile(&tree, Some(file)).expect("file");
        assert_eq!(file_spec.run_pattern.as_deref(), Some("^(TestGapSuite|TestOther)$"));

        let pkg_spec = compile(&tree, Some(pkg)).expect("package");
        assert_eq!(pkg_spec.run_pattern, None);
        assert_eq!(pkg_spec.packages[0].import_path, "example.com/s");
    }

    #[test]
    fn covered_nodes_include_ancestors_and_subtree() {
        let mut tree = Tree::new();
        let pkg = tree.add_package("example.com/a", Path::new("/m/a"), "./a");
        let file = tree.add_file(pkg, Path::new("/m/a/a_test.go"), span(1));
        let test = add(&mut tree, file, NodeKind::Test, "TestA", &["TestA"], 3);
        let sub = add(&mut tree, test, NodeKind::Subtest, "x", &["TestA", "x"], 4);
        let other = add(&mut tree, file, NodeKind::Test, "TestB", &["TestB"], 9);

        let covered = covered_nodes(&tree, Some(test));
        assert_eq!(covered, vec![pkg, file, test, sub]);
        assert!(!covered.contains(&other));
    }
}
