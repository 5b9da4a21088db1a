//! Arena-backed test tree.
//!
//! Nodes are stored in insertion order and addressed by [`NodeId`]. Parents own
//! their children through ordered id lists; the parent link is a plain id. A
//! child is always inserted after its parent, so its id is strictly greater,
//! which makes reverse id order a valid bottom-up traversal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Index of a node inside its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Package,
    File,
    Namespace,
    Test,
    Subtest,
    TableCase,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Package => "package",
            NodeKind::File => "file",
            NodeKind::Namespace => "namespace",
            NodeKind::Test => "test",
            NodeKind::Subtest => "subtest",
            NodeKind::TableCase => "case",
        }
    }
}

/// Byte and line range of a source construct. Lines are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: u32,
    pub end_line: u32,
}

impl Span {
    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Declaration position of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub file: PathBuf,
    pub span: Span,
}

impl Position {
    pub fn start_line(&self) -> u32 {
        self.span.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.span.end_line
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    /// Stable identifier, e.g. `example.com/pkg/foo_test.go::TestSuite/TestMethod`.
    pub id: String,
    pub kind: NodeKind,
    /// Display name as written in the source.
    pub name: String,
    /// Name segments as reported by `go test` (empty for packages and files).
    pub run_path: Vec<String>,
    pub position: Position,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl TreeNode {
    /// `/`-joined run path, or `None` for packages and files.
    pub fn run_name(&self) -> Option<String> {
        if self.run_path.is_empty() {
            None
        } else {
            Some(self.run_path.join("/"))
        }
    }
}

/// Package metadata attached to a package root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub node: NodeId,
    /// Import path as reported in the event stream.
    pub import_path: String,
    pub dir: PathBuf,
    /// Package argument passed to `go test` (`./internal/foo`).
    pub arg: String,
}

/// Node description handed to [`Tree::add_child`].
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub kind: NodeKind,
    pub name: String,
    pub run_path: Vec<String>,
    pub span: Span,
}

/// Outcome of inserting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Created(NodeId),
    /// A sibling describing the same source span already existed.
    Merged(NodeId),
    /// The run name collided with a sibling at a different span and received
    /// a `#NN` suffix.
    Disambiguated(NodeId),
}

impl Insertion {
    pub fn id(self) -> NodeId {
        match self {
            Insertion::Created(id) | Insertion::Merged(id) | Insertion::Disambiguated(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    roots: Vec<NodeId>,
    packages: Vec<PackageInfo>,
    #[serde(skip)]
    by_id: HashMap<String, NodeId>,
    /// Next duplicate counter per `(package, run name)`, mirroring how the
    /// test binary names repeated subtests.
    #[serde(skip)]
    run_names: HashMap<(NodeId, String), u32>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    /// Look up a node by its stable identifier.
    pub fn find(&self, key: &str) -> Option<NodeId> {
        self.by_id.get(key).copied()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn packages(&self) -> &[PackageInfo] {
        &self.packages
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx), node))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Ancestors of `id`, nearest first (excluding `id`).
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id.0].parent, move |cur| {
            self.nodes[cur.0].parent
        })
    }

    /// `id` and all of its descendants in pre-order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.nodes[cur.0].children.iter().rev().copied());
        }
        out
    }

    /// Package root containing `id`.
    pub fn package_root(&self, id: NodeId) -> NodeId {
        self.ancestors(id).last().unwrap_or(id)
    }

    pub fn package_info(&self, root: NodeId) -> Option<&PackageInfo> {
        self.packages.iter().find(|info| info.node == root)
    }

    /// Nearest `File` node at or above `id`.
    pub fn file_of(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|cur| self.nodes[cur.0].kind == NodeKind::File)
    }

    pub fn add_package(&mut self, import_path: &str, dir: &Path, arg: &str) -> NodeId {
        let id = self.push(TreeNode {
            id: import_path.to_string(),
            kind: NodeKind::Package,
            name: import_path.to_string(),
            run_path: Vec::new(),
            position: Position {
                file: dir.to_path_buf(),
                span: Span {
                    start_line: 1,
                    end_line: 1,
                    ..Span::default()
                },
            },
            parent: None,
            children: Vec::new(),
        });
        self.roots.push(id);
        self.packages.push(PackageInfo {
            node: id,
            import_path: import_path.to_string(),
            dir: dir.to_path_buf(),
            arg: arg.to_string(),
        });
        id
    }

    pub fn add_file(&mut self, package: NodeId, path: &Path, span: Span) -> NodeId {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = format!("{}/{}", self.nodes[package.0].id, file_name);
        let node = self.push(TreeNode {
            id,
            kind: NodeKind::File,
            name: file_name,
            run_path: Vec::new(),
            position: Position {
                file: path.to_path_buf(),
                span,
            },
            parent: Some(package),
            children: Vec::new(),
        });
        self.nodes[package.0].children.push(node);
        node
    }

    /// Insert a test-level node under `parent`.
    ///
    /// A sibling with the same kind, display name and span is reused. A
    /// subtest or case name already taken inside the package gets the `#NN`
    /// suffix the test binary would assign, so every occurrence stays
    /// individually addressable. Top-level names are unique per package, and
    /// a namespace legitimately shares its runner's name.
    pub fn add_child(&mut self, parent: NodeId, draft: NodeDraft) -> Insertion {
        if let Some(existing) = self.nodes[parent.0].children.iter().copied().find(|child| {
            let node = &self.nodes[child.0];
            node.kind == draft.kind && node.name == draft.name && node.position.span == draft.span
        }) {
            return Insertion::Merged(existing);
        }

        let package = self.package_root(parent);
        let mut run_path = draft.run_path;
        let mut renamed = false;
        if matches!(draft.kind, NodeKind::Subtest | NodeKind::TableCase) {
            if let Some(last) = run_path.pop() {
                let prefix = run_path.join("/");
                let unique = self.unique_run_name(package, &prefix, &last);
                renamed = unique != last;
                run_path.push(unique);
            }
        }

        let file = self
            .file_of(parent)
            .map(|file| self.nodes[file.0].id.clone())
            .unwrap_or_else(|| self.nodes[package.0].id.clone());
        let file_path = self
            .file_of(parent)
            .map(|file| self.nodes[file.0].position.file.clone())
            .unwrap_or_default();
        let id = format!("{}::{}", file, run_path.join("/"));

        let node = self.push(TreeNode {
            id,
            kind: draft.kind,
            name: draft.name,
            run_path,
            position: Position {
                file: file_path,
                span: draft.span,
            },
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(node);
        if renamed {
            Insertion::Disambiguated(node)
        } else {
            Insertion::Created(node)
        }
    }

    fn unique_run_name(&mut self, package: NodeId, prefix: &str, name: &str) -> String {
        let qualify = |segment: &str| {
            if prefix.is_empty() {
                segment.to_string()
            } else {
                format!("{prefix}/{segment}")
            }
        };
        let mut candidate = name.to_string();
        let mut empty = name.is_empty();
        loop {
            let key = (package, qualify(&candidate));
            let next = self.run_names.get(&key).copied();
            if !empty && next.is_none() {
                self.run_names.insert(key, 1);
                return candidate;
            }
            let next = next.unwrap_or(0);
            self.run_names.insert(key, next + 1);
            candidate = format!("{candidate}#{next:02}");
            empty = false;
        }
    }

    fn push(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_id.entry(node.id.clone()).or_insert(id);
        self.nodes.push(node);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start_line: u32, end_line: u32) -> Span {
        Span {
            start_byte: start_line as usize * 10,
            end_byte: end_line as usize * 10 + 5,
            start_line,
            end_line,
        }
    }

    fn draft(kind: NodeKind, name: &str, run_path: &[&str], span: Span) -> NodeDraft {
        NodeDraft {
            kind,
            name: name.to_string(),
            run_path: run_path.iter().map(|s| s.to_string()).collect(),
            span,
        }
    }

    fn file_tree() -> (Tree, NodeId) {
        let mut tree = Tree::new();
        let pkg = tree.add_package("example.com/pkg", Path::new("/src/pkg"), "./pkg");
        let file = tree.add_file(pkg, Path::new("/src/pkg/a_test.go"), span(1, 50));
        (tree, file)
    }

    #[test]
    fn identifiers_join_file_and_run_path() {
        let (mut tree, file) = file_tree();
        let test = tree
            .add_child(file, draft(NodeKind::Test, "TestFoo", &["TestFoo"], span(3, 9)))
            .id();
        let sub = tree
            .add_child(
                test,
                draft(NodeKind::Subtest, "a b", &["TestFoo", "a_b"], span(4, 6)),
            )
            .id();

        assert_eq!(tree.node(file).id, "example.com/pkg/a_test.go");
        assert_eq!(tree.node(test).id, "example.com/pkg/a_test.go::TestFoo");
        assert_eq!(tree.node(sub).id, "example.com/pkg/a_test.go::TestFoo/a_b");
        assert_eq!(tree.find("example.com/pkg/a_test.go::TestFoo/a_b"), Some(sub));
        assert_eq!(tree.package_root(sub), tree.roots()[0]);
    }

    #[test]
    fn same_span_merges_and_different_span_is_suffixed() {
        let (mut tree, file) = file_tree();
        let test = tree
            .add_child(file, draft(NodeKind::Test, "TestFoo", &["TestFoo"], span(3, 20)))
            .id();

        let first = tree.add_child(
            test,
            draft(NodeKind::TableCase, "empty", &["TestFoo", "empty"], span(5, 5)),
        );
        let again = tree.add_child(
            test,
            draft(NodeKind::TableCase, "empty", &["TestFoo", "empty"], span(5, 5)),
        );
        let second = tree.add_child(
            test,
            draft(NodeKind::TableCase, "empty", &["TestFoo", "empty"], span(6, 6)),
        );
        let third = tree.add_child(
            test,
            draft(NodeKind::TableCase, "empty", &["TestFoo", "empty"], span(7, 7)),
        );

        assert!(matches!(first, Insertion::Created(_)));
        assert_eq!(again, Insertion::Merged(first.id()));
        assert!(matches!(second, Insertion::Disambiguated(_)));
        assert_eq!(tree.node(second.id()).run_path, vec!["TestFoo", "empty#01"]);
        assert_eq!(tree.node(third.id()).run_path, vec!["TestFoo", "empty#02"]);
        assert_eq!(tree.children(test).len(), 3);
    }

    #[test]
    fn subtree_is_pre_order_and_ids_grow_downwards() {
        let (mut tree, file) = file_tree();
        let a = tree
            .add_child(file, draft(NodeKind::Test, "TestA", &["TestA"], span(3, 5)))
            .id();
        let a1 = tree
            .add_child(a, draft(NodeKind::Subtest, "x", &["TestA", "x"], span(4, 4)))
            .id();
        let b = tree
            .add_child(file, draft(NodeKind::Test, "TestB", &["TestB"], span(7, 9)))
            .id();

        assert_eq!(tree.subtree(file), vec![file, a, a1, b]);
        for (id, node) in tree.iter() {
            if let Some(parent) = node.parent {
                assert!(parent < id);
            }
        }
    }
}
