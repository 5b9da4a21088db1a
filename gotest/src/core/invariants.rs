//! Structural invariants of a built test tree.

use std::collections::HashSet;

use crate::tree::{NodeId, NodeKind, Tree};

/// Check structural invariants:
/// - No duplicate ids
/// - Every child's parent link points back at the node listing it
/// - Children are created after their parent (no cycles)
/// - Every node is reachable from exactly one package root
/// - Test-level nodes carry a non-empty run path
pub fn validate_tree(tree: &Tree) -> Vec<String> {
    let mut errors = Vec::new();

    let mut ids = HashSet::new();
    for (_, node) in tree.iter() {
        if !ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate id '{}'", node.id));
        }
        let needs_run_path = !matches!(node.kind, NodeKind::Package | NodeKind::File);
        if needs_run_path && node.run_path.is_empty() {
            errors.push(format!("{}: missing run path", node.id));
        }
    }

    let mut reached = HashSet::new();
    for root in tree.roots() {
        if tree.node(*root).parent.is_some() {
            errors.push(format!("{}: package root has a parent", tree.node(*root).id));
        }
        visit(tree, *root, &mut reached, &mut errors);
    }
    if reached.len() != tree.len() {
        errors.push(format!(
            "{} node(s) unreachable from package roots",
            tree.len() - reached.len()
        ));
    }
    errors
}

fn visit(tree: &Tree, id: NodeId, reached: &mut HashSet<NodeId>, errors: &mut Vec<String>) {
    if !reached.insert(id) {
        errors.push(format!("{}: reachable more than once", tree.node(id).id));
        return;
    }
    for child in tree.children(id) {
        let node = tree.node(*child);
        if node.parent != Some(id) {
            errors.push(format!("{}: parent link does not match", node.id));
        }
        if *child <= id {
            errors.push(format!("{}: child precedes its parent", node.id));
            continue;
        }
        visit(tree, *child, reached, errors);
    }
}
