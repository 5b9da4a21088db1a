//! Cursor-position lookup.

use std::path::Path;

use crate::tree::{NodeId, NodeKind, Tree};

/// Innermost node in `file` whose declaration span contains `line`.
///
/// Falls back to the `File` node when the line lies outside every test, and
/// returns `None` when the file is not part of the tree. Files are matched by
/// full path, or by path suffix when `file` is relative.
pub fn nearest_node(tree: &Tree, file: &Path, line: u32) -> Option<NodeId> {
    let file_node = tree.iter().find_map(|(id, node)| {
        (node.kind == NodeKind::File && same_file(&node.position.file, file)).then_some(id)
    })?;

    let mut current = file_node;
    loop {
        let next = tree
            .children(current)
            .iter()
            .copied()
            .filter(|child| tree.node(*child).position.span.contains_line(line))
            .min_by_key(|child| {
                let span = tree.node(*child).position.span;
                span.end_line - span.start_line
            });
        match next {
            Some(child) => current = child,
            None => return Some(current),
        }
    }
}

fn same_file(known: &Path, wanted: &Path) -> bool {
    if wanted.is_absolute() {
        known == wanted
    } else {
        known.ends_with(wanted)
    }
}
