//! Bottom-up status aggregation.

use super::types::{ResultSet, RunResult, RunStatus};
use crate::tree::{NodeId, Tree};

/// Derive statuses of inner nodes from their children.
///
/// Only nodes in `scope` are updated. A node's own `Failed` or `Cancelled`
/// status (a failing parent test with passing subtests) is kept; otherwise
/// the children decide. Children that never reported are ignored, and a node
/// with no reporting children keeps its own status.
pub fn aggregate(tree: &Tree, results: &mut ResultSet, scope: &[NodeId]) {
    let mut ordered = scope.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    // Children have larger ids than their parent.
    for id in ordered.into_iter().rev() {
        let children = tree.children(id);
        if children.is_empty() {
            continue;
        }
        let derived = derive(children.iter().map(|child| results.status(*child)));
        let own = results.status(id);
        let status = combine(own, derived);
        if status != own {
            results.set_status(id, status);
        }
    }
}

fn derive(statuses: impl Iterator<Item = RunStatus>) -> RunStatus {
    let seen: Vec<RunStatus> = statuses.filter(|status| *status != RunStatus::NotRun).collect();
    if seen.is_empty() {
        RunStatus::NotRun
    } else if seen.contains(&RunStatus::Failed) {
        RunStatus::Failed
    } else if seen.contains(&RunStatus::Cancelled) {
        RunStatus::Cancelled
    } else if seen.contains(&RunStatus::Running) {
        RunStatus::Running
    } else if seen.iter().all(|status| *status == RunStatus::Skipped) {
        RunStatus::Skipped
    } else {
        RunStatus::Passed
    }
}

fn combine(own: RunStatus, derived: RunStatus) -> RunStatus {
    match (own, derived) {
        (RunStatus::Failed, _) | (_, RunStatus::Failed) => RunStatus::Failed,
        (RunStatus::Cancelled, _) | (_, RunStatus::Cancelled) => RunStatus::Cancelled,
        (own, RunStatus::NotRun) => own,
        (_, derived) => derived,
    }
}

/// A tree together with the results of a session, ready for presentation.
#[derive(Debug, Clone)]
pub struct AnnotatedTree {
    pub tree: std::sync::Arc<Tree>,
    pub results: ResultSet,
}

impl AnnotatedTree {
    pub fn status(&self, id: NodeId) -> RunStatus {
        self.results.status(id)
    }

    pub fn result(&self, id: NodeId) -> Option<&RunResult> {
        self.results.get(id)
    }

    /// Counts of leaf-level outcomes (tests without children, subtests and
    /// cases), as `(passed, failed, skipped)`.
    pub fn leaf_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for (id, node) in self.tree.iter() {
            if !node.children.is_empty() || node.run_path.is_empty() {
                continue;
            }
            match self.results.status(id) {
                RunStatus::Passed => counts.0 += 1,
                RunStatus::Failed => counts.1 += 1,
                RunStatus::Skipped => counts.2 += 1,
                _ => {}
            }
        }
        counts
    }
}
