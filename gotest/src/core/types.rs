//! Result types shared by the correlator, aggregator and presentation.
//!
//! Everything here is deterministic: results are keyed by [`NodeId`] in a
//! `BTreeMap` so serialized output keeps a stable order.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotRun,
    Running,
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Skipped | RunStatus::Cancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::NotRun => "not run",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hint,
    Error,
}

/// A message attached to a source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// 1-based line in the node's file.
    pub line: u32,
    /// Set when the message points at a file other than the node's own
    /// (build errors attached to a package root).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, line: u32) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            line,
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub elapsed: Option<Duration>,
    pub output: Vec<String>,
    /// Bytes dropped after the per-node output limit was reached.
    pub truncated_bytes: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunResult {
    fn output_bytes(&self) -> usize {
        self.output.iter().map(String::len).sum()
    }
}

/// Per-node results of one execution session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSet {
    results: BTreeMap<NodeId, RunResult>,
    #[serde(skip)]
    output_limit: Option<usize>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap buffered output per node. Further output is counted, not stored.
    pub fn with_output_limit(limit: usize) -> Self {
        Self {
            results: BTreeMap::new(),
            output_limit: Some(limit),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&RunResult> {
        self.results.get(&id)
    }

    pub fn status(&self, id: NodeId) -> RunStatus {
        self.results
            .get(&id)
            .map(|result| result.status)
            .unwrap_or_default()
    }

    pub fn entry(&mut self, id: NodeId) -> &mut RunResult {
        self.results.entry(id).or_default()
    }

    pub fn set_status(&mut self, id: NodeId, status: RunStatus) {
        self.entry(id).status = status;
    }

    /// Clear prior results for `ids`, leaving them `NotRun`.
    pub fn reset(&mut self, ids: &[NodeId]) {
        for id in ids {
            self.results.insert(*id, RunResult::default());
        }
    }

    pub fn append_output(&mut self, id: NodeId, line: &str) {
        let limit = self.output_limit;
        let result = self.entry(id);
        match limit {
            Some(limit) if result.output_bytes() + line.len() > limit => {
                if result.truncated_bytes == 0 {
                    warn!(node = id.0, limit, "output limit reached; dropping further output");
                }
                result.truncated_bytes += line.len();
            }
            _ => result.output.push(line.to_string()),
        }
    }

    pub fn push_diagnostic(&mut self, id: NodeId, diagnostic: Diagnostic) {
        self.entry(id).diagnostics.push(diagnostic);
    }

    /// Fold a later session's results in. Nodes the later session never
    /// touched keep their earlier result.
    pub fn merge(&mut self, later: ResultSet) {
        for (id, result) in later.results {
            if result.status == RunStatus::NotRun && result.output.is_empty() {
                continue;
            }
            self.results.insert(id, result);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &RunResult)> {
        self.results.iter().map(|(id, result)| (*id, result))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
