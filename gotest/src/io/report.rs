//! JSON report of an annotated tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::aggregate::AnnotatedTree;
use crate::core::types::{Diagnostic, RunStatus};
use crate::tree::{NodeId, NodeKind};

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub packages: Vec<ReportNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub truncated_bytes: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ReportNode>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl Report {
    pub fn new(annotated: &AnnotatedTree) -> Self {
        let (passed, failed, skipped) = annotated.leaf_counts();
        Self {
            passed,
            failed,
            skipped,
            packages: annotated
                .tree
                .roots()
                .iter()
                .map(|root| report_node(annotated, *root))
                .collect(),
        }
    }
}

fn report_node(annotated: &AnnotatedTree, id: NodeId) -> ReportNode {
    let node = annotated.tree.node(id);
    let result = annotated.result(id);
    ReportNode {
        id: node.id.clone(),
        kind: node.kind,
        name: node.name.clone(),
        file: node.position.file.clone(),
        start_line: node.position.start_line(),
        end_line: node.position.end_line(),
        status: annotated.status(id),
        elapsed_ms: result.and_then(|r| r.elapsed).map(|d| d.as_millis()),
        diagnostics: result.map(|r| r.diagnostics.clone()).unwrap_or_default(),
        output: result.map(|r| r.output.clone()).unwrap_or_default(),
        truncated_bytes: result.map_or(0, |r| r.truncated_bytes),
        children: node
            .children
            .iter()
            .map(|child| report_node(annotated, *child))
            .collect(),
    }
}

/// Write the report as pretty JSON (temp file + rename).
pub fn write_report(path: &Path, annotated: &AnnotatedTree) -> Result<()> {
    let mut buf =
        serde_json::to_string_pretty(&Report::new(annotated)).context("serialize report")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
