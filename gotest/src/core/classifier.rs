//! Output classification: turns a node's buffered output into diagnostics.
//!
//! Classification is pluggable through [`OutputClassifier`]; the default
//! [`PatternClassifier`] recognises common assertion and panic shapes plus any
//! patterns added in configuration.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use super::types::{Diagnostic, Severity};

/// Lines treated as errors by default.
pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    r"(?i)\bexpected\b.*\bbut\b.*\bgot\b",
    r"(?i)\bgot\b.*\bwant\b",
    r"(?i)\bwant\b.*\bgot\b",
    r"^panic:",
    r"runtime error",
    r"\[recovered\]",
    r"^\s*Error Trace:",
    r"^\s*Error:",
    r"(?i)\bassertion failed\b",
];

/// Framework chatter that never becomes a diagnostic.
const NOISE_PATTERNS: &[&str] = &[
    r"^=== (RUN|PAUSE|CONT|NAME)\b",
    r"^\s*--- (PASS|FAIL|SKIP):",
    r"^(PASS|FAIL)$",
    r"^ok\s+\S+",
    r"^FAIL\s+\S+",
    r"^exit status \d+$",
    r"^coverage: ",
    r"^testing: warning: no tests to run",
    r"^\?\s+\S+\s+\[no test files\]",
];

static DEFAULT_ERRORS: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(DEFAULT_ERROR_PATTERNS).expect("valid default error patterns"));
static NOISE: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(NOISE_PATTERNS).expect("valid noise patterns"));

/// `    foo_test.go:12: message`
static LOG_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([\w.\-]+\.go):(\d+):(?: (.*))?$").expect("valid log header pattern")
});
/// Any `path/file.go:NN` reference (stack frames, `Error Trace:` lines).
static SOURCE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^\s:]+\.go):(\d+)").expect("valid source reference pattern"));

pub trait OutputClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Severity;
    fn is_noise(&self, line: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct PatternClassifier {
    errors: RegexSet,
    extra: Option<RegexSet>,
}

impl PatternClassifier {
    /// Default patterns plus `extra` error patterns.
    pub fn new(extra: &[String]) -> Result<Self, regex::Error> {
        let extra = if extra.is_empty() {
            None
        } else {
            Some(RegexSet::new(extra)?)
        };
        Ok(Self {
            errors: DEFAULT_ERRORS.clone(),
            extra,
        })
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            errors: DEFAULT_ERRORS.clone(),
            extra: None,
        }
    }
}

impl OutputClassifier for PatternClassifier {
    fn classify(&self, line: &str) -> Severity {
        let extra = self.extra.as_ref().is_some_and(|set| set.is_match(line));
        if extra || self.errors.is_match(line) {
            Severity::Error
        } else {
            Severity::Hint
        }
    }

    fn is_noise(&self, line: &str) -> bool {
        NOISE.is_match(line)
    }
}

/// Where a node's diagnostics land when output carries no usable location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticTarget {
    /// Base name of the node's source file.
    pub file_name: Option<String>,
    /// Declaration line of the node.
    pub line: u32,
}

/// A `file.go:NN` reference found in output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub file: String,
    pub line: u32,
}

/// First `file.go:NN` reference in `text`.
pub fn find_source_ref(text: &str) -> Option<SourceRef> {
    let caps = SOURCE_REF.captures(text)?;
    Some(SourceRef {
        file: caps.get(1)?.as_str().to_string(),
        line: caps.get(2)?.as_str().parse().ok()?,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum EntryKind {
    Log,
    Free,
    Panic,
}

#[derive(Debug)]
struct Entry {
    kind: EntryKind,
    severity: Severity,
    line: u32,
    located: bool,
    text: Vec<String>,
}

/// Group `output` into diagnostics.
///
/// A `file.go:NN:` log header starts an entry and deeper-indented lines
/// continue it; consecutive free-form error lines merge; a `panic:` line
/// swallows the rest of the output up to framework chatter. Entries are placed
/// at the referenced line when it is in the node's file, else at the node's
/// own line. Free-form lines that are not errors are dropped.
pub fn diagnose(
    output: &[String],
    classifier: &dyn OutputClassifier,
    target: &DiagnosticTarget,
) -> Vec<Diagnostic> {
    let in_target = |file: &str| {
        target.file_name.as_deref().is_some_and(|name| {
            std::path::Path::new(file)
                .file_name()
                .is_some_and(|base| base == name)
        })
    };

    let mut entries: Vec<Entry> = Vec::new();
    let mut last_was_free_error = false;
    for raw in output {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }
        if classifier.is_noise(line) {
            last_was_free_error = false;
            if let Some(entry) = entries.last_mut() {
                if entry.kind == EntryKind::Panic {
                    entry.kind = EntryKind::Free;
                }
            }
            continue;
        }

        if let Some(entry) = entries.last_mut().filter(|entry| entry.kind == EntryKind::Panic) {
            if !entry.located {
                if let Some(found) = find_source_ref(line).filter(|found| in_target(&found.file)) {
                    entry.line = found.line;
                    entry.located = true;
                }
            }
            entry.text.push(line.trim().to_string());
            continue;
        }

        if let Some(caps) = LOG_HEADER.captures(line) {
            last_was_free_error = false;
            let message = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            let file = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let referenced: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let (line_no, located) = match referenced {
                Some(n) if in_target(file) => (n, true),
                _ => (target.line, false),
            };
            entries.push(Entry {
                kind: EntryKind::Log,
                severity: classifier.classify(message),
                line: line_no,
                located,
                text: vec![message.trim().to_string()],
            });
            continue;
        }

        let continuation = line.starts_with("        ") || line.starts_with('\t');
        if continuation {
            if let Some(entry) = entries.last_mut().filter(|entry| entry.kind == EntryKind::Log) {
                if classifier.classify(line) == Severity::Error {
                    entry.severity = Severity::Error;
                }
                if !entry.located {
                    if let Some(found) = find_source_ref(line).filter(|found| in_target(&found.file)) {
                        entry.line = found.line;
                        entry.located = true;
                    }
                }
                entry.text.push(line.trim().to_string());
                continue;
            }
        }

        let severity = classifier.classify(line);
        if line.starts_with("panic:") {
            last_was_free_error = false;
            entries.push(Entry {
                kind: EntryKind::Panic,
                severity: Severity::Error,
                line: target.line,
                located: false,
                text: vec![line.trim().to_string()],
            });
            continue;
        }
        if severity != Severity::Error {
            last_was_free_error = false;
            continue;
        }
        if last_was_free_error {
            if let Some(entry) = entries.last_mut() {
                entry.text.push(line.trim().to_string());
                continue;
            }
        }
        entries.push(Entry {
            kind: EntryKind::Free,
            severity,
            line: target.line,
            located: false,
            text: vec![line.trim().to_string()],
        });
        last_was_free_error = true;
    }

    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    for entry in entries {
        let message = entry
            .text
            .iter()
            .filter(|part| !part.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if message.is_empty() {
            continue;
        }
        let diagnostic = Diagnostic {
            severity: entry.severity,
            message,
            line: entry.line,
            file: None,
        };
        if !diagnostics.contains(&diagnostic) {
            diagnostics.push(diagnostic);
        }
    }
    diagnostics
}
