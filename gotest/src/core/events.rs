//! `go test -json` event records.

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Start,
    Run,
    Pause,
    Cont,
    Output,
    Pass,
    Fail,
    Skip,
    Bench,
    BuildOutput,
    BuildFail,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestEvent {
    #[serde(default)]
    pub time: Option<String>,
    pub action: Action,
    #[serde(default)]
    pub package: Option<String>,
    /// Set on build events, e.g. `example.com/pkg [example.com/pkg.test]`.
    #[serde(default)]
    pub import_path: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub failed_build: Option<String>,
}

impl TestEvent {
    /// Import path this event belongs to, without any ` [pkg.test]` suffix.
    pub fn package_path(&self) -> Option<&str> {
        self.package
            .as_deref()
            .or(self.import_path.as_deref())
            .map(|path| path.split(' ').next().unwrap_or(path))
    }
}

/// Decode one line of the structured stream. Non-JSON lines (toolchain
/// chatter such as `go: downloading ...`) and malformed records yield `None`.
pub fn decode_line(line: &str) -> Option<TestEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        if !trimmed.is_empty() {
            debug!(line = trimmed, "skipping non-event line");
        }
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(%err, line = trimmed, "malformed test event");
            None
        }
    }
}

/// Drop control characters (other than tab) and replacement characters left
/// by lossy decoding of binary output.
pub fn sanitize_output(text: &str) -> String {
    text.chars()
        .filter(|c| *c == '\t' || *c == '\n' || (!c.is_control() && *c != '\u{fffd}'))
        .collect()
}
