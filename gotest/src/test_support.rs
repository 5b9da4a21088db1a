//! Test-only helpers: Go module fixtures, a scripted invoker and event line
//! builders.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::core::builder::{BuildOptions, BuildOutput, FileInput, PackageInput, build_tree};
use crate::core::matcher::{GoMatcher, Matcher};
use crate::core::pattern::InvocationSpec;
use crate::io::invoker::Invoker;
use crate::io::process::{LineSource, NextLine, ProcessExit, ProcessLine};

/// Import path used by in-memory fixture trees.
pub const FIXTURE_PACKAGE: &str = "example.com/fixture";

/// A Go module in a temporary directory.
pub struct GoFixture {
    dir: TempDir,
}

impl GoFixture {
    /// Create a module with a `go.mod` declaring `module`.
    pub fn new(module: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("go.mod"), format!("module {module}\n\ngo 1.22\n"))
            .expect("write go.mod");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture dir");
        }
        fs::write(&path, contents).expect("write fixture file");
        path
    }
}

/// Build a single-package tree from in-memory sources named by file name.
pub fn build_fixture(files: &[(&str, &str)], options: &BuildOptions) -> BuildOutput {
    let matcher = GoMatcher::new().expect("matcher");
    let dir = PathBuf::from("/fixture");
    let inputs = files
        .iter()
        .map(|(name, source)| {
            let records = matcher.match_source(source).expect("match fixture");
            FileInput::new(dir.join(name), source, records)
        })
        .collect();
    build_tree(
        vec![PackageInput {
            import_path: FIXTURE_PACKAGE.to_string(),
            dir,
            arg: ".".to_string(),
            files: inputs,
        }],
        options,
    )
}

/// Invoker that replays canned lines instead of spawning a process.
#[derive(Default)]
pub struct ScriptedInvoker {
    lines: Vec<ProcessLine>,
    exit_code: Option<i32>,
    launch_error: Option<String>,
    hang: bool,
    launches: Mutex<Vec<InvocationSpec>>,
}

impl ScriptedInvoker {
    /// Replay `stdout` lines, then exit with status 0.
    pub fn new(stdout: Vec<String>) -> Self {
        Self {
            lines: stdout.into_iter().map(ProcessLine::Stdout).collect(),
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_stderr(mut self, line: &str) -> Self {
        self.lines.push(ProcessLine::Stderr(line.to_string()));
        self
    }

    /// Keep the stream open after the script until terminated.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fail every launch with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Invocations seen so far.
    pub fn launches(&self) -> Vec<InvocationSpec> {
        self.launches.lock().expect("launches lock").clone()
    }
}

impl Invoker for ScriptedInvoker {
    fn launch(&self, spec: &InvocationSpec) -> Result<Box<dyn LineSource>> {
        self.launches.lock().expect("launches lock").push(spec.clone());
        if let Some(message) = &self.launch_error {
            return Err(anyhow!("{message}"));
        }
        Ok(Box::new(ScriptedSource {
            lines: self.lines.iter().cloned().collect(),
            exit_code: self.exit_code,
            hang: self.hang,
            terminated: false,
        }))
    }
}

struct ScriptedSource {
    lines: VecDeque<ProcessLine>,
    exit_code: Option<i32>,
    hang: bool,
    terminated: bool,
}

impl LineSource for ScriptedSource {
    fn next_line(&mut self, timeout: Duration) -> NextLine {
        if let Some(line) = self.lines.pop_front() {
            return NextLine::Line(line);
        }
        if self.hang && !self.terminated {
            std::thread::sleep(timeout.min(Duration::from_millis(10)));
            return NextLine::Idle;
        }
        NextLine::Closed
    }

    fn terminate(&mut self) -> Result<()> {
        self.terminated = true;
        self.lines.clear();
        Ok(())
    }

    fn finish(&mut self) -> Result<ProcessExit> {
        if self.terminated {
            return Ok(ProcessExit {
                code: None,
                success: false,
            });
        }
        Ok(ProcessExit {
            code: self.exit_code,
            success: self.exit_code == Some(0),
        })
    }
}

fn test_event(action: &str, package: &str, test: Option<&str>) -> serde_json::Value {
    let mut event = json!({
        "Time": "2024-01-01T00:00:00Z",
        "Action": action,
        "Package": package,
    });
    if let Some(test) = test {
        event["Test"] = json!(test);
    }
    event
}

pub fn run_line(package: &str, test: &str) -> String {
    test_event("run", package, Some(test)).to_string()
}

pub fn output_line(package: &str, test: Option<&str>, text: &str) -> String {
    let mut event = test_event("output", package, test);
    event["Output"] = json!(text);
    event.to_string()
}

/// Terminal event (`pass`, `fail` or `skip`), for a test or the package.
pub fn end_line(action: &str, package: &str, test: Option<&str>, elapsed: f64) -> String {
    let mut event = test_event(action, package, test);
    event["Elapsed"] = json!(elapsed);
    event.to_string()
}

/// The event sequence of a test that runs and ends without output.
pub fn test_lines(package: &str, test: &str, action: &str) -> Vec<String> {
    vec![run_line(package, test), end_line(action, package, Some(test), 0.0)]
}
