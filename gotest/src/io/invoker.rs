//! Invoker abstraction for the test tool.
//!
//! The [`Invoker`] trait decouples sessions from the actual `go test`
//! process. Tests use scripted invokers that replay canned event lines
//! without spawning anything.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::pattern::InvocationSpec;
use crate::io::process::{LineSource, StreamingChild};

/// Abstraction over test tool backends.
pub trait Invoker: Send + Sync {
    /// Start the tool for `spec` and return its line stream.
    fn launch(&self, spec: &InvocationSpec) -> Result<Box<dyn LineSource>>;
}

/// Invoker that spawns `go test -json`.
#[derive(Debug, Clone)]
pub struct GoInvoker {
    pub go_binary: String,
    /// Module root; the process runs here so `./pkg` arguments resolve.
    pub workdir: PathBuf,
    pub test_args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl GoInvoker {
    pub fn command(&self, spec: &InvocationSpec) -> Command {
        let mut cmd = Command::new(&self.go_binary);
        cmd.args(spec.command_args(&self.test_args))
            .current_dir(&self.workdir)
            .envs(&self.env);
        cmd
    }

    /// The command line as a shell-readable string.
    pub fn display(&self, spec: &InvocationSpec) -> String {
        std::iter::once(self.go_binary.clone())
            .chain(spec.command_args(&self.test_args).into_iter().map(quote))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Invoker for GoInvoker {
    #[instrument(skip_all, fields(packages = spec.packages.len(), run = ?spec.run_pattern))]
    fn launch(&self, spec: &InvocationSpec) -> Result<Box<dyn LineSource>> {
        info!(workdir = %self.workdir.display(), "starting go test");
        let child = StreamingChild::spawn(self.command(spec))
            .with_context(|| format!("launch {}", self.go_binary))?;
        Ok(Box::new(child))
    }
}

fn quote(arg: String) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./=:,".contains(c));
    if plain && !arg.is_empty() {
        arg
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
