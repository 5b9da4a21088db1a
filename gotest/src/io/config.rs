//! Project configuration stored in `.gotest.toml` at the module root.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// File name looked up at the module root.
pub const CONFIG_FILE: &str = ".gotest.toml";

/// Project configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GotestConfig {
    /// Test tool executable.
    pub go_binary: String,

    /// Extra arguments placed before the package list.
    pub test_args: Vec<String>,

    /// Extra environment for the test process.
    pub env: BTreeMap<String, String>,

    /// Wall-clock budget for one invocation in seconds.
    pub timeout_secs: u64,

    /// Per-node output retained in memory; the rest is counted.
    pub output_limit_bytes: usize,

    /// Resolve testify suites into namespaces.
    pub testify: bool,

    pub warn_test_name_dupes: bool,

    /// Strip control characters from captured output.
    pub sanitize_output: bool,

    /// Directory names skipped during package discovery.
    pub skip_dirs: Vec<String>,

    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Additional regular expressions whose matching lines are errors.
    pub error_patterns: Vec<String>,
}

impl Default for GotestConfig {
    fn default() -> Self {
        Self {
            go_binary: "go".to_string(),
            test_args: vec!["-count=1".to_string()],
            env: BTreeMap::new(),
            timeout_secs: 600,
            output_limit_bytes: 1_000_000,
            testify: true,
            warn_test_name_dupes: true,
            sanitize_output: false,
            skip_dirs: vec![
                "vendor".to_string(),
                "testdata".to_string(),
                "node_modules".to_string(),
            ],
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl GotestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.go_binary.trim().is_empty() {
            return Err(anyhow!("go_binary must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.test_args.iter().any(|arg| arg == "-json" || arg.starts_with("-run")) {
            return Err(anyhow!("test_args must not contain -json or -run"));
        }
        for pattern in &self.diagnostics.error_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("diagnostics.error_patterns entry {pattern:?}"))?;
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GotestConfig::default()`.
pub fn load_config(path: &Path) -> Result<GotestConfig> {
    if !path.exists() {
        return Ok(GotestConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GotestConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GotestConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
