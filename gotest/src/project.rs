//! A Go module on disk: its configuration, discovered packages and the test
//! tree built from them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::builder::{BuildOptions, BuildWarning, FileInput, PackageInput, build_tree};
use crate::core::classifier::PatternClassifier;
use crate::core::matcher::{GoMatcher, Matcher};
use crate::core::selector::nearest_node;
use crate::io::config::{CONFIG_FILE, GotestConfig, load_config};
use crate::io::discovery::{DiscoveredPackage, discover_packages};
use crate::io::invoker::GoInvoker;
use crate::session::{Session, SessionConfig};
use crate::tree::{NodeId, Tree};

/// How a caller names what to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    All,
    Id(String),
    /// The innermost node enclosing `line` of `file`.
    Position { file: PathBuf, line: u32 },
}

pub struct Project {
    root: PathBuf,
    config: GotestConfig,
    matcher: GoMatcher,
    classifier: PatternClassifier,
    tree: Arc<Tree>,
    warnings: Vec<BuildWarning>,
}

impl Project {
    /// Open the module at `root`, reading `.gotest.toml` when present.
    pub fn open(root: &Path) -> Result<Self> {
        let config = load_config(&root.join(CONFIG_FILE))?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: &Path, config: GotestConfig) -> Result<Self> {
        config.validate()?;
        let classifier = PatternClassifier::new(&config.diagnostics.error_patterns)
            .context("compile diagnostics.error_patterns")?;
        let matcher = GoMatcher::new().context("initialise Go query matcher")?;
        let root =
            fs::canonicalize(root).with_context(|| format!("resolve {}", root.display()))?;
        let mut project = Self {
            root,
            config,
            matcher,
            classifier,
            tree: Arc::new(Tree::new()),
            warnings: Vec::new(),
        };
        project.rebuild()?;
        Ok(project)
    }

    /// Rediscover packages and rebuild the tree from the current sources.
    /// Sessions already holding the previous snapshot are unaffected.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn rebuild(&mut self) -> Result<()> {
        let discovered = discover_packages(&self.root, &self.config.skip_dirs)?;
        let packages = load_packages(&discovered, &self.matcher);
        let options = BuildOptions {
            testify: self.config.testify,
            warn_duplicates: self.config.warn_test_name_dupes,
            ..BuildOptions::default()
        };
        let output = build_tree(packages, &options);
        info!(
            nodes = output.tree.len(),
            warnings = output.warnings.len(),
            "test tree built"
        );
        self.tree = Arc::new(output.tree);
        self.warnings = output.warnings;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &GotestConfig {
        &self.config
    }

    /// Current tree snapshot.
    pub fn tree(&self) -> Arc<Tree> {
        Arc::clone(&self.tree)
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    pub fn classifier(&self) -> &PatternClassifier {
        &self.classifier
    }

    pub fn resolve_target(&self, selector: &TargetSelector) -> Result<Option<NodeId>> {
        match selector {
            TargetSelector::All => Ok(None),
            TargetSelector::Id(id) => self
                .tree
                .find(id)
                .map(Some)
                .ok_or_else(|| anyhow!("no test node with id {id}")),
            TargetSelector::Position { file, line } => {
                let file = if file.is_absolute() || file.exists() {
                    file.clone()
                } else {
                    self.root.join(file)
                };
                let file = fs::canonicalize(&file).unwrap_or(file);
                nearest_node(&self.tree, &file, *line)
                    .map(Some)
                    .ok_or_else(|| anyhow!("no test file matches {}", file.display()))
            }
        }
    }

    pub fn invoker(&self) -> GoInvoker {
        GoInvoker {
            go_binary: self.config.go_binary.clone(),
            workdir: self.root.clone(),
            test_args: self.config.test_args.clone(),
            env: self.config.env.clone(),
        }
    }

    pub fn session(&self, target: Option<NodeId>) -> Result<Session> {
        let session = Session::new(self.tree(), target, SessionConfig::from_config(&self.config))?;
        Ok(session)
    }
}

/// Read and match every test file. Files that cannot be read or parsed are
/// dropped with a warning.
pub fn load_packages(
    discovered: &[DiscoveredPackage],
    matcher: &dyn Matcher,
) -> Vec<PackageInput> {
    let mut packages = Vec::with_capacity(discovered.len());
    for package in discovered {
        let mut files = Vec::with_capacity(package.files.len());
        for path in &package.files {
            let bytes = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%err, file = %path.display(), "skipping unreadable test file");
                    continue;
                }
            };
            let source = String::from_utf8_lossy(&bytes);
            match matcher.match_source(&source) {
                Ok(records) => {
                    debug!(file = %path.display(), records = records.len(), "matched test file");
                    files.push(FileInput::new(path.clone(), &source, records));
                }
                Err(err) => warn!(%err, file = %path.display(), "skipping unparsable test file"),
            }
        }
        packages.push(PackageInput {
            import_path: package.import_path.clone(),
            dir: package.dir.clone(),
            arg: package.arg.clone(),
            files,
        });
    }
    packages
}
