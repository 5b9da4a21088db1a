//! Package discovery: find test files under a module root and compute their
//! import paths from `go.mod`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// A directory holding at least one `_test.go` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPackage {
    pub dir: PathBuf,
    pub import_path: String,
    /// `./rel/dir`, or `.` for the module root.
    pub arg: String,
    /// Test files, sorted.
    pub files: Vec<PathBuf>,
}

/// `module` directive of a `go.mod` file.
pub fn module_path(go_mod: &str) -> Option<String> {
    go_mod.lines().find_map(|line| {
        let line = line.split("//").next().unwrap_or_default().trim();
        let rest = line.strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = rest.trim().trim_matches('"');
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Read the module path at `root`, if there is a `go.mod`.
pub fn read_module(root: &Path) -> Result<Option<String>> {
    let path = root.join("go.mod");
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(module_path(&contents))
}

/// Walk `root` for test packages, skipping hidden directories and any
/// directory named in `skip_dirs`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn discover_packages(root: &Path, skip_dirs: &[String]) -> Result<Vec<DiscoveredPackage>> {
    let module = read_module(root)?;
    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    let walker = WalkDir::new(root).sort_by_file_name().into_iter();
    let entries = walker.filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !name.starts_with('_') && !skip_dirs.iter().any(|skip| *skip == name)
    });
    for entry in entries {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with("_test.go") || name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        by_dir
            .entry(dir.to_path_buf())
            .or_default()
            .push(entry.path().to_path_buf());
    }

    let packages: Vec<DiscoveredPackage> = by_dir
        .into_iter()
        .map(|(dir, mut files)| {
            files.sort();
            let rel = relative_slash_path(root, &dir);
            let import_path = match (&module, rel.is_empty()) {
                (Some(module), true) => module.clone(),
                (Some(module), false) => format!("{module}/{rel}"),
                (None, true) => ".".to_string(),
                (None, false) => rel.clone(),
            };
            let arg = if rel.is_empty() {
                ".".to_string()
            } else {
                format!("./{rel}")
            };
            DiscoveredPackage {
                dir,
                import_path,
                arg,
                files,
            }
        })
        .collect();
    debug!(packages = packages.len(), "discovered test packages");
    Ok(packages)
}

fn relative_slash_path(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
