//! Testify suite resolution across the files of one package.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::{FileIndex, TESTIFY_SUITE_IMPORT};

#[derive(Debug, Default)]
pub(crate) struct SuiteIndex {
    suites: BTreeSet<String>,
    /// Suite type to the test function that calls `suite.Run` for it.
    runners: HashMap<String, String>,
}

impl SuiteIndex {
    pub(crate) fn resolve(files: &[FileIndex]) -> Self {
        let decls: Vec<_> = files
            .iter()
            .flat_map(|file| {
                let aliases = suite_aliases(file);
                file.structs
                    .iter()
                    .map(move |(_, decl)| (decl, aliases.clone()))
            })
            .collect();

        // Embedding is transitive, so iterate to a fixpoint.
        let mut suites = BTreeSet::new();
        loop {
            let before = suites.len();
            for (decl, aliases) in &decls {
                if suites.contains(&decl.name) {
                    continue;
                }
                let embeds_suite = decl.embeds.iter().any(|embed| match &embed.package {
                    Some(package) => embed.name == "Suite" && aliases.contains(package.as_str()),
                    None => {
                        (embed.name == "Suite" && aliases.contains(""))
                            || suites.contains(&embed.name)
                    }
                });
                if embeds_suite {
                    suites.insert(decl.name.clone());
                }
            }
            if suites.len() == before {
                break;
            }
        }

        let mut runners: HashMap<String, String> = HashMap::new();
        for file in files {
            let aliases = suite_aliases(file);
            for (span, run) in &file.suite_runs {
                if !aliases.contains(run.operand.as_str()) || !suites.contains(&run.suite_type) {
                    continue;
                }
                let Some((_, func)) = file
                    .functions
                    .iter()
                    .find(|(_, func)| func.body.contains(span))
                else {
                    continue;
                };
                match runners.get(&run.suite_type) {
                    Some(existing) if *existing != func.name => {
                        debug!(suite = %run.suite_type, %existing, other = %func.name, "suite has several runners; keeping the first");
                    }
                    Some(_) => {}
                    None => {
                        runners.insert(run.suite_type.clone(), func.name.clone());
                    }
                }
            }
        }

        debug!(suites = suites.len(), runners = runners.len(), "resolved testify suites");
        Self { suites, runners }
    }

    pub(crate) fn is_suite(&self, name: &str) -> bool {
        self.suites.contains(name)
    }

    pub(crate) fn runner(&self, suite: &str) -> Option<&str> {
        self.runners.get(suite).map(String::as_str)
    }

    /// First run path segment of the suite's methods.
    pub(crate) fn segment(&self, suite: &str) -> String {
        self.runner(suite).unwrap_or(suite).to_string()
    }

    /// Suites that own test methods but are never passed to `suite.Run`.
    pub(crate) fn without_runner(&self, files: &[FileIndex]) -> Vec<String> {
        let with_methods: BTreeSet<&str> = files
            .iter()
            .flat_map(|file| file.methods.iter())
            .map(|(_, method)| method.receiver_type.as_str())
            .filter(|ty| self.is_suite(ty))
            .collect();
        with_methods
            .into_iter()
            .filter(|suite| self.runner(suite).is_none())
            .map(str::to_string)
            .collect()
    }
}

/// Local names of the testify suite package in `file`. A dot import is
/// recorded as the empty name.
fn suite_aliases(file: &FileIndex) -> HashSet<String> {
    file.imports
        .iter()
        .filter(|(_, import)| import.path == TESTIFY_SUITE_IMPORT)
        .filter_map(|(_, import)| match import.alias.as_deref() {
            None => Some("suite".to_string()),
            Some("_") => None,
            Some(".") => Some(String::new()),
            Some(alias) => Some(alias.to_string()),
        })
        .collect()
}
