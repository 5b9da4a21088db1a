//! `gotest`: discover Go tests, compile run patterns and execute them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use gotest::core::correlate::Progress;
use gotest::core::pattern::compile;
use gotest::core::types::RunStatus;
use gotest::exit_codes;
use gotest::io::report::{Report, write_report};
use gotest::logging;
use gotest::project::{Project, TargetSelector};
use gotest::tree::{NodeId, Tree};

#[derive(Parser)]
#[command(name = "gotest", version, about = "Go test discovery and execution")]
struct Cli {
    /// Raise tracing verbosity on stderr (repeatable). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the test tree of a module.
    Discover {
        #[command(flatten)]
        root: RootArgs,
        /// Print the tree as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the `go test` command that runs a node.
    Pattern {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Run tests and map the results onto the tree.
    Run {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        target: TargetArgs,
        /// Print the annotated tree as JSON instead of progress lines.
        #[arg(long)]
        json: bool,
        /// Also write the annotated tree as JSON to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RootArgs {
    /// Module root (defaults to the current directory).
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Args)]
struct TargetArgs {
    /// Node id, as printed by `gotest discover`.
    #[arg(long, conflicts_with_all = ["file", "line"])]
    id: Option<String>,
    /// Source file of the node to run.
    #[arg(long, requires = "line")]
    file: Option<PathBuf>,
    /// Line inside `--file`; the innermost enclosing test is selected.
    #[arg(long, requires = "file")]
    line: Option<u32>,
}

impl TargetArgs {
    fn selector(self) -> TargetSelector {
        match (self.id, self.file, self.line) {
            (Some(id), _, _) => TargetSelector::Id(id),
            (None, Some(file), Some(line)) => TargetSelector::Position { file, line },
            _ => TargetSelector::All,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Discover { root, json } => cmd_discover(&root.root, json),
        Command::Pattern { root, target } => cmd_pattern(&root.root, target.selector()),
        Command::Run {
            root,
            target,
            json,
            report,
        } => cmd_run(&root.root, target.selector(), json, report.as_deref()),
    }
}

fn cmd_discover(root: &Path, json: bool) -> Result<i32> {
    let project = Project::open(root)?;
    for warning in project.warnings() {
        eprintln!("warning: {warning}");
    }
    let tree = project.tree();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(tree.as_ref()).context("serialize tree")?
        );
        return Ok(exit_codes::OK);
    }
    for root in tree.roots() {
        for id in tree.subtree(*root) {
            let node = tree.node(id);
            let depth = tree.ancestors(id).count();
            println!(
                "{:indent$}{} {} [{}-{}]",
                "",
                node.kind.label(),
                node.id,
                node.position.start_line(),
                node.position.end_line(),
                indent = depth * 2
            );
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_pattern(root: &Path, selector: TargetSelector) -> Result<i32> {
    let project = Project::open(root)?;
    let tree = project.tree();
    let target = project.resolve_target(&selector)?;
    let spec = compile(&tree, target)?;
    println!("{}", project.invoker().display(&spec));
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, selector: TargetSelector, json: bool, report: Option<&Path>) -> Result<i32> {
    let project = Project::open(root)?;
    let tree = project.tree();
    let target = project.resolve_target(&selector)?;
    let session = project.session(target)?;
    let invoker = project.invoker();

    let outcome = session.run(&invoker, project.classifier(), |progress| {
        if !json {
            print_progress(&tree, progress);
        }
    })?;

    if let Some(path) = report {
        write_report(path, &outcome.annotated)?;
    }

    let annotated = &outcome.annotated;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&Report::new(annotated)).context("serialize report")?
        );
    } else {
        for (id, result) in annotated.results.iter() {
            let node = tree.node(id);
            for diagnostic in &result.diagnostics {
                let file = diagnostic
                    .file
                    .clone()
                    .unwrap_or_else(|| node.position.file.display().to_string());
                println!("{file}:{}: {}", diagnostic.line, diagnostic.message);
            }
        }
        let (passed, failed, skipped) = annotated.leaf_counts();
        println!("passed {passed}, failed {failed}, skipped {skipped}");
        if outcome.timed_out {
            println!("timed out");
        }
    }

    if outcome.cancelled {
        return Ok(exit_codes::CANCELLED);
    }
    let any_failed = annotated
        .results
        .iter()
        .any(|(_, result)| result.status == RunStatus::Failed);
    Ok(if any_failed {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

fn print_progress(tree: &Tree, progress: &Progress) {
    let label = |id: NodeId| {
        let node = tree.node(id);
        node.run_name().unwrap_or_else(|| node.id.clone())
    };
    match progress {
        Progress::Started(id) => println!("=== RUN   {}", label(*id)),
        Progress::Finished { node, status } => {
            println!("--- {}: {}", status.label().to_uppercase(), label(*node));
        }
        Progress::Output { .. } => {}
    }
}
