//! Orchestration for one test invocation.
//!
//! A session owns a tree snapshot and its own result set. It launches the
//! tool through an [`Invoker`], feeds every line to the correlator in arrival
//! order and hands back the annotated tree once the process is gone.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::aggregate::AnnotatedTree;
use crate::core::classifier::OutputClassifier;
use crate::core::correlate::{Correlator, Progress, StreamEnd};
use crate::core::events::decode_line;
use crate::core::pattern::{InvocationSpec, PatternError, compile, covered_nodes};
use crate::core::types::ResultSet;
use crate::io::config::GotestConfig;
use crate::io::invoker::Invoker;
use crate::io::process::{NextLine, ProcessLine};
use crate::tree::{NodeId, Tree};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wall-clock budget; exceeding it cancels the session.
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub sanitize_output: bool,
    /// How often the loop wakes up to check for cancellation.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&GotestConfig::default())
    }
}

impl SessionConfig {
    pub fn from_config(cfg: &GotestConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
            sanitize_output: cfg.sanitize_output,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Cooperative cancellation for a running session.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub annotated: AnnotatedTree,
    pub invocation: InvocationSpec,
    /// Stopped by a cancel request or the timeout.
    pub cancelled: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
}

pub struct Session {
    tree: Arc<Tree>,
    spec: InvocationSpec,
    covered: Vec<NodeId>,
    config: SessionConfig,
    cancel: CancelHandle,
}

impl Session {
    pub fn new(
        tree: Arc<Tree>,
        target: Option<NodeId>,
        config: SessionConfig,
    ) -> Result<Self, PatternError> {
        let spec = compile(&tree, target)?;
        let covered = covered_nodes(&tree, target);
        Ok(Self {
            tree,
            spec,
            covered,
            config,
            cancel: CancelHandle::default(),
        })
    }

    pub fn invocation(&self) -> &InvocationSpec {
        &self.spec
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run the invocation to completion, reporting progress as it happens.
    #[instrument(skip_all, fields(target = ?self.spec.target, run = ?self.spec.run_pattern))]
    pub fn run<F: FnMut(&Progress)>(
        self,
        invoker: &dyn Invoker,
        classifier: &dyn OutputClassifier,
        mut observer: F,
    ) -> Result<SessionOutcome> {
        let deadline = Instant::now() + self.config.timeout;
        let mut results = ResultSet::with_output_limit(self.config.output_limit_bytes);
        let mut correlator = Correlator::new(
            &self.tree,
            self.covered.clone(),
            classifier,
            self.config.sanitize_output,
        );
        correlator.begin(&mut results);

        let mut source = match invoker.launch(&self.spec) {
            Ok(source) => source,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test tool failed to launch");
                correlator.fail_launch(&format!("{err:#}"), &mut results);
                return Ok(self.outcome(results, false, false, None));
            }
        };

        info!("session started");
        let mut cancelled = false;
        let mut timed_out = false;
        loop {
            if self.cancel.is_cancelled() {
                info!("session cancelled");
                cancelled = true;
                source.terminate()?;
                break;
            }
            if Instant::now() >= deadline {
                warn!(timeout_secs = self.config.timeout.as_secs(), "session timed out");
                cancelled = true;
                timed_out = true;
                source.terminate()?;
                break;
            }
            match source.next_line(self.config.poll_interval) {
                NextLine::Line(ProcessLine::Stdout(line)) => match decode_line(&line) {
                    Some(event) => {
                        for progress in correlator.apply(&event, &mut results) {
                            observer(&progress);
                        }
                    }
                    None => correlator.record_stderr(&line),
                },
                NextLine::Line(ProcessLine::Stderr(line)) => {
                    debug!(line, "tool stderr");
                    correlator.record_stderr(&line);
                }
                NextLine::Idle => {}
                NextLine::Closed => break,
            }
        }

        let exit = source.finish()?;
        let end = StreamEnd {
            cancelled,
            exit_code: exit.code,
            run_pattern: self.spec.run_pattern.clone(),
        };
        for progress in correlator.finish(&end, self.spec.target, &mut results) {
            observer(&progress);
        }
        info!(exit_code = ?exit.code, cancelled, "session finished");
        Ok(self.outcome(results, cancelled, timed_out, exit.code))
    }

    fn outcome(
        &self,
        results: ResultSet,
        cancelled: bool,
        timed_out: bool,
        exit_code: Option<i32>,
    ) -> SessionOutcome {
        SessionOutcome {
            annotated: AnnotatedTree {
                tree: Arc::clone(&self.tree),
                results,
            },
            invocation: self.spec.clone(),
            cancelled,
            timed_out,
            exit_code,
        }
    }
}
