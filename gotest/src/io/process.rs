//! Line streaming from a child process.
//!
//! Stdout and stderr are drained by reader threads into one channel so the
//! caller sees lines as they are written and can poll with a timeout (for
//! cancellation and the wall-clock budget) without risking pipe deadlocks.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// One line of child output, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessLine {
    Stdout(String),
    Stderr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextLine {
    Line(ProcessLine),
    /// Nothing arrived within the poll timeout.
    Idle,
    /// Both streams are closed.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub success: bool,
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            success: status.success(),
        }
    }
}

/// A running producer of output lines.
pub trait LineSource: Send {
    fn next_line(&mut self, timeout: Duration) -> NextLine;
    /// Stop the producer early.
    fn terminate(&mut self) -> Result<()>;
    /// Wait for the producer to exit.
    fn finish(&mut self) -> Result<ProcessExit>;
}

/// A spawned child whose stdout/stderr are read line by line.
pub struct StreamingChild {
    child: Child,
    lines: Receiver<ProcessLine>,
    readers: Vec<thread::JoinHandle<()>>,
}

impl StreamingChild {
    #[instrument(skip_all, fields(program = ?cmd.get_program()))]
    pub fn spawn(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(e).context("spawn command");
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, rx) = mpsc::channel();
        let stderr_tx = tx.clone();
        let readers = vec![
            thread::spawn(move || forward_lines(stdout, tx, ProcessLine::Stdout)),
            thread::spawn(move || forward_lines(stderr, stderr_tx, ProcessLine::Stderr)),
        ];

        Ok(Self {
            child,
            lines: rx,
            readers,
        })
    }
}

impl LineSource for StreamingChild {
    fn next_line(&mut self, timeout: Duration) -> NextLine {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => NextLine::Line(line),
            Err(RecvTimeoutError::Timeout) => NextLine::Idle,
            Err(RecvTimeoutError::Disconnected) => NextLine::Closed,
        }
    }

    fn terminate(&mut self) -> Result<()> {
        if self.child.try_wait().context("poll command")?.is_some() {
            return Ok(());
        }
        warn!(pid = self.child.id(), "killing test process");
        self.child.kill().context("kill command")
    }

    fn finish(&mut self) -> Result<ProcessExit> {
        // Readers end once the pipes close; a grandchild holding them open
        // must not block us forever.
        let status = match self
            .child
            .wait_timeout(Duration::from_secs(5))
            .context("wait for command")?
        {
            Some(status) => status,
            None => {
                warn!("command still running after its output closed, killing");
                self.child.kill().context("kill command")?;
                self.child.wait().context("wait command after kill")?
            }
        };
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                warn!("output reader thread panicked");
            }
        }
        debug!(exit_code = ?status.code(), "command finished");
        Ok(status.into())
    }
}

fn forward_lines<R: Read>(reader: R, tx: Sender<ProcessLine>, wrap: fn(String) -> ProcessLine) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "read child output");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn drain(source: &mut StreamingChild) -> Vec<ProcessLine> {
        let mut lines = Vec::new();
        loop {
            match source.next_line(Duration::from_secs(5)) {
                NextLine::Line(line) => lines.push(line),
                NextLine::Idle => continue,
                NextLine::Closed => break,
            }
        }
        lines
    }

    #[test]
    fn streams_stdout_and_stderr_lines() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo one; echo two 1>&2; printf three; exit 3");
        let mut child = StreamingChild::spawn(cmd).expect("spawn");
        let lines = drain(&mut child);
        let exit = child.finish().expect("finish");

        assert!(lines.contains(&ProcessLine::Stdout("one".into())));
        assert!(lines.contains(&ProcessLine::Stdout("three".into())));
        assert!(lines.contains(&ProcessLine::Stderr("two".into())));
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
    }

    #[test]
    fn terminate_stops_a_long_running_child() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo started; exec sleep 30");
        let mut child = StreamingChild::spawn(cmd).expect("spawn");
        assert_eq!(
            child.next_line(Duration::from_secs(5)),
            NextLine::Line(ProcessLine::Stdout("started".into()))
        );
        child.terminate().expect("terminate");
        let exit = child.finish().expect("finish");
        assert!(!exit.success);
    }
}
