//! External process execution with a wall-clock timeout.
//!
//! Sub-validators are opaque programs; all the engine sees is an exit code,
//! captured output, a timeout, or a spawn failure. [`ProcessRunner`] is the
//! seam tests use to script those outcomes.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Minimum wait for pipes to close after exit, even past the deadline.
const PIPE_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Validator name, used by test doubles to script outcomes.
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited {
        /// `None` when terminated by a signal.
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    SpawnFailed(String),
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: Some(0), .. })
    }

    /// One-line explanation of a non-success outcome.
    pub fn describe(&self, invocation: &Invocation) -> String {
        match self {
            ProcessOutcome::Exited { code: Some(c), .. } => {
                format!("`{}` exited with code {}", invocation.command_line(), c)
            }
            ProcessOutcome::Exited { code: None, .. } => {
                format!("`{}` was terminated by a signal", invocation.command_line())
            }
            ProcessOutcome::TimedOut => format!(
                "`{}` timed out after {}s",
                invocation.command_line(),
                invocation.timeout.as_secs()
            ),
            ProcessOutcome::SpawnFailed(reason) => {
                format!("`{}` could not be started: {}", invocation.command_line(), reason)
            }
        }
    }

    /// Combined captured output, stdout first.
    pub fn output(&self) -> String {
        match self {
            ProcessOutcome::Exited { stdout, stderr, .. } => {
                format!("{}\n{}", stdout.trim_end(), stderr.trim_end())
                    .trim()
                    .to_string()
            }
            _ => String::new(),
        }
    }
}

pub trait ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> ProcessOutcome;
}

/// Runs real child processes, one at a time.
///
/// On unix each child leads its own process group, so a timeout takes down
/// everything it started, and a background process left holding the output
/// pipes cannot stretch the run past its deadline.
#[derive(Debug, Default)]
pub struct SystemRunner;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Chunk = (Stream, Vec<u8>);

/// Forward a pipe in chunks until EOF; the sender drops when the pipe closes.
fn drain<R: Read + Send + 'static>(stream: Option<R>, kind: Stream, tx: Sender<Chunk>) {
    let Some(mut stream) = stream else {
        return;
    };
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((kind, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Captured {
    /// Collect chunks until both pipes close (`true`) or `deadline` passes (`false`).
    fn collect_until(&mut self, rx: &Receiver<Chunk>, deadline: Instant) -> bool {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((Stream::Stdout, chunk)) => self.stdout.extend_from_slice(&chunk),
                Ok((Stream::Stderr, chunk)) => self.stderr.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }
}

fn command_for(invocation: &Invocation) -> Command {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

/// Kill the child and, on unix, every process in its group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
}

impl ProcessRunner for SystemRunner {
    fn run(&mut self, invocation: &Invocation) -> ProcessOutcome {
        tracing::debug!("running {}", invocation.command_line());
        let start = Instant::now();
        let deadline = start + invocation.timeout;
        let mut child = match command_for(invocation).spawn() {
            Ok(child) => child,
            Err(e) => return ProcessOutcome::SpawnFailed(e.to_string()),
        };

        let (tx, rx) = mpsc::channel();
        drain(child.stdout.take(), Stream::Stdout, tx.clone());
        drain(child.stderr.take(), Stream::Stderr, tx);

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let mut captured = Captured::default();
                    let pipe_deadline = deadline.max(Instant::now() + PIPE_GRACE);
                    if !captured.collect_until(&rx, pipe_deadline) {
                        tracing::warn!(
                            "{} exited with its pipes still held open; stopping leftovers",
                            invocation.name
                        );
                        kill_tree(&mut child);
                    }
                    tracing::debug!(
                        "{} finished in {}ms with {:?}",
                        invocation.name,
                        start.elapsed().as_millis(),
                        status.code()
                    );
                    return ProcessOutcome::Exited {
                        code: status.code(),
                        stdout: String::from_utf8_lossy(&captured.stdout).to_string(),
                        stderr: String::from_utf8_lossy(&captured.stderr).to_string(),
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    kill_tree(&mut child);
                    let _ = child.wait();
                    return ProcessOutcome::SpawnFailed(e.to_string());
                }
            }
            if Instant::now() >= deadline {
                kill_tree(&mut child);
                let _ = child.wait();
                tracing::warn!(
                    "{} timed out after {}s",
                    invocation.name,
                    invocation.timeout.as_secs()
                );
                return ProcessOutcome::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Replays queued outcomes per validator name; unscripted calls exit 0.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedRunner {
    outcomes: std::collections::HashMap<String, std::collections::VecDeque<ProcessOutcome>>,
    pub calls: Vec<String>,
}

#[cfg(test)]
impl ScriptedRunner {
    pub fn exit(code: i32, stdout: &str) -> ProcessOutcome {
        ProcessOutcome::Exited {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn script(mut self, name: &str, outcomes: Vec<ProcessOutcome>) -> Self {
        self.outcomes
            .entry(name.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| c.as_str() == name).count()
    }
}

#[cfg(test)]
impl ProcessRunner for ScriptedRunner {
    fn run(&mut self, invocation: &Invocation) -> ProcessOutcome {
        self.calls.push(invocation.name.clone());
        self.outcomes
            .get_mut(&invocation.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Self::exit(0, ""))
    }
}
