use crate::kernel::namespace::NamespaceFlags;
/// Deadline-bounded subprocess execution with combined output capture
use crate::kernel::signal::{terminate_process_tree, KillReport};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use nix::fcntl::OFlag;
use nix::unistd::{pipe2, Pid};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 4096;

/// Limits applied to every subprocess
#[derive(Clone, Debug)]
pub struct ExecLimits {
    /// Wall-clock deadline
    pub timeout: Duration,
    /// SIGTERM to SIGKILL delay on expiry
    pub kill_grace: Duration,
    /// Combined output cap (bytes)
    pub output_limit: usize,
    /// Drain window after the subprocess exits
    pub collection_timeout: Duration,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            kill_grace: Duration::from_millis(200),
            output_limit: 10 * 1024 * 1024,
            collection_timeout: Duration::from_secs(5),
        }
    }
}

/// Why a subprocess did not succeed
#[derive(Error, Debug)]
pub enum ExecFailure {
    #[error("launch failed: {0}")]
    Launch(std::io::Error),

    #[error("exit status {0}")]
    Exit(i32),

    #[error("signal: {0}")]
    Signaled(String),

    #[error("context deadline exceeded after {0:?}, process tree killed")]
    TimedOut(Duration),

    #[error("wait failed: {0}")]
    Wait(std::io::Error),
}

/// Program and argv of one subprocess
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `/bin/sh -c <command>` on the host
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new("/bin/sh", vec!["-c".to_string(), command.into()])
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Quote `word` as a single `/bin/sh` word; plain words pass through unchanged
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_-./,:=+@%".contains(&b));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Raw result of a subprocess: combined output plus the failure, if any
#[derive(Debug)]
pub struct ExecOutcome {
    pub output: Vec<u8>,
    pub failure: Option<ExecFailure>,
    /// Output hit the configured cap
    pub truncated: bool,
    pub kill_report: Option<KillReport>,
    pub wall_time: Duration,
}

impl ExecOutcome {
    fn launch_failed(err: std::io::Error) -> Self {
        Self {
            output: Vec::new(),
            failure: Some(ExecFailure::Launch(err)),
            truncated: false,
            kill_report: None,
            wall_time: Duration::ZERO,
        }
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.failure, Some(ExecFailure::TimedOut(_)))
    }
}

/// Runs commands inside a target's namespaces through the nsexec helper
#[derive(Clone, Debug)]
pub struct NamespaceExecutor {
    helper: PathBuf,
    limits: ExecLimits,
}

impl NamespaceExecutor {
    pub fn new(helper: impl Into<PathBuf>, limits: ExecLimits) -> Self {
        Self {
            helper: helper.into(),
            limits,
        }
    }

    pub fn helper(&self) -> &Path {
        &self.helper
    }

    pub fn limits(&self) -> &ExecLimits {
        &self.limits
    }

    /// `<helper> -t <pid> [-p] [-m] [-n] -- /bin/sh -c <command>`
    pub fn invocation(&self, flags: &NamespaceFlags, command: &str) -> Invocation {
        let mut args = flags.helper_args();
        args.push(command.to_string());
        Invocation::new(&self.helper, args)
    }

    /// Run `command` inside the namespaces selected by `flags`
    pub fn execute(&self, flags: &NamespaceFlags, command: &str) -> (Invocation, ExecOutcome) {
        self.execute_until(flags, command, Instant::now() + self.limits.timeout)
    }

    /// Like [`execute`](Self::execute), but bounded by a deadline shared with
    /// earlier steps of the same call.
    pub fn execute_until(
        &self,
        flags: &NamespaceFlags,
        command: &str,
        deadline: Instant,
    ) -> (Invocation, ExecOutcome) {
        let invocation = self.invocation(flags, command);
        log::debug!("Command: {}", invocation);
        let outcome = run_until(&invocation, &self.limits, deadline);
        (invocation, outcome)
    }
}

/// Reader thread over the read end of the output pipe.
///
/// The descriptor is non-blocking so the thread can be told to stop while a
/// surviving descendant still holds the write end.
struct OutputReader {
    chunks: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn(source: OwnedFd) -> std::io::Result<Self> {
        set_nonblocking(&source)?;
        let (tx, chunks) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut source = File::from(source);
            let mut chunk = [0u8; READ_CHUNK];
            while !stopped.load(Ordering::Relaxed) {
                match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        wait_readable(&source, POLL_INTERVAL)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::debug!("Output reader stopped: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(Self {
            chunks,
            stop,
            handle,
        })
    }

    /// Stop reading and close the read end
    fn close(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            log::warn!("Output reader panicked");
        }
    }
}

fn set_nonblocking(fd: &OwnedFd) -> std::io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn wait_readable(source: &File, timeout: Duration) {
    let mut pollfd = libc::pollfd {
        fd: source.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    unsafe {
        libc::poll(&mut pollfd, 1, timeout.as_millis() as libc::c_int);
    }
}

struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Spawn `invocation` in its own process group with stdout and stderr on one
/// pipe, and wait for it under `limits.timeout`.
///
/// On expiry the whole process tree is terminated and the outcome carries
/// [`ExecFailure::TimedOut`].
pub fn run_with_deadline(invocation: &Invocation, limits: &ExecLimits) -> ExecOutcome {
    run_until(invocation, limits, Instant::now() + limits.timeout)
}

/// [`run_with_deadline`] against a fixed `deadline`. Nothing is spawned when
/// the deadline has already passed.
pub fn run_until(invocation: &Invocation, limits: &ExecLimits, deadline: Instant) -> ExecOutcome {
    if Instant::now() >= deadline {
        return ExecOutcome {
            output: Vec::new(),
            failure: Some(ExecFailure::TimedOut(limits.timeout)),
            truncated: false,
            kill_report: None,
            wall_time: Duration::ZERO,
        };
    }

    let (read_end, write_end) = match pipe2(OFlag::O_CLOEXEC) {
        Ok(fds) => fds,
        Err(e) => return ExecOutcome::launch_failed(std::io::Error::from(e)),
    };
    let stderr_end = match write_end.try_clone() {
        Ok(fd) => fd,
        Err(e) => return ExecOutcome::launch_failed(e),
    };

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end))
        .process_group(0);

    let started = Instant::now();
    let spawned = command.spawn();
    // Release the parent's copies of the write end so EOF follows child exit.
    drop(command);

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => return ExecOutcome::launch_failed(e),
    };
    let child_pid = Pid::from_raw(child.id() as i32);
    let reader = match OutputReader::spawn(read_end) {
        Ok(reader) => reader,
        Err(e) => {
            let report = terminate_process_tree(child_pid, limits.kill_grace);
            let _ = child.wait();
            return ExecOutcome {
                kill_report: Some(report),
                ..ExecOutcome::launch_failed(e)
            };
        }
    };
    let chunks = &reader.chunks;

    let mut buffer = OutputBuffer {
        data: Vec::new(),
        limit: limits.output_limit,
        truncated: false,
    };

    let (failure, kill_report) = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let failure = match (status.code(), status.signal()) {
                    (Some(0), _) => None,
                    (Some(code), _) => Some(ExecFailure::Exit(code)),
                    (None, Some(sig)) => Some(ExecFailure::Signaled(signal_name(sig))),
                    (None, None) => Some(ExecFailure::Signaled("unknown".to_string())),
                };
                break (failure, None);
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let report = terminate_process_tree(child_pid, limits.kill_grace);
                    crate::observability::audit::events::forced_kill(
                        &invocation.to_string(),
                        child_pid.as_raw(),
                        &report,
                    );
                    let _ = child.wait();
                    break (Some(ExecFailure::TimedOut(limits.timeout)), Some(report));
                }
                match chunks.recv_timeout(POLL_INTERVAL) {
                    Ok(chunk) => buffer.push(&chunk),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
                }
            }
            Err(e) => {
                let report = terminate_process_tree(child_pid, limits.kill_grace);
                let _ = child.wait();
                break (Some(ExecFailure::Wait(e)), Some(report));
            }
        }
    };

    let drain_deadline = Instant::now() + limits.collection_timeout;
    loop {
        match chunks.recv_deadline(drain_deadline) {
            Ok(chunk) => buffer.push(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Output of '{}' still open after {:?}; a background descendant holds it, closing",
                    invocation.program.display(),
                    limits.collection_timeout
                );
                break;
            }
        }
    }
    reader.close();

    if buffer.truncated {
        log::warn!(
            "Output of '{}' truncated at {} bytes",
            invocation.program.display(),
            limits.output_limit
        );
    }

    ExecOutcome {
        output: buffer.data,
        failure,
        truncated: buffer.truncated,
        kill_report,
        wall_time: started.elapsed(),
    }
}

fn signal_name(sig: i32) -> String {
    nix::sys::signal::Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| sig.to_string())
}
