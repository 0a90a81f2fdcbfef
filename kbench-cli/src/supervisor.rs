//! Workload Process Supervision
//!
//! Launches the benchmarked program as an isolated child held behind a
//! start gate, so samplers can be armed before it performs any work.
//!
//! ```text
//!  start()                      release()             join()
//!    │                             │                    │
//!    ├─ gate pipe (r, w)           ├─ write 1 byte ──►  ├─ launcher → Child
//!    ├─ launcher thread            │   close w          ├─ try_wait loop
//!    │    fork ─► pre_exec:        │                    │   (abort ⇒ SIGTERM,
//!    │            read(r) blocks ◄─┘                    │    then SIGKILL)
//!    │            exec(program)                         └─ ProcessExit
//! ```
//!
//! Dropping the write end without a byte makes `pre_exec` fail, so an
//! unreleased child never reaches `exec`.

use kbench_core::AbortSignal;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Interval between child liveness polls while joining.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` {exit}")]
    Runtime { program: String, exit: ProcessExit },

    #[error("Hook `{command}` {exit}")]
    HookFailed { command: String, exit: ProcessExit },

    #[error("Interrupted by operator")]
    Aborted,
}

impl RunnerError {
    /// Whether no further process of this workload can be started.
    ///
    /// A missing or non-executable binary will fail the same way on every
    /// iteration; anything else may be transient.
    pub fn fatal(&self) -> bool {
        match self {
            RunnerError::SpawnFailed { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Clean exit with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a runtime error for `program`
    pub fn into_result(self, program: &str) -> Result<(), RunnerError> {
        if self.success() {
            Ok(())
        } else {
            Err(RunnerError::Runtime {
                program: program.to_string(),
                exit: self,
            })
        }
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with status {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "exited abnormally"),
        }
    }
}

/// Starts benchmarked processes.
pub trait ProcessRunner: Send + Sync {
    /// Program name used in logs and errors
    fn program(&self) -> &str;

    /// Launch the program with `args` appended, held at the start gate.
    fn start(&self, args: &[String]) -> Result<Box<dyn ProcessHandle>, RunnerError>;
}

/// A launched, gated process.
pub trait ProcessHandle: Send {
    /// Open the gate and let the process run.
    fn release(&mut self);

    /// Block until the process completes.
    ///
    /// When `abort` is raised first the process is terminated and
    /// [`RunnerError::Aborted`] is returned.
    fn join(self: Box<Self>, abort: &AbortSignal) -> Result<ProcessExit, RunnerError>;
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    // Neither end may survive exec.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Close a raw file descriptor.
fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
fn terminate(child: &mut Child) {
    let _ = send_sigterm(child.id());
    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolve `program` the way `execvp` would, before anything is forked.
fn resolve_program(program: &str, current_dir: Option<&Path>) -> Result<PathBuf, io::Error> {
    let not_found = || io::Error::new(io::ErrorKind::NotFound, "no such executable");

    if program.contains('/') {
        let path = match current_dir {
            Some(dir) if Path::new(program).is_relative() => dir.join(program),
            _ => PathBuf::from(program),
        };
        if !path.exists() {
            return Err(not_found());
        }
        if !is_executable(&path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "not an executable file",
            ));
        }
        return std::path::absolute(path);
    }

    let search = std::env::var_os("PATH").ok_or_else(not_found)?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

/// Runs one program with fixed leading arguments, working directory and
/// environment.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    base_args: Vec<String>,
    current_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    silent: bool,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            current_dir: None,
            env: BTreeMap::new(),
            silent: true,
        }
    }

    /// Append a fixed argument placed before the per-workload ones
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.base_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Send stdout/stdin to the null device (default on)
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn base_args(&self) -> &[String] {
        &self.base_args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Variables added on top of the inherited environment
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn spawn_failed(&self, source: io::Error) -> RunnerError {
        RunnerError::SpawnFailed {
            program: self.program.clone(),
            source,
        }
    }
}

impl ProcessRunner for CommandRunner {
    fn program(&self) -> &str {
        &self.program
    }

    fn start(&self, args: &[String]) -> Result<Box<dyn ProcessHandle>, RunnerError> {
        if let Some(dir) = &self.current_dir {
            if !dir.is_dir() {
                return Err(self.spawn_failed(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("working directory {} does not exist", dir.display()),
                )));
            }
        }
        let binary = resolve_program(&self.program, self.current_dir.as_deref())
            .map_err(|e| self.spawn_failed(e))?;

        let (gate_read, gate_write) = create_pipe().map_err(|e| self.spawn_failed(e))?;

        let mut command = Command::new(&binary);
        command
            .args(&self.base_args)
            .args(args)
            .envs(&self.env)
            .stderr(Stdio::inherit());
        if self.silent {
            command.stdin(Stdio::null()).stdout(Stdio::null());
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        // In the child: drop the inherited write end, then wait at the gate.
        unsafe {
            command.pre_exec(move || {
                libc::close(gate_write);
                let mut byte = 0u8;
                loop {
                    let n = libc::read(gate_read, (&mut byte as *mut u8).cast(), 1);
                    if n == 1 {
                        return Ok(());
                    }
                    if n == 0 {
                        return Err(io::Error::from_raw_os_error(libc::ECANCELED));
                    }
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            });
        }

        // spawn() returns only after exec, which the gate holds back.
        let launcher = thread::Builder::new()
            .name("kbench-launcher".to_string())
            .spawn(move || {
                let result = command.spawn();
                close_fd(gate_read);
                result
            });
        let launcher = match launcher {
            Ok(handle) => handle,
            Err(e) => {
                close_fd(gate_read);
                close_fd(gate_write);
                return Err(self.spawn_failed(e));
            }
        };

        debug!(program = %self.program, binary = %binary.display(), "process launched behind gate");
        Ok(Box::new(GatedProcess {
            program: self.program.clone(),
            gate: Some(unsafe { File::from_raw_fd(gate_write) }),
            launcher: Some(launcher),
        }))
    }
}

/// Child process held behind a gate pipe
struct GatedProcess {
    program: String,
    gate: Option<File>,
    launcher: Option<JoinHandle<io::Result<Child>>>,
}

impl GatedProcess {
    fn spawn_failed(&self, source: io::Error) -> RunnerError {
        RunnerError::SpawnFailed {
            program: self.program.clone(),
            source,
        }
    }

    fn take_child(&mut self) -> Result<Child, RunnerError> {
        let launcher = self
            .launcher
            .take()
            .ok_or_else(|| self.spawn_failed(io::Error::other("process already joined")))?;
        match launcher.join() {
            Ok(result) => result.map_err(|e| self.spawn_failed(e)),
            Err(_) => Err(self.spawn_failed(io::Error::other("launcher thread panicked"))),
        }
    }
}

impl ProcessHandle for GatedProcess {
    fn release(&mut self) {
        if let Some(mut gate) = self.gate.take() {
            if let Err(e) = gate.write_all(&[1]) {
                warn!(program = %self.program, "failed to open start gate: {}", e);
            }
        }
    }

    fn join(mut self: Box<Self>, abort: &AbortSignal) -> Result<ProcessExit, RunnerError> {
        // Never wait on a gate that is still shut.
        self.gate.take();
        let mut child = self.take_child()?;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.into()),
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(self.spawn_failed(e));
                }
            }
            if abort.is_aborted() {
                warn!(program = %self.program, pid = child.id(), "terminating process");
                terminate(&mut child);
                return Err(RunnerError::Aborted);
            }
            thread::sleep(JOIN_POLL);
        }
    }
}

impl Drop for GatedProcess {
    fn drop(&mut self) {
        self.gate.take();
        if let Some(launcher) = self.launcher.take() {
            if let Ok(Ok(mut child)) = launcher.join() {
                terminate(&mut child);
            }
        }
    }
}

/// Run a workload hook through `sh -c` in `dir`, outside the measured window.
pub fn run_hook(command: &str, dir: Option<&Path>) -> Result<(), RunnerError> {
    let mut shell = Command::new("sh");
    shell
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null());
    if let Some(dir) = dir {
        shell.current_dir(dir);
    }

    let status = shell.status().map_err(|source| RunnerError::SpawnFailed {
        program: "sh".to_string(),
        source,
    })?;
    let exit = ProcessExit::from(status);
    if exit.success() {
        Ok(())
    } else {
        Err(RunnerError::HookFailed {
            command: command.to_string(),
            exit,
        })
    }
}
