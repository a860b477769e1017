//! Child-process plumbing shared by every external renderer.

use std::{
    env,
    ffi::{OsStr, OsString},
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::{debug, warn};

/// Executable search path handed to every spawned tool.
///
/// `None` means the child inherits the service's own `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    search_path: Option<OsString>,
}

impl ProcessEnv {
    /// Search `dir` before the service's `PATH`, unless it is already listed there.
    pub fn with_prepended_dir(dir: Option<&Path>) -> Self {
        let current = env::var_os("PATH");
        Self {
            search_path: dir.and_then(|dir| prepend_search_dir(dir, current.as_deref())),
        }
    }

    /// Build a command whose program lookup and environment honour the search path.
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let mut command = Command::new(program);
        if let Some(path) = self.search_path.as_ref() {
            command.env("PATH", path);
        }
        command
    }
}

fn prepend_search_dir(dir: &Path, current: Option<&OsStr>) -> Option<OsString> {
    let existing: Vec<PathBuf> = current
        .map(|value| env::split_paths(value).collect())
        .unwrap_or_default();
    if existing.iter().any(|entry| entry == dir) {
        return None;
    }

    let mut entries = Vec::with_capacity(existing.len() + 1);
    entries.push(dir.to_path_buf());
    entries.extend(existing);
    match env::join_paths(entries) {
        Ok(joined) => Some(joined),
        Err(err) => {
            warn!(
                target = "application::render::process",
                dir = %dir.display(),
                error = %err,
                "Ignoring search directory that cannot be joined into PATH"
            );
            None
        }
    }
}

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run this invocation through `wrapper`, e.g. `xvfb-run -a asy ...`.
    pub fn wrapped_in<I, S>(self, wrapper: impl Into<PathBuf>, wrapper_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Invocation::new(wrapper)
            .args(wrapper_args)
            .arg(anchored_program(&self.program).into_os_string())
            .args(self.args)
    }
}

/// Bytes a child wrote to its standard streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// How a single invocation ended. Exactly one is produced per run.
#[derive(Debug)]
pub enum ProcessOutcome {
    Success(CapturedOutput),
    Exited {
        code: Option<i32>,
        output: CapturedOutput,
    },
    SpawnFailed(io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    env: ProcessEnv,
}

impl ProcessRunner {
    pub fn new(env: ProcessEnv) -> Self {
        Self { env }
    }

    /// Spawn `invocation` inside `cwd` and wait for it, capturing both output streams.
    ///
    /// The child runs in its own process group. If the returned future is
    /// dropped before it exits, the whole group is killed, so tools started
    /// through a wrapper such as `xvfb-run` go down with it.
    pub async fn run(&self, invocation: &Invocation, cwd: &Path) -> ProcessOutcome {
        let started_at = Instant::now();
        let mut command = self.env.command(anchored_program(&invocation.program));
        command
            .args(&invocation.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(
                    target = "application::render::process",
                    op = "process::run",
                    result = "spawn_error",
                    program = %invocation.program.display(),
                    error = %err,
                    "Failed to spawn external tool"
                );
                return ProcessOutcome::SpawnFailed(err);
            }
        };

        let mut group = ProcessGroupGuard::new(child.id());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr, status) = tokio::join!(drain(stdout), drain(stderr), child.wait());
        group.disarm();
        let output = CapturedOutput { stdout, stderr };
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        match status {
            Ok(status) if status.success() => {
                debug!(
                    target = "application::render::process",
                    op = "process::run",
                    result = "success",
                    program = %invocation.program.display(),
                    elapsed_ms,
                    stdout_bytes = output.stdout.len(),
                    stderr_bytes = output.stderr.len(),
                    "External tool finished"
                );
                ProcessOutcome::Success(output)
            }
            Ok(status) => {
                warn!(
                    target = "application::render::process",
                    op = "process::run",
                    result = "exit_error",
                    program = %invocation.program.display(),
                    elapsed_ms,
                    exit_code = status.code().map(i64::from).unwrap_or(-1),
                    "External tool exited unsuccessfully"
                );
                ProcessOutcome::Exited {
                    code: status.code(),
                    output,
                }
            }
            Err(err) => {
                warn!(
                    target = "application::render::process",
                    op = "process::run",
                    result = "wait_error",
                    program = %invocation.program.display(),
                    elapsed_ms,
                    error = %err,
                    "Failed to wait for external tool"
                );
                ProcessOutcome::SpawnFailed(err)
            }
        }
    }
}

/// Sends `SIGKILL` to a child's process group when dropped while armed.
#[derive(Debug)]
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            let Ok(pgid) = libc::pid_t::try_from(pgid) else {
                return;
            };
            // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
            // addresses the group created by `process_group(0)` at spawn.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            debug!(
                target = "application::render::process",
                pgid,
                delivered = rc == 0,
                "Killed abandoned process group"
            );
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

/// Paths like `.venv/bin/manim` are made absolute so they do not resolve
/// against the child's working directory. Bare names are left for `PATH` lookup.
fn anchored_program(program: &Path) -> PathBuf {
    if program.is_absolute() || program.components().count() < 2 {
        return program.to_path_buf();
    }
    std::path::absolute(program).unwrap_or_else(|_| program.to_path_buf())
}

async fn drain<R>(pipe: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let Some(mut pipe) = pipe else {
        return buffer;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
            Err(err) => {
                warn!(
                    target = "application::render::process",
                    error = %err,
                    captured_bytes = buffer.len(),
                    "Output stream closed with an error; keeping what was captured"
                );
                break;
            }
        }
    }
    buffer
}
