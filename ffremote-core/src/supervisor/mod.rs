//! Spawning and supervising the transcoder.

mod lines;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use lines::{spawn_line_reader, LineSplitter};

pub type ProcessInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A running transcoder with its standard input and error attached.
pub struct LaunchedProcess {
    pub stdin: ProcessInput,
    pub stderr: ProcessOutput,
    pub handle: Box<dyn ProcessHandle>,
}

/// Output of a run with captured standard output and error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ProcessHandle: Send {
    async fn wait(&mut self) -> std::io::Result<i32>;

    /// Kills the process and everything it started.
    fn kill_tree(&mut self) -> std::io::Result<()>;
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, args: &[String]) -> std::io::Result<LaunchedProcess>;

    async fn capture(&self, args: &[String]) -> std::io::Result<Captured>;
}

/// Runs the configured transcoder binary.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    program: PathBuf,
}

impl SystemLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args).kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

#[async_trait]
impl Launcher for SystemLauncher {
    async fn launch(&self, args: &[String]) -> std::io::Result<LaunchedProcess> {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let missing = || std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe not captured");
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stderr = child.stderr.take().ok_or_else(missing)?;
        debug!(program = %self.program.display(), pid = ?child.id(), "transcoder started");
        Ok(LaunchedProcess {
            stdin: Box::new(stdin),
            stderr: Box::new(stderr),
            handle: Box::new(ChildHandle { child }),
        })
    }

    async fn capture(&self, args: &[String]) -> std::io::Result<Captured> {
        let output = self.command(args).stdin(Stdio::null()).output().await?;
        Ok(Captured {
            code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

struct ChildHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self) -> std::io::Result<i32> {
        self.child.wait().await.map(exit_code)
    }

    #[cfg(unix)]
    fn kill_tree(&mut self) -> std::io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(std::io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    fn kill_tree(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Waits for exit, killing the process tree first if `cancel` fires.
pub async fn supervise(
    handle: &mut dyn ProcessHandle,
    cancel: &CancellationToken,
) -> std::io::Result<i32> {
    tokio::select! {
        code = handle.wait() => return code,
        _ = cancel.cancelled() => {}
    }
    debug!("killing transcoder process tree");
    handle.kill_tree()?;
    handle.wait().await
}
