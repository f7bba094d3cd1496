//! Attached domain console.

use crate::error::Result;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// A running console attachment (`xl console <id>`).
///
/// The console never ends on its own while the domain lives; the owner must
/// terminate it with [`Console::terminate`]. The process is killed if the
/// handle is dropped, but only an explicit `terminate` or `wait` reaps it.
pub struct Console {
    domain_id: u32,
    child: Child,
    terminations: Arc<AtomicUsize>,
}

impl Console {
    /// Spawn `cmd` as the console of domain `domain_id`.
    ///
    /// Stdin, stdout and stderr are piped so the caller can feed input and
    /// read the guest's output.
    pub fn spawn(domain_id: u32, mut cmd: Command) -> Result<Self> {
        let child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tracing::debug!(domain_id, pid = ?child.id(), "Console attached");
        Ok(Self {
            domain_id,
            child,
            terminations: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Domain this console is attached to.
    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Shared count of [`Console::terminate`] calls. Stays readable after the
    /// console itself has been moved or dropped.
    pub fn terminations(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.terminations)
    }

    /// Take the input side. Dropping it closes the console's stdin.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the guest output stream.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the console's own diagnostics stream.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the console to exit on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Kill the console process and reap it.
    pub async fn terminate(&mut self) -> Result<ExitStatus> {
        tracing::debug!(domain_id = self.domain_id, "Terminating console");
        self.terminations.fetch_add(1, Ordering::SeqCst);
        // Fails only if the child was already reaped; wait() below still reports its status.
        if let Err(e) = self.child.start_kill() {
            tracing::trace!(domain_id = self.domain_id, error = %e, "Console kill failed");
        }
        Ok(self.child.wait().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_console_echoes_input() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "read line; echo \"got $line\""]);
        let mut console = Console::spawn(7, cmd).unwrap();
        assert_eq!(console.domain_id(), 7);

        let mut stdin = console.take_stdin().unwrap();
        stdin.write_all(b"hello\n").await.unwrap();
        drop(stdin);

        let mut out = String::new();
        console
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "got hello\n");
        assert!(console.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_terminate_kills_and_reaps() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut console = Console::spawn(1, cmd).unwrap();
        assert!(console.pid().is_some());

        let terminations = console.terminations();

        let status = console.terminate().await.unwrap();
        assert!(!status.success());
        assert!(console.pid().is_none());
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_harmless() {
        let mut cmd = Command::new("true");
        cmd.arg("ignored");
        let mut console = Console::spawn(1, cmd).unwrap();
        assert!(console.wait().await.unwrap().success());
        assert_eq!(console.terminations().load(Ordering::SeqCst), 0);
        assert!(console.terminate().await.unwrap().success());
    }
}
