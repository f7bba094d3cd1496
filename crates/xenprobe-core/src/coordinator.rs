//! Racing watchers against a live domain.
//!
//! [`RunCoordinator`] unpauses a domain whose console is already attached and
//! waits for the first of:
//!
//! - the console exiting on its own,
//! - the run timeout,
//! - the state poller seeing the domain shut down or crash (or failing),
//! - the echo probe finishing, once the console printed the readiness marker.
//!
//! Every watcher runs as its own task with a cancellation token. When the
//! race is decided all of them are cancelled and joined; the console watcher
//! kills and reaps the console before the coordinator returns, so callers
//! can destroy the domain right after.

use crate::error::{CoreError, Result};
use crate::pending::PendingProbes;
use crate::signal::{signal, Signal, Trigger};
use crate::sink::OutputSink;
use regex::Regex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xenprobe_common::{describe, ToolError};
use xenprobe_net::{parse_probe_line, EchoProbe, NetError, ProbeReply};
use xenprobe_xen::{Console, Domain, DomainController, DomainState};

/// Default interval between state polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time given to the console to flush after the domain exited.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// Configuration
// ============================================================================

/// Readiness marker plus the probe it unlocks.
pub struct Readiness {
    marker: Regex,
    probe: Command,
    expected: u32,
}

impl Readiness {
    /// Run `probe` once a console line matches `marker`. The probe's output
    /// is parsed as `ping` output and sequence numbers `1..=expected` are
    /// awaited; see [`RunOutcome::Probed`] for what is reported.
    pub fn new(marker: Regex, probe: Command, expected: u32) -> Self {
        Self {
            marker,
            probe,
            expected,
        }
    }

    /// Readiness followed by an [`EchoProbe`].
    pub fn echo(marker: Regex, probe: &EchoProbe) -> Self {
        Self::new(marker, probe.command(), probe.expected_replies())
    }
}

/// How the race was decided.
#[derive(Debug)]
pub enum RunOutcome {
    /// The console exited before anything else happened
    ConsoleExited,
    /// The run timeout elapsed first
    TimedOut,
    /// The domain shut down or crashed
    DomainExited(DomainState),
    /// Polling the domain state failed or the domain vanished
    PollFailed(CoreError),
    /// The echo probe finished. Holds at most one reply per requested
    /// sequence number, ordered by sequence number.
    Probed(Result<Vec<ProbeReply>>),
}

/// How the console watcher ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEnd {
    /// The console process exited by itself
    Exited,
    /// The console was killed after the race was decided
    Killed,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Console output, stdout and stderr interleaved by line
    pub transcript: String,
    pub console: ConsoleEnd,
    pub elapsed: Duration,
}

/// Coordinates one run of a paused domain.
pub struct RunCoordinator {
    controller: Arc<dyn DomainController>,
    domain: Domain,
    timeout: Duration,
    poll_interval: Duration,
    grace: Duration,
    poll_state: bool,
    stdin: Option<Vec<u8>>,
    readiness: Option<Readiness>,
}

impl RunCoordinator {
    /// Coordinator with a 10 second timeout and state polling enabled.
    pub fn new(controller: Arc<dyn DomainController>, domain: Domain) -> Self {
        Self {
            controller,
            domain,
            timeout: Duration::from_secs(10),
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace: DEFAULT_GRACE,
            poll_state: true,
            stdin: None,
            readiness: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Do not poll the domain state; only the console, the timeout and the
    /// probe decide the run.
    pub fn without_state_poll(mut self) -> Self {
        self.poll_state = false;
        self
    }

    /// Bytes written to the console once, before the domain is unpaused.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = Some(readiness);
        self
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Unpause the domain and race the watchers.
    ///
    /// # Errors
    /// Fails if the console streams are unavailable, if writing stdin fails
    /// or if the unpause command fails. In each case the console has been
    /// terminated before returning. Outcomes of the race itself are reported
    /// in [`RunReport::outcome`], not as errors.
    pub async fn run(self, mut console: Console, out: &OutputSink) -> Result<RunReport> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let domain_id = self.domain.id;

        let (Some(stdout), Some(stderr)) = (console.take_stdout(), console.take_stderr()) else {
            let _ = console.terminate().await;
            return Err(CoreError::Lifecycle(
                "console output streams are not captured".into(),
            ));
        };
        // Held until the run ends; closing it early may end the console.
        let mut stdin = console.take_stdin();

        let watchers = CancellationToken::new();
        let pump_stop = CancellationToken::new();

        // Console exit
        let (console_exit, console_exited) = signal();
        let console_task = tokio::spawn(watch_console(
            console,
            watchers.child_token(),
            console_exit,
        ));

        // Console output
        let (lines_tx, lines_rx) = match self.readiness {
            Some(_) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let pump_task = tokio::spawn(pump_console(
            stdout,
            stderr,
            out.clone(),
            lines_tx,
            pump_stop.clone(),
        ));

        let mut helpers: Vec<JoinHandle<()>> = Vec::new();

        // Domain state
        let state_changed = if self.poll_state {
            let (trigger, signal) = signal();
            helpers.push(tokio::spawn(poll_state(
                Arc::clone(&self.controller),
                self.domain.clone(),
                self.poll_interval,
                watchers.child_token(),
                trigger,
            )));
            signal
        } else {
            Signal::closed()
        };

        // Readiness and probe
        let probe_done = match (self.readiness, lines_rx) {
            (Some(readiness), Some(lines)) => {
                let (ready_trigger, ready) = signal();
                let (done_trigger, done) = signal();
                helpers.push(tokio::spawn(scan_readiness(
                    lines,
                    readiness.marker,
                    out.clone(),
                    watchers.child_token(),
                    ready_trigger,
                )));
                helpers.push(tokio::spawn(run_probe(
                    ready,
                    readiness.probe,
                    readiness.expected,
                    out.clone(),
                    watchers.child_token(),
                    done_trigger,
                )));
                done
            }
            _ => Signal::closed(),
        };

        let prepared = async {
            if let (Some(bytes), Some(stdin)) = (&self.stdin, stdin.as_mut()) {
                out.progress("writing to console");
                stdin.write_all(bytes).await?;
                stdin.flush().await?;
            }
            out.progress("unpausing unikernel domain");
            self.controller.unpause(&self.domain).await?;
            Ok::<(), CoreError>(())
        }
        .await;

        if let Err(e) = prepared {
            tracing::warn!(domain_id, error = %e, "Run aborted before the race");
            watchers.cancel();
            finish(console_task, pump_task, pump_stop, helpers).await;
            return Err(e);
        }

        let outcome = tokio::select! {
            Some(()) = console_exited.wait() => RunOutcome::ConsoleExited,
            _ = tokio::time::sleep_until(deadline) => RunOutcome::TimedOut,
            Some(event) = state_changed.wait() => {
                // Let the console catch up with the domain's last words.
                tokio::time::sleep(self.grace).await;
                match event {
                    StateEvent::Exited(state) => RunOutcome::DomainExited(state),
                    StateEvent::Failed(e) => RunOutcome::PollFailed(e),
                }
            }
            Some(result) = probe_done.wait() => RunOutcome::Probed(result),
        };
        tracing::info!(domain_id, outcome = ?outcome, "Run decided");

        watchers.cancel();
        let (console_end, transcript) = finish(console_task, pump_task, pump_stop, helpers).await;
        drop(stdin);

        Ok(RunReport {
            outcome,
            transcript,
            console: console_end,
            elapsed: start.elapsed(),
        })
    }
}

/// Join every watcher. The console goes first so the pump sees EOF.
async fn finish(
    console_task: JoinHandle<ConsoleEnd>,
    pump_task: JoinHandle<String>,
    pump_stop: CancellationToken,
    helpers: Vec<JoinHandle<()>>,
) -> (ConsoleEnd, String) {
    let console_end = console_task.await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Console watcher failed");
        ConsoleEnd::Killed
    });

    pump_stop.cancel();
    let transcript = pump_task.await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Console pump failed");
        String::new()
    });

    for helper in helpers {
        if let Err(e) = helper.await {
            tracing::error!(error = %e, "Watcher task failed");
        }
    }

    (console_end, transcript)
}

// ============================================================================
// Watchers
// ============================================================================

async fn watch_console(
    mut console: Console,
    kill: CancellationToken,
    exited: Trigger<()>,
) -> ConsoleEnd {
    let domain_id = console.domain_id();
    tokio::select! {
        biased;
        status = console.wait() => {
            match status {
                Ok(status) => tracing::debug!(domain_id, %status, "Console exited"),
                Err(e) => tracing::warn!(domain_id, error = %e, "Waiting for console failed"),
            }
            exited.fire(());
            ConsoleEnd::Exited
        }
        _ = kill.cancelled() => {
            if let Err(e) = console.terminate().await {
                tracing::warn!(domain_id, error = %e, "Console termination failed");
            }
            ConsoleEnd::Killed
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forward console lines to the sink and the readiness scanner and keep a
/// transcript. Runs until both streams close or `stop` fires with no data
/// left to read.
async fn pump_console(
    stdout: impl AsyncRead + Unpin,
    stderr: impl AsyncRead + Unpin,
    out: OutputSink,
    lines: Option<mpsc::UnboundedSender<String>>,
    stop: CancellationToken,
) -> String {
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let (mut stdout_open, mut stderr_open) = (true, true);
    let mut transcript = String::new();

    while stdout_open || stderr_open {
        let (stream, segment) = tokio::select! {
            biased;
            s = stdout.next_segment(), if stdout_open => (Stream::Stdout, s),
            s = stderr.next_segment(), if stderr_open => (Stream::Stderr, s),
            _ = stop.cancelled() => break,
        };

        let bytes = match segment {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                match stream {
                    Stream::Stdout => stdout_open = false,
                    Stream::Stderr => stderr_open = false,
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reading console output failed");
                match stream {
                    Stream::Stdout => stdout_open = false,
                    Stream::Stderr => stderr_open = false,
                }
                continue;
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        let line = text.trim_end_matches('\r');
        tracing::trace!(line = %line, "Console");
        out.line(line);
        transcript.push_str(line);
        transcript.push('\n');
        if let Some(lines) = &lines {
            // The scanner stops listening once it found the marker.
            let _ = lines.send(line.to_string());
        }
    }

    transcript
}

enum StateEvent {
    Exited(DomainState),
    Failed(CoreError),
}

async fn poll_state(
    controller: Arc<dyn DomainController>,
    domain: Domain,
    interval: Duration,
    cancel: CancellationToken,
    changed: Trigger<StateEvent>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            polled = controller.update(&domain) => polled,
        };

        match polled {
            Ok(Some(current)) if current.state.has_exited() => {
                tracing::info!(domain_id = domain.id, state = %current.state, "Domain exited");
                changed.fire(StateEvent::Exited(current.state));
                return;
            }
            Ok(Some(current)) => {
                tracing::trace!(domain_id = domain.id, state = %current.state, "Domain state");
            }
            Ok(None) => {
                changed.fire(StateEvent::Failed(CoreError::Lifecycle(format!(
                    "domain {} vanished",
                    domain.id
                ))));
                return;
            }
            Err(e) => {
                changed.fire(StateEvent::Failed(e.into()));
                return;
            }
        }
    }
}

async fn scan_readiness(
    mut lines: mpsc::UnboundedReceiver<String>,
    marker: Regex,
    out: OutputSink,
    cancel: CancellationToken,
    ready: Trigger<()>,
) {
    out.progress("waiting for unikernel network setup");
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.recv() => line,
        };
        match line {
            Some(line) if marker.is_match(&line) => {
                out.progress("unikernel network is ready");
                ready.fire(());
                return;
            }
            Some(_) => {}
            None => {
                tracing::debug!("Console closed before the readiness marker");
                return;
            }
        }
    }
}

async fn run_probe(
    ready: Signal<()>,
    command: Command,
    expected: u32,
    out: OutputSink,
    cancel: CancellationToken,
    done: Trigger<Result<Vec<ProbeReply>>>,
) {
    let ready = tokio::select! {
        _ = cancel.cancelled() => return,
        ready = ready.wait() => ready,
    };
    if ready.is_none() {
        return;
    }

    let result = probe(command, expected, &out, &cancel).await;
    if !cancel.is_cancelled() {
        done.fire(result);
    }
}

/// Run the echo probe and collect one reply per sequence number.
///
/// Only sequence numbers `1..=expected` are registered. The first reply for
/// each of them wins; later duplicates and replies outside the range are
/// shown in the output but not collected. Collected replies come back in
/// sequence order, not in the order the probe printed them.
async fn probe(
    mut command: Command,
    expected: u32,
    out: &OutputSink,
    cancel: &CancellationToken,
) -> Result<Vec<ProbeReply>> {
    let pending = Arc::new(PendingProbes::new());
    let mut replies = Vec::with_capacity(expected as usize);
    for seq in 1..=expected {
        replies.push(pending.register(seq).await);
    }

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    out.progress(format!("starting ping: {}", describe(&command)));
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let dispatcher = tokio::spawn(dispatch_replies(stdout, Arc::clone(&pending), out.clone()));
    let diagnostics = tokio::spawn(async move {
        let mut text = String::new();
        if let Some(mut stderr) = stderr {
            let _ = tokio::io::AsyncReadExt::read_to_string(&mut stderr, &mut text).await;
        }
        text
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            if let Err(e) = child.start_kill() {
                tracing::trace!(error = %e, "Probe kill failed");
            }
            let _ = child.wait().await;
            dispatcher.abort();
            diagnostics.abort();
            pending.close().await;
            return Err(CoreError::Lifecycle("probe cancelled".into()));
        }
    };

    let dispatched = dispatcher
        .await
        .map_err(|e| CoreError::Lifecycle(format!("probe output dispatcher failed: {e}")))?;
    let stderr_text = diagnostics.await.unwrap_or_default();
    if !stderr_text.trim().is_empty() {
        out.write(stderr_text.clone());
    }
    dispatched?;

    if !status.success() {
        let message = match stderr_text.trim() {
            "" => format!("exited with {status}"),
            text => text.to_string(),
        };
        return Err(ToolError::Failed {
            program,
            status: status.code(),
            message,
        }
        .into());
    }

    let mut collected = Vec::with_capacity(replies.len());
    for reply in replies {
        if let Some(reply) = reply.wait().await {
            collected.push(reply);
        }
    }
    Ok(collected)
}

/// Parse probe output line by line and resolve pending requests. Closes
/// the table at EOF so unanswered requests resolve to `None`.
async fn dispatch_replies(
    stdout: Option<tokio::process::ChildStdout>,
    pending: Arc<PendingProbes>,
    out: OutputSink,
) -> Result<()> {
    let result = match stdout {
        Some(stdout) => read_replies(stdout, &pending, &out).await,
        None => Ok(()),
    };

    let unanswered = pending.close().await;
    if unanswered > 0 {
        tracing::debug!(unanswered, "Probe finished with unanswered requests");
    }
    result
}

async fn read_replies(
    stdout: tokio::process::ChildStdout,
    pending: &PendingProbes,
    out: &OutputSink,
) -> Result<()> {
    let mut lines = BufReader::new(stdout).lines();
    let mut number = 0;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        out.line(&line);
        match parse_probe_line(&line) {
            Ok(Some(reply)) => {
                pending.resolve(reply).await;
            }
            Ok(None) => {}
            Err(reason) => {
                return Err(NetError::Parse {
                    line: number,
                    text: line,
                    reason,
                }
                .into())
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use xenprobe_xen::{BootSpec, XenError};

    /// Controller whose domain reports `state` after `polls_until_exit` polls.
    struct FakeController {
        domain: Domain,
        exit_after: Option<usize>,
        exit_state: DomainState,
        vanish: bool,
        fail_unpause: bool,
        polls: Mutex<usize>,
    }

    impl FakeController {
        fn running() -> Self {
            Self {
                domain: domain(DomainState::PAUSED),
                exit_after: None,
                exit_state: DomainState::SHUTDOWN,
                vanish: false,
                fail_unpause: false,
                polls: Mutex::new(0),
            }
        }
    }

    fn domain(state: DomainState) -> Domain {
        Domain {
            id: 7,
            name: "kernel-test".into(),
            memory: 256,
            vcpus: 1,
            state,
            time: 0.0,
        }
    }

    #[async_trait]
    impl DomainController for FakeController {
        async fn create_paused(&self, _spec: &BootSpec) -> xenprobe_xen::Result<Domain> {
            Ok(self.domain.clone())
        }

        async fn unpause(&self, _domain: &Domain) -> xenprobe_xen::Result<()> {
            if self.fail_unpause {
                return Err(XenError::Lifecycle("unpause refused".into()));
            }
            Ok(())
        }

        async fn destroy(&self, _domain: &Domain) -> xenprobe_xen::Result<()> {
            Ok(())
        }

        fn console(&self, domain: &Domain) -> xenprobe_xen::Result<Console> {
            shell_console(domain.id, "sleep 30")
        }

        async fn list(&self) -> xenprobe_xen::Result<Vec<Domain>> {
            let polls = {
                let mut polls = self.polls.lock().unwrap();
                *polls += 1;
                *polls
            };
            if self.vanish {
                return Ok(vec![]);
            }
            let state = match self.exit_after {
                Some(n) if polls >= n => self.exit_state,
                _ => DomainState::RUNNING,
            };
            Ok(vec![domain(state)])
        }
    }

    fn shell_console(id: u32, script: &str) -> xenprobe_xen::Result<Console> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        Console::spawn(id, cmd)
    }

    fn coordinator(controller: FakeController) -> RunCoordinator {
        let domain = controller.domain.clone();
        RunCoordinator::new(Arc::new(controller), domain)
            .poll_interval(Duration::from_millis(50))
            .grace(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_timeout_wins_and_kills_console() {
        let console = shell_console(7, "echo booting; sleep 30").unwrap();
        let terminations = console.terminations();
        let (out, _collector) = OutputSink::channel(false);

        let started = Instant::now();
        let report = coordinator(FakeController::running())
            .timeout(Duration::from_millis(300))
            .run(console, &out)
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::TimedOut));
        assert_eq!(report.console, ConsoleEnd::Killed);
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert_eq!(report.transcript, "booting\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_console_exit_wins() {
        let console = shell_console(7, "echo 'Hello World!'").unwrap();
        let terminations = console.terminations();
        let (out, _collector) = OutputSink::channel(false);

        let report = coordinator(FakeController::running())
            .timeout(Duration::from_secs(10))
            .run(console, &out)
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::ConsoleExited));
        assert_eq!(report.console, ConsoleEnd::Exited);
        assert_eq!(terminations.load(Ordering::SeqCst), 0);
        assert_eq!(report.transcript, "Hello World!\n");
    }

    #[tokio::test]
    async fn test_domain_exit_wins_after_grace() {
        let console = shell_console(7, "echo 'Hello World!'; sleep 30").unwrap();
        let terminations = console.terminations();
        let (out, _collector) = OutputSink::channel(false);
        let mut controller = FakeController::running();
        controller.exit_after = Some(2);
        controller.exit_state = DomainState::SHUTDOWN;

        let report = coordinator(controller)
            .timeout(Duration::from_secs(10))
            .run(console, &out)
            .await
            .unwrap();

        match report.outcome {
            RunOutcome::DomainExited(state) => assert!(state.check(DomainState::SHUTDOWN)),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.console, ConsoleEnd::Killed);
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert!(report.transcript.contains("Hello World!"));
    }

    #[tokio::test]
    async fn test_vanished_domain_is_poll_failure() {
        let console = shell_console(7, "sleep 30").unwrap();
        let (out, _collector) = OutputSink::channel(false);
        let mut controller = FakeController::running();
        controller.vanish = true;

        let report = coordinator(controller)
            .timeout(Duration::from_secs(10))
            .run(console, &out)
            .await
            .unwrap();

        match report.outcome {
            RunOutcome::PollFailed(e) => assert!(e.to_string().contains("vanished")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_without_state_poll_ignores_exit() {
        let console = shell_console(7, "sleep 30").unwrap();
        let (out, _collector) = OutputSink::channel(false);
        let mut controller = FakeController::running();
        controller.vanish = true;

        let report = coordinator(controller)
            .without_state_poll()
            .timeout(Duration::from_millis(300))
            .run(console, &out)
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_unpause_failure_terminates_console() {
        let console = shell_console(7, "sleep 30").unwrap();
        let terminations = console.terminations();
        let (out, _collector) = OutputSink::channel(false);
        let mut controller = FakeController::running();
        controller.fail_unpause = true;

        let started = Instant::now();
        let err = coordinator(controller)
            .timeout(Duration::from_secs(10))
            .run(console, &out)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("unpause refused"));
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_stdin_reaches_console() {
        let console = shell_console(7, "read name; echo \"Hello, $name\"; sleep 30").unwrap();
        let (out, _collector) = OutputSink::channel(false);

        let report = coordinator(FakeController::running())
            .stdin("Unigornel\n")
            .timeout(Duration::from_millis(500))
            .run(console, &out)
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::TimedOut));
        assert!(report.transcript.contains("Hello, Unigornel"));
    }

    fn fake_ping(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn test_probe_after_readiness() {
        let console = shell_console(7, "echo booting; echo 'network is ready'; sleep 30").unwrap();
        let terminations = console.terminations();
        let (out, _collector) = OutputSink::channel(false);
        let ping = fake_ping(
            "echo 'PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.'; \
             echo '64 bytes from 10.0.0.2: icmp_seq=2 ttl=64 time=0.051 ms'; \
             echo '64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=0.047 ms'; \
             echo 'From 10.0.0.1 icmp_seq=3 Destination Host Unreachable'",
        );

        let report = coordinator(FakeController::running())
            .timeout(Duration::from_secs(10))
            .readiness(Readiness::new(Regex::new("network.*ready").unwrap(), ping, 4))
            .run(console, &out)
            .await
            .unwrap();

        let replies = match report.outcome {
            RunOutcome::Probed(Ok(replies)) => replies,
            other => panic!("unexpected outcome {other:?}"),
        };
        let seqs: Vec<u32> = replies.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(replies[0].is_success());
        assert!(!replies[2].is_success());
        assert_eq!(report.console, ConsoleEnd::Killed);
        assert_eq!(terminations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_probe_collects_first_reply_per_requested_seq() {
        let console = shell_console(7, "echo 'network ready'; sleep 30").unwrap();
        let (out, _collector) = OutputSink::channel(false);
        let ping = fake_ping(
            "echo '64 bytes from 10.0.0.2: icmp_seq=2 ttl=64 time=0.051 ms'; \
             echo '64 bytes from 10.0.0.2: icmp_seq=5 ttl=64 time=0.044 ms'; \
             echo '64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=0.047 ms'; \
             echo 'From 10.0.0.1 icmp_seq=2 Destination Host Unreachable'; \
             echo '64 bytes from 10.0.0.2: icmp_seq=3 ttl=64 time=0.049 ms'",
        );

        let report = coordinator(FakeController::running())
            .timeout(Duration::from_secs(10))
            .readiness(Readiness::new(Regex::new("network.*ready").unwrap(), ping, 3))
            .run(console, &out)
            .await
            .unwrap();

        let replies = match report.outcome {
            RunOutcome::Probed(Ok(replies)) => replies,
            other => panic!("unexpected outcome {other:?}"),
        };
        let seqs: Vec<u32> = replies.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(replies.iter().all(|r| r.is_success()));
        assert!(report.transcript.contains("network ready"));
    }

    #[tokio::test]
    async fn test_probe_failure_is_reported() {
        let console = shell_console(7, "echo 'network ready'; sleep 30").unwrap();
        let (out, _collector) = OutputSink::channel(false);
        let ping = fake_ping("echo 'connect: Network is unreachable' >&2; exit 2");

        let report = coordinator(FakeController::running())
            .timeout(Duration::from_secs(10))
            .readiness(Readiness::new(Regex::new("network.*ready").unwrap(), ping, 10))
            .run(console, &out)
            .await
            .unwrap();

        match report.outcome {
            RunOutcome::Probed(Err(e)) => assert!(e.to_string().contains("Network is unreachable")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_never_starts_without_marker() {
        let console = shell_console(7, "echo booting; sleep 30").unwrap();
        let (out, _collector) = OutputSink::channel(false);
        let ping = fake_ping("echo 'icmp_seq=1 ttl=64 time=1 ms'");

        let report = coordinator(FakeController::running())
            .timeout(Duration::from_millis(400))
            .readiness(Readiness::new(Regex::new("network.*ready").unwrap(), ping, 1))
            .run(console, &out)
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::TimedOut));
    }
}
