//! Tests that only watch the console.

use super::TestEnv;
use crate::coordinator::{RunCoordinator, RunOutcome};
use crate::error::{CoreError, Result};
use crate::sink::OutputSink;
use crate::stage::{CleanStatus, Test};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use xenprobe_xen::{BootSpec, Domain, DomainState, OnCrash};

/// Predicate over the captured console output.
pub type OutputCheck = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

const CATEGORY: &str = "console";

/// Boot a unikernel, wait until it exits or times out, check its output.
pub struct ConsoleTest {
    env: TestEnv,
    name: String,
    category: String,
    package: String,
    memory_mib: u32,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    can_crash: bool,
    can_shutdown: bool,
    can_timeout: bool,
    check: Option<OutputCheck>,

    unikernel: Option<PathBuf>,
    domain: Option<Domain>,
    output: String,
}

impl ConsoleTest {
    /// A test for `package` with 256 MiB of memory, a 10 second timeout and
    /// every exit policy disabled.
    pub fn new(env: TestEnv, name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            env,
            name: name.into(),
            category: CATEGORY.to_string(),
            package: package.into(),
            memory_mib: 256,
            stdin: None,
            timeout: Duration::from_secs(10),
            can_crash: false,
            can_shutdown: false,
            can_timeout: false,
            check: None,
            unikernel: None,
            domain: None,
            output: String::new(),
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn memory_mib(mut self, mib: u32) -> Self {
        self.memory_mib = mib;
        self
    }

    /// Bytes written to the console right before the domain is unpaused.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept a domain that crashed.
    pub fn can_crash(mut self, allowed: bool) -> Self {
        self.can_crash = allowed;
        self
    }

    /// Accept a domain that shut down.
    pub fn can_shutdown(mut self, allowed: bool) -> Self {
        self.can_shutdown = allowed;
        self
    }

    /// Accept reaching the timeout; the output captured so far is checked.
    pub fn can_timeout(mut self, allowed: bool) -> Self {
        self.can_timeout = allowed;
        self
    }

    pub fn check_output(
        mut self,
        check: impl Fn(&str) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Box::new(check));
        self
    }

    /// Console output captured by the last run.
    pub fn output(&self) -> &str {
        &self.output
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Prints "Hello World!" and exits.
    pub fn hello_world(env: TestEnv) -> Self {
        let package = env.package(&["helloworld", "simple"]);
        Self::new(env, "hello_world", package)
            .can_crash(true)
            .can_shutdown(true)
            .check_output(check_hello_world)
    }

    /// Prints timestamped greetings every 100 ms until stopped.
    pub fn sleep_and_time(env: TestEnv) -> Self {
        let package = env.package(&["helloworld", "sleep_and_time"]);
        Self::new(env, "sleep_and_time", package)
            .timeout(Duration::from_secs(2))
            .can_timeout(true)
            .check_output(check_sleep_and_time)
    }

    /// Asks for a name on the console and greets it.
    pub fn read_from_console(env: TestEnv) -> Self {
        let package = env.package(&["helloworld", "read_from_console"]);
        Self::new(env, "read_from_console", package)
            .can_crash(true)
            .can_shutdown(true)
            .stdin("Unigornel\n")
            .check_output(check_read_from_console)
    }

    fn domain(&self) -> Result<Domain> {
        self.domain
            .clone()
            .ok_or_else(|| CoreError::Lifecycle(format!("{}: no domain was created", self.name)))
    }
}

#[async_trait]
impl Test for ConsoleTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> &str {
        &self.category
    }

    async fn build(&mut self, out: &OutputSink) -> Result<()> {
        let image = self
            .env
            .builder
            .build(&self.name, &self.package, &[], out)
            .await?;
        self.unikernel = Some(image);
        Ok(())
    }

    async fn setup(&mut self, out: &OutputSink) -> Result<()> {
        let image = self
            .unikernel
            .clone()
            .ok_or_else(|| CoreError::Config(format!("{}: no unikernel was built", self.name)))?;
        let spec = BootSpec::new(image, self.name.clone())
            .memory_mib(self.memory_mib)
            .on_crash(OnCrash::Preserve);

        out.progress("creating paused kernel");
        let domain = self.env.controller.create_paused(&spec).await?;
        out.progress(format!("domain created: {} ({})", domain.name, domain.id));
        self.domain = Some(domain);
        Ok(())
    }

    async fn run(&mut self, out: &OutputSink) -> Result<()> {
        let domain = self.domain()?;

        out.progress("attaching to the console");
        let console = self.env.controller.console(&domain)?;
        let mut coordinator = RunCoordinator::new(Arc::clone(&self.env.controller), domain.clone())
            .timeout(self.timeout);
        if let Some(stdin) = &self.stdin {
            coordinator = coordinator.stdin(stdin.clone());
        }

        let report = coordinator.run(console, out).await?;
        self.output = report.transcript;
        match report.outcome {
            RunOutcome::ConsoleExited => {
                return Err(CoreError::Lifecycle("console unexpectedly exited".into()))
            }
            RunOutcome::PollFailed(e) => return Err(e),
            RunOutcome::TimedOut if !self.can_timeout => {
                return Err(CoreError::Timeout(self.timeout))
            }
            // No readiness marker is configured, so no probe runs.
            RunOutcome::TimedOut | RunOutcome::DomainExited(_) | RunOutcome::Probed(_) => {}
        }

        let current = self
            .env
            .controller
            .update(&domain)
            .await
            .map_err(|e| CoreError::Lifecycle(format!("domain not preserved: {e}")))?
            .ok_or_else(|| CoreError::Lifecycle("domain not preserved".into()))?;

        if current.state.check(DomainState::CRASHED) && !self.can_crash {
            return Err(CoreError::Lifecycle("domain crashed".into()));
        }
        if current.state.check(DomainState::SHUTDOWN) && !self.can_shutdown {
            return Err(CoreError::Lifecycle("domain shutdown".into()));
        }
        Ok(())
    }

    async fn check(&mut self, out: &OutputSink) -> Result<()> {
        let Some(check) = &self.check else {
            out.progress("no output checks specified");
            return Ok(());
        };
        out.progress("checking unikernel output");
        if let Err(e) = check(&self.output) {
            out.failure(format!("check error: {e}"));
            return Err(e);
        }
        Ok(())
    }

    async fn clean(&mut self, out: &OutputSink, _status: CleanStatus) -> Result<()> {
        if let Some(image) = self.unikernel.take() {
            out.progress(format!("removing {}", image.display()));
            if let Err(e) = std::fs::remove_file(&image) {
                tracing::warn!(image = %image.display(), error = %e, "Failed to remove unikernel");
            }
        }

        if let Some(domain) = self.domain.take() {
            out.progress(format!("destroying domain {}", domain.id));
            self.env.controller.destroy(&domain).await?;
        }
        Ok(())
    }

    fn holds_resources(&self) -> bool {
        self.unikernel.is_some() || self.domain.is_some()
    }
}

// ============================================================================
// Output checks
// ============================================================================

pub fn check_hello_world(output: &str) -> Result<()> {
    if !output.contains("Hello World!") {
        return Err(CoreError::Assertion(
            "'Hello World!' substring not in output".into(),
        ));
    }
    Ok(())
}

static TIMED_GREETING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+) \[.*\] Hello World!").expect("valid greeting regex"));

/// 2016-01-01T00:00:00Z in nanoseconds.
const MIN_TIMESTAMP_NS: i64 = 1_451_606_400_000_000_000;
const SLEEP_INTERVAL_NS: i64 = 100_000_000;
const MIN_GREETINGS: usize = 10;

/// Every greeting carries a nanosecond timestamp after 2016 and greetings
/// are at least 100 ms apart; one second of output holds at least 10.
pub fn check_sleep_and_time(output: &str) -> Result<()> {
    let mut greetings = 0;
    let mut prev = 0i64;
    for line in output.lines() {
        let Some(caps) = TIMED_GREETING.captures(line) else {
            continue;
        };
        greetings += 1;

        let t: i64 = caps[1]
            .parse()
            .map_err(|e| CoreError::Assertion(format!("invalid timestamp '{}': {e}", &caps[1])))?;
        if t < MIN_TIMESTAMP_NS {
            return Err(CoreError::Assertion(format!(
                "time must be after {MIN_TIMESTAMP_NS}"
            )));
        }
        if t - prev < SLEEP_INTERVAL_NS {
            return Err(CoreError::Assertion(format!(
                "minimum sleep interval is {SLEEP_INTERVAL_NS} ns"
            )));
        }
        prev = t;
    }

    if greetings < MIN_GREETINGS {
        return Err(CoreError::Assertion(format!(
            "minimum number of hello worlds is {MIN_GREETINGS}, got {greetings}"
        )));
    }
    Ok(())
}

pub fn check_read_from_console(output: &str) -> Result<()> {
    if !output.contains("Hello, what's your name? Hello, Unigornel") {
        return Err(CoreError::Assertion("console output did not match".into()));
    }
    Ok(())
}
