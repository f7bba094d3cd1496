//! The five-stage test protocol and its runner.
//!
//! A test goes through `build`, `setup`, `run`, `check` and `clean`, in that
//! order. [`StageRunner`] enforces the order, decides when `clean` runs and
//! turns panics into failed results so one broken test cannot take down
//! the batch.

use crate::error::{CoreError, Result};
use crate::sink::OutputSink;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How far a test got before `clean` was called.
///
/// The two flags are independent: a unikernel can run to completion and
/// still fail its output checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanStatus {
    /// The run stage finished without error
    pub ran_to_completion: bool,
    /// The check stage passed
    pub checks_passed: bool,
}

impl CleanStatus {
    /// Clean after a failed setup or a panic.
    pub const ABORTED: Self = Self {
        ran_to_completion: false,
        checks_passed: false,
    };

    /// Clean after run failed.
    pub const RUN_FAILED: Self = Self::ABORTED;

    /// Clean after run succeeded but check failed.
    pub const CHECK_FAILED: Self = Self {
        ran_to_completion: true,
        checks_passed: false,
    };

    /// Clean after every stage passed.
    pub const PASSED: Self = Self {
        ran_to_completion: true,
        checks_passed: true,
    };
}

/// A unikernel integration test.
#[async_trait]
pub trait Test: Send {
    /// Unique name, used to select the test.
    fn name(&self) -> &str;

    /// Group the test belongs to, e.g. `console` or `network`.
    fn category(&self) -> &str;

    /// Free-form help text such as the environment the test reads.
    fn info(&self) -> &str {
        ""
    }

    /// Produce the unikernel image.
    async fn build(&mut self, out: &OutputSink) -> Result<()>;

    /// Allocate host resources and create the domain.
    async fn setup(&mut self, out: &OutputSink) -> Result<()>;

    /// Boot the domain and observe it.
    async fn run(&mut self, out: &OutputSink) -> Result<()>;

    /// Verify what was observed during `run`.
    async fn check(&mut self, out: &OutputSink) -> Result<()>;

    /// Release everything `build` and `setup` allocated.
    async fn clean(&mut self, out: &OutputSink, status: CleanStatus) -> Result<()>;

    /// Whether the test currently holds resources that `clean` would release.
    ///
    /// Consulted when `setup` fails or a stage panics; `clean` only runs in
    /// those cases if this returns true.
    fn holds_resources(&self) -> bool {
        false
    }
}

/// Outcome of running one test.
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub category: String,
    /// First error that ended the test, `None` if it passed
    pub error: Option<CoreError>,
    /// Everything the test wrote to its sink
    pub output: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs tests through the stage protocol.
#[derive(Debug, Clone)]
pub struct StageRunner {
    echo: bool,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRunner {
    /// A runner that mirrors test output to stdout.
    pub fn new() -> Self {
        Self { echo: true }
    }

    /// A runner that only captures output.
    pub fn quiet() -> Self {
        Self { echo: false }
    }

    /// Run one test to completion. Never panics and never returns early:
    /// every failure ends up in [`TestResult::error`].
    pub async fn run(&self, test: &mut dyn Test) -> TestResult {
        let start = Instant::now();
        let name = test.name().to_string();
        let category = test.category().to_string();
        tracing::info!(test = %name, category = %category, "Running test");

        let (out, collector) = OutputSink::channel(self.echo);
        let stop = CancellationToken::new();
        let collecting = tokio::spawn(collector.collect(stop.clone()));

        let error = match AssertUnwindSafe(run_stages(test, &out)).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(test = %name, panic = %message, "Test panicked");
                let error = CoreError::Assertion(format!(
                    "panic occurred while running test: {message}"
                ));
                clean_after_panic(test, &out).await;
                Some(error)
            }
        };

        match &error {
            None => out.progress("successfully ran test"),
            Some(e) => out.failure(format!("test error: {e}")),
        }
        let duration = start.elapsed();
        out.progress(format!("test ended in {duration:?}"));

        drop(out);
        stop.cancel();
        let output = collecting.await.unwrap_or_else(|e| {
            tracing::warn!(test = %name, error = %e, "Output collector failed");
            String::new()
        });

        tracing::info!(
            test = %name,
            passed = error.is_none(),
            duration_ms = duration.as_millis() as u64,
            "Test finished"
        );

        TestResult {
            name,
            category,
            error,
            output,
            duration,
        }
    }
}

async fn run_stages(test: &mut dyn Test, out: &OutputSink) -> Result<()> {
    test.build(out).await?;

    if let Err(e) = test.setup(out).await {
        if test.holds_resources() {
            clean_quietly(test, out, CleanStatus::ABORTED).await;
        }
        return Err(e);
    }

    if let Err(e) = test.run(out).await {
        clean_quietly(test, out, CleanStatus::RUN_FAILED).await;
        return Err(e);
    }

    if let Err(e) = test.check(out).await {
        clean_quietly(test, out, CleanStatus::CHECK_FAILED).await;
        return Err(e);
    }

    test.clean(out, CleanStatus::PASSED).await
}

/// Clean after a stage already failed. The stage error is what gets
/// reported, so a clean error is only logged.
async fn clean_quietly(test: &mut dyn Test, out: &OutputSink, status: CleanStatus) {
    if let Err(e) = test.clean(out, status).await {
        tracing::warn!(test = %test.name(), error = %e, "Clean failed");
        out.failure(format!("clean error: {e}"));
    }
}

async fn clean_after_panic(test: &mut dyn Test, out: &OutputSink) {
    if !test.holds_resources() {
        return;
    }
    let cleaning = AssertUnwindSafe(clean_quietly(test, out, CleanStatus::ABORTED));
    if let Err(payload) = cleaning.catch_unwind().await {
        tracing::error!(panic = %panic_message(payload.as_ref()), "Clean panicked");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
