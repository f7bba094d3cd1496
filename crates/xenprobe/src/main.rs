//! xenprobe: run unikernel integration tests under Xen.
//!
//! Tests run one after another. Progress goes to stdout, logs to stderr.
//! A failing test never stops the batch, and the exit status does not
//! reflect test failures; use `--report` for machine-readable results.

mod catalog;
mod config;
mod report;

use anyhow::anyhow;
use clap::Parser;
use config::DriverConfig;
use report::JsonReporter;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xenprobe_core::{Reporter, StageRunner, Test, TestResult};

#[derive(Parser)]
#[command(name = "xenprobe")]
#[command(about = "Boot unikernels under Xen and verify what they do")]
#[command(version)]
struct Args {
    /// List all known tests and exit
    #[arg(long)]
    list: bool,

    /// Run only the test with this name
    #[arg(long, value_name = "NAME")]
    test: Option<String>,

    /// Write a JSON report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("xenprobe=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DriverConfig::from_env();
    tracing::debug!(?config, "Configuration loaded");

    let mut tests = catalog::all_tests(&config.test_env());

    if args.list {
        list_tests(&tests);
        return Ok(());
    }

    config.validate_warn();

    if let Some(name) = &args.test {
        let test = catalog::select(tests, name)
            .ok_or_else(|| anyhow!("no test with name '{name}'"))?;
        tests = vec![test];
    }

    tracing::info!("Running {} tests", tests.len());
    let results = run_tests(&mut tests).await;
    let failures = results.iter().filter(|r| !r.passed()).count();
    tracing::info!("Ran {} tests with {} failures", results.len(), failures);

    if let Some(path) = args.report {
        JsonReporter::new(path).report(&results).await?;
    }

    Ok(())
}

fn list_tests(tests: &[Box<dyn Test>]) {
    for test in tests {
        println!("{}", test.name());
        for line in test.info().lines() {
            println!("    {line}");
        }
    }
}

async fn run_tests(tests: &mut [Box<dyn Test>]) -> Vec<TestResult> {
    let runner = StageRunner::new();
    let total = tests.len();
    let mut results = Vec::with_capacity(total);

    for (i, test) in tests.iter_mut().enumerate() {
        println!("Running test {} ({}/{})", test.name(), i + 1, total);
        let result = runner.run(test.as_mut()).await;
        if let Some(e) = &result.error {
            tracing::warn!(test = %result.name, error = %e, "Test failed");
        }
        results.push(result);
    }
    results
}
