//! # xenprobe-core
//!
//! Test protocol and run coordination for unikernel integration tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        xenprobe-core                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────────┐    │
//! │  │  StageRunner    │────▶│  Test (build, setup, run,    │    │
//! │  │  - run()        │     │        check, clean)         │    │
//! │  └─────────────────┘     └──────────────────────────────┘    │
//! │           │                            │ run                 │
//! │           ▼                            ▼                     │
//! │  ┌─────────────────┐     ┌──────────────────────────────┐    │
//! │  │  OutputSink     │◀────│  RunCoordinator              │    │
//! │  │  (per test)     │     │  console │ timeout │ state   │    │
//! │  └─────────────────┘     │  readiness ─▶ echo probe     │    │
//! │                          └──────────────────────────────┘    │
//! │                                        │                     │
//! └────────────────────────────────────────┼─────────────────────┘
//!                                          ▼
//!              xenprobe-xen (xl)   xenprobe-net (brctl, ip, ping)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use xenprobe_core::{CommandBuilder, ConsoleTest, StageRunner, TestEnv};
//! use xenprobe_xen::Xl;
//!
//! # async fn example() {
//! let env = TestEnv::new(Arc::new(Xl::new()), Arc::new(CommandBuilder::new()));
//! let mut test = ConsoleTest::hello_world(env);
//!
//! let result = StageRunner::new().run(&mut test).await;
//! println!("{}: passed = {}", result.name, result.passed());
//! # }
//! ```
//!
//! Tests run one at a time. Within a test, the run stage fans out into a
//! handful of watcher tasks that the [`RunCoordinator`] cancels and joins
//! before it returns.

mod builder;
mod coordinator;
mod error;
mod pending;
mod report;
mod signal;
mod sink;
mod stage;
mod suites;

pub use builder::{Builder, CommandBuilder};
pub use coordinator::{
    ConsoleEnd, Readiness, RunCoordinator, RunOutcome, RunReport, DEFAULT_GRACE,
    DEFAULT_POLL_INTERVAL,
};
pub use error::{CoreError, Result};
pub use pending::PendingProbes;
pub use report::{Case, Failure, Report, Reporter, Suite, FAILURE_MESSAGE};
pub use signal::{signal, Signal, Trigger};
pub use sink::{OutputCollector, OutputSink};
pub use stage::{CleanStatus, StageRunner, Test, TestResult};
pub use suites::{
    check_hello_world, check_ping_replies, check_read_from_console, check_reply_sequence,
    check_sleep_and_time, ConsoleTest, NetworkEnv, OutputCheck, PingAddressTest, PingTest,
    TestEnv, DEFAULT_BRIDGE_PREFIX, DEFAULT_PACKAGE_ROOT,
};
