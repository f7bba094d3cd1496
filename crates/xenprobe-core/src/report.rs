//! Structured test reports.

use crate::error::Result;
use crate::stage::TestResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Failure message shared by every failed case.
pub const FAILURE_MESSAGE: &str = "integration test failure";

/// Consumes the results of a batch.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, results: &[TestResult]) -> Result<()>;
}

/// A batch report: one or more suites of cases.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub suites: Vec<Suite>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suite {
    pub name: String,
    pub tests: usize,
    pub failures: usize,
    /// Total duration in seconds
    pub time: f64,
    pub cases: Vec<Case>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Case {
    /// `<category>.<name>`
    pub classname: String,
    pub name: String,
    /// Duration in seconds
    pub time: f64,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub message: String,
    /// The error that ended the test
    pub contents: String,
}

impl Case {
    pub fn from_result(result: &TestResult) -> Self {
        Self {
            classname: format!("{}.{}", result.category, result.name),
            name: result.name.clone(),
            time: result.duration.as_secs_f64(),
            output: result.output.clone(),
            failure: result.error.as_ref().map(|e| Failure {
                message: FAILURE_MESSAGE.to_string(),
                contents: e.to_string(),
            }),
        }
    }
}

impl Suite {
    pub fn from_results(name: impl Into<String>, results: &[TestResult]) -> Self {
        let cases: Vec<Case> = results.iter().map(Case::from_result).collect();
        Self {
            name: name.into(),
            tests: cases.len(),
            failures: cases.iter().filter(|c| c.failure.is_some()).count(),
            time: cases.iter().map(|c| c.time).sum(),
            cases,
        }
    }
}

impl Report {
    /// A report with a single suite named `name`.
    pub fn from_results(name: impl Into<String>, results: &[TestResult]) -> Self {
        Self {
            generated_at: Utc::now(),
            suites: vec![Suite::from_results(name, results)],
        }
    }

    /// Failed cases over all suites.
    pub fn failures(&self) -> usize {
        self.suites.iter().map(|s| s.failures).sum()
    }
}
