//! JSON report output.

use async_trait::async_trait;
use std::path::PathBuf;
use xenprobe_core::{Report, Reporter, TestResult};

/// Suite name used for the batch.
pub const SUITE_NAME: &str = "integration tests";

/// Writes the batch report as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonReporter {
    path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(&self, results: &[TestResult]) -> xenprobe_core::Result<()> {
        let report = Report::from_results(SUITE_NAME, results);
        let json = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;

        tracing::info!(path = %self.path.display(), "Writing report");
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
