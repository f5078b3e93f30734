//! Batch-level aggregation of per-unit outcomes.

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::UnitError;

/// Successful per-unit result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A new artifact was produced.
    Written,
    /// The artifact was already present; the model was not invoked.
    Existing,
    /// Nothing to produce (e.g. a fully silent recording).
    Empty,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub kind: &'static str,
    pub message: String,
}

/// Counters and failure log for one stage run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    pub stage: String,
    pub written: usize,
    pub skipped_existing: usize,
    pub empty: usize,
    pub failures: Vec<UnitFailure>,
}

impl BatchReport {
    pub fn new(stage: &str) -> Self {
        Self { stage: stage.to_string(), ..Self::default() }
    }

    /// Fold one unit result into the report, logging failures.
    pub fn record(&mut self, unit: impl fmt::Display, result: Result<UnitOutcome, UnitError>) {
        match result {
            Ok(UnitOutcome::Written) => self.written += 1,
            Ok(UnitOutcome::Existing) => {
                debug!(stage = %self.stage, %unit, "artifact exists, skipping");
                self.skipped_existing += 1;
            }
            Ok(UnitOutcome::Empty) => {
                info!(stage = %self.stage, %unit, "no segments");
                self.empty += 1;
            }
            Err(err) => self.fail(unit, &err),
        }
    }

    pub fn fail(&mut self, unit: impl fmt::Display, err: &UnitError) {
        let unit = unit.to_string();
        warn!(stage = %self.stage, unit = %unit, kind = err.kind(), "{err}");
        self.failures.push(UnitFailure {
            unit,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Emit the end-of-stage summary event.
    pub fn log_summary(&self) {
        info!(
            stage = %self.stage,
            written = self.written,
            skipped_existing = self.skipped_existing,
            empty = self.empty,
            failed = self.failures.len(),
            "stage finished"
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialise batch report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Cannot write report: {}", path.display()))
    }
}
