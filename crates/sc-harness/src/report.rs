//! Aggregate reporting across a suite of cases

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::case::CaseOutcome;

/// Collected outcomes of a test run, with summary totals kept current as
/// outcomes are added.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub title: String,
    /// Unix seconds at report creation.
    pub timestamp: u64,
    pub outcomes: Vec<CaseOutcome>,
    pub summary: ReportSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub total_cases: usize,
    pub passed_cases: usize,
    pub failed_cases: usize,
    pub total_frames: u64,
    pub total_decode_errors: u64,
    pub total_fuzz_hits: u64,
    pub total_duration_ms: u64,
}

/// Report output format
#[derive(Debug, Clone, Copy)]
pub enum ReportFormat {
    Text,
    Json,
}

impl CaseReport {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            outcomes: Vec::new(),
            summary: ReportSummary::default(),
        }
    }

    /// Fold one outcome into the report.
    pub fn add_outcome(&mut self, outcome: CaseOutcome) {
        self.summary.total_cases += 1;
        if outcome.passed {
            self.summary.passed_cases += 1;
        } else {
            self.summary.failed_cases += 1;
        }
        self.summary.total_frames += outcome.frames_generated;
        self.summary.total_decode_errors += outcome.decode_errors;
        self.summary.total_fuzz_hits += outcome.fuzz_hits;
        self.summary.total_duration_ms += outcome.elapsed_ms;

        self.outcomes.push(outcome);
    }

    pub fn all_passed(&self) -> bool {
        self.summary.failed_cases == 0
    }

    /// Plain-text report, one line per case plus the summary block.
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("{}\n", self.title));
        output.push_str(&format!("{}\n\n", "=".repeat(self.title.len())));

        for outcome in &self.outcomes {
            let status = if outcome.passed { "PASS" } else { "FAIL" };
            output.push_str(&format!(
                "[{}] {} ({:.3}x, {:.2} bps, {} ms)\n",
                status, outcome.label, outcome.ratio, outcome.stream_bps, outcome.elapsed_ms
            ));
            if outcome.fuzz_hits > 0 {
                output.push_str(&format!(
                    "       {} fault hits, {} decode errors, {}/{} frames\n",
                    outcome.fuzz_hits,
                    outcome.decode_errors,
                    outcome.frames_decoded,
                    outcome.frames_generated
                ));
            }
            if let Some(reason) = &outcome.failure {
                output.push_str(&format!("       {reason}\n"));
            }
        }

        output.push_str(&format!(
            "\nSummary: {} cases, {} passed, {} failed\n",
            self.summary.total_cases, self.summary.passed_cases, self.summary.failed_cases
        ));
        output.push_str(&format!(
            "         {} frames, {} decode errors, {} fault hits, {} ms\n",
            self.summary.total_frames,
            self.summary.total_decode_errors,
            self.summary.total_fuzz_hits,
            self.summary.total_duration_ms
        ));

        output
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }

    /// Save the report to a file in the given format.
    pub fn save<P: AsRef<Path>>(&self, path: P, format: ReportFormat) -> std::io::Result<()> {
        let content = match format {
            ReportFormat::Text => self.to_text(),
            ReportFormat::Json => self.to_json(),
        };
        fs::write(path, content)
    }
}
