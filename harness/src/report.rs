//! Tallying case outcomes into a suite verdict

use crate::case::{CaseOutcome, CaseStatus};
use std::fmt;

/// Aggregate result of one suite run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuiteReport {
    /// Cases that reached a terminal outcome, skips included
    pub total: usize,
    pub passed: usize,
    /// Failures, timeouts included
    pub failed: usize,
    /// How many of `failed` were timeouts
    pub timed_out: usize,
    pub skipped: usize,
    /// Cases never attempted because a sequential run stopped early
    pub not_run: usize,
    pub all_passed: bool,
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IN ALL {} cases: {} PASS, {} FAIL, {} SKIP",
            self.total, self.passed, self.failed, self.skipped
        )?;
        if self.not_run > 0 {
            write!(f, ", {} NOT RUN", self.not_run)?;
        }
        Ok(())
    }
}

/// Collects outcomes as they resolve. Only the scheduler writes to it, and
/// only once a case's outcome is final.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outcomes: Vec<CaseOutcome>,
    not_run: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: CaseOutcome) {
        self.outcomes.push(outcome);
    }

    /// Note cases that will never get an outcome
    pub fn record_not_run(&mut self, count: usize) {
        self.not_run += count;
    }

    pub fn report(&self) -> SuiteReport {
        let mut report = SuiteReport {
            total: self.outcomes.len(),
            not_run: self.not_run,
            ..SuiteReport::default()
        };

        for outcome in &self.outcomes {
            match outcome.status {
                CaseStatus::Pass => report.passed += 1,
                CaseStatus::Fail => report.failed += 1,
                CaseStatus::Timeout => {
                    report.failed += 1;
                    report.timed_out += 1;
                }
                CaseStatus::Skip => report.skipped += 1,
            }
        }

        report.all_passed = report.failed == 0;
        report
    }

    /// Print the summary line and hand back the report
    pub fn finish(self) -> SuiteReport {
        let report = self.report();
        println!("{report}");
        report
    }
}
