//! Test cases and their outcomes

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Features a case needs because of the directory it was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaseRequirements {
    pub simd: bool,
    pub memory64: bool,
}

/// A single conformance scenario backed by a `.wast` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Path relative to the suite root without extension, e.g.
    /// `simd/simd_const`. Unique within a run.
    pub id: String,
    /// File stem, e.g. `simd_const`
    pub name: String,
    pub path: PathBuf,
    pub requires: CaseRequirements,
}

impl TestCase {
    /// A case given directly by path, outside of any suite directory
    pub fn from_path(path: &Path) -> Self {
        let name = stem_of(path);
        Self {
            id: path.with_extension("").to_string_lossy().into_owned(),
            name,
            path: path.to_path_buf(),
            requires: CaseRequirements::default(),
        }
    }
}

pub(crate) fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Terminal state of a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseStatus {
    Pass,
    Fail,
    Timeout,
    Skip,
}

impl CaseStatus {
    /// Fail and Timeout count the same for the suite result
    pub fn is_failure(&self) -> bool {
        matches!(self, CaseStatus::Fail | CaseStatus::Timeout)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Pass => write!(f, "pass"),
            CaseStatus::Fail => write!(f, "fail"),
            CaseStatus::Timeout => write!(f, "timeout"),
            CaseStatus::Skip => write!(f, "skip"),
        }
    }
}

/// Why a case did not pass
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "failed with a non-zero return code {}",
        .code.map_or_else(|| "(terminated by signal)".to_string(), |code| code.to_string())
    )]
    Exit { code: Option<i32> },

    #[error("failed with TimeoutExpired after {0:?}")]
    ExitTimeout(Duration),

    #[error("meets TimeoutError after {0:?}")]
    BudgetExceeded(Duration),

    #[error("failed waiting for the driver: {0}")]
    Wait(#[source] std::io::Error),

    #[error("worker task aborted: {reason}")]
    Join { reason: String },
}

/// The single terminal result of one case
#[derive(Debug)]
pub struct CaseOutcome {
    pub id: String,
    pub name: String,
    pub status: CaseStatus,
    /// Last lines of driver output, kept only in quiet mode
    pub tail_log: Option<Vec<String>>,
    pub error: Option<CaseError>,
    pub duration: Duration,
}

impl CaseOutcome {
    pub fn passed(case: &TestCase, duration: Duration) -> Self {
        Self::new(case, CaseStatus::Pass, None, duration)
    }

    pub fn skipped(case: &TestCase) -> Self {
        Self::new(case, CaseStatus::Skip, None, Duration::ZERO)
    }

    /// Fail or Timeout depending on the error
    pub fn failed(case: &TestCase, error: CaseError, duration: Duration) -> Self {
        let status = match error {
            CaseError::ExitTimeout(_) | CaseError::BudgetExceeded(_) => CaseStatus::Timeout,
            _ => CaseStatus::Fail,
        };
        Self::new(case, status, Some(error), duration)
    }

    pub fn with_tail_log(mut self, lines: Vec<String>) -> Self {
        self.tail_log = Some(lines);
        self
    }

    fn new(case: &TestCase, status: CaseStatus, error: Option<CaseError>, duration: Duration) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name.clone(),
            status,
            tail_log: None,
            error,
            duration,
        }
    }
}
