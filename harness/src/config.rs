//! Run configuration
//!
//! A [`RunConfiguration`] is built once at startup, validated, and then only
//! ever read. Parallel mode derives a second value through
//! [`RunConfiguration::for_parallel`] instead of editing the first.

use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toolchain::{Target, Toolchain, ToolchainPaths};

/// How long a driver may take to exit once its output streams have closed
pub const EXIT_WAIT: Duration = Duration::from_secs(60);
/// Wall-clock budget for one case in parallel mode
pub const CASE_BUDGET: Duration = Duration::from_secs(300);
/// Wall-clock budget for one case in parallel mode under qemu
pub const QEMU_CASE_BUDGET: Duration = Duration::from_secs(7200);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid run configuration: {reason}")]
    Invalid { reason: String },
}

/// Optional features of the compiler under test that a run exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    pub simd: bool,
    pub memory64: bool,
    /// Generated code runs under qemu emulation
    pub qemu: bool,
}

/// How the driver talks to the programs it launches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Pseudo-terminal
    #[default]
    Pty,
    /// Plain pipes
    Pipe,
}

/// Time ceilings applied while running cases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "TimeoutSecs")]
pub struct Timeouts {
    pub exit_wait: Duration,
    pub case_budget: Duration,
    pub qemu_case_budget: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            exit_wait: EXIT_WAIT,
            case_budget: CASE_BUDGET,
            qemu_case_budget: QEMU_CASE_BUDGET,
        }
    }
}

impl Timeouts {
    /// Per-case budget for parallel mode; emulated runs are much slower
    pub fn budget_for(&self, features: &Features) -> Duration {
        if features.qemu {
            self.qemu_case_budget
        } else {
            self.case_budget
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
struct TimeoutSecs {
    exit_wait: u64,
    case_budget: u64,
    qemu_case_budget: u64,
}

impl Default for TimeoutSecs {
    fn default() -> Self {
        Self {
            exit_wait: EXIT_WAIT.as_secs(),
            case_budget: CASE_BUDGET.as_secs(),
            qemu_case_budget: QEMU_CASE_BUDGET.as_secs(),
        }
    }
}

impl From<TimeoutSecs> for Timeouts {
    fn from(secs: TimeoutSecs) -> Self {
        Self {
            exit_wait: Duration::from_secs(secs.exit_wait),
            case_budget: Duration::from_secs(secs.case_budget),
            qemu_case_budget: Duration::from_secs(secs.qemu_case_budget),
        }
    }
}

/// Contents of the optional `harness.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub toolchain: ToolchainPaths,
    pub timeouts: Timeouts,
    pub jobs: Option<usize>,
}

impl ConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

/// Everything a suite run needs to know, fixed for the duration of the run
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub target: Target,
    pub features: Features,
    pub qemu_firmware: Option<PathBuf>,
    /// Let the driver delete its temporary files
    pub cleanup: bool,
    /// Echo driver output as it arrives
    pub verbose: bool,
    pub log_dir: Option<PathBuf>,
    pub io_mode: IoMode,
    pub timeouts: Timeouts,
    /// Worker pool size for parallel mode
    pub workers: usize,
    pub toolchain: Toolchain,
}

impl RunConfiguration {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            target: Target::default(),
            features: Features::default(),
            qemu_firmware: None,
            cleanup: true,
            verbose: true,
            log_dir: None,
            io_mode: IoMode::default(),
            timeouts: Timeouts::default(),
            workers: default_workers(),
            toolchain,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    pub fn with_qemu_firmware(mut self, firmware: impl Into<PathBuf>) -> Self {
        self.qemu_firmware = Some(firmware.into());
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn with_io_mode(mut self, io_mode: IoMode) -> Self {
        self.io_mode = io_mode;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                reason: reason.to_string(),
            })
        };

        if self.workers == 0 {
            return invalid("Worker count must be greater than 0");
        }

        if self.timeouts.exit_wait.is_zero() {
            return invalid("Exit wait must be greater than 0");
        }

        if self.timeouts.case_budget.is_zero() || self.timeouts.qemu_case_budget.is_zero() {
            return invalid("Case budgets must be greater than 0");
        }

        if self.qemu_firmware.is_some() && !self.features.qemu {
            return invalid("A qemu firmware was given but qemu is not enabled");
        }

        Ok(())
    }

    /// The configuration parallel runs actually use.
    ///
    /// Concurrent cases may share temporary file names, and interleaved
    /// streaming output is unreadable, so cleanup and echo are both off.
    pub fn for_parallel(&self) -> Self {
        Self {
            cleanup: false,
            verbose: false,
            ..self.clone()
        }
    }

    /// Per-case budget used in parallel mode
    pub fn case_budget(&self) -> Duration {
        self.timeouts.budget_for(&self.features)
    }
}

/// Host concurrency, falling back to a single worker
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
