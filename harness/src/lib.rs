pub mod case;
pub mod config;
pub mod discovery;
pub mod filter;
pub mod report;
pub mod runner;
pub mod scheduler;

pub use case::{CaseError, CaseOutcome, CaseRequirements, CaseStatus, TestCase};
pub use config::{
    default_workers, ConfigError, ConfigFile, Features, IoMode, RunConfiguration, Timeouts,
    CASE_BUDGET, EXIT_WAIT, QEMU_CASE_BUDGET,
};
pub use discovery::{CaseDiscovery, DiscoveryError};
pub use filter::{FilterPolicy, SkipReason};
pub use report::{ResultAggregator, SuiteReport};
pub use runner::{
    driver_args, last_log_banner, print_last_log, CaseExecutor, CaseRunner, TailLog,
    TAIL_LOG_LINES,
};
pub use scheduler::{ExecutionMode, SuiteScheduler};
