//! Scheduling cases sequentially or over a worker pool
//!
//! Every case gets its own wall-clock budget; a case that overruns is killed
//! and recorded as a timeout. Sequential runs stop at the first failing or
//! timed-out case. Parallel runs always finish the whole set, and an overrun
//! never touches its siblings.

use crate::case::{CaseError, CaseOutcome, TestCase};
use crate::config::RunConfiguration;
use crate::discovery::{CaseDiscovery, DiscoveryError};
use crate::filter::FilterPolicy;
use crate::report::{ResultAggregator, SuiteReport};
use crate::runner::CaseExecutor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One case at a time, in discovery order, stopping at the first failure
    #[default]
    Sequential,
    /// Up to `RunConfiguration::workers` cases at a time
    Parallel,
}

pub struct SuiteScheduler<E> {
    executor: Arc<E>,
    policy: Option<FilterPolicy>,
}

impl<E: CaseExecutor + 'static> SuiteScheduler<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
            policy: Some(FilterPolicy::new()),
        }
    }

    /// Run every case handed in, even ones the filter would skip
    pub fn without_filter(mut self) -> Self {
        self.policy = None;
        self
    }

    /// Discover the suite under the configured suite directory and run it
    pub async fn run_suite(
        &self,
        config: &RunConfiguration,
        mode: ExecutionMode,
    ) -> Result<SuiteReport, DiscoveryError> {
        let cases = CaseDiscovery::new(&config.toolchain.suite_dir).discover(&config.features)?;
        Ok(self.run(cases, config, mode).await)
    }

    pub async fn run(
        &self,
        cases: Vec<TestCase>,
        config: &RunConfiguration,
        mode: ExecutionMode,
    ) -> SuiteReport {
        let mut aggregator = ResultAggregator::new();
        let runnable = self.filter(cases, config, &mut aggregator);

        match mode {
            ExecutionMode::Sequential => {
                self.run_sequential(runnable, config, &mut aggregator).await
            }
            ExecutionMode::Parallel => self.run_parallel(runnable, config, &mut aggregator).await,
        }

        aggregator.finish()
    }

    /// Record a skip for every filtered case and return the rest, in order
    fn filter(
        &self,
        cases: Vec<TestCase>,
        config: &RunConfiguration,
        aggregator: &mut ResultAggregator,
    ) -> Vec<TestCase> {
        let Some(policy) = &self.policy else {
            return cases;
        };

        let discovered = cases.len();
        let mut runnable = Vec::with_capacity(discovered);
        for case in cases {
            match policy.skip_reason(&case.name, config.target, &config.features) {
                Some(reason) => {
                    println!("---> skip {}", case.name);
                    debug!(case = %case.id, %reason, "filtered");
                    aggregator.record(CaseOutcome::skipped(&case));
                }
                None => runnable.push(case),
            }
        }
        println!("---> {discovered} ---filter--> {}", runnable.len());
        runnable
    }

    async fn run_sequential(
        &self,
        cases: Vec<TestCase>,
        config: &RunConfiguration,
        aggregator: &mut ResultAggregator,
    ) {
        println!("----- Run the whole spec test suite -----");
        let total = cases.len();

        for (index, case) in cases.iter().enumerate() {
            debug!(case = %case.id, requires = ?case.requires, "running case");
            let outcome = execute_within_budget(self.executor.as_ref(), case, config).await;
            let failed = outcome.status.is_failure();
            record(aggregator, outcome);

            if failed {
                let remaining = total - index - 1;
                warn!(case = %case.id, remaining, "stopping after first failure");
                aggregator.record_not_run(remaining);
                break;
            }
        }
    }

    async fn run_parallel(
        &self,
        cases: Vec<TestCase>,
        requested: &RunConfiguration,
        aggregator: &mut ResultAggregator,
    ) {
        let config = Arc::new(requested.for_parallel());
        if requested.cleanup || requested.verbose {
            info!("parallel run: temporary file cleanup and streaming output are disabled");
        }

        let workers = config.workers.max(1);
        println!("----- Run the whole spec test suite on {workers} cores -----");

        let permits = Arc::new(Semaphore::new(workers));
        let mut pending = Vec::with_capacity(cases.len());

        for case in cases {
            let executor = Arc::clone(&self.executor);
            let config = Arc::clone(&config);
            let permits = Arc::clone(&permits);
            let task_case = case.clone();

            let handle = tokio::spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                debug!(case = %task_case.id, requires = ?task_case.requires, "running case");
                execute_within_budget(executor.as_ref(), &task_case, &config).await
            });
            pending.push((case, handle));
        }

        for (case, handle) in pending {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(case = %case.id, "worker task failed: {e}");
                    CaseOutcome::failed(
                        &case,
                        CaseError::Join {
                            reason: e.to_string(),
                        },
                        Duration::ZERO,
                    )
                }
            };
            record(aggregator, outcome);
        }
    }
}

/// Run one case, failing it as a timeout once the per-case budget is spent.
/// The budget starts here, so queueing for a worker is not charged to it.
async fn execute_within_budget<E: CaseExecutor + ?Sized>(
    executor: &E,
    case: &TestCase,
    config: &RunConfiguration,
) -> CaseOutcome {
    let budget = config.case_budget();
    let started = Instant::now();
    match timeout(budget, executor.execute(case, config)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            println!("{} meets TimeoutError", case.id);
            CaseOutcome::failed(case, CaseError::BudgetExceeded(budget), started.elapsed())
        }
    }
}

fn record(aggregator: &mut ResultAggregator, outcome: CaseOutcome) {
    debug!(
        case = %outcome.id,
        status = %outcome.status,
        duration = ?outcome.duration,
        "case finished"
    );
    aggregator.record(outcome);
}
