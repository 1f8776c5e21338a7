#![cfg(unix)]

use harness::{
    last_log_banner, CaseError, CaseExecutor, CaseRunner, CaseStatus, ExecutionMode, Features,
    RunConfiguration, SuiteScheduler, TestCase, Timeouts,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use toolchain::{DriverCommand, ToolchainPaths};

/// Fake driver: decides the verdict from the case file's contents and
/// records every argument list it was called with.
const DRIVER_SCRIPT: &str = r#"#!/bin/sh
for last; do :; done
echo "$*" >> "$(dirname "$0")/calls.log"
case "$(cat "$last")" in
    *PASS*)
        echo "compiled $last"
        exit 0
        ;;
    *FAIL*)
        i=0
        while [ $i -lt 20 ]; do
            echo "error line $i"
            i=$((i + 1))
        done
        exit 1
        ;;
    *HANG*)
        sleep 30
        exit 0
        ;;
    *DETACH*)
        exec >&- 2>&-
        sleep 30
        exit 0
        ;;
esac
exit 2
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("core")).unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        for artifact in ["wat2wasm", "wasm2native", "libvmlib.a"] {
            fs::write(dir.path().join("bin").join(artifact), b"").unwrap();
        }
        fs::write(dir.path().join("bin").join("driver.sh"), DRIVER_SCRIPT).unwrap();
        Self { dir }
    }

    /// Add `core/<name>.wast` whose driver verdict is `verdict`
    fn case(self, name: &str, verdict: &str) -> Self {
        let path = self.dir.path().join("core").join(format!("{name}.wast"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!(";; {verdict}\n(module)\n")).unwrap();
        self
    }

    fn case_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("core").join(format!("{name}.wast"))
    }

    fn config(&self) -> RunConfiguration {
        let bin = self.dir.path().join("bin");
        let paths = ToolchainPaths {
            suite_dir: self.dir.path().join("core"),
            converter: bin.join("wat2wasm"),
            compiler: bin.join("wasm2native"),
            runtime_lib: bin.join("libvmlib.a"),
            driver: DriverCommand::new("sh").with_arg(bin.join("driver.sh").to_string_lossy()),
        };
        let toolchain = paths.preflight().unwrap();
        RunConfiguration::new(toolchain)
            .with_verbose(false)
            .with_workers(4)
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("bin").join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn called_with(calls: &[String], case: &Path) -> bool {
    let case = case.canonicalize().unwrap();
    calls
        .iter()
        .any(|call| call.ends_with(&*case.to_string_lossy()))
}

fn short_timeouts() -> Timeouts {
    Timeouts {
        exit_wait: Duration::from_secs(1),
        case_budget: Duration::from_secs(2),
        qemu_case_budget: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_sequential_suite_passes() {
    let fixture = Fixture::new()
        .case("i32", "PASS")
        .case("br", "PASS")
        .case("names", "FAIL");
    let config = fixture.config();

    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Sequential)
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.passed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert!(report.all_passed);
    assert!(!called_with(&fixture.calls(), &fixture.case_path("names")));
}

#[tokio::test]
async fn test_parallel_counts_with_filtered_and_failing_cases() {
    let mut fixture = Fixture::new();
    for i in 0..7 {
        fixture = fixture.case(&format!("ok{i}"), "PASS");
    }
    let fixture = fixture
        .case("broken", "FAIL")
        .case("linking", "FAIL")
        .case("table_fill", "FAIL");
    let config = fixture.config();

    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Parallel)
        .await
        .unwrap();

    assert_eq!(report.total, 10);
    assert_eq!(report.passed, 7);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    assert!(!report.all_passed);
    assert_eq!(fixture.calls().len(), 8);
}

#[tokio::test]
async fn test_sequential_stops_at_first_failure() {
    let fixture = Fixture::new()
        .case("a_first", "PASS")
        .case("b_broken", "FAIL")
        .case("c_never", "PASS");
    let config = fixture.config();

    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Sequential)
        .await
        .unwrap();

    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.not_run, 1);
    assert_eq!(report.total, 2);
    assert!(!called_with(&fixture.calls(), &fixture.case_path("c_never")));
}

#[tokio::test]
async fn test_parallel_budget_kills_hanging_case_and_continues() {
    let fixture = Fixture::new()
        .case("hangs", "HANG")
        .case("quick", "PASS")
        .case("broken", "FAIL");
    let config = fixture.config().with_timeouts(short_timeouts());

    let started = Instant::now();
    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Parallel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.timed_out, 1);
}

#[tokio::test]
async fn test_driver_that_closes_its_output_hits_the_exit_ceiling() {
    let fixture = Fixture::new().case("detached", "DETACH");
    let config = fixture.config().with_timeouts(short_timeouts());
    let case = TestCase::from_path(&fixture.case_path("detached"));

    let started = Instant::now();
    let outcome = CaseRunner::new().execute(&case, &config).await;

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(outcome.status, CaseStatus::Timeout);
}

#[tokio::test]
async fn test_sequential_run_times_out_driver_with_open_output() {
    let fixture = Fixture::new()
        .case("a_quick", "PASS")
        .case("b_hangs", "HANG")
        .case("c_never", "PASS");
    let config = fixture.config().with_timeouts(short_timeouts());

    let started = Instant::now();
    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Sequential)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.timed_out, 1);
    assert_eq!(report.not_run, 1);
    assert!(!called_with(&fixture.calls(), &fixture.case_path("c_never")));
}

#[tokio::test]
async fn test_runner_bounds_driver_that_never_closes_output() {
    let fixture = Fixture::new().case("hangs", "HANG");
    let config = fixture.config().with_timeouts(short_timeouts());
    let case = TestCase::from_path(&fixture.case_path("hangs"));

    let started = Instant::now();
    let outcome = CaseRunner::new().execute(&case, &config).await;

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(outcome.status, CaseStatus::Timeout);
    assert!(matches!(outcome.error, Some(CaseError::BudgetExceeded(_))));
}

#[tokio::test]
async fn test_verbose_failure_echoes_instead_of_keeping_tail() {
    let fixture = Fixture::new().case("broken", "FAIL");
    let config = fixture.config().with_verbose(true);
    let case = TestCase::from_path(&fixture.case_path("broken"));

    let outcome = CaseRunner::new().execute(&case, &config).await;

    assert_eq!(outcome.status, CaseStatus::Fail);
    assert!(matches!(outcome.error, Some(CaseError::Exit { code: Some(1) })));
    assert!(outcome.tail_log.is_none());
}

#[tokio::test]
async fn test_failing_case_keeps_tail_of_output() {
    let fixture = Fixture::new().case("broken", "FAIL");
    let config = fixture.config();
    let case = TestCase::from_path(&fixture.case_path("broken"));

    let outcome = CaseRunner::new().execute(&case, &config).await;

    assert_eq!(outcome.status, CaseStatus::Fail);
    let tail = outcome.tail_log.unwrap();
    assert_eq!(tail.len(), 16);
    assert_eq!(tail.first().unwrap(), "error line 4");
    assert_eq!(tail.last().unwrap(), "error line 19");

    let banner = last_log_banner(&case.name, &tail);
    assert!(banner.contains("LAST LOG of broken"));
    assert!(banner.contains("error line 4\n"));
    assert!(!banner.contains("error line 3\n"));
    assert!(banner.contains("LAST LOG END"));
}

#[tokio::test]
async fn test_parallel_run_disables_cleanup() {
    let fixture = Fixture::new().case("i32", "PASS").case("i64", "PASS");
    let config = fixture.config().with_cleanup(true).with_verbose(true);

    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Parallel)
        .await
        .unwrap();

    assert!(report.all_passed);
    let calls = fixture.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|call| call.contains("--no_cleanup")));
}

#[tokio::test]
async fn test_sequential_run_keeps_cleanup() {
    let fixture = Fixture::new().case("i32", "PASS");
    let config = fixture.config().with_cleanup(true);

    SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Sequential)
        .await
        .unwrap();

    let calls = fixture.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].contains("--no_cleanup"));
    assert!(calls[0].contains("--target x86_64"));
}

#[tokio::test]
async fn test_parallel_and_sequential_agree() {
    let fixture = Fixture::new()
        .case("i32", "PASS")
        .case("i64", "PASS")
        .case("names", "PASS")
        .case("f32", "PASS");
    let config = fixture.config();
    let scheduler = SuiteScheduler::new(CaseRunner::new());

    let sequential = scheduler
        .run_suite(&config, ExecutionMode::Sequential)
        .await
        .unwrap();
    let parallel = scheduler
        .run_suite(&config, ExecutionMode::Parallel)
        .await
        .unwrap();

    assert_eq!(sequential, parallel);
}

#[tokio::test]
async fn test_simd_cases_run_with_simd_flag() {
    let fixture = Fixture::new()
        .case("i32", "PASS")
        .case("simd/simd_const", "PASS");
    let config = fixture.config().with_features(Features {
        simd: true,
        ..Features::default()
    });

    let report = SuiteScheduler::new(CaseRunner::new())
        .run_suite(&config, ExecutionMode::Sequential)
        .await
        .unwrap();

    assert_eq!(report.passed, 2);
    let calls = fixture.calls();
    assert!(called_with(&calls, &fixture.case_path("simd/simd_const")));
    assert!(calls.iter().all(|call| call.contains("--simd")));
}

#[tokio::test]
async fn test_explicit_cases_bypass_the_filter() {
    let fixture = Fixture::new().case("names", "PASS").case("i32", "PASS");
    let config = fixture.config();
    let cases = vec![TestCase::from_path(&fixture.case_path("names"))];

    let report = SuiteScheduler::new(CaseRunner::new())
        .without_filter()
        .run(cases, &config, ExecutionMode::Sequential)
        .await;

    assert_eq!(report.total, 1);
    assert_eq!(report.passed, 1);
    assert_eq!(report.skipped, 0);
    assert!(called_with(&fixture.calls(), &fixture.case_path("names")));
}
