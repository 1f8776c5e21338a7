//! Running one case through the external driver
//!
//! Each case is exactly one driver process. The driver receives the
//! toolchain locations, the target and feature flags, and the absolute path
//! of the `.wast` file; its exit code is the only verdict. Output is either
//! echoed line by line or, in quiet mode, reduced to a short tail that is
//! printed only if the case fails.

use crate::case::{CaseError, CaseOutcome, TestCase};
use crate::config::{IoMode, RunConfiguration};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Lines of driver output kept for a failed case in quiet mode
pub const TAIL_LOG_LINES: usize = 16;

/// Something that can turn a case into an outcome
#[async_trait]
pub trait CaseExecutor: Send + Sync {
    async fn execute(&self, case: &TestCase, config: &RunConfiguration) -> CaseOutcome;
}

/// Sliding window over the most recent output lines
#[derive(Debug, Clone)]
pub struct TailLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TailLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

enum OutputSink {
    Echo,
    Tail(TailLog),
}

impl OutputSink {
    fn new(verbose: bool) -> Self {
        if verbose {
            OutputSink::Echo
        } else {
            OutputSink::Tail(TailLog::new(TAIL_LOG_LINES))
        }
    }

    fn push(&mut self, line: String) {
        match self {
            OutputSink::Echo => println!("{line}"),
            OutputSink::Tail(tail) => tail.push(line),
        }
    }

    fn into_tail(self) -> Option<Vec<String>> {
        match self {
            OutputSink::Echo => None,
            OutputSink::Tail(tail) => Some(tail.into_lines()),
        }
    }
}

/// Build the driver's argument list for `case`
pub fn driver_args(case: &TestCase, config: &RunConfiguration) -> Vec<OsString> {
    let toolchain = &config.toolchain;
    let mut args: Vec<OsString> = toolchain.driver.args.iter().map(OsString::from).collect();

    args.push("--wast2wasm".into());
    args.push(toolchain.converter.clone().into());
    if config.io_mode == IoMode::Pipe {
        args.push("--no-pty".into());
    }
    args.push("--wasm2native-compiler".into());
    args.push(toolchain.compiler.clone().into());
    args.push("--vmlib-file".into());
    args.push(toolchain.runtime_lib.clone().into());

    args.push("--target".into());
    args.push(config.target.tag().into());

    if config.features.simd {
        args.push("--simd".into());
    }

    if config.features.qemu {
        args.push("--qemu".into());
        if let Some(firmware) = &config.qemu_firmware {
            args.push("--qemu-firmware".into());
            args.push(firmware.clone().into());
        }
    }

    if !config.cleanup {
        args.push("--no_cleanup".into());
    }

    if config.features.memory64 {
        args.push("--memory64".into());
    }

    if let Some(log_dir) = &config.log_dir {
        args.push("--log-dir".into());
        args.push(log_dir.clone().into());
    }

    let case_path = case.path.canonicalize().unwrap_or_else(|_| case.path.clone());
    args.push(case_path.into());
    args
}

/// Runs cases through the configured driver program
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseRunner;

impl CaseRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(case: &TestCase, config: &RunConfiguration) -> Command {
        let mut command = Command::new(&config.toolchain.driver.program);
        command
            .args(driver_args(case, config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    async fn drive(
        &self,
        case: &TestCase,
        config: &RunConfiguration,
    ) -> (Result<(), CaseError>, OutputSink) {
        let mut sink = OutputSink::new(config.verbose);
        let mut command = Self::command(case, config);
        debug!(case = %case.id, command = ?command.as_std(), "spawning driver");

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let error = CaseError::Launch {
                    program: config.toolchain.driver.program.display().to_string(),
                    source,
                };
                return (Err(error), sink);
            }
        };
        let mut group = ProcessGroupGuard::new(child.id());

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone());
        }
        drop(tx);

        // ends once both streams are closed, or when the case budget runs out
        let budget = config.case_budget();
        let streamed = timeout(budget, async {
            while let Some(line) = rx.recv().await {
                sink.push(line);
            }
        })
        .await;
        if streamed.is_err() {
            warn!(case = %case.id, "driver still running after {budget:?}, killing it");
            group.terminate();
            if let Err(e) = child.kill().await {
                debug!(case = %case.id, "kill after budget overrun: {e}");
            }
            return (Err(CaseError::BudgetExceeded(budget)), sink);
        }

        let exit_wait = config.timeouts.exit_wait;
        let result = match timeout(exit_wait, child.wait()).await {
            Ok(Ok(status)) => {
                group.disarm();
                if status.success() {
                    Ok(())
                } else {
                    Err(CaseError::Exit {
                        code: status.code(),
                    })
                }
            }
            Ok(Err(e)) => Err(CaseError::Wait(e)),
            Err(_) => {
                warn!(case = %case.id, "driver did not exit within {exit_wait:?}, killing it");
                group.terminate();
                if let Err(e) = child.kill().await {
                    debug!(case = %case.id, "kill after exit timeout: {e}");
                }
                Err(CaseError::ExitTimeout(exit_wait))
            }
        };

        (result, sink)
    }
}

#[async_trait]
impl CaseExecutor for CaseRunner {
    async fn execute(&self, case: &TestCase, config: &RunConfiguration) -> CaseOutcome {
        let started = Instant::now();
        if config.verbose {
            println!("============> run {}", case.id);
        }

        let (result, sink) = self.drive(case, config).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                print_verdict(case, config.verbose, "successful");
                CaseOutcome::passed(case, elapsed)
            }
            Err(error) => {
                print_verdict(case, config.verbose, &error.to_string());
                let outcome = CaseOutcome::failed(case, error, elapsed);
                match sink.into_tail() {
                    Some(tail) => {
                        print_last_log(&case.name, &tail);
                        outcome.with_tail_log(tail)
                    }
                    None => outcome,
                }
            }
        }
    }
}

/// In verbose mode the `run` header was already printed before the driver
/// output, so only the verdict follows it
fn verdict_line(case: &TestCase, verbose: bool, verdict: &str) -> String {
    if verbose {
        verdict.to_string()
    } else {
        format!("============> run {} {verdict}", case.id)
    }
}

fn print_verdict(case: &TestCase, verbose: bool, verdict: &str) {
    println!("{}", verdict_line(case, verbose, verdict));
}

/// The retained tail of a failed case between banners
pub fn last_log_banner(case_name: &str, lines: &[String]) -> String {
    let mut banner =
        format!("\n==================== LAST LOG of {case_name} ====================\n\n");
    for line in lines {
        banner.push_str(line);
        banner.push('\n');
    }
    banner.push_str("\n==================== LAST LOG END ====================\n");
    banner
}

pub fn print_last_log(case_name: &str, lines: &[String]) {
    println!("{}", last_log_banner(case_name, lines));
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("driver output stream failed: {e}");
                    break;
                }
            }
        }
    });
}

/// Kills the driver's whole process group unless disarmed.
///
/// Dropping a case future that is still running (its budget ran out) kills
/// the driver and everything it started.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn terminate(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!("failed to kill process group {pgid}: {e}");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}
