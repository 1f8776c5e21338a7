use clap::Parser;
use harness::{
    CaseRunner, ConfigFile, ExecutionMode, Features, IoMode, RunConfiguration, SuiteReport,
    SuiteScheduler, TestCase,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use toolchain::{DriverCommand, Target, ToolchainPaths};
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Run the spec test suite against the wasm2native toolchain")]
struct Cli {
    /// Target to compile the cases for
    #[arg(short = 'm', long, default_value = "X86_64")]
    target: Target,
    /// Run the SIMD cases as well
    #[arg(short = 'S', long)]
    simd: bool,
    /// Run the memory64 cases as well
    #[arg(long)]
    memory64: bool,
    /// Keep temporary files. Always on in parallel mode
    #[arg(long = "no-clean-up", alias = "no_clean_up")]
    no_clean_up: bool,
    /// Run the whole suite in parallel
    #[arg(long = "parl")]
    parallel: bool,
    /// Run the compiled cases under qemu
    #[arg(long)]
    qemu: bool,
    /// Firmware image handed to qemu
    #[arg(long, requires = "qemu")]
    qemu_firmware: Option<PathBuf>,
    /// Directory the driver writes its per-case logs to
    #[arg(long = "log")]
    log_dir: Option<PathBuf>,
    /// Only show driver output for failing cases
    #[arg(long)]
    quiet: bool,
    /// Talk to the driver over plain pipes instead of a pty
    #[arg(long)]
    no_pty: bool,
    /// Number of cases run at once in parallel mode
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
    /// TOML file describing the toolchain layout
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding the *.wast cases
    #[arg(long)]
    suite_dir: Option<PathBuf>,
    /// wast2wasm converter
    #[arg(long)]
    wast2wasm: Option<PathBuf>,
    /// wasm2native compiler
    #[arg(long)]
    compiler: Option<PathBuf>,
    /// vmlib runtime library
    #[arg(long)]
    vmlib: Option<PathBuf>,
    /// Per-case driver program, replacing the default `python3 runtest.py`
    #[arg(long)]
    driver: Option<PathBuf>,
    /// Extra leading argument for the driver program
    #[arg(long = "driver-arg", allow_hyphen_values = true)]
    driver_args: Vec<String>,
    /// Run only these case files, sequentially and unfiltered
    cases: Vec<PathBuf>,
}

impl Cli {
    fn toolchain_paths(&self, mut paths: ToolchainPaths) -> ToolchainPaths {
        if let Some(dir) = &self.suite_dir {
            paths.suite_dir = dir.clone();
        }
        if let Some(converter) = &self.wast2wasm {
            paths.converter = converter.clone();
        }
        if let Some(compiler) = &self.compiler {
            paths.compiler = compiler.clone();
        }
        if let Some(vmlib) = &self.vmlib {
            paths.runtime_lib = vmlib.clone();
        }
        if let Some(program) = &self.driver {
            paths.driver = DriverCommand::new(program);
        }
        for arg in &self.driver_args {
            paths.driver.args.push(arg.clone());
        }
        paths
    }

    fn features(&self) -> Features {
        Features {
            simd: self.simd,
            memory64: self.memory64,
            qemu: self.qemu,
        }
    }

    fn mode(&self) -> ExecutionMode {
        if self.parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) if report.all_passed => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("Harness aborted: {}", e);
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<SuiteReport, Box<dyn std::error::Error>> {
    let file = match &cli.config {
        Some(path) => ConfigFile::from_path(path)?,
        None => ConfigFile::default(),
    };

    let toolchain = cli.toolchain_paths(file.toolchain).preflight()?;
    debug!(?toolchain, "toolchain resolved");

    let mut config = RunConfiguration::new(toolchain)
        .with_target(cli.target)
        .with_features(cli.features())
        .with_cleanup(!cli.no_clean_up)
        .with_verbose(!cli.quiet)
        .with_timeouts(file.timeouts);

    if let Some(firmware) = &cli.qemu_firmware {
        config = config.with_qemu_firmware(firmware);
    }
    if cli.no_pty {
        config = config.with_io_mode(IoMode::Pipe);
    }
    if let Some(workers) = cli.jobs.or(file.jobs) {
        config = config.with_workers(workers);
    }
    if let Some(log_dir) = &cli.log_dir {
        std::fs::create_dir_all(log_dir)?;
        config = config.with_log_dir(log_dir.canonicalize()?);
    }
    config.validate()?;

    let scheduler = SuiteScheduler::new(CaseRunner::new());

    if !cli.cases.is_empty() {
        info!("Running {} explicitly listed cases", cli.cases.len());
        let cases = cli
            .cases
            .iter()
            .map(|path| TestCase::from_path(path))
            .collect();
        let report = scheduler
            .without_filter()
            .run(cases, &config, ExecutionMode::Sequential)
            .await;
        return Ok(report);
    }

    let mode = cli.mode();
    let start = Instant::now();
    let report = scheduler.run_suite(&config, mode).await?;
    let elapsed = start.elapsed().as_millis();

    match mode {
        ExecutionMode::Parallel => println!("It takes {elapsed} ms to run test_suite parallelly"),
        ExecutionMode::Sequential => println!("It takes {elapsed} ms to run test_suite"),
    }

    Ok(report)
}
