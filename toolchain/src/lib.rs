//! Toolchain artifact resolution for the conformance harness
//!
//! The harness never builds anything itself. It needs four artifacts that
//! some earlier build produced (the conformance suite checkout, the
//! text-to-binary converter, the compiler under test and its runtime support
//! library) plus the per-case driver program. This crate locates them and
//! refuses to continue when any of them is missing.

mod target;

pub use target::Target;

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors related to locating the toolchain
#[derive(Error, Debug)]
pub enum ToolchainError {
    #[error("Can not find {kind} at {}", .path.display())]
    MissingArtifact { kind: ArtifactKind, path: PathBuf },
    #[error("Unknown target '{target}'")]
    InvalidTarget { target: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ToolchainResult<T> = Result<T, ToolchainError>;

/// The artifacts that must exist before any case runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    SuiteDir,
    Converter,
    Compiler,
    RuntimeLibrary,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::SuiteDir => write!(f, "spec test cases"),
            ArtifactKind::Converter => write!(f, "wast2wasm converter"),
            ArtifactKind::Compiler => write!(f, "wasm2native compiler"),
            ArtifactKind::RuntimeLibrary => write!(f, "vmlib runtime library"),
        }
    }
}

/// Program (and leading arguments) used to run a single case
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverCommand {
    /// Executable to spawn, looked up on `PATH` when relative
    pub program: PathBuf,
    /// Arguments placed before the per-case flags
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for DriverCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python3"),
            args: vec!["runtest.py".to_string()],
        }
    }
}

impl DriverCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Unresolved artifact locations, as configured
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolchainPaths {
    /// Directory holding the `*.wast` conformance cases
    pub suite_dir: PathBuf,
    /// Text-to-binary module converter
    pub converter: PathBuf,
    /// Compiler under test
    pub compiler: PathBuf,
    /// Prebuilt runtime support library
    pub runtime_lib: PathBuf,
    /// Per-case driver
    pub driver: DriverCommand,
}

impl Default for ToolchainPaths {
    fn default() -> Self {
        Self {
            suite_dir: PathBuf::from("spec/test/core"),
            converter: PathBuf::from("./wabt/out/gcc/Release/wat2wasm"),
            compiler: PathBuf::from("../../../wasm2native-compiler/build/wasm2native"),
            runtime_lib: PathBuf::from("../../../wasm2native-vmlib/build/libvmlib.a"),
            driver: DriverCommand::default(),
        }
    }
}

impl ToolchainPaths {
    /// Check that every required artifact exists and resolve it to an
    /// absolute path
    pub fn preflight(&self) -> ToolchainResult<Toolchain> {
        Ok(Toolchain {
            suite_dir: resolve(ArtifactKind::SuiteDir, &self.suite_dir)?,
            converter: resolve(ArtifactKind::Converter, &exe_file_path(&self.converter))?,
            compiler: resolve(ArtifactKind::Compiler, &exe_file_path(&self.compiler))?,
            runtime_lib: resolve(ArtifactKind::RuntimeLibrary, &self.runtime_lib)?,
            driver: self.driver.clone(),
        })
    }
}

/// Artifact locations that passed preflight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub suite_dir: PathBuf,
    pub converter: PathBuf,
    pub compiler: PathBuf,
    pub runtime_lib: PathBuf,
    pub driver: DriverCommand,
}

fn resolve(kind: ArtifactKind, path: &Path) -> ToolchainResult<PathBuf> {
    if !path.exists() {
        return Err(ToolchainError::MissingArtifact {
            kind,
            path: path.to_path_buf(),
        });
    }
    Ok(path.canonicalize()?)
}

fn exe_file_path(path: &Path) -> PathBuf {
    if cfg!(windows) && path.extension().is_none() {
        path.with_extension("exe")
    } else {
        path.to_path_buf()
    }
}
