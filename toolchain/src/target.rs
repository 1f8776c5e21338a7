//! Code generation targets understood by the compiler under test.

use std::fmt;
use std::str::FromStr;

use crate::ToolchainError;

/// Instruction-set/ABI variant the compiler under test generates code for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    /// 32-bit x86 using the legacy x87 FPU
    I386,
    #[default]
    X86_64,
    Aarch64,
    Aarch64Vfp,
    Armv7,
    Armv7Vfp,
    Riscv32,
    Riscv32Ilp32f,
    Riscv32Ilp32d,
    Riscv64,
    Riscv64Lp64f,
    Riscv64Lp64d,
    Thumbv7,
    Thumbv7Vfp,
}

impl Target {
    /// Every target, in the order they are listed on the command line
    pub const ALL: [Target; 14] = [
        Target::I386,
        Target::X86_64,
        Target::Aarch64,
        Target::Aarch64Vfp,
        Target::Armv7,
        Target::Armv7Vfp,
        Target::Riscv32,
        Target::Riscv32Ilp32f,
        Target::Riscv32Ilp32d,
        Target::Riscv64,
        Target::Riscv64Lp64f,
        Target::Riscv64Lp64d,
        Target::Thumbv7,
        Target::Thumbv7Vfp,
    ];

    /// Lower-case tag passed to the driver's `--target` flag
    pub fn tag(&self) -> &'static str {
        match self {
            Target::I386 => "i386",
            Target::X86_64 => "x86_64",
            Target::Aarch64 => "aarch64",
            Target::Aarch64Vfp => "aarch64_vfp",
            Target::Armv7 => "armv7",
            Target::Armv7Vfp => "armv7_vfp",
            Target::Riscv32 => "riscv32",
            Target::Riscv32Ilp32f => "riscv32_ilp32f",
            Target::Riscv32Ilp32d => "riscv32_ilp32d",
            Target::Riscv64 => "riscv64",
            Target::Riscv64Lp64f => "riscv64_lp64f",
            Target::Riscv64Lp64d => "riscv64_lp64d",
            Target::Thumbv7 => "thumbv7",
            Target::Thumbv7Vfp => "thumbv7_vfp",
        }
    }

    /// Whether floating point runs on the x87 FPU, which does not preserve
    /// signaling-NaN payloads
    pub fn uses_x87(&self) -> bool {
        matches!(self, Target::I386)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Target {
    type Err = ToolchainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        // x86_32 is accepted as a spelling of i386
        if lowered == "x86_32" {
            return Ok(Target::I386);
        }

        Target::ALL
            .into_iter()
            .find(|target| target.tag() == lowered)
            .ok_or_else(|| ToolchainError::InvalidTarget {
                target: raw.to_string(),
            })
    }
}
