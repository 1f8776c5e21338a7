//! Which cases the compiler under test is not expected to pass
//!
//! Filtering is decided from the case name alone (its file stem) plus the
//! run's target and features. It never touches the filesystem. SIMD and
//! memory64 only decide which directories discovery walks; they do not add
//! skips here.

use crate::config::Features;
use std::fmt;
use toolchain::Target;

/// Cases that never apply: documentation-only scripts and scripts that link
/// several modules together, which the compiler does not implement
const ALWAYS_SKIP: &[&str] = &[
    "comments",
    "inline-module",
    "names",
    "imports",
    "linking",
    "simd_linking",
];

/// Reference types, table operations and part of bulk memory
const UNSUPPORTED_OPCODES: &[&str] = &[
    "ref_func",
    "ref_null",
    "ref_is_null",
    "table_get",
    "table_set",
    "table_init",
    "table_copy",
    "elem_drop",
    "table_size",
    "table_grow",
    "table_fill",
    "bulk",
    "memory_init",
    "data_drop",
];

/// x87 does not preserve signaling-NaN payloads
const X87_SENSITIVE: &[&str] = &["float_exprs", "conversions"];

/// Emulated floating point is flaky for these
const QEMU_FLAKY: &[&str] = &[
    "f32_bitwise",
    "f64_bitwise",
    "loop",
    "f64",
    "f64_cmp",
    "conversions",
    "f32",
    "f32_cmp",
    "float_exprs",
    "float_misc",
    "select",
    "memory_grow",
];

/// The rule that excluded a case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlwaysSkipped,
    UnsupportedOpcode,
    X87Target,
    Qemu,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlwaysSkipped => write!(f, "not applicable"),
            SkipReason::UnsupportedOpcode => write!(f, "unsupported opcodes"),
            SkipReason::X87Target => write!(f, "x87 does not preserve sNaN"),
            SkipReason::Qemu => write!(f, "flaky under qemu"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterPolicy;

impl FilterPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn skip(&self, case_name: &str, target: Target, features: &Features) -> bool {
        self.skip_reason(case_name, target, features).is_some()
    }

    /// The first rule that excludes `case_name`, if any
    pub fn skip_reason(
        &self,
        case_name: &str,
        target: Target,
        features: &Features,
    ) -> Option<SkipReason> {
        if ALWAYS_SKIP.contains(&case_name) {
            return Some(SkipReason::AlwaysSkipped);
        }

        if UNSUPPORTED_OPCODES.contains(&case_name) {
            return Some(SkipReason::UnsupportedOpcode);
        }

        if target.uses_x87() && X87_SENSITIVE.contains(&case_name) {
            return Some(SkipReason::X87Target);
        }

        if features.qemu && QEMU_FLAKY.contains(&case_name) {
            return Some(SkipReason::Qemu);
        }

        None
    }
}
