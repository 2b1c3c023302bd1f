//! Runtime ISA detection.
//!
//! Detection runs once per process; every later query reads the cached level.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IsaLevel {
    Scalar,
    Avx2,
    /// AVX-512F: required by the micro-kernels and by generated code.
    Avx512,
}

static ISA_LEVEL: OnceLock<IsaLevel> = OnceLock::new();

pub fn get_isa_level() -> IsaLevel {
    *ISA_LEVEL.get_or_init(detect_isa_features)
}

/// Whether generated programs and the 16×J kernels can run on this host.
#[inline]
pub fn has_avx512() -> bool {
    get_isa_level() >= IsaLevel::Avx512
}

#[cfg(target_arch = "x86_64")]
fn detect_isa_features() -> IsaLevel {
    if is_x86_feature_detected!("avx512f") {
        IsaLevel::Avx512
    } else if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        IsaLevel::Avx2
    } else {
        IsaLevel::Scalar
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_isa_features() -> IsaLevel {
    IsaLevel::Scalar
}
