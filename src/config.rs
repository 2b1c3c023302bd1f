//! Runtime configuration and backend selection.
//!
//! Environment overrides:
//!
//! ```text
//!   MARLIN_JIT_TILING    micro-tiling, "<b_cols>x<a_cols>"   (default 15x1)
//!   MARLIN_JIT_BLOCK     fixed block size                    (default adaptive)
//!   MARLIN_JIT_VERIFY    0 | 1                               (default 1)
//!   MARLIN_GEMM_BACKEND  reference | avx512 | jit            (default by ISA)
//! ```

use std::env;

use crate::error::{MarlinError, MarlinResult};
use crate::gemm::BackendKind;
use crate::isa::has_avx512;
use crate::jit::tiling::{BlockPolicy, TilingScheme};

pub const ENV_TILING: &str = "MARLIN_JIT_TILING";
pub const ENV_BLOCK: &str = "MARLIN_JIT_BLOCK";
pub const ENV_VERIFY: &str = "MARLIN_JIT_VERIFY";
pub const ENV_BACKEND: &str = "MARLIN_GEMM_BACKEND";

/// Knobs of the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    pub tiling: TilingScheme,
    pub blocks: BlockPolicy,
    /// Decode and check every program before it is made executable.
    pub verify: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self { tiling: TilingScheme::default(), blocks: BlockPolicy::default(), verify: true }
    }
}

impl JitConfig {
    pub fn with_tiling(mut self, tiling: TilingScheme) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_blocks(mut self, blocks: BlockPolicy) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn from_env() -> MarlinResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MarlinResult<Self> {
        let mut cfg = Self::default();
        if let Some(v) = lookup(ENV_TILING) {
            cfg.tiling = v.parse()?;
        }
        if let Some(v) = lookup(ENV_BLOCK) {
            let size = v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&b| b > 0)
                .ok_or_else(|| MarlinError::invalid(format!("{ENV_BLOCK}={v:?} is not a block size")))?;
            cfg.blocks = BlockPolicy::Fixed(size);
        }
        if let Some(v) = lookup(ENV_VERIFY) {
            cfg.verify = match v.trim() {
                "1" => true,
                "0" => false,
                _ => return Err(MarlinError::invalid(format!("{ENV_VERIFY}={v:?}, expected 0 or 1"))),
            };
        }
        Ok(cfg)
    }
}

/// Pick the GEMM backend from `MARLIN_GEMM_BACKEND`, else JIT on AVX-512
/// hosts and the reference loop elsewhere.
pub fn auto_select_backend() -> MarlinResult<BackendKind> {
    select_backend(env::var(ENV_BACKEND).ok().as_deref(), has_avx512())
}

pub(crate) fn select_backend(value: Option<&str>, avx512: bool) -> MarlinResult<BackendKind> {
    if let Some(value) = value {
        let kind = value.parse::<BackendKind>()?;
        log::info!("gemm backend {kind:?} forced by {ENV_BACKEND}");
        return Ok(kind);
    }
    let kind = if avx512 { BackendKind::Jit } else { BackendKind::Reference };
    log::info!("gemm backend auto-selected: {kind:?}");
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = JitConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, JitConfig::default());
        assert!(cfg.verify);
    }

    #[test]
    fn test_overrides() {
        let cfg = JitConfig::from_lookup(lookup(&[
            (ENV_TILING, "5x3"),
            (ENV_BLOCK, "96"),
            (ENV_VERIFY, "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.tiling, TilingScheme::B5_A3);
        assert_eq!(cfg.blocks, BlockPolicy::Fixed(96));
        assert!(!cfg.verify);
    }

    #[test]
    fn test_malformed_overrides() {
        assert!(JitConfig::from_lookup(lookup(&[(ENV_TILING, "4x4")])).is_err());
        assert!(JitConfig::from_lookup(lookup(&[(ENV_BLOCK, "0")])).is_err());
        assert!(JitConfig::from_lookup(lookup(&[(ENV_VERIFY, "yes")])).is_err());
    }

    #[test]
    fn test_backend_selection() {
        assert_eq!(select_backend(None, true).unwrap(), BackendKind::Jit);
        assert_eq!(select_backend(None, false).unwrap(), BackendKind::Reference);
        assert_eq!(select_backend(Some("avx512"), false).unwrap(), BackendKind::Avx512);
        assert!(select_backend(Some("blas"), true).is_err());
    }
}
