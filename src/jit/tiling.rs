//! Micro-tiling schemes and block sizing.

use std::fmt;
use std::str::FromStr;

use super::regalloc::BROADCAST_SLOTS;
use crate::error::{MarlinError, MarlinResult};

/// Shape of one generated fragment: `a_cols` consecutive rows of B, each
/// contributing `b_cols` columns, all held in broadcast registers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingScheme {
    b_cols: usize,
    a_cols: usize,
}

impl TilingScheme {
    pub const B15_A1: Self = Self { b_cols: 15, a_cols: 1 };
    pub const B7_A2: Self = Self { b_cols: 7, a_cols: 2 };
    pub const B5_A3: Self = Self { b_cols: 5, a_cols: 3 };
    pub const B3_A5: Self = Self { b_cols: 3, a_cols: 5 };
    pub const B2_A7: Self = Self { b_cols: 2, a_cols: 7 };
    pub const B1_A15: Self = Self { b_cols: 1, a_cols: 15 };

    /// Widest scheme for each `a_cols` that fits the register budget.
    pub const ALL: [Self; 6] = [
        Self::B15_A1,
        Self::B7_A2,
        Self::B5_A3,
        Self::B3_A5,
        Self::B2_A7,
        Self::B1_A15,
    ];

    pub fn new(b_cols: usize, a_cols: usize) -> MarlinResult<Self> {
        if b_cols == 0 || a_cols == 0 {
            return Err(MarlinError::invalid(format!(
                "micro-tiling {b_cols}x{a_cols} has an empty side"
            )));
        }
        if b_cols * a_cols > BROADCAST_SLOTS {
            return Err(MarlinError::invalid(format!(
                "micro-tiling {b_cols}x{a_cols} needs {} broadcast registers, limit {BROADCAST_SLOTS}",
                b_cols * a_cols
            )));
        }
        Ok(Self { b_cols, a_cols })
    }

    #[inline]
    pub fn b_cols(&self) -> usize {
        self.b_cols
    }

    #[inline]
    pub fn a_cols(&self) -> usize {
        self.a_cols
    }

    /// Broadcast entries per fragment.
    #[inline]
    pub fn slots(&self) -> usize {
        self.b_cols * self.a_cols
    }
}

impl Default for TilingScheme {
    fn default() -> Self {
        Self::B15_A1
    }
}

impl fmt::Display for TilingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.b_cols, self.a_cols)
    }
}

impl FromStr for TilingScheme {
    type Err = MarlinError;

    /// Parses `"<b_cols>x<a_cols>"`, e.g. `"5x3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MarlinError::invalid(format!("cannot parse tiling scheme {s:?}"));
        let (b, a) = s.trim().split_once(['x', 'X']).ok_or_else(bad)?;
        let b = b.trim().parse::<usize>().map_err(|_| bad())?;
        let a = a.trim().parse::<usize>().map_err(|_| bad())?;
        Self::new(b, a)
    }
}

/// How the j/k block sizes of the generation walk are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockPolicy {
    /// Larger blocks for sparser operands: 64, 128 or 256.
    #[default]
    Adaptive,
    Fixed(usize),
}

impl BlockPolicy {
    /// Raw block size for an operand with the given zero fraction.
    pub fn block_size(&self, sparsity: f64) -> usize {
        match *self {
            BlockPolicy::Fixed(b) => b,
            BlockPolicy::Adaptive if sparsity >= 0.8 => 256,
            BlockPolicy::Adaptive if sparsity >= 0.5 => 128,
            BlockPolicy::Adaptive => 64,
        }
    }

    /// Block sizes aligned to the scheme and clamped to the operand.
    pub fn resolve(&self, sparsity: f64, k: usize, n: usize, scheme: TilingScheme) -> Blocks {
        let raw = self.block_size(sparsity);
        Blocks::aligned(raw, raw, k, n, scheme)
    }
}

/// Concrete block sizes of one generated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blocks {
    pub j_block: usize,
    pub k_block: usize,
}

impl Blocks {
    /// Round `j` down to a multiple of `b_cols` and `k` to a multiple of
    /// `a_cols` (at least one tile each), then clamp to the operand.
    pub fn aligned(j: usize, k_raw: usize, k: usize, n: usize, scheme: TilingScheme) -> Self {
        let b = scheme.b_cols();
        let a = scheme.a_cols();
        let j_block = ((j / b) * b).max(b).min(n);
        let k_block = ((k_raw / a) * a).max(a).min(k);
        Blocks { j_block, k_block }
    }

    /// Whether stored block sizes are usable with `scheme` for a `k×n`
    /// operand, i.e. every non-final block boundary is tile-aligned.
    pub fn is_consistent(&self, k: usize, n: usize, scheme: TilingScheme) -> bool {
        let j_ok = self.j_block > 0
            && self.j_block <= n
            && (self.j_block % scheme.b_cols() == 0 || self.j_block == n);
        let k_ok = self.k_block > 0
            && self.k_block <= k
            && (self.k_block % scheme.a_cols() == 0 || self.k_block == k);
        j_ok && k_ok
    }
}
