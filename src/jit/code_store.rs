//! Sparsity-aware code generation for the B operand of a GEMM.
//!
//! Each tile of B becomes one fragment: one broadcast per slot (zero entries
//! use the shorter zero template), then `ret`. Sizing and emission run over
//! the same [`TileWalk`], so the analytic size can only disagree with the
//! emitted size if the encoder itself is broken.

use super::bytecode::ByteCode;
use super::encoder::{self, RET_LEN};
use super::regalloc::{RegisterAllocator, BROADCAST_SLOTS};
use super::tile_walk::TileWalk;
use super::tiling::{BlockPolicy, TilingScheme};
use crate::config::JitConfig;
use crate::error::{MarlinError, MarlinResult};

/// Encoded size of a fragment holding `slots`.
pub fn fragment_len(slots: &[f32]) -> usize {
    slots.iter().map(|&v| encoder::entry_len(v)).sum::<usize>() + RET_LEN
}

/// Emit one fragment for `slots` into `out`, slot `s` landing in the
/// register the allocator hands out `s`-th. Returns bytes written.
pub fn emit_fragment(
    slots: &[f32],
    regs: &mut RegisterAllocator,
    out: &mut Vec<u8>,
) -> MarlinResult<usize> {
    regs.reset();
    let mut written = 0;
    for &v in slots {
        written += encoder::emit_broadcast(out, regs.next_broadcast()?, v);
    }
    written += encoder::emit_ret(out);
    Ok(written)
}

pub(crate) fn count_zeros(values: &[f32]) -> usize {
    values.iter().filter(|&&v| v == 0.0).count()
}

#[derive(Debug, Clone)]
pub struct CodeStore {
    scheme: TilingScheme,
    policy: BlockPolicy,
}

impl CodeStore {
    pub fn new(scheme: TilingScheme, policy: BlockPolicy) -> Self {
        Self { scheme, policy }
    }

    pub fn from_config(config: &JitConfig) -> Self {
        Self::new(config.tiling, config.blocks)
    }

    pub fn scheme(&self) -> TilingScheme {
        self.scheme
    }

    /// Choose blocks for a row-major `k×n` operand and build its walk.
    pub fn plan(&self, b: &[f32], k: usize, n: usize) -> MarlinResult<TileWalk> {
        let total = k.checked_mul(n).ok_or_else(|| MarlinError::invalid("k*n overflows"))?;
        if b.len() < total {
            return Err(MarlinError::invalid(format!(
                "B holds {} values, a {k}x{n} operand needs {total}",
                b.len()
            )));
        }
        let zeros = count_zeros(&b[..total]);
        let sparsity = if total == 0 { 0.0 } else { zeros as f64 / total as f64 };
        let blocks = self.policy.resolve(sparsity, k, n, self.scheme);
        log::debug!(
            "B {k}x{n}: {zeros} zeros (sparsity {sparsity:.3}), tiling {}, blocks {blocks:?}",
            self.scheme
        );
        TileWalk::new(k, n, self.scheme, blocks)
    }

    /// Exact program size for `b` under `walk`.
    pub fn code_size(&self, walk: &TileWalk, b: &[f32]) -> usize {
        let mut slots = [0.0f32; BROADCAST_SLOTS];
        let width = walk.scheme().slots();
        let mut size = 0;
        walk.for_each(|t| {
            walk.gather(t, b, walk.n(), &mut slots);
            size += fragment_len(&slots[..width]);
        });
        size
    }

    /// Generate the broadcast program for row-major `b` (`k×n`).
    pub fn generate_b_matrix(&self, b: &[f32], k: usize, n: usize) -> MarlinResult<(ByteCode, TileWalk)> {
        let mut bytecode = ByteCode::new();
        let walk = self.generate_b_matrix_into(b, k, n, &mut bytecode)?;
        Ok((bytecode, walk))
    }

    /// Same as [`CodeStore::generate_b_matrix`], writing into caller storage.
    pub fn generate_b_matrix_into(
        &self,
        b: &[f32],
        k: usize,
        n: usize,
        out: &mut ByteCode,
    ) -> MarlinResult<TileWalk> {
        let walk = self.plan(b, k, n)?;
        let expected = self.code_size(&walk, b);
        out.begin(expected, walk.tile_count())?;

        let width = walk.scheme().slots();
        let mut slots = [0.0f32; BROADCAST_SLOTS];
        let mut regs = RegisterAllocator::new();
        let mut frag = Vec::with_capacity(width * encoder::BROADCAST_CONST_LEN + RET_LEN);
        let mut tally = 0usize;
        walk.try_for_each(|t| {
            walk.gather(t, b, n, &mut slots);
            frag.clear();
            tally += emit_fragment(&slots[..width], &mut regs, &mut frag)?;
            out.push_fragment(&frag)
        })?;

        if tally != expected || out.len() != expected {
            return Err(MarlinError::Internal(format!(
                "expected code size {expected}, generated {tally}"
            )));
        }
        out.validate()?;
        log::debug!("generated {} fragments, {} bytes", walk.tile_count(), tally);
        Ok(walk)
    }
}

impl Default for CodeStore {
    fn default() -> Self {
        Self::new(TilingScheme::default(), BlockPolicy::default())
    }
}
