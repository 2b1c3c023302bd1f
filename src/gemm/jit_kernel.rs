//! Micro-kernel fed by generated code instead of B in memory.
//!
//! For each k step the kernel calls the fragment of its column tile. The
//! fragment leaves `a_cols × b_cols` constants in the broadcast bank; the
//! kernel accumulates the matching A columns against them.

use std::arch::x86_64::*;

use super::kernels::{gather_col, store_tile, MAX_COLS};
use crate::jit::jitter::call_fragment;

/// Shape of the generated tiles a kernel consumes.
#[derive(Debug, Clone, Copy)]
pub struct JitTileShape {
    pub k: usize,
    pub a_cols: usize,
    pub b_cols: usize,
}

/// One 16×`cols` block of C from the fragments in `entries` (one per k
/// step, in k order).
///
/// # Safety
/// AVX-512F must be available, every entry must be a live verified fragment
/// of a program whose tiles match `shape`, `cols <= shape.b_cols`, and the
/// enabled rows of A and C must be in bounds.
#[target_feature(enable = "avx512f")]
#[allow(clippy::too_many_arguments)]
pub unsafe fn jit_kernel_16xj(
    entries: &[*const u8],
    shape: JitTileShape,
    cols: usize,
    a: *const f32,
    a_idx: __m512i,
    c: *mut f32,
    c_idx: __m512i,
    alpha: f32,
    beta: f32,
    mask: __mmask16,
) {
    let cols = cols.min(MAX_COLS);
    let mut acc = [_mm512_setzero_ps(); MAX_COLS];
    for (step, &entry) in entries.iter().enumerate() {
        let bank = call_fragment(entry);
        let kk = step * shape.a_cols;
        let rows = shape.k.saturating_sub(kk).min(shape.a_cols);
        for r in 0..rows {
            let av = gather_col(a.add(kk + r), a_idx, mask);
            let slots = &bank[r * shape.b_cols..r * shape.b_cols + cols];
            for (acc_j, &bv) in acc.iter_mut().zip(slots) {
                *acc_j = _mm512_fmadd_ps(av, bv, *acc_j);
            }
        }
    }
    store_tile(&acc[..cols], c, c_idx, alpha, beta, mask);
}
