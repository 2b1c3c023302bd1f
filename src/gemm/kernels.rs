//! AVX-512 micro-kernels computing one 16×J block of C, J = 1..=15.
//!
//! Rows of A and C are reached through a 16-lane gather index (`r * ld`) and
//! a row mask, so a partial row tile costs nothing extra. Column width is
//! exact per call site; there is no column masking.

use std::arch::x86_64::*;

use crate::error::{MarlinError, MarlinResult};

/// Widest micro-kernel; also the number of accumulator registers.
pub const MAX_COLS: usize = 15;

/// Row offsets of a 16-row tile must fit the 32-bit gather index.
pub fn check_stride(name: &str, ld: usize) -> MarlinResult<()> {
    match ld.checked_mul(15) {
        Some(v) if v <= i32::MAX as usize => Ok(()),
        _ => Err(MarlinError::invalid(format!(
            "ld{name}={ld}: row offsets do not fit a 32-bit gather index"
        ))),
    }
}

/// Gather index vector `[0, ld, 2·ld, ..., 15·ld]`. Caller must have
/// validated `ld` with [`check_stride`].
#[target_feature(enable = "avx512f")]
pub unsafe fn row_offsets(ld: usize) -> __m512i {
    let mut idx = [0i32; 16];
    for (r, v) in idx.iter_mut().enumerate() {
        *v = (r * ld) as i32;
    }
    _mm512_loadu_si512(idx.as_ptr().cast())
}

/// Masked load of one column: lane `r` reads `base[r * ld]`.
#[target_feature(enable = "avx512f")]
#[inline]
pub unsafe fn gather_col(base: *const f32, idx: __m512i, mask: __mmask16) -> __m512 {
    _mm512_mask_i32gather_ps::<4>(_mm512_setzero_ps(), mask, idx, base.cast())
}

/// Write `acc[j]` to column `j` of the C block as `beta·c + alpha·acc`.
#[target_feature(enable = "avx512f")]
#[inline]
pub unsafe fn store_tile(
    acc: &[__m512],
    c: *mut f32,
    c_idx: __m512i,
    alpha: f32,
    beta: f32,
    mask: __mmask16,
) {
    let valpha = _mm512_set1_ps(alpha);
    let vbeta = _mm512_set1_ps(beta);
    for (j, &a) in acc.iter().enumerate() {
        let dst = c.add(j);
        let mut out = _mm512_mul_ps(valpha, a);
        if beta != 0.0 {
            let cv = gather_col(dst, c_idx, mask);
            out = _mm512_fmadd_ps(vbeta, cv, out);
        }
        _mm512_mask_i32scatter_ps::<4>(dst.cast(), mask, c_idx, out);
    }
}

/// One 16×J block: `C = alpha·A·B + beta·C` over the full `k`.
///
/// `a` points at row 0 of the block in A, `b` at column 0 of the block in
/// B (stride `ldb`), `c` at the block's top-left element.
///
/// # Safety
/// AVX-512F must be available; every enabled row and the `J` columns must
/// lie inside the operands.
#[target_feature(enable = "avx512f")]
#[allow(clippy::too_many_arguments)]
pub unsafe fn kernel_16xj<const J: usize>(
    k: usize,
    a: *const f32,
    a_idx: __m512i,
    b: *const f32,
    ldb: usize,
    c: *mut f32,
    c_idx: __m512i,
    alpha: f32,
    beta: f32,
    mask: __mmask16,
) {
    let mut acc = [_mm512_setzero_ps(); J];
    for p in 0..k {
        let av = gather_col(a.add(p), a_idx, mask);
        let brow = b.add(p * ldb);
        for (j, acc_j) in acc.iter_mut().enumerate() {
            *acc_j = _mm512_fmadd_ps(av, _mm512_set1_ps(*brow.add(j)), *acc_j);
        }
    }
    store_tile(&acc, c, c_idx, alpha, beta, mask);
}

/// Run the micro-kernel of width `cols`.
///
/// # Safety
/// Same contract as [`kernel_16xj`] with `J = cols`.
#[target_feature(enable = "avx512f")]
#[allow(clippy::too_many_arguments)]
pub unsafe fn kernel_16x(
    cols: usize,
    k: usize,
    a: *const f32,
    a_idx: __m512i,
    b: *const f32,
    ldb: usize,
    c: *mut f32,
    c_idx: __m512i,
    alpha: f32,
    beta: f32,
    mask: __mmask16,
) -> MarlinResult<()> {
    macro_rules! by_width {
        ($($j:literal)+) => {
            match cols {
                $($j => kernel_16xj::<$j>(k, a, a_idx, b, ldb, c, c_idx, alpha, beta, mask),)+
                _ => return Err(MarlinError::invalid(format!("no 16x{cols} micro-kernel"))),
            }
        };
    }
    by_width!(1 2 3 4 5 6 7 8 9 10 11 12 13 14 15);
    Ok(())
}
