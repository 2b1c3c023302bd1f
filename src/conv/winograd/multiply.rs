//! Element-wise Winograd-domain multiply:
//!
//! ```text
//!   product[n][t][m][tile] = Σ_c filter_t[t][m][c] · input_t[n][t][c][tile]
//! ```
//!
//! Three interchangeable implementations: generated filter code, AVX-512
//! intrinsics with a scalar fallback, and 16 GEMMs per image.

use rayon::prelude::*;

use super::{WinogradPlan, TILE_AREA};
use crate::error::{MarlinError, MarlinResult};
use crate::gemm::{Gemm, Transpose};
use crate::isa::has_avx512;
use crate::jit::wino_store::TAP_GROUP;
use crate::jit::Jitter;

/// Tiles handled per vector.
const LANES: usize = 16;

/// Portable reference of the multiply.
pub fn multiply_scalar(filter_t: &[f32], input_t: &[f32], plan: &WinogradPlan, product: &mut [f32]) {
    let (m_n, c_n, t_n) = (plan.filters, plan.channels, plan.tile_count);
    for n in 0..plan.batch {
        for t in 0..TILE_AREA {
            for m in 0..m_n {
                let dst = &mut product[((n * TILE_AREA + t) * m_n + m) * t_n..][..t_n];
                dst.fill(0.0);
                for c in 0..c_n {
                    let f = filter_t[(t * m_n + m) * c_n + c];
                    let src = &input_t[((n * TILE_AREA + t) * c_n + c) * t_n..][..t_n];
                    for (d, &x) in dst.iter_mut().zip(src) {
                        *d = f.mul_add(x, *d);
                    }
                }
            }
        }
    }
}

/// AVX-512 multiply with filter values broadcast from memory; scalar when
/// the host lacks AVX-512.
pub fn multiply_vectorized(filter_t: &[f32], input_t: &[f32], plan: &WinogradPlan, product: &mut [f32]) {
    if !has_avx512() {
        log::warn!("AVX-512 unavailable, winograd multiply falls back to scalar");
        multiply_scalar(filter_t, input_t, plan, product);
        return;
    }
    #[cfg(target_arch = "x86_64")]
    {
        let f = |t: usize, m: usize, c: usize| filter_t[(t * plan.filters + m) * plan.channels + c];
        // SAFETY: AVX-512F checked above; buffer extents follow the plan.
        unsafe {
            avx512::run_grouped(plan, input_t, product, |m, g, c, bank| {
                for (i, b) in bank.iter_mut().enumerate() {
                    let t = g * TAP_GROUP + i;
                    *b = std::arch::x86_64::_mm512_set1_ps(if t < TILE_AREA { f(t, m, c) } else { 0.0 });
                }
            });
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    multiply_scalar(filter_t, input_t, plan, product);
}

/// Multiply with the filter baked into generated code.
pub fn multiply_jit(jitter: &Jitter, input_t: &[f32], plan: &WinogradPlan, product: &mut [f32]) -> MarlinResult<()> {
    let layout = jitter
        .wino_layout()
        .ok_or_else(|| MarlinError::invalid("jitter holds no winograd program"))?;
    if layout.filters != plan.filters || layout.channels != plan.channels || layout.tile_area != TILE_AREA {
        return Err(MarlinError::invalid(format!(
            "winograd program is for M={} C={}, plan needs M={} C={}",
            layout.filters, layout.channels, plan.filters, plan.channels
        )));
    }
    if !has_avx512() {
        return Err(MarlinError::unsupported("generated code requires AVX-512F"));
    }
    let mut entries = Vec::with_capacity(layout.fragment_count());
    for idx in 0..layout.fragment_count() {
        entries.push(jitter.entry(idx)?);
    }
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: AVX-512F checked; entries are verified fragments of a
        // program matching the plan's M and C.
        unsafe {
            avx512::run_grouped(plan, input_t, product, |m, g, c, bank| {
                let regs = crate::jit::jitter::call_fragment(entries[layout.fragment_index(m, g, c)]);
                bank.copy_from_slice(&regs[..TAP_GROUP]);
            });
        }
        Ok(())
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (input_t, product, entries);
        Err(MarlinError::unsupported("generated code is x86-64 only"))
    }
}

/// Sixteen `[M×C]·[C×T]` GEMMs per image, run in parallel.
pub fn multiply_gemm(
    gemm: &Gemm,
    filter_t: &[f32],
    input_t: &[f32],
    plan: &WinogradPlan,
    product: &mut [f32],
) -> MarlinResult<()> {
    let (m_n, c_n, t_n) = (plan.filters, plan.channels, plan.tile_count);
    let (sa, sb, sc) = (m_n * c_n, c_n * t_n, m_n * t_n);
    if sc == 0 {
        return Ok(());
    }
    product[..plan.batch * TILE_AREA * sc]
        .par_chunks_mut(sc)
        .enumerate()
        .try_for_each(|(idx, c)| {
            let t = idx % TILE_AREA;
            let a = &filter_t[t * sa..][..sa];
            let b = &input_t[idx * sb..][..sb];
            gemm.sgemm(Transpose::N, Transpose::N, m_n, t_n, c_n, 1.0, a, c_n, b, t_n, 0.0, c, t_n)
        })
}

#[cfg(target_arch = "x86_64")]
mod avx512 {
    use std::arch::x86_64::*;

    use super::{LANES, TAP_GROUP, TILE_AREA};
    use crate::conv::winograd::WinogradPlan;

    /// Shared loop: for each image, filter, group of 16 tiles and group of 8
    /// taps, accumulate over channels. `load(m, g, c, bank)` fills the eight
    /// broadcast filter values of taps `g*8 .. g*8+8`.
    #[target_feature(enable = "avx512f")]
    pub(super) unsafe fn run_grouped(
        plan: &WinogradPlan,
        input_t: &[f32],
        product: &mut [f32],
        mut load: impl FnMut(usize, usize, usize, &mut [__m512; TAP_GROUP]),
    ) {
        let (m_n, c_n, t_n) = (plan.filters, plan.channels, plan.tile_count);
        let groups = TILE_AREA.div_ceil(TAP_GROUP);
        let x = input_t.as_ptr();
        let y = product.as_mut_ptr();
        let mut bank = [_mm512_setzero_ps(); TAP_GROUP];
        for n in 0..plan.batch {
            for m in 0..m_n {
                for tile in (0..t_n).step_by(LANES) {
                    let lanes = (t_n - tile).min(LANES);
                    let mask: __mmask16 = if lanes == LANES { 0xFFFF } else { (1u16 << lanes) - 1 };
                    for g in 0..groups {
                        let mut acc = [_mm512_setzero_ps(); TAP_GROUP];
                        for c in 0..c_n {
                            load(m, g, c, &mut bank);
                            for (i, a) in acc.iter_mut().enumerate() {
                                let t = g * TAP_GROUP + i;
                                if t >= TILE_AREA {
                                    break;
                                }
                                let src = x.add(((n * TILE_AREA + t) * c_n + c) * t_n + tile);
                                let v = _mm512_maskz_loadu_ps(mask, src);
                                *a = _mm512_fmadd_ps(bank[i], v, *a);
                            }
                        }
                        for (i, a) in acc.iter().enumerate() {
                            let t = g * TAP_GROUP + i;
                            if t >= TILE_AREA {
                                break;
                            }
                            let dst = y.add(((n * TILE_AREA + t) * m_n + m) * t_n + tile);
                            _mm512_mask_storeu_ps(dst, mask, *a);
                        }
                    }
                }
            }
        }
    }
}
