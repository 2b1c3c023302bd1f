//! Partition of C into 16-row micro-tiles and the vector backends' loops.
//!
//! Tile order is fixed: full tiles row by row, then the partial row tile
//! across the full column tiles, then the column remainder (full row tiles
//! first, partial row tile last).

use crate::error::{MarlinError, MarlinResult};
use crate::isa::has_avx512;
use crate::jit::jitter::{partial_mask, FULL_MASK};
use crate::jit::Jitter;

/// Rows of C covered by one micro-kernel call.
pub const ROW_TILE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRegion {
    pub row: usize,
    pub rows: usize,
    pub col: usize,
    pub cols: usize,
}

impl TileRegion {
    pub fn mask(&self) -> u16 {
        if self.rows == ROW_TILE {
            FULL_MASK
        } else {
            partial_mask(self.rows)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TilePlan {
    m: usize,
    n: usize,
    col_width: usize,
}

impl TilePlan {
    pub fn new(m: usize, n: usize, col_width: usize) -> MarlinResult<Self> {
        if col_width == 0 || col_width > 15 {
            return Err(MarlinError::invalid(format!("column tile width {col_width}")));
        }
        Ok(Self { m, n, col_width })
    }

    pub fn full_rows(&self) -> usize {
        self.m / ROW_TILE * ROW_TILE
    }

    pub fn full_cols(&self) -> usize {
        self.n / self.col_width * self.col_width
    }

    pub fn tiles(&self) -> Vec<TileRegion> {
        let (fr, fc, w) = (self.full_rows(), self.full_cols(), self.col_width);
        let mut out = Vec::with_capacity(self.m.div_ceil(ROW_TILE) * self.n.div_ceil(w));
        for row in (0..fr).step_by(ROW_TILE) {
            for col in (0..fc).step_by(w) {
                out.push(TileRegion { row, rows: ROW_TILE, col, cols: w });
            }
        }
        if fr < self.m {
            for col in (0..fc).step_by(w) {
                out.push(TileRegion { row: fr, rows: self.m - fr, col, cols: w });
            }
        }
        if fc < self.n {
            let cols = self.n - fc;
            for row in (0..fr).step_by(ROW_TILE) {
                out.push(TileRegion { row, rows: ROW_TILE, col: fc, cols });
            }
            if fr < self.m {
                out.push(TileRegion { row: fr, rows: self.m - fr, col: fc, cols });
            }
        }
        out
    }
}

fn require_avx512() -> MarlinResult<()> {
    if has_avx512() {
        Ok(())
    } else {
        Err(MarlinError::unsupported("vector gemm requires AVX-512F"))
    }
}

/// NN GEMM over validated operands with the 16×J intrinsic kernels.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_avx512(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) -> MarlinResult<()> {
    require_avx512()?;
    #[cfg(target_arch = "x86_64")]
    {
        use super::kernels::{check_stride, kernel_16x, row_offsets, MAX_COLS};
        check_stride("a", lda)?;
        check_stride("c", ldc)?;
        let plan = TilePlan::new(m, n, MAX_COLS)?;
        // SAFETY: AVX-512F checked; operand extents were validated by the
        // caller and every tile lies inside the m×n block.
        unsafe {
            let (a_idx, c_idx) = (row_offsets(lda), row_offsets(ldc));
            for t in plan.tiles() {
                kernel_16x(
                    t.cols,
                    k,
                    a.as_ptr().add(t.row * lda),
                    a_idx,
                    b.as_ptr().add(t.col),
                    ldb,
                    c.as_mut_ptr().add(t.row * ldc + t.col),
                    c_idx,
                    alpha,
                    beta,
                    t.mask(),
                )?;
            }
        }
        Ok(())
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (m, n, k, alpha, a, lda, b, ldb, beta, c, ldc);
        Err(MarlinError::unsupported("vector gemm is x86-64 only"))
    }
}

/// NN GEMM with B supplied by the program committed in `jitter`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_jit(
    jitter: &Jitter,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) -> MarlinResult<()> {
    let walk = jitter
        .walk()
        .ok_or_else(|| MarlinError::invalid("jitter holds no GEMM program"))?;
    require_avx512()?;
    let scheme = walk.scheme();

    // Resolve every (column tile, k step) entry before running any code.
    let mut entries = Vec::with_capacity(walk.col_tiles());
    for ct in 0..walk.col_tiles() {
        let col: MarlinResult<Vec<*const u8>> = (0..walk.k_steps())
            .map(|ks| jitter.entry(jitter.dispatch_index(ct, ks)?))
            .collect();
        entries.push(col?);
    }

    #[cfg(target_arch = "x86_64")]
    {
        use super::jit_kernel::{jit_kernel_16xj, JitTileShape};
        use super::kernels::{check_stride, row_offsets};
        check_stride("a", lda)?;
        check_stride("c", ldc)?;
        let plan = TilePlan::new(m, n, scheme.b_cols())?;
        let shape = JitTileShape { k, a_cols: scheme.a_cols(), b_cols: scheme.b_cols() };
        // SAFETY: AVX-512F checked; entries come from the jitter's bounds
        // checked dispatch; operand extents were validated by the caller.
        unsafe {
            let (a_idx, c_idx) = (row_offsets(lda), row_offsets(ldc));
            for t in plan.tiles() {
                jit_kernel_16xj(
                    &entries[t.col / scheme.b_cols()],
                    shape,
                    t.cols,
                    a.as_ptr().add(t.row * lda),
                    a_idx,
                    c.as_mut_ptr().add(t.row * ldc + t.col),
                    c_idx,
                    alpha,
                    beta,
                    t.mask(),
                );
            }
        }
        Ok(())
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = (m, n, k, alpha, a, lda, beta, c, ldc, scheme, entries);
        Err(MarlinError::unsupported("generated code is x86-64 only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_order() {
        let plan = TilePlan::new(20, 32, 15).unwrap();
        let tiles = plan.tiles();
        let heads: Vec<(usize, usize, usize, usize)> =
            tiles.iter().map(|t| (t.row, t.rows, t.col, t.cols)).collect();
        assert_eq!(
            heads,
            vec![
                (0, 16, 0, 15),
                (0, 16, 15, 15),
                (16, 4, 0, 15),
                (16, 4, 15, 15),
                (0, 16, 30, 2),
                (16, 4, 30, 2),
            ]
        );
        assert_eq!(tiles[2].mask(), 0xF);
        assert_eq!(tiles[0].mask(), 0xFFFF);
    }

    #[test]
    fn test_plan_covers_c_once() {
        for (m, n, w) in [(5, 15, 15), (16, 1, 15), (33, 40, 7), (1, 1, 1)] {
            let plan = TilePlan::new(m, n, w).unwrap();
            let mut hits = vec![0u8; m * n];
            for t in plan.tiles() {
                for i in t.row..t.row + t.rows {
                    for j in t.col..t.col + t.cols {
                        hits[i * n + j] += 1;
                    }
                }
            }
            assert!(hits.iter().all(|&h| h == 1), "{m}x{n} width {w}");
        }
    }

    #[test]
    fn test_plan_rejects_bad_width() {
        assert!(TilePlan::new(4, 4, 0).is_err());
        assert!(TilePlan::new(4, 4, 16).is_err());
    }
}
