//! Independent GEMMs over a batch, run in parallel with rayon.

use rayon::prelude::*;

use super::{Gemm, Transpose};
use crate::error::{MarlinError, MarlinResult};

/// `C[i] = A[i]·B[i]` for `i in 0..batch`, densely packed: A is
/// `[batch][m][k]`, B `[batch][k][n]`, C `[batch][m][n]`.
///
/// Each task runs its own GEMM; with the JIT backend that means its own
/// generated program.
#[allow(clippy::too_many_arguments)]
pub fn sgemm_batched(
    gemm: &Gemm,
    batch: usize,
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
) -> MarlinResult<()> {
    let (sa, sb, sc) = (m * k, k * n, m * n);
    if a.len() < batch * sa || b.len() < batch * sb || c.len() < batch * sc {
        return Err(MarlinError::invalid(format!(
            "batched gemm of {batch}x({m}x{k}·{k}x{n}) does not fit the given buffers"
        )));
    }
    if batch == 0 || sc == 0 {
        return Ok(());
    }
    if k == 0 {
        c[..batch * sc].fill(0.0);
        return Ok(());
    }

    c[..batch * sc]
        .par_chunks_mut(sc)
        .zip(a[..batch * sa].par_chunks(sa).zip(b[..batch * sb].par_chunks(sb)))
        .try_for_each(|(ci, (ai, bi))| {
            gemm.sgemm(Transpose::N, Transpose::N, m, n, k, 1.0, ai, k, bi, n, 0.0, ci, n)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batched_matches_single() {
        let g = Gemm::reference();
        let (batch, m, n, k) = (4, 3, 5, 2);
        let a: Vec<f32> = (0..batch * m * k).map(|v| v as f32).collect();
        let b: Vec<f32> = (0..batch * k * n).map(|v| (v % 7) as f32).collect();
        let mut c = vec![0.0; batch * m * n];
        sgemm_batched(&g, batch, m, n, k, &a, &b, &mut c).unwrap();
        for i in 0..batch {
            let mut want = vec![0.0; m * n];
            g.sgemm(
                Transpose::N,
                Transpose::N,
                m,
                n,
                k,
                1.0,
                &a[i * m * k..],
                k,
                &b[i * k * n..],
                n,
                0.0,
                &mut want,
                n,
            )
            .unwrap();
            assert_eq!(&c[i * m * n..(i + 1) * m * n], &want[..]);
        }
    }

    #[test]
    fn test_batched_rejects_short_buffers() {
        let g = Gemm::reference();
        let mut c = vec![0.0; 4];
        assert!(sgemm_batched(&g, 2, 2, 2, 2, &[0.0; 8], &[0.0; 7], &mut c).is_err());
    }
}
