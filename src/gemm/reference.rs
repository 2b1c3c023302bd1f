//! Naive triple loop. Portable backend and the oracle for the vector ones.

use super::Operand;

/// Epilogue shared by every backend: `beta·c + alpha·acc`, C unread when
/// `beta == 0`.
#[inline(always)]
pub(crate) fn finish(acc: f32, alpha: f32, beta: f32, c: f32) -> f32 {
    if beta == 0.0 {
        alpha * acc
    } else {
        beta.mul_add(c, alpha * acc)
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn sgemm(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: Operand<'_>,
    b: Operand<'_>,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f32;
            for p in 0..k {
                acc = a.at(i, p).mul_add(b.at(p, j), acc);
            }
            let dst = &mut c[i * ldc + j];
            *dst = finish(acc, alpha, beta, *dst);
        }
    }
}
