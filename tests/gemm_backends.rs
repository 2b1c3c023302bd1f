//! Cross-backend GEMM equivalence.
//!
//! All backends build each output as the same fused multiply-add chain, so
//! their results must match bit for bit. Backends that need AVX-512 skip on
//! hosts without it.

use marlin_kernels::{
    has_avx512, skip_without_avx512, BackendKind, BlockPolicy, Gemm, JitConfig, TilingScheme, Transpose,
};

/// `A[i,j] = i*cols + j + 1`: integer data keeps every partial sum exact.
fn counting(rows: usize, cols: usize) -> Vec<f32> {
    (0..rows * cols).map(|v| (v + 1) as f32).collect()
}

fn sparse(rows: usize, cols: usize, keep_every: usize) -> Vec<f32> {
    (0..rows * cols)
        .map(|v| if v % keep_every == 0 { ((v % 13) as f32 - 6.0) * 0.5 } else { 0.0 })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn run(gemm: &Gemm, m: usize, n: usize, k: usize, alpha: f32, a: &[f32], b: &[f32], beta: f32, c0: &[f32]) -> Vec<f32> {
    let mut c = c0.to_vec();
    gemm.sgemm(Transpose::N, Transpose::N, m, n, k, alpha, a, k, b, n, beta, &mut c, n).unwrap();
    c
}

fn backends() -> Vec<Gemm> {
    let mut out = vec![Gemm::reference()];
    if has_avx512() {
        out.push(Gemm::new(BackendKind::Avx512, JitConfig::default()).unwrap());
        for scheme in TilingScheme::ALL {
            let config = JitConfig::default().with_tiling(scheme).with_blocks(BlockPolicy::Fixed(8));
            out.push(Gemm::new(BackendKind::Jit, config).unwrap());
        }
    }
    out
}

#[test]
fn test_reference_small_known_values() {
    // [[1,2],[3,4]] · [[5,6],[7,8]]
    let c = run(&Gemm::reference(), 2, 2, 2, 1.0, &[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], 0.0, &[0.0; 4]);
    assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_backends_agree_on_counting_matrices() {
    for &(m, n, k) in &[(5, 15, 10), (16, 1, 15), (17, 31, 9)] {
        let (a, b) = (counting(m, k), counting(k, n));
        let c0 = vec![0.0; m * n];
        let want = run(&Gemm::reference(), m, n, k, 1.0, &a, &b, 0.0, &c0);
        for gemm in backends() {
            let got = run(&gemm, m, n, k, 1.0, &a, &b, 0.0, &c0);
            assert_eq!(got, want, "{:?} on {m}x{n}x{k}", gemm.kind());
        }
    }
}

#[test]
fn test_backends_agree_with_alpha_beta() {
    let (m, n, k) = (33, 20, 24);
    let a = counting(m, k).iter().map(|v| v * 0.25).collect::<Vec<_>>();
    let b = sparse(k, n, 3);
    let c0: Vec<f32> = (0..m * n).map(|v| (v % 5) as f32).collect();
    let want = run(&Gemm::reference(), m, n, k, 0.5, &a, &b, 2.0, &c0);
    for gemm in backends() {
        assert_eq!(run(&gemm, m, n, k, 0.5, &a, &b, 2.0, &c0), want, "{:?}", gemm.kind());
    }
}

#[test]
fn test_beta_zero_ignores_stale_c() {
    let (m, n, k) = (4, 3, 2);
    let (a, b) = (counting(m, k), counting(k, n));
    let clean = run(&Gemm::reference(), m, n, k, 1.0, &a, &b, 0.0, &vec![0.0; m * n]);
    for gemm in backends() {
        let stale = vec![f32::NAN; m * n];
        assert_eq!(run(&gemm, m, n, k, 1.0, &a, &b, 0.0, &stale), clean, "{:?}", gemm.kind());
    }
}

#[test]
fn test_transposed_reference() {
    let (m, n, k) = (3, 4, 5);
    let a = counting(m, k);
    let b = counting(k, n);
    let mut at = vec![0.0; k * m];
    let mut bt = vec![0.0; n * k];
    for i in 0..m {
        for p in 0..k {
            at[p * m + i] = a[i * k + p];
        }
    }
    for p in 0..k {
        for j in 0..n {
            bt[j * k + p] = b[p * n + j];
        }
    }
    let g = Gemm::reference();
    let want = run(&g, m, n, k, 1.0, &a, &b, 0.0, &vec![0.0; m * n]);
    let mut got = vec![0.0; m * n];
    g.sgemm(Transpose::T, Transpose::T, m, n, k, 1.0, &at, m, &bt, k, 0.0, &mut got, n).unwrap();
    assert_eq!(got, want);
}

#[test]
fn test_fast_backends_reject_transposes() {
    skip_without_avx512!();
    let gemm = Gemm::new(BackendKind::Jit, JitConfig::default()).unwrap();
    let a = counting(2, 2);
    let mut c = vec![0.0; 4];
    assert!(gemm.sgemm(Transpose::T, Transpose::N, 2, 2, 2, 1.0, &a, 2, &a, 2, 0.0, &mut c, 2).is_err());
}

#[test]
fn test_padded_leading_dimensions() {
    skip_without_avx512!();
    let (m, n, k) = (18, 7, 5);
    let (lda, ldb, ldc) = (k + 3, n + 2, n + 4);
    let a: Vec<f32> = (0..m * lda).map(|v| (v % 9) as f32).collect();
    let b: Vec<f32> = (0..k * ldb).map(|v| (v % 4) as f32 - 1.0).collect();
    let mut want = vec![-1.0; m * ldc];
    Gemm::reference().sgemm(Transpose::N, Transpose::N, m, n, k, 1.0, &a, lda, &b, ldb, 0.0, &mut want, ldc).unwrap();
    for kind in [BackendKind::Avx512, BackendKind::Jit] {
        let mut got = vec![-1.0; m * ldc];
        let gemm = Gemm::new(kind, JitConfig::default()).unwrap();
        gemm.sgemm(Transpose::N, Transpose::N, m, n, k, 1.0, &a, lda, &b, ldb, 0.0, &mut got, ldc).unwrap();
        assert_eq!(got, want, "{kind}");
    }
}
