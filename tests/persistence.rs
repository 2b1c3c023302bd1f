//! `.cs` / `.of` artifacts: write, reload and execute.

use marlin_kernels::jit::persist::{code_path, offsets_path};
use marlin_kernels::{skip_without_avx512, BackendKind, Gemm, JitConfig, Jitter, MarlinError, Transpose};

fn operand(k: usize, n: usize) -> Vec<f32> {
    (0..k * n).map(|v| if v % 3 == 1 { 0.0 } else { (v % 11) as f32 - 5.0 }).collect()
}

#[test]
fn test_reload_executes_like_fresh_program() {
    skip_without_avx512!();
    let (m, n, k) = (21, 17, 12);
    let b = operand(k, n);
    let a: Vec<f32> = (0..m * k).map(|v| (v % 7) as f32 * 0.5).collect();
    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("layer0");

    let mut fresh = Jitter::new(JitConfig::default());
    fresh.generate_code(&b, m, k, n).unwrap();
    fresh.tofile(&stem, 7).unwrap();
    assert!(code_path(&stem).exists());
    assert!(offsets_path(&stem).exists());

    let mut loaded = Jitter::new(JitConfig::default());
    loaded.fromfile(&stem, n, k, 7).unwrap();
    assert_eq!(loaded.code(), fresh.code());
    assert_eq!(loaded.offsets(), fresh.offsets());
    assert_eq!(loaded.blocks(), fresh.blocks());
    for idx in 0..fresh.offsets().len() - 1 {
        assert_eq!(loaded.broadcasts(idx).unwrap(), fresh.broadcasts(idx).unwrap(), "fragment {idx}");
    }

    let gemm = Gemm::new(BackendKind::Jit, JitConfig::default()).unwrap();
    let mut want = vec![0.0; m * n];
    Gemm::reference().sgemm(Transpose::N, Transpose::N, m, n, k, 1.0, &a, k, &b, n, 0.0, &mut want, n).unwrap();
    let mut got = vec![0.0; m * n];
    gemm.sgemm_with_jitter(&loaded, m, n, k, 1.0, &a, k, 0.0, &mut got, n).unwrap();
    assert_eq!(got, want);
}

#[test]
fn test_reload_rejects_other_operand() {
    skip_without_avx512!();
    let (n, k) = (9, 6);
    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("w");
    let mut jitter = Jitter::new(JitConfig::default());
    jitter.generate_code(&operand(k, n), 4, k, n).unwrap();
    jitter.tofile(&stem, 1).unwrap();

    let mut other = Jitter::new(JitConfig::default());
    assert!(matches!(other.fromfile(&stem, n + 1, k, 1), Err(MarlinError::Domain(_))));
    assert!(matches!(other.fromfile(&stem, n, k, 2), Err(MarlinError::Domain(_))));
    assert!(matches!(other.fromfile(dir.path().join("missing"), n, k, 1), Err(MarlinError::Io(_))));
    assert!(!other.is_ready());
}
