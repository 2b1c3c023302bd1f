//! Single-precision GEMM: `C = alpha·op(A)·op(B) + beta·C`, row-major.
//!
//! Three interchangeable backends, chosen once at construction:
//!
//! | Backend     | Transposes | B operand                           |
//! |-------------|------------|-------------------------------------|
//! | `Reference` | all        | loaded from memory, scalar loop     |
//! | `Avx512`    | `N,N`      | loaded and broadcast per k step     |
//! | `Jit`       | `N,N`      | baked into a generated program      |
//!
//! All backends build each output element as a sequential fused
//! multiply-add chain over `k` starting from zero, then apply
//! `beta·c + alpha·acc` (C is not read when `beta == 0`), so their results
//! are bit-identical.

pub mod batched;
pub mod driver;
#[cfg(target_arch = "x86_64")]
pub mod jit_kernel;
#[cfg(target_arch = "x86_64")]
pub mod kernels;
pub mod reference;

use std::fmt;
use std::str::FromStr;

use crate::config::{auto_select_backend, JitConfig};
use crate::error::{MarlinError, MarlinResult};
use crate::isa::has_avx512;
use crate::jit::Jitter;

pub use batched::sgemm_batched;
pub use driver::{TilePlan, TileRegion, ROW_TILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Reference,
    Avx512,
    Jit,
}

impl BackendKind {
    pub fn requires_avx512(self) -> bool {
        !matches!(self, BackendKind::Reference)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Reference => "reference",
            BackendKind::Avx512 => "avx512",
            BackendKind::Jit => "jit",
        })
    }
}

impl FromStr for BackendKind {
    type Err = MarlinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" | "ref" => Ok(BackendKind::Reference),
            "avx512" => Ok(BackendKind::Avx512),
            "jit" => Ok(BackendKind::Jit),
            other => Err(MarlinError::invalid(format!("unknown gemm backend {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    N,
    T,
}

impl TryFrom<char> for Transpose {
    type Error = MarlinError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'N' | 'n' => Ok(Transpose::N),
            'T' | 't' => Ok(Transpose::T),
            other => Err(MarlinError::invalid(format!("transpose flag {other:?}"))),
        }
    }
}

/// Row-major operand view: `rows×cols` logical, stored with leading
/// dimension `ld`, optionally transposed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operand<'a> {
    pub data: &'a [f32],
    pub ld: usize,
    pub trans: Transpose,
}

impl Operand<'_> {
    /// Element `(r, c)` of `op(X)`.
    #[inline(always)]
    pub fn at(&self, r: usize, c: usize) -> f32 {
        match self.trans {
            Transpose::N => self.data[r * self.ld + c],
            Transpose::T => self.data[c * self.ld + r],
        }
    }
}

/// Check that a `rows×cols` operand (as stored) fits `len` with leading
/// dimension `ld`.
pub(crate) fn check_matrix(name: &str, rows: usize, cols: usize, ld: usize, len: usize) -> MarlinResult<()> {
    if ld < cols.max(1) {
        return Err(MarlinError::invalid(format!("ld{name}={ld} is smaller than {cols} columns")));
    }
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    let need = (rows - 1)
        .checked_mul(ld)
        .and_then(|v| v.checked_add(cols))
        .ok_or_else(|| MarlinError::invalid(format!("{name} extent overflows")))?;
    if len < need {
        return Err(MarlinError::invalid(format!(
            "{name} holds {len} values, {rows}x{cols} with ld {ld} needs {need}"
        )));
    }
    Ok(())
}

/// Scale the `m×n` block of C by `beta`; `beta == 0` overwrites with zeros.
pub(crate) fn scale_c(m: usize, n: usize, beta: f32, c: &mut [f32], ldc: usize) {
    for i in 0..m {
        let row = &mut c[i * ldc..i * ldc + n];
        if beta == 0.0 {
            row.fill(0.0);
        } else {
            row.iter_mut().for_each(|v| *v *= beta);
        }
    }
}

/// GEMM entry point bound to one backend.
#[derive(Debug, Clone, Copy)]
pub struct Gemm {
    kind: BackendKind,
    config: JitConfig,
}

impl Gemm {
    pub fn new(kind: BackendKind, config: JitConfig) -> MarlinResult<Self> {
        if kind.requires_avx512() && !has_avx512() {
            return Err(MarlinError::unsupported(format!("{kind} backend requires AVX-512F")));
        }
        Ok(Self { kind, config })
    }

    pub fn reference() -> Self {
        Self { kind: BackendKind::Reference, config: JitConfig::default() }
    }

    /// Backend and JIT knobs from the environment.
    pub fn from_env() -> MarlinResult<Self> {
        Self::new(auto_select_backend()?, JitConfig::from_env()?)
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sgemm(
        &self,
        transa: Transpose,
        transb: Transpose,
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
        if self.kind != BackendKind::Reference && (transa, transb) != (Transpose::N, Transpose::N) {
            return Err(MarlinError::invalid(format!(
                "{} backend supports only N,N, got {transa:?},{transb:?}",
                self.kind
            )));
        }
        let (a_rows, a_cols) = if transa == Transpose::N { (m, k) } else { (k, m) };
        let (b_rows, b_cols) = if transb == Transpose::N { (k, n) } else { (n, k) };
        check_matrix("a", a_rows, a_cols, lda, a.len())?;
        check_matrix("b", b_rows, b_cols, ldb, b.len())?;
        check_matrix("c", m, n, ldc, c.len())?;

        if m == 0 || n == 0 {
            return Ok(());
        }
        if k == 0 {
            scale_c(m, n, beta, c, ldc);
            return Ok(());
        }

        let a = Operand { data: a, ld: lda, trans: transa };
        let b = Operand { data: b, ld: ldb, trans: transb };
        match self.kind {
            BackendKind::Reference => {
                reference::sgemm(m, n, k, alpha, a, b, beta, c, ldc);
                Ok(())
            }
            BackendKind::Avx512 => driver::run_avx512(m, n, k, alpha, a.data, lda, b.data, ldb, beta, c, ldc),
            BackendKind::Jit => {
                let mut jitter = Jitter::new(self.config);
                if ldb == n {
                    jitter.generate_code(b.data, m, k, n)?;
                } else {
                    // generation expects a dense k×n operand
                    let mut dense = Vec::with_capacity(k * n);
                    for p in 0..k {
                        dense.extend_from_slice(&b.data[p * ldb..p * ldb + n]);
                    }
                    jitter.generate_code(&dense, m, k, n)?;
                }
                driver::run_jit(&jitter, m, n, k, alpha, a.data, lda, beta, c, ldc)
            }
        }
    }

    /// `C = alpha·A·B + beta·C` with B taken from an already generated
    /// program (for example one loaded from disk) instead of memory.
    #[allow(clippy::too_many_arguments)]
    pub fn sgemm_with_jitter(
        &self,
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
        if walk.k() != k || walk.n() != n {
            return Err(MarlinError::invalid(format!(
                "program is for a {}x{} B operand, call needs {k}x{n}",
                walk.k(),
                walk.n()
            )));
        }
        check_matrix("a", m, k, lda, a.len())?;
        check_matrix("c", m, n, ldc, c.len())?;
        if m == 0 {
            return Ok(());
        }
        driver::run_jit(jitter, m, n, k, alpha, a, lda, beta, c, ldc)
    }
}

impl Default for Gemm {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(len: usize) -> Vec<f32> {
        (0..len).map(|v| (v + 1) as f32).collect()
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("JIT".parse::<BackendKind>().unwrap(), BackendKind::Jit);
        assert_eq!(BackendKind::Avx512.to_string(), "avx512");
        assert!("cuda".parse::<BackendKind>().is_err());
        assert_eq!(Transpose::try_from('t').unwrap(), Transpose::T);
        assert!(Transpose::try_from('C').is_err());
    }

    #[test]
    fn test_shape_validation() {
        let g = Gemm::reference();
        let (a, b) = (seq(6), seq(6));
        let mut c = vec![0.0; 4];
        // lda smaller than k
        assert!(g.sgemm(Transpose::N, Transpose::N, 2, 2, 3, 1.0, &a, 2, &b, 2, 0.0, &mut c, 2).is_err());
        // C too short
        let mut short = vec![0.0; 3];
        assert!(g.sgemm(Transpose::N, Transpose::N, 2, 2, 3, 1.0, &a, 3, &b, 2, 0.0, &mut short, 2).is_err());
        g.sgemm(Transpose::N, Transpose::N, 2, 2, 3, 1.0, &a, 3, &b, 2, 0.0, &mut c, 2).unwrap();
        assert_eq!(c, vec![22.0, 28.0, 49.0, 64.0]);
    }

    #[test]
    fn test_degenerate_dims() {
        let g = Gemm::reference();
        let mut c = vec![2.0; 4];
        g.sgemm(Transpose::N, Transpose::N, 0, 2, 3, 1.0, &[], 3, &seq(6), 2, 5.0, &mut c, 2).unwrap();
        assert_eq!(c, vec![2.0; 4]);
        g.sgemm(Transpose::N, Transpose::N, 2, 2, 0, 1.0, &[], 1, &[], 2, 0.5, &mut c, 2).unwrap();
        assert_eq!(c, vec![1.0; 4]);
        g.sgemm(Transpose::N, Transpose::N, 2, 2, 0, 1.0, &[], 1, &[], 2, 0.0, &mut c, 2).unwrap();
        assert_eq!(c, vec![0.0; 4]);
    }

    #[test]
    fn test_vector_backends_reject_transpose() {
        if !has_avx512() {
            assert!(matches!(
                Gemm::new(BackendKind::Avx512, JitConfig::default()),
                Err(MarlinError::Unsupported(_))
            ));
            return;
        }
        let g = Gemm::new(BackendKind::Jit, JitConfig::default()).unwrap();
        let mut c = vec![0.0; 4];
        let r = g.sgemm(Transpose::T, Transpose::N, 2, 2, 2, 1.0, &seq(4), 2, &seq(4), 2, 0.0, &mut c, 2);
        assert!(matches!(r, Err(MarlinError::InvalidArgument(_))));
    }
}
