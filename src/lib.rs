//! marlin-kernels: sparsity-aware JIT GEMM and Winograd convolution for
//! AVX-512 CPUs.
//!
//! The B operand of `C ← α·A·B + β·C` is compiled into broadcast code: each
//! tile of B becomes a fragment that loads its constants straight into
//! vector registers, and zero entries take a shorter encoding. The 16×J
//! micro-kernels call those fragments instead of gathering B from memory.
//!
//! - [`jit`]: code generation, verification, executable pages, persistence
//! - [`gemm`]: reference, AVX-512 and JIT `sgemm` behind one entry point
//! - [`conv`]: direct convolution and Winograd F(2×2, 3×3)
//!
//! # Quick Start
//!
//! ```ignore
//! use marlin_kernels::{Gemm, Transpose};
//!
//! let gemm = Gemm::from_env()?;
//! gemm.sgemm(Transpose::N, Transpose::N, m, n, k, 1.0, &a, k, &b, n, 0.0, &mut c, n)?;
//! ```

pub mod config;
pub mod conv;
pub mod error;
pub mod gemm;
pub mod isa;
pub mod jit;
pub mod mem;
pub mod tensor;

pub use config::{auto_select_backend, JitConfig};
pub use conv::{
    Convolver, DirectConvolver, MultiplyStrategy, Padding, Stride, Winograd, WinogradKernel, WinogradPlan,
    WinogradTile,
};
pub use error::{MarlinError, MarlinResult};
pub use gemm::{sgemm_batched, BackendKind, Gemm, Transpose};
pub use isa::{get_isa_level, has_avx512, IsaLevel};
pub use jit::{BlockPolicy, Blocks, ByteCode, CodeStore, Codelet, Jitter, TileWalk, TilingScheme, WinoStore};
pub use mem::{default_allocator, Allocator, Buffer, CpuAllocator};
pub use tensor::Tensor;

/// Return early from a test when the host cannot run AVX-512 code.
#[macro_export]
macro_rules! skip_without_avx512 {
    () => {
        if !$crate::isa::has_avx512() {
            eprintln!("AVX-512 not supported on this CPU, skipping");
            return;
        }
    };
}
