//! Winograd convolution, F(2×2, 3×3), stride 1, no implicit padding.
//!
//! Data flow:
//!
//! ```text
//!   plan → pad input → transform filter → transform input
//!        → multiply (JIT | vectorized | GEMM) → transform output → unpad
//! ```
//!
//! Output tiles are 2×2 and read 4×4 input tiles. The output is padded up to
//! a multiple of 2 at the bottom/right and the input is padded to match.

pub mod multiply;
pub mod transform;

use std::sync::Arc;

use super::{ConvShape, Convolver, Padding};
use crate::config::JitConfig;
use crate::error::{MarlinError, MarlinResult};
use crate::gemm::{BackendKind, Gemm};
use crate::jit::Jitter;
use crate::mem::{default_allocator, Allocator, Buffer};
use crate::tensor::Tensor;

/// Taps of one 4×4 Winograd-domain tile.
pub const TILE_AREA: usize = 16;
pub const IN_TILE: usize = 4;
pub const OUT_TILE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinogradKernel {
    K3x3,
    K5x5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinogradTile {
    O2x2,
    O4x4,
}

/// How the Winograd-domain multiply is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplyStrategy {
    /// Filter baked into generated broadcast code.
    Jit,
    /// AVX-512 intrinsics, scalar when AVX-512 is missing.
    Vectorized,
    /// Sixteen GEMMs per image on the given backend.
    Gemm(BackendKind),
}

/// Shapes and scratch extents of one Winograd run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinogradPlan {
    pub batch: usize,
    pub channels: usize,
    pub filters: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub padded_out_h: usize,
    pub padded_out_w: usize,
    pub padded_in_h: usize,
    pub padded_in_w: usize,
    pub tile_count: usize,
}

impl WinogradPlan {
    /// Plan a 3×3 F(2,3) convolution of `[batch][C][H][W]` by `[M][C][3][3]`.
    pub fn new(batch: usize, channels: usize, filters: usize, in_h: usize, in_w: usize) -> MarlinResult<Self> {
        if in_h < 3 || in_w < 3 {
            return Err(MarlinError::invalid(format!("input {in_h}x{in_w} is smaller than the 3x3 filter")));
        }
        let (out_h, out_w) = (in_h - 2, in_w - 2);
        let (padded_out_h, padded_out_w) = (out_h.next_multiple_of(OUT_TILE), out_w.next_multiple_of(OUT_TILE));
        let tile_count = (padded_out_h / OUT_TILE) * (padded_out_w / OUT_TILE);
        Ok(Self {
            batch,
            channels,
            filters,
            in_h,
            in_w,
            out_h,
            out_w,
            padded_out_h,
            padded_out_w,
            padded_in_h: padded_out_h + 2,
            padded_in_w: padded_out_w + 2,
            tile_count,
        })
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.filters, self.out_h, self.out_w]
    }

    /// Input padding, all at the bottom/right.
    pub fn input_padding(&self) -> Padding {
        Padding { bottom: self.padded_in_h - self.in_h, right: self.padded_in_w - self.in_w, ..Padding::default() }
    }

    pub fn output_padding(&self) -> Padding {
        Padding { bottom: self.padded_out_h - self.out_h, right: self.padded_out_w - self.out_w, ..Padding::default() }
    }

    fn padded_in_len(&self) -> usize {
        self.batch * self.channels * self.padded_in_h * self.padded_in_w
    }

    fn padded_out_len(&self) -> usize {
        self.batch * self.filters * self.padded_out_h * self.padded_out_w
    }

    fn input_t_len(&self) -> usize {
        self.batch * TILE_AREA * self.channels * self.tile_count
    }

    fn product_len(&self) -> usize {
        self.batch * TILE_AREA * self.filters * self.tile_count
    }
}

#[derive(Debug, Clone)]
pub struct Winograd {
    strategy: MultiplyStrategy,
    config: JitConfig,
    alloc: Arc<dyn Allocator>,
}

impl Winograd {
    pub fn new(kernel: WinogradKernel, tile: WinogradTile, strategy: MultiplyStrategy) -> MarlinResult<Self> {
        Self::with_allocator(kernel, tile, strategy, default_allocator())
    }

    /// Same as [`Winograd::new`], drawing scratch buffers from `alloc`.
    pub fn with_allocator(
        kernel: WinogradKernel,
        tile: WinogradTile,
        strategy: MultiplyStrategy,
        alloc: Arc<dyn Allocator>,
    ) -> MarlinResult<Self> {
        if (kernel, tile) != (WinogradKernel::K3x3, WinogradTile::O2x2) {
            return Err(MarlinError::unsupported(format!(
                "impossible execution path: winograd {kernel:?} with {tile:?}"
            )));
        }
        Ok(Self { strategy, config: JitConfig::default(), alloc })
    }

    /// JIT knobs for the `Jit` and `Gemm(Jit)` strategies.
    pub fn with_jit_config(mut self, config: JitConfig) -> Self {
        self.config = config;
        self
    }

    pub fn strategy(&self) -> MultiplyStrategy {
        self.strategy
    }

    pub fn plan(&self, input: &Tensor<'_>, filter: &Tensor<'_>) -> MarlinResult<WinogradPlan> {
        let s = ConvShape::of(input, filter)?;
        if (s.filter_h, s.filter_w) != (3, 3) {
            return Err(MarlinError::unsupported(format!(
                "impossible execution path: {}x{} filter in a 3x3 winograd",
                s.filter_h, s.filter_w
            )));
        }
        WinogradPlan::new(s.batch, s.channels, s.filters, s.height, s.width)
    }

    fn scratch(&self, len: usize) -> MarlinResult<Buffer<f32>> {
        Buffer::zeroed_in(self.alloc.clone(), len)
    }
}

impl Convolver for Winograd {
    fn run(&self, filter: &Tensor<'_>, input: &Tensor<'_>, output: &mut Tensor<'_>) -> MarlinResult<()> {
        let plan = self.plan(input, filter)?;
        output.resize(&plan.output_shape())?;
        if plan.batch == 0 || plan.filters == 0 {
            return Ok(());
        }

        let mut padded = self.scratch(plan.padded_in_len())?;
        transform::pad_input(input.data(), &plan, &mut padded);

        let mut filter_t = self.scratch(TILE_AREA * plan.filters * plan.channels)?;
        transform::transform_filter(filter.data(), plan.filters, plan.channels, &mut filter_t);

        let mut input_t = self.scratch(plan.input_t_len())?;
        transform::transform_input(&padded, &plan, &mut input_t);
        drop(padded);

        let mut product = self.scratch(plan.product_len())?;
        match self.strategy {
            MultiplyStrategy::Jit => {
                let mut jitter = Jitter::new(self.config);
                jitter.generate_wino_code(&filter_t, TILE_AREA, plan.channels, plan.filters)?;
                multiply::multiply_jit(&jitter, &input_t, &plan, &mut product)?;
            }
            MultiplyStrategy::Vectorized => {
                multiply::multiply_vectorized(&filter_t, &input_t, &plan, &mut product);
            }
            MultiplyStrategy::Gemm(kind) => {
                let gemm = Gemm::new(kind, self.config)?;
                multiply::multiply_gemm(&gemm, &filter_t, &input_t, &plan, &mut product)?;
            }
        }
        drop(input_t);

        let mut padded_out = self.scratch(plan.padded_out_len())?;
        transform::transform_output(&product, &plan, &mut padded_out);
        transform::unpad_output(&padded_out, &plan, output.mutable_data()?);
        log::debug!(
            "winograd {:?}: {} tiles per plane, output {:?}",
            self.strategy,
            plan.tile_count,
            plan.output_shape()
        );
        Ok(())
    }
}
