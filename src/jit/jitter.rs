//! Orchestration of generation, verification, commit and execution.
//!
//! A [`Jitter`] owns at most one committed program at a time. Generating a
//! new program replaces (and unmaps) the previous one.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::bytecode::{fnv1a, ByteCode};
use super::code_store::CodeStore;
use super::codelet::Codelet;
use super::regalloc::BROADCAST_SLOTS;
use super::tile_walk::TileWalk;
use super::tiling::{Blocks, TilingScheme};
use super::verify::verify_program;
use super::wino_store::{WinoLayout, WinoStore, TAP_GROUP};
use crate::config::JitConfig;
use crate::error::{MarlinError, MarlinResult};
use crate::isa::has_avx512;

/// Row mask of a full 16-row tile.
pub const FULL_MASK: u16 = 0xFFFF;

/// Row mask with the low `m % 16` bits set.
#[inline]
pub fn partial_mask(m: usize) -> u16 {
    !(0xFFFFu32 << (m & 0xF)) as u16
}

/// How the fragments of the committed program are numbered.
#[derive(Debug, Clone)]
pub enum ProgramLayout {
    /// B operand of a GEMM; `dispatch[col_tile * k_steps + k_step]` is the
    /// fragment of that tile.
    Gemm { walk: TileWalk, dispatch: Vec<u32> },
    Winograd(WinoLayout),
}

impl ProgramLayout {
    pub(crate) fn gemm(walk: TileWalk) -> Self {
        let dispatch = walk.dispatch_table();
        ProgramLayout::Gemm { walk, dispatch }
    }

    fn slots(&self) -> usize {
        match self {
            ProgramLayout::Gemm { walk, .. } => walk.scheme().slots(),
            ProgramLayout::Winograd(_) => TAP_GROUP,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Program {
    pub(crate) codelet: Codelet,
    pub(crate) offsets: Vec<u64>,
    pub(crate) layout: ProgramLayout,
}

#[derive(Debug, Default)]
pub struct Jitter {
    config: JitConfig,
    program: Option<Program>,
    m: usize,
}

impl Jitter {
    pub fn new(config: JitConfig) -> Self {
        Self { config, program: None, m: 0 }
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Generate and commit the program for row-major `b` (`k×n`) used in an
    /// `m×n×k` GEMM.
    pub fn generate_code(&mut self, b: &[f32], m: usize, k: usize, n: usize) -> MarlinResult<()> {
        let (bytecode, walk) = CodeStore::from_config(&self.config).generate_b_matrix(b, k, n)?;
        self.install(&bytecode, ProgramLayout::gemm(walk))?;
        self.m = m;
        Ok(())
    }

    /// Generate and commit the program for a transformed Winograd filter
    /// laid out `[tile_area][filters][channels]`.
    pub fn generate_wino_code(
        &mut self,
        filter_t: &[f32],
        tile_area: usize,
        channels: usize,
        filters: usize,
    ) -> MarlinResult<()> {
        let (bytecode, layout) = WinoStore.generate_b_tensor(filter_t, tile_area, channels, filters)?;
        self.install(&bytecode, ProgramLayout::Winograd(layout))
    }

    fn install(&mut self, bytecode: &ByteCode, layout: ProgramLayout) -> MarlinResult<()> {
        if self.config.verify {
            verify_program(bytecode.code(), bytecode.offsets(), layout.slots())?;
        }
        let codelet = Codelet::commit(bytecode.code())?;
        self.program = Some(Program { codelet, offsets: bytecode.offsets().to_vec(), layout });
        Ok(())
    }

    /// Adopt an already-mapped program; used when loading from disk.
    pub(crate) fn adopt(&mut self, codelet: Codelet, offsets: Vec<u64>, layout: ProgramLayout) -> MarlinResult<()> {
        if self.config.verify {
            verify_program(codelet.code(), &offsets, layout.slots())?;
        }
        self.program = Some(Program { codelet, offsets, layout });
        Ok(())
    }

    pub(crate) fn program(&self) -> MarlinResult<&Program> {
        self.program.as_ref().ok_or_else(|| MarlinError::invalid("no program has been generated"))
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_some()
    }

    /// Entry address of fragment `idx` after bounds checks.
    pub(crate) fn entry(&self, idx: usize) -> MarlinResult<*const u8> {
        let p = self.program()?;
        let count = p.offsets.len() - 1;
        if idx >= count {
            return Err(MarlinError::OutOfRange { requested: idx, limit: count });
        }
        let offset = p.offsets[idx] as usize;
        let page = p.codelet.page_size_bytes();
        if offset >= page {
            return Err(MarlinError::OutOfRange { requested: offset, limit: page });
        }
        // SAFETY: offset is inside the mapped page.
        Ok(unsafe { p.codelet.as_ptr().add(offset) })
    }

    /// Run fragment `idx`. Its only effect is loading the broadcast bank.
    pub fn execute(&self, idx: usize) -> MarlinResult<()> {
        self.broadcasts(idx).map(|_| ())
    }

    /// Run fragment `idx` and return lane 0 of broadcast slots 0..15.
    pub fn broadcasts(&self, idx: usize) -> MarlinResult<[f32; BROADCAST_SLOTS]> {
        let entry = self.entry(idx)?;
        if !has_avx512() {
            return Err(MarlinError::unsupported("generated code requires AVX-512F"));
        }
        #[cfg(target_arch = "x86_64")]
        {
            // SAFETY: AVX-512F is present and entry is a verified fragment start.
            let regs = unsafe { call_fragment(entry) };
            let mut out = [0.0f32; BROADCAST_SLOTS];
            for (o, r) in out.iter_mut().zip(regs.iter()) {
                *o = unsafe { lane0(*r) };
            }
            Ok(out)
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = entry;
            Err(MarlinError::unsupported("generated code is x86-64 only"))
        }
    }

    pub fn mask(&self) -> u16 {
        FULL_MASK
    }

    /// Row mask for the last, partial row tile of the GEMM this program was
    /// generated for. Zero when `m` is a multiple of 16 or unknown.
    pub fn pmask(&self) -> u16 {
        partial_mask(self.m)
    }

    pub fn offsets(&self) -> &[u64] {
        self.program.as_ref().map(|p| p.offsets.as_slice()).unwrap_or(&[])
    }

    pub fn code_len(&self) -> usize {
        self.program.as_ref().map_or(0, |p| p.codelet.code_len())
    }

    pub fn page_size_bytes(&self) -> usize {
        self.program.as_ref().map_or(0, |p| p.codelet.page_size_bytes())
    }

    pub fn code(&self) -> &[u8] {
        self.program.as_ref().map(|p| p.codelet.code()).unwrap_or(&[])
    }

    /// FNV-1a of the committed code.
    pub fn content_hash(&self) -> u64 {
        fnv1a(self.code())
    }

    pub fn layout(&self) -> Option<&ProgramLayout> {
        self.program.as_ref().map(|p| &p.layout)
    }

    pub fn walk(&self) -> Option<&TileWalk> {
        match self.layout()? {
            ProgramLayout::Gemm { walk, .. } => Some(walk),
            ProgramLayout::Winograd(_) => None,
        }
    }

    pub fn wino_layout(&self) -> Option<&WinoLayout> {
        match self.layout()? {
            ProgramLayout::Winograd(l) => Some(l),
            ProgramLayout::Gemm { .. } => None,
        }
    }

    pub fn blocks(&self) -> Option<Blocks> {
        self.walk().map(|w| w.blocks())
    }

    pub fn scheme(&self) -> TilingScheme {
        self.walk().map_or(self.config.tiling, |w| w.scheme())
    }

    /// Fragment for the tile at `(col_tile, k_step)` of a GEMM program.
    pub fn dispatch_index(&self, col_tile: usize, k_step: usize) -> MarlinResult<usize> {
        match &self.program()?.layout {
            ProgramLayout::Gemm { walk, dispatch } => {
                if col_tile >= walk.col_tiles() || k_step >= walk.k_steps() {
                    return Err(MarlinError::OutOfRange {
                        requested: col_tile * walk.k_steps() + k_step,
                        limit: dispatch.len(),
                    });
                }
                Ok(dispatch[col_tile * walk.k_steps() + k_step] as usize)
            }
            ProgramLayout::Winograd(_) => Err(MarlinError::invalid("program is a winograd filter")),
        }
    }
}

/// Call the fragment at `entry` and capture the broadcast bank, slot order.
///
/// # Safety
/// `entry` must be the start of a generated fragment in a live executable
/// page and the CPU must support AVX-512F.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
pub(crate) unsafe fn call_fragment(entry: *const u8) -> [__m512; BROADCAST_SLOTS] {
    let (r17, r18, r19, r20, r21): (__m512, __m512, __m512, __m512, __m512);
    let (r22, r23, r24, r25, r26): (__m512, __m512, __m512, __m512, __m512);
    let (r27, r28, r29, r30, r31): (__m512, __m512, __m512, __m512, __m512);
    std::arch::asm!(
        "call {entry}",
        entry = in(reg) entry,
        out("zmm17") r17, out("zmm18") r18, out("zmm19") r19, out("zmm20") r20,
        out("zmm21") r21, out("zmm22") r22, out("zmm23") r23, out("zmm24") r24,
        out("zmm25") r25, out("zmm26") r26, out("zmm27") r27, out("zmm28") r28,
        out("zmm29") r29, out("zmm30") r30, out("zmm31") r31,
        clobber_abi("C"),
    );
    [r31, r30, r29, r28, r27, r26, r25, r24, r23, r22, r21, r20, r19, r18, r17]
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx512f")]
unsafe fn lane0(v: __m512) -> f32 {
    _mm512_cvtss_f32(v)
}
