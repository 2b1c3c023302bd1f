//! Broadcast programs for a Winograd-domain filter.
//!
//! The transformed filter is laid out `[tile_area][M][C]`. One fragment per
//! `(m, group, c)` broadcasts the taps `group*8 .. group*8+8` of filter `m`,
//! channel `c` into slots 0..8.

use super::bytecode::ByteCode;
use super::code_store::{emit_fragment, fragment_len};
use super::encoder::{BROADCAST_CONST_LEN, RET_LEN};
use super::regalloc::RegisterAllocator;
use crate::error::{MarlinError, MarlinResult};

/// Taps broadcast per fragment.
pub const TAP_GROUP: usize = 8;

/// Shape of a Winograd filter program and its fragment numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinoLayout {
    pub tile_area: usize,
    pub channels: usize,
    pub filters: usize,
}

impl WinoLayout {
    pub fn new(tile_area: usize, channels: usize, filters: usize) -> MarlinResult<Self> {
        if tile_area == 0 || channels == 0 || filters == 0 {
            return Err(MarlinError::invalid(format!(
                "empty winograd filter: tile_area={tile_area} C={channels} M={filters}"
            )));
        }
        Ok(Self { tile_area, channels, filters })
    }

    pub fn groups(&self) -> usize {
        self.tile_area.div_ceil(TAP_GROUP)
    }

    pub fn fragment_count(&self) -> usize {
        self.filters * self.groups() * self.channels
    }

    #[inline]
    pub fn fragment_index(&self, m: usize, group: usize, c: usize) -> usize {
        (m * self.groups() + group) * self.channels + c
    }

    /// Taps of `(m, group, c)`, zero past `tile_area`.
    fn gather(&self, filter_t: &[f32], m: usize, group: usize, c: usize, slots: &mut [f32; TAP_GROUP]) {
        let plane = self.filters * self.channels;
        for (i, s) in slots.iter_mut().enumerate() {
            let tap = group * TAP_GROUP + i;
            *s = if tap < self.tile_area { filter_t[tap * plane + m * self.channels + c] } else { 0.0 };
        }
    }

    fn for_each(&self, mut f: impl FnMut(usize, usize, usize) -> MarlinResult<()>) -> MarlinResult<()> {
        for m in 0..self.filters {
            for g in 0..self.groups() {
                for c in 0..self.channels {
                    f(m, g, c)?;
                }
            }
        }
        Ok(())
    }
}

/// Generator for Winograd filter programs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WinoStore;

impl WinoStore {
    pub fn code_size(&self, layout: &WinoLayout, filter_t: &[f32]) -> usize {
        let mut slots = [0.0f32; TAP_GROUP];
        let mut size = 0;
        let _ = layout.for_each(|m, g, c| {
            layout.gather(filter_t, m, g, c, &mut slots);
            size += fragment_len(&slots);
            Ok(())
        });
        size
    }

    pub fn generate_b_tensor(
        &self,
        filter_t: &[f32],
        tile_area: usize,
        channels: usize,
        filters: usize,
    ) -> MarlinResult<(ByteCode, WinoLayout)> {
        let layout = WinoLayout::new(tile_area, channels, filters)?;
        let total = tile_area * channels * filters;
        if filter_t.len() < total {
            return Err(MarlinError::invalid(format!(
                "transformed filter holds {} values, needs {total}",
                filter_t.len()
            )));
        }

        let expected = self.code_size(&layout, filter_t);
        let mut out = ByteCode::new();
        out.begin(expected, layout.fragment_count())?;

        let mut slots = [0.0f32; TAP_GROUP];
        let mut regs = RegisterAllocator::new();
        let mut frag = Vec::with_capacity(TAP_GROUP * BROADCAST_CONST_LEN + RET_LEN);
        let mut tally = 0usize;
        layout.for_each(|m, g, c| {
            layout.gather(filter_t, m, g, c, &mut slots);
            frag.clear();
            tally += emit_fragment(&slots, &mut regs, &mut frag)?;
            out.push_fragment(&frag)
        })?;

        if tally != expected {
            return Err(MarlinError::Internal(format!(
                "expected winograd code size {expected}, generated {tally}"
            )));
        }
        out.validate()?;
        log::debug!(
            "winograd program: M={filters} C={channels}, {} fragments, {tally} bytes",
            layout.fragment_count()
        );
        Ok((out, layout))
    }
}
