//! The one tile iteration used for code sizing, code emission and dispatch.
//!
//! Order: `jb` over n by j_block, `kb` over k by k_block, `kk` over the k
//! block by a_cols, `jj` over the j block by b_cols. Fragment `i` of a
//! program is the `i`-th tile visited.

use super::tiling::{Blocks, TilingScheme};
use crate::error::{MarlinError, MarlinResult};

/// One visited tile of B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Visit position, equal to the fragment index.
    pub index: usize,
    /// First row of B (k index).
    pub row: usize,
    /// First column of B (n index).
    pub col: usize,
    /// Real rows, `<= a_cols`.
    pub rows: usize,
    /// Real columns, `<= b_cols`.
    pub cols: usize,
    pub col_tile: usize,
    pub k_step: usize,
}

#[derive(Debug, Clone)]
pub struct TileWalk {
    k: usize,
    n: usize,
    scheme: TilingScheme,
    blocks: Blocks,
}

impl TileWalk {
    pub fn new(k: usize, n: usize, scheme: TilingScheme, blocks: Blocks) -> MarlinResult<Self> {
        if k == 0 || n == 0 {
            return Err(MarlinError::invalid(format!("cannot generate code for a {k}x{n} operand")));
        }
        if !blocks.is_consistent(k, n, scheme) {
            return Err(MarlinError::invalid(format!(
                "blocks {blocks:?} do not align with tiling {scheme} for a {k}x{n} operand"
            )));
        }
        Ok(Self { k, n, scheme, blocks })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn scheme(&self) -> TilingScheme {
        self.scheme
    }

    pub fn blocks(&self) -> Blocks {
        self.blocks
    }

    pub fn col_tiles(&self) -> usize {
        self.n.div_ceil(self.scheme.b_cols())
    }

    pub fn k_steps(&self) -> usize {
        self.k.div_ceil(self.scheme.a_cols())
    }

    pub fn tile_count(&self) -> usize {
        self.col_tiles() * self.k_steps()
    }

    /// Visit every tile in program order, stopping at the first error.
    pub fn try_for_each<E>(&self, mut f: impl FnMut(&Tile) -> Result<(), E>) -> Result<(), E> {
        let (b_cols, a_cols) = (self.scheme.b_cols(), self.scheme.a_cols());
        let Blocks { j_block, k_block } = self.blocks;
        let mut index = 0;
        for jb in (0..self.n).step_by(j_block) {
            let jb_lim = (jb + j_block).min(self.n);
            for kb in (0..self.k).step_by(k_block) {
                let kb_lim = (kb + k_block).min(self.k);
                for kk in (kb..kb_lim).step_by(a_cols) {
                    let rows = (kb_lim - kk).min(a_cols);
                    for jj in (jb..jb_lim).step_by(b_cols) {
                        let cols = (jb_lim - jj).min(b_cols);
                        f(&Tile {
                            index,
                            row: kk,
                            col: jj,
                            rows,
                            cols,
                            col_tile: jj / b_cols,
                            k_step: kk / a_cols,
                        })?;
                        index += 1;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn for_each(&self, mut f: impl FnMut(&Tile)) {
        let _ = self.try_for_each::<std::convert::Infallible>(|t| {
            f(t);
            Ok(())
        });
    }

    /// Copy a tile of row-major `b` (leading dimension `ldb`) into `slots`
    /// as `a_cols` rows of `b_cols`, zero-padding out-of-range entries.
    pub fn gather(&self, tile: &Tile, b: &[f32], ldb: usize, slots: &mut [f32]) {
        let b_cols = self.scheme.b_cols();
        let slots = &mut slots[..self.scheme.slots()];
        slots.fill(0.0);
        for r in 0..tile.rows {
            let src = (tile.row + r) * ldb + tile.col;
            slots[r * b_cols..r * b_cols + tile.cols].copy_from_slice(&b[src..src + tile.cols]);
        }
    }

    /// `(col_tile, k_step) → fragment index`, laid out `col_tile * k_steps + k_step`.
    pub fn dispatch_table(&self) -> Vec<u32> {
        let k_steps = self.k_steps();
        let mut table = vec![0u32; self.tile_count()];
        self.for_each(|t| table[t.col_tile * k_steps + t.k_step] = t.index as u32);
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(k: usize, n: usize, scheme: TilingScheme, j: usize, kb: usize) -> TileWalk {
        TileWalk::new(k, n, scheme, Blocks::aligned(j, kb, k, n, scheme)).unwrap()
    }

    #[test]
    fn test_visits_every_tile_once() {
        let w = walk(37, 50, TilingScheme::B5_A3, 16, 8);
        let mut seen = vec![false; w.tile_count()];
        let mut count = 0;
        w.for_each(|t| {
            assert_eq!(t.index, count);
            let key = t.col_tile * w.k_steps() + t.k_step;
            assert!(!seen[key]);
            seen[key] = true;
            count += 1;
        });
        assert_eq!(count, w.tile_count());
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_block_order() {
        // n=30, j_block=15, k=2: all k steps of the first column block come
        // before the second column block.
        let w = walk(2, 30, TilingScheme::B15_A1, 15, 64);
        let mut order = Vec::new();
        w.for_each(|t| order.push((t.col_tile, t.k_step)));
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_gather_pads_edges() {
        let (k, n) = (3, 4);
        let b: Vec<f32> = (1..=12).map(|v| v as f32).collect();
        let w = walk(k, n, TilingScheme::B3_A5, 3, 5);
        let mut slots = [f32::NAN; 15];
        let mut tiles = Vec::new();
        w.for_each(|t| tiles.push(*t));
        assert_eq!(tiles.len(), 2);
        w.gather(&tiles[1], &b, n, &mut slots);
        // column 3 only, rows 0..3, rest zero
        assert_eq!(&slots[..9], &[4.0, 0.0, 0.0, 8.0, 0.0, 0.0, 12.0, 0.0, 0.0]);
        assert!(slots[9..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_dispatch_table_matches_walk() {
        let w = walk(70, 100, TilingScheme::B7_A2, 64, 64);
        let table = w.dispatch_table();
        w.for_each(|t| assert_eq!(table[t.col_tile * w.k_steps() + t.k_step] as usize, t.index));
    }

    #[test]
    fn test_rejects_empty_and_misaligned() {
        assert!(TileWalk::new(0, 4, TilingScheme::B15_A1, Blocks { j_block: 4, k_block: 1 }).is_err());
        assert!(TileWalk::new(4, 40, TilingScheme::B15_A1, Blocks { j_block: 20, k_block: 4 }).is_err());
    }
}
