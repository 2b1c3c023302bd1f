//! `.cs` / `.of` artifacts of a GEMM program.
//!
//! `<stem>.cs` holds the raw code. `<stem>.of` holds native-endian `u64`
//! words:
//!
//! ```text
//!   [n, k, mode, j_block, k_block, offsets[0] = 0, offsets[1], ..., code_len]
//! ```

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use super::codelet::Codelet;
use super::encoder::{BROADCAST_CONST_LEN, BROADCAST_ZERO_LEN, RET_LEN};
use super::jitter::{Jitter, ProgramLayout};
use super::tile_walk::TileWalk;
use super::tiling::Blocks;
use crate::error::{MarlinError, MarlinResult};

const HEADER_WORDS: usize = 5;
const WORD: usize = std::mem::size_of::<u64>();

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = stem.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

pub fn code_path(stem: &Path) -> PathBuf {
    with_suffix(stem, ".cs")
}

pub fn offsets_path(stem: &Path) -> PathBuf {
    with_suffix(stem, ".of")
}

impl Jitter {
    /// Write the committed GEMM program next to `stem`, tagged with `mode`.
    pub fn tofile(&self, stem: impl AsRef<Path>, mode: u64) -> MarlinResult<()> {
        let stem = stem.as_ref();
        let program = self.program()?;
        let ProgramLayout::Gemm { walk, .. } = &program.layout else {
            return Err(MarlinError::invalid("only GEMM programs can be persisted"));
        };
        let blocks = walk.blocks();
        let mut words = Vec::with_capacity(HEADER_WORDS + program.offsets.len());
        words.extend_from_slice(&[
            walk.n() as u64,
            walk.k() as u64,
            mode,
            blocks.j_block as u64,
            blocks.k_block as u64,
        ]);
        words.extend_from_slice(&program.offsets);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();

        fs::write(code_path(stem), program.codelet.code())?;
        fs::write(offsets_path(stem), bytes)?;
        log::debug!(
            "wrote {} code bytes and {} offsets to {}.{{cs,of}}",
            program.codelet.code_len(),
            program.offsets.len(),
            stem.display()
        );
        Ok(())
    }

    /// Load a program written by [`Jitter::tofile`]. The stored `n`, `k`
    /// and `mode` must match the request.
    pub fn fromfile(&mut self, stem: impl AsRef<Path>, n: usize, k: usize, mode: u64) -> MarlinResult<()> {
        let stem = stem.as_ref();
        let raw = fs::read(offsets_path(stem))?;
        if raw.len() % WORD != 0 {
            return Err(MarlinError::Domain(format!("offset file has {} bytes, not whole words", raw.len())));
        }
        let words: Vec<u64> = raw
            .chunks_exact(WORD)
            .map(|c| {
                let mut w = [0u8; WORD];
                w.copy_from_slice(c);
                u64::from_ne_bytes(w)
            })
            .collect();
        if words.len() < HEADER_WORDS + 2 {
            return Err(MarlinError::Domain(format!("offset file truncated: {} words", words.len())));
        }

        let (header, offsets) = words.split_at(HEADER_WORDS);
        if header[0] != n as u64 || header[1] != k as u64 || header[2] != mode {
            return Err(MarlinError::Domain(format!(
                "artifact is n={} k={} mode={}, requested n={n} k={k} mode={mode}",
                header[0], header[1], header[2]
            )));
        }
        let blocks = Blocks { j_block: header[3] as usize, k_block: header[4] as usize };
        let walk = TileWalk::new(k, n, self.config().tiling, blocks)
            .map_err(|e| MarlinError::Domain(format!("stored blocks unusable: {e}")))?;
        if offsets.len() != walk.tile_count() + 1 {
            return Err(MarlinError::Domain(format!(
                "{} fragments stored, tiling {} needs {}",
                offsets.len() - 1,
                walk.scheme(),
                walk.tile_count()
            )));
        }
        check_fragment_sizes(offsets, walk.scheme().slots())?;

        let file = File::open(code_path(stem))?;
        let code_len = offsets[offsets.len() - 1] as usize;
        let codelet = Codelet::map_file(&file, code_len)?;
        log::debug!("loaded {code_len} code bytes from {}", code_path(stem).display());
        self.adopt(codelet, offsets.to_vec(), ProgramLayout::gemm(walk))
    }
}

/// Offsets must start at 0 and every fragment must be a plausible length
/// for `slots` broadcasts.
fn check_fragment_sizes(offsets: &[u64], slots: usize) -> MarlinResult<()> {
    if offsets[0] != 0 {
        return Err(MarlinError::Domain(format!("first offset is {}", offsets[0])));
    }
    let min = (slots * BROADCAST_ZERO_LEN + RET_LEN) as u64;
    let max = (slots * BROADCAST_CONST_LEN + RET_LEN) as u64;
    for (i, w) in offsets.windows(2).enumerate() {
        let len = w[1].checked_sub(w[0]).ok_or_else(|| {
            MarlinError::Domain(format!("offsets decrease at fragment {i}"))
        })?;
        if len < min || len > max {
            return Err(MarlinError::Domain(format!(
                "fragment {i} is {len} bytes, expected {min}..={max}"
            )));
        }
    }
    Ok(())
}
