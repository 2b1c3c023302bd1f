//! Runtime generation of operand-specialized broadcast code.
//!
//! The B operand (or a Winograd-domain filter) is turned into a sequence of
//! tiny fragments. Each fragment loads one tile of constants into the
//! broadcast register bank and returns; kernels call the fragment for a tile
//! instead of loading B from memory. Zero entries get a shorter encoding, so
//! sparser operands produce smaller programs.
//!
//! Pipeline: [`tile_walk`] → [`code_store`]/[`wino_store`] → [`verify`] →
//! [`codelet`] → [`jitter`].

pub mod bytecode;
pub mod code_store;
pub mod codelet;
pub mod encoder;
pub mod jitter;
pub mod persist;
pub mod regalloc;
pub mod tile_walk;
pub mod tiling;
pub mod verify;
pub mod wino_store;

pub use bytecode::ByteCode;
pub use code_store::CodeStore;
pub use codelet::Codelet;
pub use jitter::{Jitter, ProgramLayout};
pub use tile_walk::{Tile, TileWalk};
pub use tiling::{BlockPolicy, Blocks, TilingScheme};
pub use wino_store::{WinoLayout, WinoStore};
