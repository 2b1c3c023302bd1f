//! Byte-level x86-64 instruction builders for generated fragments.
//!
//! Fragments are built from two fixed templates whose layout never changes;
//! only the destination register fields and the embedded constant are
//! patched:
//!
//! ```text
//! broadcast constant (11 bytes)
//!   B8 ii ii ii ii          mov          eax, imm32
//!   62 P0 7D 48 7C MM       vpbroadcastd zmmN, eax
//!
//! broadcast zero (6 bytes)
//!   62 P0 P1 P2 EF MM       vpxord       zmmN, zmmN, zmmN
//!
//! return (1 byte)
//!   C3                      ret
//! ```
//!
//! Both vector forms need only AVX-512F.

use crate::error::{MarlinError, MarlinResult};

/// Physical vector register id, 0..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Zmm(u8);

impl Zmm {
    pub const COUNT: u8 = 32;

    pub fn new(id: u8) -> MarlinResult<Self> {
        if id >= Self::COUNT {
            return Err(MarlinError::invalid(format!("zmm{id} does not exist")));
        }
        Ok(Zmm(id))
    }

    #[inline]
    pub fn id(self) -> u8 {
        self.0
    }

    /// Low three bits, encoded in ModRM.
    #[inline]
    fn low(self) -> u8 {
        self.0 & 0x7
    }

    /// Inverted bit 3 (EVEX.R / EVEX.B / EVEX.vvvv[3]).
    #[inline]
    fn not_b3(self) -> u8 {
        (!self.0 >> 3) & 1
    }

    /// Inverted bit 4 (EVEX.R' / EVEX.X / EVEX.V').
    #[inline]
    fn not_b4(self) -> u8 {
        (!self.0 >> 4) & 1
    }
}

impl std::fmt::Display for Zmm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "zmm{}", self.0)
    }
}

pub const BROADCAST_CONST_LEN: usize = 11;
pub const BROADCAST_ZERO_LEN: usize = 6;
pub const RET_LEN: usize = 1;
pub const RET: u8 = 0xC3;

/// Bytes saved by each zero entry relative to a non-zero entry.
pub const ZERO_SAVINGS: usize = BROADCAST_CONST_LEN - BROADCAST_ZERO_LEN;

const BROADCAST_CONST_TEMPLATE: [u8; BROADCAST_CONST_LEN] =
    [0xB8, 0x00, 0x00, 0x00, 0x00, 0x62, 0x00, 0x7D, 0x48, 0x7C, 0xC0];
const BROADCAST_ZERO_TEMPLATE: [u8; BROADCAST_ZERO_LEN] =
    [0x62, 0x00, 0x00, 0x00, 0xEF, 0xC0];

// Patch points.
const IMM32: std::ops::Range<usize> = 1..5;
const CONST_P0: usize = 6;
const CONST_MODRM: usize = 10;
const ZERO_P0: usize = 1;
const ZERO_P1: usize = 2;
const ZERO_P2: usize = 3;
const ZERO_MODRM: usize = 5;

/// Encoded size of one broadcast entry.
#[inline]
pub fn entry_len(value: f32) -> usize {
    if value == 0.0 {
        BROADCAST_ZERO_LEN
    } else {
        BROADCAST_CONST_LEN
    }
}

/// `mov eax, bits(value)` followed by `vpbroadcastd dst, eax`.
pub fn broadcast_const(dst: Zmm, value: f32) -> [u8; BROADCAST_CONST_LEN] {
    let mut ins = BROADCAST_CONST_TEMPLATE;
    ins[IMM32].copy_from_slice(&value.to_bits().to_le_bytes());
    // R̄ X̄ B̄ R̄' 0 0 m m  with map 0F38; eax needs no X/B extension.
    ins[CONST_P0] = (dst.not_b3() << 7) | (1 << 6) | (1 << 5) | (dst.not_b4() << 4) | 0b10;
    ins[CONST_MODRM] = 0xC0 | (dst.low() << 3);
    ins
}

/// `vpxord dst, dst, dst`.
pub fn broadcast_zero(dst: Zmm) -> [u8; BROADCAST_ZERO_LEN] {
    let mut ins = BROADCAST_ZERO_TEMPLATE;
    // The same register sits in reg, vvvv and rm.
    ins[ZERO_P0] = (dst.not_b3() << 7)
        | (dst.not_b4() << 6)
        | (dst.not_b3() << 5)
        | (dst.not_b4() << 4)
        | 0b01;
    ins[ZERO_P1] = (((!dst.0) & 0xF) << 3) | 0b101;
    ins[ZERO_P2] = 0x40 | (dst.not_b4() << 3);
    ins[ZERO_MODRM] = 0xC0 | (dst.low() << 3) | dst.low();
    ins
}

/// Append the cheapest broadcast of `value` into `dst`; returns bytes written.
pub fn emit_broadcast(out: &mut Vec<u8>, dst: Zmm, value: f32) -> usize {
    if value == 0.0 {
        out.extend_from_slice(&broadcast_zero(dst));
        BROADCAST_ZERO_LEN
    } else {
        out.extend_from_slice(&broadcast_const(dst, value));
        BROADCAST_CONST_LEN
    }
}

pub fn emit_ret(out: &mut Vec<u8>) -> usize {
    out.push(RET);
    RET_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zmm(id: u8) -> Zmm {
        Zmm::new(id).unwrap()
    }

    #[test]
    fn test_broadcast_const_bytes() {
        assert_eq!(
            broadcast_const(zmm(31), 1.0),
            [0xB8, 0x00, 0x00, 0x80, 0x3F, 0x62, 0x62, 0x7D, 0x48, 0x7C, 0xF8]
        );
        assert_eq!(
            broadcast_const(zmm(17), 1.0)[5..],
            [0x62, 0xE2, 0x7D, 0x48, 0x7C, 0xC8]
        );
        assert_eq!(
            broadcast_const(zmm(0), -2.0),
            [0xB8, 0x00, 0x00, 0x00, 0xC0, 0x62, 0xF2, 0x7D, 0x48, 0x7C, 0xC0]
        );
    }

    #[test]
    fn test_broadcast_zero_bytes() {
        assert_eq!(broadcast_zero(zmm(23)), [0x62, 0xA1, 0x45, 0x40, 0xEF, 0xFF]);
        assert_eq!(broadcast_zero(zmm(17)), [0x62, 0xA1, 0x75, 0x40, 0xEF, 0xC9]);
        assert_eq!(broadcast_zero(zmm(15)), [0x62, 0x51, 0x05, 0x48, 0xEF, 0xFF]);
        assert_eq!(broadcast_zero(zmm(0)), [0x62, 0xF1, 0x7D, 0x48, 0xEF, 0xC0]);
    }

    #[test]
    fn test_emit_sizes() {
        let mut out = Vec::new();
        assert_eq!(emit_broadcast(&mut out, zmm(30), 3.5), BROADCAST_CONST_LEN);
        assert_eq!(emit_broadcast(&mut out, zmm(29), 0.0), BROADCAST_ZERO_LEN);
        assert_eq!(emit_broadcast(&mut out, zmm(28), -0.0), BROADCAST_ZERO_LEN);
        assert_eq!(emit_ret(&mut out), RET_LEN);
        assert_eq!(out.len(), 11 + 6 + 6 + 1);
        assert_eq!(*out.last().unwrap(), RET);
        assert_eq!(entry_len(f32::NAN), BROADCAST_CONST_LEN);
    }

    #[test]
    fn test_register_range() {
        assert!(Zmm::new(31).is_ok());
        assert!(Zmm::new(32).is_err());
    }
}
