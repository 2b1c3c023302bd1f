//! Register roles shared by generated fragments and the kernels that call them.
//!
//! Register file convention (32 zmm registers):
//!
//! ```text
//!   zmm0          A operand (16 rows of one A column)
//!   zmm1..zmm15   accumulators, one per output column
//!   zmm16         scratch
//!   zmm17..zmm31  broadcast slots 14..0, filled top-down
//! ```
//!
//! Generated code writes only the broadcast bank. Kernels read slot `s` from
//! `zmm(31 - s)`.

use super::encoder::Zmm;
use crate::error::{MarlinError, MarlinResult};

/// Number of broadcast slots; also the register budget for one fragment.
pub const BROADCAST_SLOTS: usize = 15;
pub const A_REGISTER: u8 = 0;
pub const ACCUMULATOR_BASE: u8 = 1;
pub const SCRATCH_REGISTER: u8 = 16;
pub const BROADCAST_TOP: u8 = 31;
pub const BROADCAST_FLOOR: u8 = BROADCAST_TOP + 1 - BROADCAST_SLOTS as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterRole {
    AOperand,
    Accumulator(u8),
    Scratch,
    Broadcast(u8),
}

/// Hands out broadcast destinations for one fragment at a time.
#[derive(Debug)]
pub struct RegisterAllocator {
    used: usize,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self { used: 0 }
    }

    /// Start a new fragment; the next broadcast lands in zmm31 again.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Slots handed out since the last reset.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn next_broadcast(&mut self) -> MarlinResult<Zmm> {
        if self.used >= BROADCAST_SLOTS {
            return Err(MarlinError::Internal(format!(
                "fragment needs more than {BROADCAST_SLOTS} broadcast registers"
            )));
        }
        let reg = broadcast_register(self.used)?;
        self.used += 1;
        Ok(reg)
    }
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Physical register behind broadcast slot `slot`.
pub fn broadcast_register(slot: usize) -> MarlinResult<Zmm> {
    if slot >= BROADCAST_SLOTS {
        return Err(MarlinError::invalid(format!("broadcast slot {slot} out of range")));
    }
    Zmm::new(BROADCAST_TOP - slot as u8)
}

pub fn role_of(reg: Zmm) -> RegisterRole {
    match reg.id() {
        A_REGISTER => RegisterRole::AOperand,
        id @ ACCUMULATOR_BASE..=15 => RegisterRole::Accumulator(id - ACCUMULATOR_BASE),
        SCRATCH_REGISTER => RegisterRole::Scratch,
        id => RegisterRole::Broadcast(BROADCAST_TOP - id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_top_down() {
        let mut ra = RegisterAllocator::new();
        let ids: Vec<u8> = (0..BROADCAST_SLOTS).map(|_| ra.next_broadcast().unwrap().id()).collect();
        assert_eq!(ids.first(), Some(&31));
        assert_eq!(ids.last(), Some(&BROADCAST_FLOOR));
        assert!(ra.next_broadcast().is_err());
        ra.reset();
        assert_eq!(ra.next_broadcast().unwrap().id(), 31);
    }

    #[test]
    fn test_roles() {
        assert_eq!(role_of(Zmm::new(0).unwrap()), RegisterRole::AOperand);
        assert_eq!(role_of(Zmm::new(15).unwrap()), RegisterRole::Accumulator(14));
        assert_eq!(role_of(Zmm::new(16).unwrap()), RegisterRole::Scratch);
        assert_eq!(role_of(Zmm::new(17).unwrap()), RegisterRole::Broadcast(14));
        assert_eq!(role_of(broadcast_register(3).unwrap()), RegisterRole::Broadcast(3));
    }
}
