//! Integrity check of a generated program before it becomes executable.
//!
//! Every fragment must decode to a run of broadcast entries filling the
//! broadcast bank top-down, followed by exactly one `ret` at its last byte.
//! Each decoded entry is re-encoded from its slot and constant and must match
//! the emitted bytes exactly, so stray prefixes, opmasks or zeroing bits are
//! caught as well. Anything else means the generator (or a persisted
//! artifact) is corrupt.

use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic, OpKind, Register};

use super::bytecode::validate_offsets;
use super::encoder::{broadcast_const, broadcast_zero, Zmm};
use super::regalloc::{broadcast_register, role_of, RegisterRole, BROADCAST_SLOTS};
use crate::error::{MarlinError, MarlinResult};

fn corrupt(offset: usize, reason: impl Into<String>) -> MarlinError {
    MarlinError::Integrity { offset, reason: reason.into() }
}

/// Broadcast-bank slot written by `reg`, if it is a zmm in that bank.
fn broadcast_slot(reg: Register) -> Option<usize> {
    if !reg.is_zmm() {
        return None;
    }
    let zmm = Zmm::new(reg.number() as u8).ok()?;
    match role_of(zmm) {
        RegisterRole::Broadcast(slot) => Some(slot as usize),
        _ => None,
    }
}

/// Verify `code` fragment by fragment against `offsets`; every fragment
/// must fill exactly `slots` broadcast registers.
pub fn verify_program(code: &[u8], offsets: &[u64], slots: usize) -> MarlinResult<()> {
    validate_offsets(offsets, code.len())?;
    for w in offsets.windows(2) {
        let (start, end) = (w[0] as usize, w[1] as usize);
        let filled = verify_fragment(&code[start..end], start)?;
        if filled != slots {
            return Err(corrupt(start, format!("fragment fills {filled} slots, expected {slots}")));
        }
    }
    log::debug!("verified {} fragments, {} bytes", offsets.len() - 1, code.len());
    Ok(())
}

/// Verify one fragment located at `base` within its program. Returns the
/// number of broadcast slots it fills.
pub fn verify_fragment(bytes: &[u8], base: usize) -> MarlinResult<usize> {
    if bytes.is_empty() {
        return Err(corrupt(base, "empty fragment"));
    }
    let mut decoder = Decoder::with_ip(64, bytes, base as u64, DecoderOptions::NONE);
    let mut instr = Instruction::default();
    let mut slot = 0usize;
    // Start and immediate of a `mov eax, imm32` awaiting its broadcast.
    let mut loaded: Option<(usize, u32)> = None;

    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        let at = instr.ip() as usize;
        if instr.is_invalid() {
            return Err(corrupt(at, "undecodable bytes"));
        }

        match instr.mnemonic() {
            Mnemonic::Mov
                if instr.op0_kind() == OpKind::Register
                    && instr.op0_register() == Register::EAX
                    && instr.op1_kind() == OpKind::Immediate32 =>
            {
                if loaded.is_some() {
                    return Err(corrupt(at, "constant load overwritten before broadcast"));
                }
                loaded = Some((at, instr.immediate32()));
            }
            Mnemonic::Vpbroadcastd
                if instr.op1_kind() == OpKind::Register && instr.op1_register() == Register::EAX =>
            {
                let Some((start, imm)) = loaded.take() else {
                    return Err(corrupt(at, "broadcast of eax without a preceding constant load"));
                };
                let dst = check_slot(instr.op0_register(), slot, at)?;
                let raw = &bytes[start - base..at - base + instr.len()];
                if raw != broadcast_const(dst, f32::from_bits(imm)) {
                    return Err(corrupt(start, format!("non-canonical constant broadcast {raw:02X?}")));
                }
                slot += 1;
            }
            Mnemonic::Vpxord
                if instr.op_count() == 3
                    && instr.op0_register() == instr.op1_register()
                    && instr.op1_register() == instr.op2_register() =>
            {
                if loaded.is_some() {
                    return Err(corrupt(at, "dangling constant load"));
                }
                let dst = check_slot(instr.op0_register(), slot, at)?;
                let raw = &bytes[at - base..at - base + instr.len()];
                if raw != broadcast_zero(dst) {
                    return Err(corrupt(at, format!("non-canonical zero broadcast {raw:02X?}")));
                }
                slot += 1;
            }
            Mnemonic::Ret => {
                if decoder.can_decode() {
                    return Err(corrupt(at, "ret before end of fragment"));
                }
                if loaded.is_some() {
                    return Err(corrupt(at, "dangling constant load"));
                }
                return Ok(slot);
            }
            other => return Err(corrupt(at, format!("unexpected instruction {other:?}"))),
        }
    }
    Err(corrupt(base + bytes.len(), "fragment does not end in ret"))
}

/// Check that `reg` is the register of `slot`; returns that register.
fn check_slot(reg: Register, slot: usize, at: usize) -> MarlinResult<Zmm> {
    if slot >= BROADCAST_SLOTS {
        return Err(corrupt(at, format!("more than {BROADCAST_SLOTS} broadcasts")));
    }
    let expected = broadcast_register(slot)?;
    match broadcast_slot(reg) {
        Some(s) if s == slot => Ok(expected),
        Some(_) => Err(corrupt(at, format!("slot {slot} written to {reg:?}, expected {expected}"))),
        None => Err(corrupt(at, format!("write to {reg:?} outside the broadcast bank"))),
    }
}
