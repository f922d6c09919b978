//! Return value decoding.

use super::invoke::RawReturn;
use super::plan::{ReturnMechanism, ReturnPlan};

/// Write the value described by `plan` from `raw` into `dest`.
///
/// Exactly `plan.size` bytes are written. Void and memory returns write
/// nothing: a memory-returned value is already in `dest`, since that is
/// the address the invoker handed to the callee.
///
/// # Safety
///
/// `dest` must be valid for writes of `plan.size` bytes unless the plan
/// returns void or through memory.
pub unsafe fn decode(raw: &RawReturn, plan: &ReturnPlan, dest: *mut u8) {
    let size = plan.size as usize;
    if matches!(
        plan.mechanism,
        ReturnMechanism::Void | ReturnMechanism::Memory
    ) || size == 0
    {
        return;
    }
    debug_assert!(!dest.is_null(), "no destination for a register return");
    let out = unsafe { std::slice::from_raw_parts_mut(dest, size) };

    match plan.mechanism {
        ReturnMechanism::General | ReturnMechanism::GeneralPair => copy_registers(&raw.gp, out),
        ReturnMechanism::Float32 | ReturnMechanism::Float64 => copy_registers(&raw.fp[..1], out),
        ReturnMechanism::FloatAggregate {
            register_width,
            registers,
        } => extract_float_aggregate(raw, register_width, registers, out),
        ReturnMechanism::Void | ReturnMechanism::Memory => {}
    }
}

/// Reassemble a homogeneous float aggregate from the float return
/// registers, `register_width` bytes from the bottom of each register.
///
/// Fills `out` completely and never writes past it, even when the last
/// register is only partly used.
pub fn extract_float_aggregate(
    raw: &RawReturn,
    register_width: u8,
    registers: u8,
    out: &mut [u8],
) {
    let width = register_width as usize;
    debug_assert!(width == 4 || width == 8);
    debug_assert!(out.len() <= width * registers as usize);

    for (chunk, reg) in out.chunks_mut(width).zip(&raw.fp[..registers as usize]) {
        chunk.copy_from_slice(&reg.to_le_bytes()[..chunk.len()]);
    }
}

/// Copy the low bytes of consecutive 64-bit registers.
fn copy_registers(regs: &[u64], out: &mut [u8]) {
    debug_assert!(out.len() <= regs.len() * 8);
    for (chunk, reg) in out.chunks_mut(8).zip(regs) {
        chunk.copy_from_slice(&reg.to_le_bytes()[..chunk.len()]);
    }
}
