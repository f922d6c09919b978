//! Native invokers.
//!
//! An invoker loads a [`CallFrame`] into the hardware argument registers
//! and the outgoing stack area, transfers control to the target and
//! captures the raw result registers. Each supported architecture has one
//! hand-written trampoline; everything the trampoline needs is collected
//! into an [`InvokeBlock`] first so the assembly only does fixed-offset
//! loads and stores.

#[cfg(all(feature = "invoker", target_arch = "aarch64", target_os = "linux"))]
mod aarch64;
#[cfg(all(feature = "invoker", target_arch = "x86_64", target_os = "linux"))]
mod x86_64;

#[cfg(all(feature = "invoker", target_arch = "aarch64", target_os = "linux"))]
pub use aarch64::Aarch64Invoker;
#[cfg(all(feature = "invoker", target_arch = "x86_64", target_os = "linux"))]
pub use x86_64::SysV64Invoker;

use super::error::ConfigError;
use super::frame::{CallFrame, MAX_FLOAT_RETURN_REGISTERS, MAX_FLOAT_SLOTS, MAX_GP_SLOTS};
use super::plan::InvokeVariant;
use crate::config::{AbiConfig, Arch, FloatPacking, HiddenPointer};
use std::mem::{offset_of, size_of};

/// Result registers captured after a native call.
///
/// Only the registers named by the call's return plan hold meaningful
/// values; the rest are whatever the callee left behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawReturn {
    /// x0:x1 or rax:rdx.
    pub gp: [u64; 2],
    /// d0-d3 or xmm0-xmm1, low 64 bits of each.
    pub fp: [u64; MAX_FLOAT_RETURN_REGISTERS],
}

/// The registers a trampoline actually loads and captures.
///
/// Fixed by the assembly; an [`AbiConfig`] used with the trampoline has to
/// describe exactly this wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterContract {
    pub gp_arg_registers: usize,
    pub float_arg_registers: usize,
    pub float_return_registers: usize,
    pub float_packing: FloatPacking,
    pub hidden_pointer: HiddenPointer,
}

impl RegisterContract {
    /// The contract implied by an ABI preset.
    pub fn of(abi: &AbiConfig) -> Self {
        Self {
            gp_arg_registers: abi.gp_arg_registers,
            float_arg_registers: abi.float_arg_registers,
            float_return_registers: abi.float_return_registers,
            float_packing: abi.float_packing,
            hidden_pointer: abi.hidden_pointer,
        }
    }

    /// Reject an ABI whose register assignment the trampoline would not
    /// reproduce.
    pub fn check(&self, abi: &AbiConfig) -> Result<(), ConfigError> {
        let counts = [
            ("gp_arg_registers", abi.gp_arg_registers, self.gp_arg_registers),
            ("float_arg_registers", abi.float_arg_registers, self.float_arg_registers),
            (
                "float_return_registers",
                abi.float_return_registers,
                self.float_return_registers,
            ),
        ];
        for (name, configured, wired) in counts {
            if configured != wired {
                return Err(ConfigError::Invalid(format!(
                    "{} is {} but the {} invoker uses {}",
                    name, configured, abi.arch, wired
                )));
            }
        }
        if abi.float_packing != self.float_packing {
            return Err(ConfigError::Invalid(format!(
                "float_packing is {:?} but the {} invoker expects {:?}",
                abi.float_packing, abi.arch, self.float_packing
            )));
        }
        if abi.hidden_pointer != self.hidden_pointer {
            return Err(ConfigError::Invalid(format!(
                "hidden_pointer is {:?} but the {} invoker expects {:?}",
                abi.hidden_pointer, abi.arch, self.hidden_pointer
            )));
        }
        Ok(())
    }
}

pub trait NativeInvoker: Send + Sync {
    fn arch(&self) -> Arch;

    /// Registers this invoker loads and captures. Defaults to the preset
    /// for [`NativeInvoker::arch`].
    fn contract(&self) -> RegisterContract {
        RegisterContract::of(&AbiConfig::for_arch(self.arch()))
    }

    /// Call `target` with the arguments in `frame`.
    ///
    /// # Safety
    ///
    /// `target` must be the address of a function whose signature matches
    /// the plan `frame` was marshaled from. For [`InvokeVariant::HiddenPointer`]
    /// `ret_ptr` must point to writable storage for the returned value.
    unsafe fn invoke(
        &self,
        frame: &CallFrame,
        target: usize,
        variant: InvokeVariant,
        ret_ptr: *mut u8,
    ) -> RawReturn;
}

/// Trampoline input and output, read at fixed offsets by the assembly.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct InvokeBlock {
    gp: [u64; MAX_GP_SLOTS],
    fp: [u64; MAX_FLOAT_SLOTS],
    stack: *const u64,
    stack_count: u64,
    func: usize,
    /// Indirect result register (x8); unused on System V.
    indirect: usize,
    ret_gp: [u64; 2],
    ret_fp: [u64; MAX_FLOAT_RETURN_REGISTERS],
}

const _: () = {
    assert!(offset_of!(InvokeBlock, gp) == 0);
    assert!(offset_of!(InvokeBlock, fp) == 64);
    assert!(offset_of!(InvokeBlock, stack) == 128);
    assert!(offset_of!(InvokeBlock, stack_count) == 136);
    assert!(offset_of!(InvokeBlock, func) == 144);
    assert!(offset_of!(InvokeBlock, indirect) == 152);
    assert!(offset_of!(InvokeBlock, ret_gp) == 160);
    assert!(offset_of!(InvokeBlock, ret_fp) == 176);
    assert!(size_of::<InvokeBlock>() == 208);
};

impl InvokeBlock {
    pub(crate) fn new(
        frame: &CallFrame,
        func: usize,
        variant: InvokeVariant,
        ret_ptr: *mut u8,
    ) -> Self {
        let stack = frame.stack();
        let mut block = Self {
            gp: *frame.gp_registers(),
            fp: *frame.float_registers(),
            stack: stack.as_ptr(),
            stack_count: stack.len() as u64,
            func,
            indirect: 0,
            ret_gp: [0; 2],
            ret_fp: [0; MAX_FLOAT_RETURN_REGISTERS],
        };
        if variant == InvokeVariant::HiddenPointer {
            match frame.return_slot() {
                Some(slot) => block.gp[slot] = ret_ptr as u64,
                None => block.indirect = ret_ptr as usize,
            }
        }
        block
    }

    pub(crate) fn into_return(self) -> RawReturn {
        RawReturn {
            gp: self.ret_gp,
            fp: self.ret_fp,
        }
    }
}

/// The invoker for `arch`, if this build can call on it.
pub fn host_invoker(arch: Arch) -> Result<Box<dyn NativeInvoker>, ConfigError> {
    match arch {
        #[cfg(all(feature = "invoker", target_arch = "aarch64", target_os = "linux"))]
        Arch::Aarch64 => Ok(Box::new(Aarch64Invoker)),
        #[cfg(all(feature = "invoker", target_arch = "x86_64", target_os = "linux"))]
        Arch::X86_64 => Ok(Box::new(SysV64Invoker)),
        #[allow(unreachable_patterns)]
        other => Err(ConfigError::NoInvoker(other)),
    }
}
