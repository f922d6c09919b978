//! AAPCS64 trampoline (ELF targets).
//!
//! Register use follows the procedure call standard: x0-x7 and d0-d7 carry
//! arguments, x8 carries the indirect result address, x0:x1 and d0-d3
//! carry results. x19 holds the block pointer across the call; x16 (IP0)
//! holds the target.

use super::{InvokeBlock, NativeInvoker, RawReturn, RegisterContract};
use crate::config::{Arch, FloatPacking, HiddenPointer};
use crate::ffi::frame::CallFrame;
use crate::ffi::plan::InvokeVariant;
use std::arch::global_asm;

global_asm!(
    ".text",
    ".p2align 2",
    ".globl nativecall_invoke_aarch64",
    ".hidden nativecall_invoke_aarch64",
    ".type nativecall_invoke_aarch64, %function",
    "nativecall_invoke_aarch64:",
    "stp x29, x30, [sp, #-32]!",
    "mov x29, sp",
    "stp x19, x20, [sp, #16]",
    "mov x19, x0",
    // Outgoing stack area, rounded to 16 bytes.
    "ldr x9, [x19, #136]",
    "add x9, x9, #1",
    "and x9, x9, #0xfffffffffffffffe",
    "lsl x9, x9, #3",
    "sub sp, sp, x9",
    "ldr x10, [x19, #128]",
    "ldr x11, [x19, #136]",
    "mov x12, sp",
    "3:",
    "cbz x11, 4f",
    "ldr x13, [x10], #8",
    "str x13, [x12], #8",
    "sub x11, x11, #1",
    "b 3b",
    "4:",
    "ldp d0, d1, [x19, #64]",
    "ldp d2, d3, [x19, #80]",
    "ldp d4, d5, [x19, #96]",
    "ldp d6, d7, [x19, #112]",
    "ldr x8, [x19, #152]",
    "ldr x16, [x19, #144]",
    "ldp x0, x1, [x19, #0]",
    "ldp x2, x3, [x19, #16]",
    "ldp x4, x5, [x19, #32]",
    "ldp x6, x7, [x19, #48]",
    "blr x16",
    "stp x0, x1, [x19, #160]",
    "stp d0, d1, [x19, #176]",
    "stp d2, d3, [x19, #192]",
    "mov sp, x29",
    "ldp x19, x20, [sp, #16]",
    "ldp x29, x30, [sp], #32",
    "ret",
    ".size nativecall_invoke_aarch64, . - nativecall_invoke_aarch64",
);

unsafe extern "C" {
    fn nativecall_invoke_aarch64(block: *mut InvokeBlock);
}

/// Invoker for AArch64 Linux.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64Invoker;

impl NativeInvoker for Aarch64Invoker {
    fn arch(&self) -> Arch {
        Arch::Aarch64
    }

    fn contract(&self) -> RegisterContract {
        RegisterContract {
            gp_arg_registers: 8,
            float_arg_registers: 8,
            float_return_registers: 4,
            float_packing: FloatPacking::PerMember,
            hidden_pointer: HiddenPointer::Register,
        }
    }

    unsafe fn invoke(
        &self,
        frame: &CallFrame,
        target: usize,
        variant: InvokeVariant,
        ret_ptr: *mut u8,
    ) -> RawReturn {
        let mut block = InvokeBlock::new(frame, target, variant, ret_ptr);
        unsafe { nativecall_invoke_aarch64(&mut block) };
        block.into_return()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbiConfig;
    use crate::ffi::args::ArgBuffer;
    use crate::ffi::marshal::marshal;
    use crate::ffi::plan::CallPlan;
    use crate::ffi::types::{
        CallableDescriptor, MemberShape, ObjectLayout, ParamType, Primitive, ReturnType,
    };
    use std::ptr;

    extern "C" fn weighted(
        a: i64,
        b: i64,
        c: i64,
        d: i64,
        e: i64,
        f: i64,
        g: i64,
        h: i64,
        i: i64,
        j: i64,
    ) -> i64 {
        a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h + 9 * i + 10 * j
    }

    #[repr(C)]
    #[derive(Debug, PartialEq)]
    struct Quad {
        a: u64,
        b: u64,
        c: u64,
        d: u64,
    }

    extern "C" fn make_quad(seed: u64) -> Quad {
        Quad {
            a: seed,
            b: seed + 1,
            c: seed + 2,
            d: seed + 3,
        }
    }

    #[test]
    fn test_stack_arguments() {
        let abi = AbiConfig::aarch64();
        let desc = CallableDescriptor::function(
            weighted as usize,
            vec![ParamType::primitive(Primitive::I64); 10],
            ReturnType::primitive(Primitive::I64),
        );
        let plan = CallPlan::new(&desc, &abi).unwrap();
        let mut buf = ArgBuffer::new();
        for v in 1..=10 {
            buf.push_i64(v);
        }
        let frame = unsafe { marshal(&plan, buf.as_raw(), ptr::null_mut(), ptr::null_mut()) }.unwrap();
        assert_eq!(frame.stack().len(), 2);

        let raw = unsafe {
            Aarch64Invoker.invoke(&frame, weighted as usize, InvokeVariant::Scalar, ptr::null_mut())
        };
        assert_eq!(raw.gp[0] as i64, (1..=10).map(|v| v * v).sum::<i64>());
    }

    #[test]
    fn test_indirect_result_register() {
        let abi = AbiConfig::aarch64();
        let layout = ObjectLayout::pod(32, 8, MemberShape::Integer);
        let desc = CallableDescriptor::function(
            make_quad as usize,
            vec![Primitive::U64.into()],
            ReturnType::object(layout),
        );
        let plan = CallPlan::new(&desc, &abi).unwrap();
        assert_eq!(plan.ret().variant(), InvokeVariant::HiddenPointer);

        let mut buf = ArgBuffer::new();
        buf.push_u64(40);
        let frame = unsafe { marshal(&plan, buf.as_raw(), ptr::null_mut(), ptr::null_mut()) }.unwrap();
        let mut out = std::mem::MaybeUninit::<Quad>::uninit();
        unsafe {
            Aarch64Invoker.invoke(
                &frame,
                make_quad as usize,
                InvokeVariant::HiddenPointer,
                out.as_mut_ptr().cast(),
            );
        }
        let quad = unsafe { out.assume_init() };
        assert_eq!(
            quad,
            Quad {
                a: 40,
                b: 41,
                c: 42,
                d: 43
            }
        );
    }
}
