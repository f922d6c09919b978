//! x86-64 System V trampoline (ELF targets).
//!
//! rdi, rsi, rdx, rcx, r8, r9 and xmm0-xmm7 carry arguments; rax:rdx and
//! xmm0:xmm1 carry results. The hidden result pointer has already been
//! placed in the first integer slot by the marshaler. rbx holds the block
//! pointer across the call; r12 is pushed only to keep rsp 16-byte aligned.

use super::{InvokeBlock, NativeInvoker, RawReturn, RegisterContract};
use crate::config::{Arch, FloatPacking, HiddenPointer};
use crate::ffi::frame::CallFrame;
use crate::ffi::plan::InvokeVariant;
use std::arch::global_asm;

global_asm!(
    ".text",
    ".p2align 4",
    ".globl nativecall_invoke_sysv64",
    ".hidden nativecall_invoke_sysv64",
    ".type nativecall_invoke_sysv64, @function",
    "nativecall_invoke_sysv64:",
    "push rbp",
    "mov rbp, rsp",
    "push rbx",
    "push r12",
    "mov rbx, rdi",
    // Outgoing stack area, rounded to 16 bytes.
    "mov rcx, [rbx + 136]",
    "lea rax, [rcx + 1]",
    "and rax, -2",
    "shl rax, 3",
    "sub rsp, rax",
    "mov rsi, [rbx + 128]",
    "mov rdi, rsp",
    "cld",
    "rep movsq",
    "movsd xmm0, qword ptr [rbx + 64]",
    "movsd xmm1, qword ptr [rbx + 72]",
    "movsd xmm2, qword ptr [rbx + 80]",
    "movsd xmm3, qword ptr [rbx + 88]",
    "movsd xmm4, qword ptr [rbx + 96]",
    "movsd xmm5, qword ptr [rbx + 104]",
    "movsd xmm6, qword ptr [rbx + 112]",
    "movsd xmm7, qword ptr [rbx + 120]",
    "mov r11, [rbx + 144]",
    "mov rdi, [rbx]",
    "mov rsi, [rbx + 8]",
    "mov rdx, [rbx + 16]",
    "mov rcx, [rbx + 24]",
    "mov r8, [rbx + 32]",
    "mov r9, [rbx + 40]",
    // Upper bound on vector registers used, for variadic callees.
    "mov eax, 8",
    "call r11",
    "mov [rbx + 160], rax",
    "mov [rbx + 168], rdx",
    "movsd qword ptr [rbx + 176], xmm0",
    "movsd qword ptr [rbx + 184], xmm1",
    "lea rsp, [rbp - 16]",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    ".size nativecall_invoke_sysv64, . - nativecall_invoke_sysv64",
);

unsafe extern "C" {
    fn nativecall_invoke_sysv64(block: *mut InvokeBlock);
}

/// Invoker for x86-64 System V (Linux).
#[derive(Debug, Clone, Copy, Default)]
pub struct SysV64Invoker;

impl NativeInvoker for SysV64Invoker {
    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn contract(&self) -> RegisterContract {
        RegisterContract {
            gp_arg_registers: 6,
            float_arg_registers: 8,
            float_return_registers: 2,
            float_packing: FloatPacking::Eightbyte,
            hidden_pointer: HiddenPointer::FirstArgument,
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
        unsafe { nativecall_invoke_sysv64(&mut block) };
        block.into_return()
    }
}
