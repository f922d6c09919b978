//! Per-call scratch frame and slot routing.
//!
//! The frame holds three fixed-capacity slot arrays that the trampoline
//! loads into argument registers and onto the stack. Capacities are the
//! upper bound over all supported ABIs; the configured budgets decide how
//! much of each array a call may use.

use super::error::CallError;
use crate::config::AbiConfig;
use serde::Serialize;
use std::ffi::c_void;
use std::fmt;

/// Capacity of the general-purpose slot array.
pub const MAX_GP_SLOTS: usize = 8;
/// Capacity of the floating-point slot array.
pub const MAX_FLOAT_SLOTS: usize = 8;
/// Capacity of the stack slot array.
pub const MAX_STACK_SLOTS: usize = 64;
/// Float return registers captured by the invoker.
pub const MAX_FLOAT_RETURN_REGISTERS: usize = 4;
/// Largest composite that fits the two captured general-purpose return
/// registers.
pub const MAX_REGISTER_AGGREGATE: usize = 16;

/// A run of consecutive slots in one of the three arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "array", rename_all = "kebab-case")]
pub enum Location {
    General { first: u8, count: u8 },
    Float { first: u8, count: u8 },
    Stack { first: u8, count: u8 },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (array, first, count) = match *self {
            Location::General { first, count } => ("gp", first, count),
            Location::Float { first, count } => ("fp", first, count),
            Location::Stack { first, count } => ("stack", first, count),
        };
        if count == 1 {
            write!(f, "{}[{}]", array, first)
        } else {
            write!(f, "{}[{}..{}]", array, first, first + count)
        }
    }
}

/// Assigns slots in calling-convention order.
///
/// Both the plan's dry run and the marshaler route through this type, so
/// the recorded layout and the real frame cannot disagree.
#[derive(Debug)]
pub(crate) struct SlotRouter<'a> {
    abi: &'a AbiConfig,
    gp: usize,
    fp: usize,
    stack: usize,
}

impl<'a> SlotRouter<'a> {
    pub fn new(abi: &'a AbiConfig) -> Self {
        Self {
            abi,
            gp: 0,
            fp: 0,
            stack: 0,
        }
    }

    /// Route `words` general-purpose words. A value never straddles the
    /// register/stack boundary: it goes entirely to one side.
    pub fn general(&mut self, words: usize, align16: bool) -> Result<Location, CallError> {
        let mut first = self.gp;
        if align16 && words == 2 && self.abi.even_gp_for_align16 {
            first = first.next_multiple_of(2);
        }
        if first + words <= self.abi.gp_arg_registers {
            self.gp = first + words;
            return Ok(Location::General {
                first: first as u8,
                count: words as u8,
            });
        }
        if words > 1 && self.abi.close_class_on_spill {
            self.gp = self.abi.gp_arg_registers;
        }
        self.stack(words, align16)
    }

    /// Route `count` float registers, or `stack_words` stack slots when the
    /// registers are exhausted. Independent of the general-purpose budget.
    pub fn float(&mut self, count: usize, stack_words: usize) -> Result<Location, CallError> {
        if self.fp + count <= self.abi.float_arg_registers {
            let first = self.fp;
            self.fp += count;
            return Ok(Location::Float {
                first: first as u8,
                count: count as u8,
            });
        }
        if count > 1 && self.abi.close_class_on_spill {
            self.fp = self.abi.float_arg_registers;
        }
        self.stack(stack_words, false)
    }

    pub fn stack(&mut self, words: usize, align16: bool) -> Result<Location, CallError> {
        let mut first = self.stack;
        if align16 {
            first = first.next_multiple_of(2);
        }
        let needed = first + words;
        if needed > self.abi.max_stack_slots {
            return Err(CallError::TooManyArguments {
                arch: self.abi.arch,
                needed,
                limit: self.abi.max_stack_slots,
            });
        }
        self.stack = needed;
        Ok(Location::Stack {
            first: first as u8,
            count: words as u8,
        })
    }

    /// Fill counts: general-purpose, float, stack.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.gp, self.fp, self.stack)
    }
}

/// Marshaled arguments of one call.
///
/// Created fresh for every call and owned by the calling thread. Slots
/// skipped for alignment, or left over when a class is closed, stay zero.
#[derive(Debug)]
pub struct CallFrame {
    gp: [u64; MAX_GP_SLOTS],
    gp_len: usize,
    fp: [u64; MAX_FLOAT_SLOTS],
    fp_len: usize,
    stack: [u64; MAX_STACK_SLOTS],
    stack_len: usize,
    return_slot: Option<usize>,
    object: *mut c_void,
    second_object: *mut c_void,
}

impl CallFrame {
    pub(crate) fn new(object: *mut c_void, second_object: *mut c_void) -> Self {
        Self {
            gp: [0; MAX_GP_SLOTS],
            gp_len: 0,
            fp: [0; MAX_FLOAT_SLOTS],
            fp_len: 0,
            stack: [0; MAX_STACK_SLOTS],
            stack_len: 0,
            return_slot: None,
            object,
            second_object,
        }
    }

    fn slots_mut(&mut self, location: Location) -> &mut [u64] {
        let (array, first, count) = match location {
            Location::General { first, count } => (&mut self.gp[..], first, count),
            Location::Float { first, count } => (&mut self.fp[..], first, count),
            Location::Stack { first, count } => (&mut self.stack[..], first, count),
        };
        &mut array[first as usize..first as usize + count as usize]
    }

    /// Write whole words to a routed location.
    pub(crate) fn place(&mut self, location: Location, words: &[u64]) {
        let slots = self.slots_mut(location);
        debug_assert_eq!(slots.len(), words.len());
        slots.copy_from_slice(words);
    }

    /// Copy the memory image of a value into a routed location.
    pub(crate) fn place_bytes(&mut self, location: Location, bytes: &[u8]) {
        let slots = self.slots_mut(location);
        debug_assert!(bytes.len() <= slots.len() * 8);
        for (slot, chunk) in slots.iter_mut().zip(bytes.chunks(8)) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            *slot = u64::from_le_bytes(word);
        }
    }

    /// Spread float members over float registers, `width` bytes each.
    pub(crate) fn place_members(&mut self, location: Location, bytes: &[u8], width: u8) {
        let slots = self.slots_mut(location);
        for (slot, chunk) in slots.iter_mut().zip(bytes.chunks(width as usize)) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            *slot = u64::from_le_bytes(word);
        }
    }

    pub(crate) fn reserve_return_slot(&mut self, location: Location) {
        if let Location::General { first, .. } = location {
            self.return_slot = Some(first as usize);
        }
    }

    pub(crate) fn finish(&mut self, router: &SlotRouter) {
        (self.gp_len, self.fp_len, self.stack_len) = router.counts();
    }

    /// General-purpose slots in register order.
    pub fn general(&self) -> &[u64] {
        &self.gp[..self.gp_len]
    }

    /// Floating-point slots in register order.
    pub fn float(&self) -> &[u64] {
        &self.fp[..self.fp_len]
    }

    /// Stack slots, lowest address first.
    pub fn stack(&self) -> &[u64] {
        &self.stack[..self.stack_len]
    }

    /// General-purpose slot reserved for the hidden result pointer.
    pub fn return_slot(&self) -> Option<usize> {
        self.return_slot
    }

    pub fn object(&self) -> *mut c_void {
        self.object
    }

    pub fn second_object(&self) -> *mut c_void {
        self.second_object
    }

    /// All register slots, including unused ones, for the trampoline.
    pub(crate) fn gp_registers(&self) -> &[u64; MAX_GP_SLOTS] {
        &self.gp
    }

    pub(crate) fn float_registers(&self) -> &[u64; MAX_FLOAT_SLOTS] {
        &self.fp
    }
}
