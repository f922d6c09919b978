//! Native call marshaling.
//!
//! A call goes through four stages:
//!
//! - [`CallPlan::new`] classifies every parameter and the return type once
//!   per registered function and proves the signature fits the ABI.
//! - [`marshal`] copies the VM's argument buffer into a [`CallFrame`].
//! - A [`NativeInvoker`] loads the frame into registers, calls the target
//!   and captures the result registers.
//! - [`decode`] writes the typed result into the VM's destination.
//!
//! [`NativeCaller`] runs the last three stages for one configured ABI.
//!
//! # Safety
//!
//! Marshaling and invocation trust the descriptor: a wrong signature
//! corrupts memory. Descriptor/buffer mismatches are only checked by debug
//! assertions.

mod aggregate;
mod args;
mod call;
mod classify;
mod decode;
mod error;
mod frame;
pub mod invoke;
mod marshal;
mod plan;
mod types;

pub use aggregate::{hfa_register_width, is_hfa};
pub use args::{ArgBuffer, RawArgs};
pub use call::NativeCaller;
pub use classify::{RegisterClass, classify, classify_return};
pub use decode::{decode, extract_float_aggregate};
pub use error::{CallError, ConfigError};
pub use frame::{
    CallFrame, Location, MAX_FLOAT_RETURN_REGISTERS, MAX_FLOAT_SLOTS, MAX_GP_SLOTS,
    MAX_REGISTER_AGGREGATE, MAX_STACK_SLOTS,
};
pub use invoke::{NativeInvoker, RawReturn, RegisterContract, host_invoker};
pub use marshal::marshal;
pub use plan::{
    ArgPass, ArgRole, CallPlan, InvokeVariant, ParamPlan, Placement, ReturnMechanism, ReturnPlan,
};
pub use types::{
    CallConv, CallableDescriptor, MemberShape, ObjectLayout, PTR_WORDS, ParamType, Primitive,
    ReturnType, Target, TrailingObject, TypeKind,
};
