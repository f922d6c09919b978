//! nativecall - native function calls for an embeddable script VM
//!
//! Takes a script-level call of a host-registered function and performs
//! it as a real native call under the platform calling convention. See
//! [`ffi`] for the call pipeline and [`config`] for the ABI descriptions.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("nativecall only supports 64-bit targets");

pub mod config;
pub mod ffi;
pub mod signature;

pub use config::{AbiConfig, Arch, RuntimeConfig};
pub use ffi::{
    ArgBuffer, CallConv, CallError, CallPlan, CallableDescriptor, ConfigError, NativeCaller,
    ParamType, RawArgs, ReturnType, Target,
};
