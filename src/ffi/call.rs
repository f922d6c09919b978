//! The native call entry point used by the VM.

use super::args::RawArgs;
use super::decode::decode;
use super::error::{CallError, ConfigError};
use super::invoke::{NativeInvoker, host_invoker};
use super::marshal::marshal;
use super::plan::CallPlan;
use super::types::{CallableDescriptor, Target};
use crate::config::{AbiConfig, RuntimeConfig};
use std::ffi::c_void;
use tracing::{debug, trace};

/// Marshals, invokes and decodes native calls for one ABI.
///
/// Holds no per-call state; one caller can serve any number of threads.
pub struct NativeCaller {
    config: RuntimeConfig,
    invoker: Box<dyn NativeInvoker>,
}

impl std::fmt::Debug for NativeCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCaller")
            .field("config", &self.config)
            .field("invoker", &self.invoker.arch())
            .finish()
    }
}

impl NativeCaller {
    /// Caller using the built-in invoker for `config.abi.arch`.
    pub fn new(config: RuntimeConfig) -> Result<Self, CallError> {
        let invoker = host_invoker(config.abi.arch)?;
        Self::with_invoker(config, invoker)
    }

    /// Caller for the running process with the default configuration.
    pub fn host() -> Result<Self, CallError> {
        Self::new(RuntimeConfig::host()?)
    }

    /// Caller with a custom invoker. The ABI must match the invoker's
    /// architecture and register contract.
    pub fn with_invoker(
        config: RuntimeConfig,
        invoker: Box<dyn NativeInvoker>,
    ) -> Result<Self, CallError> {
        config.abi.validate()?;
        if invoker.arch() != config.abi.arch {
            return Err(ConfigError::Invalid(format!(
                "invoker targets {} but the ABI is {}",
                invoker.arch(),
                config.abi.arch
            ))
            .into());
        }
        invoker.contract().check(&config.abi)?;
        Ok(Self { config, invoker })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn abi(&self) -> &AbiConfig {
        &self.config.abi
    }

    /// Build the cached plan for a registered function.
    pub fn prepare(&self, desc: &CallableDescriptor) -> Result<CallPlan, CallError> {
        CallPlan::new(desc, &self.config.abi)
    }

    /// Perform one call.
    ///
    /// `object` is the receiver for every convention except `CDecl`;
    /// `second_object` is only read by the `ThisCall*ObjFirst`/`ObjLast`
    /// conventions. The result lands in `ret`.
    ///
    /// # Safety
    ///
    /// The plan's target must be a function with the described signature,
    /// `args` must be laid out for the plan's parameters, and `ret` must be
    /// writable for the return type's size. Virtual conventions read the
    /// target from `object`'s virtual table.
    pub unsafe fn call(
        &self,
        plan: &CallPlan,
        args: RawArgs<'_>,
        object: *mut c_void,
        second_object: *mut c_void,
        ret: *mut u8,
    ) -> Result<(), CallError> {
        if plan.abi() != &self.config.abi {
            return Err(CallError::AbiMismatch {
                planned: plan.abi().arch,
                configured: self.config.abi.arch,
            });
        }

        let frame = unsafe { marshal(plan, args, object, second_object)? };
        let target = unsafe { resolve_target(plan.target(), object) };
        let variant = plan.ret().variant();

        if self.config.trace_calls {
            debug!(
                conv = %plan.conv(),
                addr = format_args!("{:#x}", target),
                ?variant,
                gp = ?frame.general(),
                fp = ?frame.float(),
                stack = frame.stack().len(),
                object = ?frame.object(),
                second_object = ?frame.second_object(),
                "native call"
            );
        } else {
            trace!(conv = %plan.conv(), addr = format_args!("{:#x}", target), ?variant, "native call");
        }

        let raw = unsafe { self.invoker.invoke(&frame, target, variant, ret) };
        unsafe { decode(&raw, plan.ret(), ret) };
        Ok(())
    }
}

/// Address to call, loading virtual targets from the receiver's table.
///
/// # Safety
///
/// For [`Target::Virtual`], `object` must point to an object whose first
/// word is a virtual table with at least `slot + 1` entries.
unsafe fn resolve_target(target: Target, object: *mut c_void) -> usize {
    match target {
        Target::Direct(addr) => addr,
        Target::Virtual(slot) => {
            debug_assert!(!object.is_null(), "virtual call without a receiver");
            unsafe {
                let vtable = *(object as *const *const usize);
                *vtable.add(slot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Arch, HiddenPointer};
    use crate::ffi::args::ArgBuffer;
    use crate::ffi::frame::CallFrame;
    use crate::ffi::invoke::RawReturn;
    use crate::ffi::plan::InvokeVariant;
    use crate::ffi::types::{CallConv, MemberShape, ObjectLayout, Primitive, ReturnType};
    use std::ptr;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    struct Recorded {
        target: usize,
        variant: InvokeVariant,
        general: Vec<u64>,
        float: Vec<u64>,
        stack: Vec<u64>,
    }

    /// Records each call and returns canned registers.
    struct RecordingInvoker {
        arch: Arch,
        reply: RawReturn,
        calls: Arc<Mutex<Vec<Recorded>>>,
    }

    impl NativeInvoker for RecordingInvoker {
        fn arch(&self) -> Arch {
            self.arch
        }

        unsafe fn invoke(
            &self,
            frame: &CallFrame,
            target: usize,
            variant: InvokeVariant,
            _ret_ptr: *mut u8,
        ) -> RawReturn {
            self.calls.lock().unwrap().push(Recorded {
                target,
                variant,
                general: frame.general().to_vec(),
                float: frame.float().to_vec(),
                stack: frame.stack().to_vec(),
            });
            self.reply
        }
    }

    fn recording(abi: AbiConfig, reply: RawReturn) -> (NativeCaller, Arc<Mutex<Vec<Recorded>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let invoker = RecordingInvoker {
            arch: abi.arch,
            reply,
            calls: Arc::clone(&calls),
        };
        let caller = NativeCaller::with_invoker(RuntimeConfig::new(abi), Box::new(invoker)).unwrap();
        (caller, calls)
    }

    #[test]
    fn test_direct_call_decodes_result() {
        let reply = RawReturn {
            gp: [0xFFFF_FFFF_FFFF_FFF6, 0],
            fp: [0; 4],
        };
        let (caller, calls) = recording(AbiConfig::aarch64(), reply);
        let desc = CallableDescriptor::function(
            0x4000,
            vec![Primitive::I32.into(), Primitive::F64.into()],
            ReturnType::primitive(Primitive::I32),
        );
        let plan = caller.prepare(&desc).unwrap();

        let mut buf = ArgBuffer::new();
        buf.push_i32(3).push_f64(0.5);
        let mut result = 0i32;
        unsafe {
            caller
                .call(
                    &plan,
                    buf.as_raw(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    (&mut result as *mut i32).cast(),
                )
                .unwrap();
        }

        assert_eq!(result, -10);
        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[0],
            Recorded {
                target: 0x4000,
                variant: InvokeVariant::Scalar,
                general: vec![3],
                float: vec![0.5f64.to_bits()],
                stack: vec![],
            }
        );
    }

    #[test]
    fn test_virtual_call_resolves_from_vtable() {
        #[repr(C)]
        struct Object {
            vtable: *const usize,
            value: u64,
        }
        let vtable: [usize; 3] = [0x1110, 0x2220, 0x3330];
        let mut object = Object {
            vtable: vtable.as_ptr(),
            value: 7,
        };
        let object_ptr = (&mut object as *mut Object).cast::<c_void>();

        let (caller, calls) = recording(AbiConfig::aarch64(), RawReturn::default());
        let desc = CallableDescriptor::new(
            Target::Virtual(2),
            CallConv::VirtualThisCall,
            vec![Primitive::U8.into()],
            ReturnType::Void,
        );
        let plan = caller.prepare(&desc).unwrap();
        let mut buf = ArgBuffer::new();
        buf.push_u8(200);
        unsafe {
            caller
                .call(&plan, buf.as_raw(), object_ptr, ptr::null_mut(), ptr::null_mut())
                .unwrap();
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].target, 0x3330);
        assert_eq!(calls[0].general, vec![object_ptr as u64, 200]);
        assert_eq!(object.value, 7);
    }

    #[test]
    fn test_float_aggregate_return() {
        let reply = RawReturn {
            gp: [0; 2],
            fp: [1.0f64.to_bits(), 2.0f64.to_bits(), 3.0f64.to_bits(), 0],
        };
        let (caller, calls) = recording(AbiConfig::aarch64(), reply);
        let vec3 = ObjectLayout::pod(24, 8, MemberShape::Float64(3));
        let plan = caller
            .prepare(&CallableDescriptor::function(0x4000, vec![], ReturnType::object(vec3)))
            .unwrap();

        let mut out = [0f64; 3];
        unsafe {
            caller
                .call(
                    &plan,
                    RawArgs::empty(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    out.as_mut_ptr().cast(),
                )
                .unwrap();
        }
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(calls.lock().unwrap()[0].variant, InvokeVariant::Scalar);
    }

    #[test]
    fn test_plan_from_other_abi_is_rejected() {
        let (caller, _) = recording(AbiConfig::aarch64(), RawReturn::default());
        let desc = CallableDescriptor::function(0x4000, vec![], ReturnType::Void);
        let plan = CallPlan::new(&desc, &AbiConfig::x86_64_sysv()).unwrap();

        let err = unsafe {
            caller.call(
                &plan,
                RawArgs::empty(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        }
        .unwrap_err();
        assert!(matches!(
            err,
            CallError::AbiMismatch {
                planned: Arch::X86_64,
                configured: Arch::Aarch64
            }
        ));
    }

    #[test]
    fn test_invoker_must_match_abi() {
        let invoker = RecordingInvoker {
            arch: Arch::X86_64,
            reply: RawReturn::default(),
            calls: Arc::default(),
        };
        let err = NativeCaller::with_invoker(RuntimeConfig::new(AbiConfig::aarch64()), Box::new(invoker))
            .unwrap_err();
        assert!(matches!(err, CallError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_abi_must_match_invoker_registers() {
        let recorder = |arch| RecordingInvoker {
            arch,
            reply: RawReturn::default(),
            calls: Arc::default(),
        };

        // Two more GP registers than rdi..r9.
        let mut abi = AbiConfig::x86_64_sysv();
        abi.gp_arg_registers = 8;
        let err = NativeCaller::with_invoker(RuntimeConfig::new(abi), Box::new(recorder(Arch::X86_64)))
            .unwrap_err();
        assert!(matches!(err, CallError::Config(ConfigError::Invalid(_))));
        assert!(err.to_string().contains("gp_arg_registers is 8"), "{}", err);

        let mut abi = AbiConfig::x86_64_sysv();
        abi.hidden_pointer = HiddenPointer::Register;
        assert!(NativeCaller::with_invoker(RuntimeConfig::new(abi), Box::new(recorder(Arch::X86_64))).is_err());

        let mut abi = AbiConfig::aarch64();
        abi.hidden_pointer = HiddenPointer::FirstArgument;
        assert!(NativeCaller::with_invoker(RuntimeConfig::new(abi), Box::new(recorder(Arch::Aarch64))).is_err());

        // Budgets the trampoline does not touch may be tightened.
        let mut abi = AbiConfig::aarch64();
        abi.max_stack_slots = 16;
        assert!(NativeCaller::with_invoker(RuntimeConfig::new(abi), Box::new(recorder(Arch::Aarch64))).is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut abi = AbiConfig::aarch64();
        abi.gp_arg_registers = 12;
        let invoker = RecordingInvoker {
            arch: Arch::Aarch64,
            reply: RawReturn::default(),
            calls: Arc::default(),
        };
        let err = NativeCaller::with_invoker(RuntimeConfig::new(abi), Box::new(invoker)).unwrap_err();
        assert!(err.to_string().contains("gp_arg_registers is 12"));
    }
}
