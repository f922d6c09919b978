//! Per-signature call plans.
//!
//! A [`CallPlan`] is built once when a function is registered and then
//! shared by every call. It holds the lowering of each parameter, the
//! return mechanism, and a dry-run layout proving the signature fits the
//! ABI's register and stack budgets.

use super::aggregate::{lower_object_param, lower_object_return};
use super::classify::{RegisterClass, classify};
use super::error::CallError;
use super::frame::{Location, SlotRouter};
use super::types::{
    CallConv, CallableDescriptor, ParamType, Primitive, ReturnType, Target, TrailingObject,
    TypeKind,
};
use crate::config::{AbiConfig, HiddenPointer};
use serde::Serialize;
use tracing::debug;

/// How one parameter is moved from the argument buffer into slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "pass", rename_all = "kebab-case")]
pub enum ArgPass {
    /// Integer-like value, widened into one general-purpose slot.
    General { primitive: Primitive },
    Float32,
    Float64,
    /// Only the address of the value is passed.
    Address,
    /// Object bytes copied into consecutive general-purpose slots, or all
    /// onto the stack.
    InlineWords { words: u32, size: u32, align16: bool },
    /// Float-only object spread over float registers, `width` bytes per
    /// register, or its memory image on the stack.
    FloatMembers { count: u8, width: u8, size: u32 },
    /// Object bytes copied onto the stack.
    StackImage { words: u32, size: u32, align16: bool },
}

impl ArgPass {
    fn lower(index: usize, param: &ParamType, abi: &AbiConfig) -> Result<Self, CallError> {
        let pass = match (classify(param), param.kind) {
            (RegisterClass::Float32, _) => ArgPass::Float32,
            (RegisterClass::Float64, _) => ArgPass::Float64,
            (RegisterClass::General, TypeKind::Primitive(p)) if !param.by_ref => {
                ArgPass::General { primitive: p }
            }
            (RegisterClass::General, _) => ArgPass::General {
                primitive: Primitive::Pointer,
            },
            (RegisterClass::Memory, TypeKind::Object(layout)) => lower_object_param(&layout, abi)
                .map_err(|reason| CallError::UnsupportedParameter {
                    index,
                    arch: abi.arch,
                    reason,
                })?,
            (RegisterClass::Memory, _) => ArgPass::Address,
        };
        Ok(pass)
    }

    /// Route this value through `router` without touching any data.
    pub(crate) fn route(&self, router: &mut SlotRouter) -> Result<Location, CallError> {
        match *self {
            ArgPass::General { .. } | ArgPass::Address => router.general(1, false),
            ArgPass::Float32 | ArgPass::Float64 => router.float(1, 1),
            ArgPass::InlineWords { words, align16, .. } => {
                router.general(words as usize, align16)
            }
            ArgPass::FloatMembers { count, size, .. } => {
                router.float(count as usize, (size as usize).div_ceil(8))
            }
            ArgPass::StackImage { words, align16, .. } => router.stack(words as usize, align16),
        }
    }
}

/// Lowered parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamPlan {
    pub class: RegisterClass,
    #[serde(flatten)]
    pub pass: ArgPass,
    /// Words this value occupies in the argument buffer.
    pub words: usize,
}

/// Where the return value comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mechanism", rename_all = "kebab-case")]
pub enum ReturnMechanism {
    Void,
    /// First general-purpose return register.
    General,
    /// First two general-purpose return registers.
    GeneralPair,
    Float32,
    Float64,
    /// Homogeneous float aggregate in the float return registers.
    FloatAggregate { register_width: u8, registers: u8 },
    /// Written by the callee through a hidden result pointer.
    Memory,
}

/// Trampoline variant for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvokeVariant {
    Scalar,
    Float,
    Double,
    HiddenPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReturnPlan {
    #[serde(flatten)]
    pub mechanism: ReturnMechanism,
    /// Bytes written to the destination.
    pub size: u32,
}

impl ReturnPlan {
    fn lower(ret: &ReturnType, abi: &AbiConfig) -> Result<Self, CallError> {
        let size = ret.size();
        let mechanism = match ret {
            ReturnType::Void => ReturnMechanism::Void,
            ReturnType::Value(ty) => match (classify(ty), ty.kind) {
                (RegisterClass::Float32, _) => ReturnMechanism::Float32,
                (RegisterClass::Float64, _) => ReturnMechanism::Float64,
                (RegisterClass::Memory, TypeKind::Object(layout)) => {
                    lower_object_return(&layout, abi).map_err(|reason| {
                        CallError::UnsupportedReturn {
                            arch: abi.arch,
                            reason,
                        }
                    })?
                }
                _ => ReturnMechanism::General,
            },
        };
        Ok(Self { mechanism, size })
    }

    pub fn in_memory(&self) -> bool {
        self.mechanism == ReturnMechanism::Memory
    }

    /// The trampoline variant that captures this return.
    pub fn variant(&self) -> InvokeVariant {
        match self.mechanism {
            ReturnMechanism::Memory => InvokeVariant::HiddenPointer,
            ReturnMechanism::Float32 => InvokeVariant::Float,
            ReturnMechanism::Float64 => InvokeVariant::Double,
            ReturnMechanism::Void
            | ReturnMechanism::General
            | ReturnMechanism::GeneralPair
            | ReturnMechanism::FloatAggregate { .. } => InvokeVariant::Scalar,
        }
    }
}

/// What occupies a location in the dry-run layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "index", rename_all = "kebab-case")]
pub enum ArgRole {
    HiddenReturn,
    Object,
    SecondObject,
    Param(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    #[serde(flatten)]
    pub role: ArgRole,
    pub location: Location,
}

/// Cached lowering of one registered function.
#[derive(Debug, Clone)]
pub struct CallPlan {
    abi: AbiConfig,
    target: Target,
    conv: CallConv,
    params: Vec<ParamPlan>,
    arg_words: usize,
    ret: ReturnPlan,
    layout: Vec<Placement>,
}

impl CallPlan {
    pub fn new(desc: &CallableDescriptor, abi: &AbiConfig) -> Result<Self, CallError> {
        match (desc.conv.is_virtual(), desc.target) {
            (true, Target::Direct(_)) => {
                return Err(CallError::TargetMismatch {
                    conv: desc.conv,
                    target: "a direct function address",
                });
            }
            (false, Target::Virtual(_)) => {
                return Err(CallError::TargetMismatch {
                    conv: desc.conv,
                    target: "a virtual table slot",
                });
            }
            _ => {}
        }

        let params = desc
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                Ok(ParamPlan {
                    class: classify(param),
                    pass: ArgPass::lower(index, param, abi)?,
                    words: param.buffer_words(),
                })
            })
            .collect::<Result<Vec<_>, CallError>>()?;
        let ret = ReturnPlan::lower(&desc.ret, abi)?;

        let mut plan = Self {
            abi: *abi,
            target: desc.target,
            conv: desc.conv,
            arg_words: params.iter().map(|p| p.words).sum(),
            params,
            ret,
            layout: Vec::new(),
        };
        plan.layout = plan.dry_run()?;

        debug!(
            arch = %abi.arch,
            conv = %plan.conv,
            params = plan.params.len(),
            ret = ?plan.ret.mechanism,
            "built call plan"
        );
        Ok(plan)
    }

    /// Route every argument the way the marshaler will, without data.
    fn dry_run(&self) -> Result<Vec<Placement>, CallError> {
        let mut router = SlotRouter::new(&self.abi);
        let mut layout = Vec::with_capacity(self.params.len() + 3);

        if self.hidden_pointer_is_argument() {
            layout.push(Placement {
                role: ArgRole::HiddenReturn,
                location: router.general(1, false)?,
            });
        }
        if self.conv.receiver_first() {
            layout.push(Placement {
                role: ArgRole::Object,
                location: router.general(1, false)?,
            });
        }
        if self.conv.second_object_first() {
            layout.push(Placement {
                role: ArgRole::SecondObject,
                location: router.general(1, false)?,
            });
        }
        for (index, param) in self.params.iter().enumerate() {
            layout.push(Placement {
                role: ArgRole::Param(index),
                location: param.pass.route(&mut router)?,
            });
        }
        if let Some(trailing) = self.conv.trailing_object() {
            let role = match trailing {
                TrailingObject::Object => ArgRole::Object,
                TrailingObject::SecondObject => ArgRole::SecondObject,
            };
            layout.push(Placement {
                role,
                location: router.general(1, false)?,
            });
        }
        Ok(layout)
    }

    /// Whether the hidden result pointer occupies the first integer argument.
    pub(crate) fn hidden_pointer_is_argument(&self) -> bool {
        self.ret.in_memory() && self.abi.hidden_pointer == HiddenPointer::FirstArgument
    }

    pub fn abi(&self) -> &AbiConfig {
        &self.abi
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn conv(&self) -> CallConv {
        self.conv
    }

    pub fn params(&self) -> &[ParamPlan] {
        &self.params
    }

    /// Expected argument buffer length in 32-bit words.
    pub fn arg_words(&self) -> usize {
        self.arg_words
    }

    pub fn ret(&self) -> &ReturnPlan {
        &self.ret
    }

    /// Where each argument lands, in passing order.
    pub fn layout(&self) -> &[Placement] {
        &self.layout
    }
}
