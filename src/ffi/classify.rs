//! Register classification of parameter and return types.
//!
//! Classification only looks at the static type descriptor, never at a
//! particular call or ABI, so its result can be cached per signature.

use super::types::{ParamType, Primitive, ReturnType, TypeKind};
use serde::Serialize;

/// Register class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterClass {
    /// Integers, pointers, handles and references.
    General,
    Float32,
    Float64,
    /// Objects passed by value. The ABI decides how their bytes travel.
    Memory,
}

pub fn classify(param: &ParamType) -> RegisterClass {
    if param.by_ref {
        return RegisterClass::General;
    }
    match param.kind {
        TypeKind::Object(_) => RegisterClass::Memory,
        TypeKind::Primitive(Primitive::F32) => RegisterClass::Float32,
        TypeKind::Primitive(Primitive::F64) => RegisterClass::Float64,
        TypeKind::Primitive(_) | TypeKind::Handle => RegisterClass::General,
    }
}

/// Classification of a return type; `None` for void.
pub fn classify_return(ret: &ReturnType) -> Option<RegisterClass> {
    match ret {
        ReturnType::Void => None,
        ReturnType::Value(ty) => Some(classify(ty)),
    }
}
