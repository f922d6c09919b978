//! Type descriptors for registered native functions.
//!
//! These are produced by the registration layer and are immutable once
//! built; a single descriptor is shared by every call to the same function.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of 32-bit buffer words an address occupies.
pub const PTR_WORDS: usize = std::mem::size_of::<usize>() / 4;

/// Primitive value kinds understood by the marshaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl Primitive {
    /// Size of the value in bytes.
    pub fn size(self) -> u32 {
        match self {
            Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
            Primitive::Pointer => std::mem::size_of::<usize>() as u32,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// Sign- or zero-extend a raw buffer value to a full 64-bit slot.
    ///
    /// Callees on some ABIs rely on the caller extending sub-word integers,
    /// so every integer is written to its slot in canonical form.
    pub fn widen(self, raw: u64) -> u64 {
        match self {
            Primitive::Bool => (raw as u8 != 0) as u64,
            Primitive::I8 => raw as i8 as i64 as u64,
            Primitive::U8 => raw as u8 as u64,
            Primitive::I16 => raw as i16 as i64 as u64,
            Primitive::U16 => raw as u16 as u64,
            Primitive::I32 => raw as i32 as i64 as u64,
            Primitive::U32 | Primitive::F32 => raw as u32 as u64,
            Primitive::I64 | Primitive::U64 | Primitive::F64 | Primitive::Pointer => raw,
        }
    }
}

/// Member composition of a by-value object, as seen by the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberShape {
    /// `n` single-precision members and nothing else.
    Float32(u32),
    /// `n` double-precision members and nothing else.
    Float64(u32),
    /// Integers and pointers only.
    Integer,
    /// Integers mixed with floats, or floats of mixed precision.
    Mixed,
}

/// Memory layout of a host type passed or returned by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectLayout {
    pub size: u32,
    pub align: u32,
    pub members: MemberShape,
    /// False for host types with a non-trivial copy constructor or
    /// destructor. Those always travel through memory.
    pub trivial: bool,
}

impl ObjectLayout {
    /// Plain-old-data layout.
    pub fn pod(size: u32, align: u32, members: MemberShape) -> Self {
        Self {
            size,
            align,
            members,
            trivial: true,
        }
    }

    /// Mark the type as having non-trivial copy or destruction semantics.
    pub fn non_trivial(mut self) -> Self {
        self.trivial = false;
        self
    }

    /// Size rounded up to whole 64-bit words.
    pub fn words(&self) -> usize {
        (self.size as usize).div_ceil(8)
    }

    /// Member width in bytes and member count for float-only layouts.
    pub fn float_members(&self) -> Option<(u32, u32)> {
        match self.members {
            MemberShape::Float32(n) => Some((4, n)),
            MemberShape::Float64(n) => Some((8, n)),
            MemberShape::Integer | MemberShape::Mixed => None,
        }
    }
}

/// What a parameter or return value is, before reference-ness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive(Primitive),
    /// Script object handle; always an address.
    Handle,
    /// Host object passed by value.
    Object(ObjectLayout),
}

/// Parameter type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamType {
    pub kind: TypeKind,
    /// Passed as a reference: only the address crosses the boundary.
    pub by_ref: bool,
}

impl ParamType {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            by_ref: false,
        }
    }

    pub fn primitive(p: Primitive) -> Self {
        Self::new(TypeKind::Primitive(p))
    }

    pub fn handle() -> Self {
        Self::new(TypeKind::Handle)
    }

    pub fn object(layout: ObjectLayout) -> Self {
        Self::new(TypeKind::Object(layout))
    }

    /// The same type, passed by reference.
    pub fn by_ref(mut self) -> Self {
        self.by_ref = true;
        self
    }

    /// Whether only an address crosses the boundary for this value.
    pub fn is_address(&self) -> bool {
        self.by_ref || matches!(self.kind, TypeKind::Handle)
    }

    /// Number of 32-bit words the VM uses for this value in its argument
    /// buffer. By-value objects are represented by the address of the
    /// VM's copy.
    pub fn buffer_words(&self) -> usize {
        if self.by_ref {
            return PTR_WORDS;
        }
        match self.kind {
            TypeKind::Primitive(p) if p.size() <= 4 => 1,
            TypeKind::Primitive(_) => 2,
            TypeKind::Handle | TypeKind::Object(_) => PTR_WORDS,
        }
    }

    /// Size of the value itself in bytes (an address for references).
    pub fn size(&self) -> u32 {
        if self.is_address() {
            return Primitive::Pointer.size();
        }
        match self.kind {
            TypeKind::Primitive(p) => p.size(),
            TypeKind::Handle => Primitive::Pointer.size(),
            TypeKind::Object(layout) => layout.size,
        }
    }

    /// Alignment requirement in bytes.
    pub fn align(&self) -> u32 {
        match self.kind {
            TypeKind::Object(layout) if !self.is_address() => layout.align,
            _ => self.size(),
        }
    }
}

impl From<Primitive> for ParamType {
    fn from(p: Primitive) -> Self {
        ParamType::primitive(p)
    }
}

/// Return type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    Void,
    Value(ParamType),
}

impl ReturnType {
    pub fn primitive(p: Primitive) -> Self {
        ReturnType::Value(ParamType::primitive(p))
    }

    pub fn handle() -> Self {
        ReturnType::Value(ParamType::handle())
    }

    pub fn object(layout: ObjectLayout) -> Self {
        ReturnType::Value(ParamType::object(layout))
    }

    /// Size of the returned value in bytes; zero for void.
    pub fn size(&self) -> u32 {
        match self {
            ReturnType::Void => 0,
            ReturnType::Value(ty) => ty.size(),
        }
    }
}

/// Calling convention of a registered function.
///
/// The receiver is the script object the method is invoked on. The
/// `*ObjFirst`/`*ObjLast` variants pass an extra object pointer before or
/// after the declared parameters: for `CDecl*` it is the receiver itself,
/// for `ThisCall*` it is the call site's second object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallConv {
    #[serde(rename = "cdecl")]
    CDecl,
    #[serde(rename = "cdecl-obj-first")]
    CDeclObjFirst,
    #[serde(rename = "cdecl-obj-last")]
    CDeclObjLast,
    #[serde(rename = "thiscall")]
    ThisCall,
    #[serde(rename = "thiscall-obj-first")]
    ThisCallObjFirst,
    #[serde(rename = "thiscall-obj-last")]
    ThisCallObjLast,
    #[serde(rename = "virtual-thiscall")]
    VirtualThisCall,
    #[serde(rename = "virtual-thiscall-obj-first")]
    VirtualThisCallObjFirst,
    #[serde(rename = "virtual-thiscall-obj-last")]
    VirtualThisCallObjLast,
}

/// Which pointer a convention appends after the declared parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingObject {
    Object,
    SecondObject,
}

impl CallConv {
    pub fn is_virtual(self) -> bool {
        matches!(
            self,
            CallConv::VirtualThisCall
                | CallConv::VirtualThisCallObjFirst
                | CallConv::VirtualThisCallObjLast
        )
    }

    /// Member-call conventions, where the receiver is `this`.
    pub fn is_method(self) -> bool {
        matches!(
            self,
            CallConv::ThisCall
                | CallConv::ThisCallObjFirst
                | CallConv::ThisCallObjLast
                | CallConv::VirtualThisCall
                | CallConv::VirtualThisCallObjFirst
                | CallConv::VirtualThisCallObjLast
        )
    }

    /// The receiver goes into general-purpose slot 0.
    pub fn receiver_first(self) -> bool {
        self.is_method() || self == CallConv::CDeclObjFirst
    }

    /// The second object follows the receiver, ahead of the declared
    /// parameters.
    pub fn second_object_first(self) -> bool {
        matches!(
            self,
            CallConv::ThisCallObjFirst | CallConv::VirtualThisCallObjFirst
        )
    }

    pub fn trailing_object(self) -> Option<TrailingObject> {
        match self {
            CallConv::CDeclObjLast => Some(TrailingObject::Object),
            CallConv::ThisCallObjLast | CallConv::VirtualThisCallObjLast => {
                Some(TrailingObject::SecondObject)
            }
            _ => None,
        }
    }

    /// Whether the call site has to supply a receiver.
    pub fn needs_object(self) -> bool {
        self != CallConv::CDecl
    }

    /// Whether the call site has to supply a second object.
    pub fn needs_second_object(self) -> bool {
        self.second_object_first() || self.trailing_object() == Some(TrailingObject::SecondObject)
    }
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallConv::CDecl => "cdecl",
            CallConv::CDeclObjFirst => "cdecl-obj-first",
            CallConv::CDeclObjLast => "cdecl-obj-last",
            CallConv::ThisCall => "thiscall",
            CallConv::ThisCallObjFirst => "thiscall-obj-first",
            CallConv::ThisCallObjLast => "thiscall-obj-last",
            CallConv::VirtualThisCall => "virtual-thiscall",
            CallConv::VirtualThisCallObjFirst => "virtual-thiscall-obj-first",
            CallConv::VirtualThisCallObjLast => "virtual-thiscall-obj-last",
        };
        f.write_str(name)
    }
}

/// Where control is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A function address.
    Direct(usize),
    /// Index into the receiver's virtual function table.
    Virtual(usize),
}

/// A registered native function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableDescriptor {
    pub target: Target,
    pub conv: CallConv,
    pub params: Vec<ParamType>,
    pub ret: ReturnType,
}

impl CallableDescriptor {
    pub fn new(target: Target, conv: CallConv, params: Vec<ParamType>, ret: ReturnType) -> Self {
        Self {
            target,
            conv,
            params,
            ret,
        }
    }

    /// A free function at `addr`.
    pub fn function(addr: usize, params: Vec<ParamType>, ret: ReturnType) -> Self {
        Self::new(Target::Direct(addr), CallConv::CDecl, params, ret)
    }

    /// Total size of the argument buffer in 32-bit words.
    pub fn buffer_words(&self) -> usize {
        self.params.iter().map(ParamType::buffer_words).sum()
    }
}
