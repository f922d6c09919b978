//! Signature files and plan reports.
//!
//! A signature file describes one registered function in TOML so its call
//! layout can be inspected without a running VM:
//!
//! ```toml
//! convention = "thiscall"
//! returns = { type = "object", size = 24, align = 8, members = { float64 = 3 } }
//!
//! [[params]]
//! type = "i32"
//!
//! [[params]]
//! type = "f64"
//! by_ref = true
//! ```

use crate::config::{AbiConfig, Arch};
use crate::ffi::{
    ArgRole, CallConv, CallError, CallPlan, CallableDescriptor, InvokeVariant, MemberShape,
    ObjectLayout, ParamPlan, ParamType, Placement, Primitive, ReturnMechanism, ReturnPlan,
    ReturnType, Target, TypeKind,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse signature: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Type names accepted in signature files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeName {
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
    Handle,
    Object,
    Void,
}

impl TypeName {
    fn primitive(self) -> Option<Primitive> {
        let p = match self {
            TypeName::Bool => Primitive::Bool,
            TypeName::I8 => Primitive::I8,
            TypeName::U8 => Primitive::U8,
            TypeName::I16 => Primitive::I16,
            TypeName::U16 => Primitive::U16,
            TypeName::I32 => Primitive::I32,
            TypeName::U32 => Primitive::U32,
            TypeName::I64 => Primitive::I64,
            TypeName::U64 => Primitive::U64,
            TypeName::F32 => Primitive::F32,
            TypeName::F64 => Primitive::F64,
            TypeName::Pointer => Primitive::Pointer,
            TypeName::Handle | TypeName::Object | TypeName::Void => return None,
        };
        Some(p)
    }
}

fn default_trivial() -> bool {
    true
}

fn default_align() -> u32 {
    8
}

/// One parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeSpec {
    #[serde(rename = "type")]
    pub ty: TypeName,
    /// Object size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default = "default_align")]
    pub align: u32,
    /// Object member shape; integer members when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<MemberShape>,
    #[serde(default = "default_trivial")]
    pub trivial: bool,
    #[serde(default)]
    pub by_ref: bool,
}

impl TypeSpec {
    fn to_param(&self, what: &str) -> Result<ParamType, SignatureError> {
        if let Some(p) = self.ty.primitive() {
            return Ok(ParamType {
                kind: TypeKind::Primitive(p),
                by_ref: self.by_ref,
            });
        }
        let kind = match self.ty {
            TypeName::Void => {
                return Err(SignatureError::Invalid(format!("{} cannot be void", what)));
            }
            TypeName::Handle => TypeKind::Handle,
            _ => {
                let size = self.size.ok_or_else(|| {
                    SignatureError::Invalid(format!("{} is an object without a size", what))
                })?;
                let mut layout = ObjectLayout::pod(
                    size,
                    self.align,
                    self.members.unwrap_or(MemberShape::Integer),
                );
                layout.trivial = self.trivial;
                TypeKind::Object(layout)
            }
        };
        Ok(ParamType {
            kind,
            by_ref: self.by_ref,
        })
    }
}

/// A registered function as described in a signature file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_convention")]
    pub convention: CallConv,
    /// Function address for direct conventions.
    #[serde(default)]
    pub address: usize,
    /// Virtual table slot for virtual conventions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_slot: Option<usize>,
    #[serde(default)]
    pub params: Vec<TypeSpec>,
    /// Void when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<TypeSpec>,
}

fn default_convention() -> CallConv {
    CallConv::CDecl
}

impl Signature {
    pub fn from_toml_str(s: &str) -> Result<Self, SignatureError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, SignatureError> {
        let content = std::fs::read_to_string(path).map_err(|source| SignatureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_descriptor(&self) -> Result<CallableDescriptor, SignatureError> {
        let params = self
            .params
            .iter()
            .enumerate()
            .map(|(i, spec)| spec.to_param(&format!("parameter {}", i)))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = match &self.returns {
            None => ReturnType::Void,
            Some(spec) if spec.ty == TypeName::Void => ReturnType::Void,
            Some(spec) => ReturnType::Value(spec.to_param("return type")?),
        };
        let target = match self.virtual_slot {
            Some(slot) => Target::Virtual(slot),
            None => Target::Direct(self.address),
        };
        Ok(CallableDescriptor::new(target, self.convention, params, ret))
    }

    /// Build the call plan for `abi`.
    pub fn plan(&self, abi: &AbiConfig) -> Result<CallPlan, PlanFailure> {
        let desc = self.to_descriptor()?;
        Ok(CallPlan::new(&desc, abi)?)
    }
}

/// Why a signature could not be planned.
#[derive(Debug, thiserror::Error)]
pub enum PlanFailure {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Serializable view of a call plan.
#[derive(Debug, Serialize)]
pub struct PlanReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    pub arch: Arch,
    pub convention: CallConv,
    pub target: String,
    pub arg_words: usize,
    pub variant: InvokeVariant,
    pub returns: &'a ReturnPlan,
    pub params: &'a [ParamPlan],
    pub layout: &'a [Placement],
}

impl<'a> PlanReport<'a> {
    pub fn new(name: Option<&'a str>, plan: &'a CallPlan) -> Self {
        let target = match plan.target() {
            Target::Direct(addr) => format!("{:#x}", addr),
            Target::Virtual(slot) => format!("vtable[{}]", slot),
        };
        Self {
            name,
            arch: plan.abi().arch,
            convention: plan.conv(),
            target,
            arg_words: plan.arg_words(),
            variant: plan.ret().variant(),
            returns: plan.ret(),
            params: plan.params(),
            layout: plan.layout(),
        }
    }

    /// Human-readable table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(name) = self.name {
            let _ = writeln!(out, "function    {}", name);
        }
        let _ = writeln!(out, "arch        {}", self.arch);
        let _ = writeln!(out, "convention  {}", self.convention);
        let _ = writeln!(out, "target      {}", self.target);
        let _ = writeln!(out, "buffer      {} words", self.arg_words);
        let _ = writeln!(
            out,
            "return      {} ({} invoker)",
            describe_return(self.returns),
            variant_name(self.variant)
        );
        if self.layout.is_empty() {
            return out;
        }
        out.push('\n');
        for placement in self.layout {
            let role = match placement.role {
                ArgRole::HiddenReturn => "hidden return".to_string(),
                ArgRole::Object => "object".to_string(),
                ArgRole::SecondObject => "second object".to_string(),
                ArgRole::Param(i) => format!("param {} ({})", i, pass_name(&self.params[i])),
            };
            let _ = writeln!(out, "  {:<32} {}", role, placement.location);
        }
        out
    }
}

fn describe_return(ret: &ReturnPlan) -> String {
    match ret.mechanism {
        ReturnMechanism::Void => "void".to_string(),
        ReturnMechanism::General => format!("{} bytes in gp register", ret.size),
        ReturnMechanism::GeneralPair => format!("{} bytes in gp register pair", ret.size),
        ReturnMechanism::Float32 => "f32 in float register".to_string(),
        ReturnMechanism::Float64 => "f64 in float register".to_string(),
        ReturnMechanism::FloatAggregate {
            register_width,
            registers,
        } => format!(
            "{} bytes in {} float registers, {} bytes each",
            ret.size, registers, register_width
        ),
        ReturnMechanism::Memory => format!("{} bytes through hidden pointer", ret.size),
    }
}

fn variant_name(variant: InvokeVariant) -> &'static str {
    match variant {
        InvokeVariant::Scalar => "scalar",
        InvokeVariant::Float => "float",
        InvokeVariant::Double => "double",
        InvokeVariant::HiddenPointer => "hidden-pointer",
    }
}

fn pass_name(param: &ParamPlan) -> String {
    use crate::ffi::ArgPass;
    match param.pass {
        ArgPass::General { primitive } => format!("{:?}", primitive).to_lowercase(),
        ArgPass::Float32 => "f32".to_string(),
        ArgPass::Float64 => "f64".to_string(),
        ArgPass::Address => "address".to_string(),
        ArgPass::InlineWords { size, .. } => format!("{}-byte object", size),
        ArgPass::FloatMembers { count, width, .. } => format!("{} x {}-byte floats", count, width),
        ArgPass::StackImage { size, .. } => format!("{}-byte object on stack", size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::Location;
    use std::io::Write as _;

    const VEC3_METHOD: &str = r#"
name = "Vec3::scaled"
convention = "thiscall"
address = 4096
returns = { type = "object", size = 24, align = 8, members = { float64 = 3 } }

[[params]]
type = "f64"

[[params]]
type = "i32"
by_ref = true
"#;

    #[test]
    fn test_parse_signature() {
        let sig = Signature::from_toml_str(VEC3_METHOD).unwrap();
        assert_eq!(sig.name.as_deref(), Some("Vec3::scaled"));
        assert_eq!(sig.convention, CallConv::ThisCall);

        let desc = sig.to_descriptor().unwrap();
        assert_eq!(desc.target, Target::Direct(4096));
        assert_eq!(desc.params[0], ParamType::primitive(Primitive::F64));
        assert_eq!(desc.params[1], ParamType::primitive(Primitive::I32).by_ref());
        assert_eq!(
            desc.ret,
            ReturnType::object(ObjectLayout::pod(24, 8, MemberShape::Float64(3)))
        );
    }

    #[test]
    fn test_defaults() {
        let sig = Signature::from_toml_str("[[params]]\ntype = \"object\"\nsize = 12\n").unwrap();
        let desc = sig.to_descriptor().unwrap();
        assert_eq!(desc.conv, CallConv::CDecl);
        assert_eq!(desc.ret, ReturnType::Void);
        assert_eq!(
            desc.params[0],
            ParamType::object(ObjectLayout::pod(12, 8, MemberShape::Integer))
        );
    }

    #[test]
    fn test_invalid_signatures() {
        let sig = Signature::from_toml_str("[[params]]\ntype = \"object\"\n").unwrap();
        let err = sig.to_descriptor().unwrap_err();
        assert_eq!(err.to_string(), "parameter 0 is an object without a size");

        let sig = Signature::from_toml_str("[[params]]\ntype = \"void\"\n").unwrap();
        assert!(sig.to_descriptor().is_err());

        assert!(Signature::from_toml_str("[[params]]\ntype = \"i128\"\n").is_err());
        assert!(Signature::from_toml_str("colour = \"red\"\n").is_err());
    }

    #[test]
    fn test_virtual_slot_needs_virtual_convention() {
        let sig = Signature::from_toml_str("convention = \"thiscall\"\nvirtual_slot = 3\n").unwrap();
        let err = sig.plan(&AbiConfig::aarch64()).unwrap_err();
        assert!(matches!(
            err,
            PlanFailure::Call(CallError::TargetMismatch { .. })
        ));

        let sig =
            Signature::from_toml_str("convention = \"virtual-thiscall\"\nvirtual_slot = 3\n").unwrap();
        let plan = sig.plan(&AbiConfig::aarch64()).unwrap();
        assert_eq!(PlanReport::new(None, &plan).target, "vtable[3]");
    }

    #[test]
    fn test_report() {
        let sig = Signature::from_toml_str(VEC3_METHOD).unwrap();
        let plan = sig.plan(&AbiConfig::aarch64()).unwrap();
        let report = PlanReport::new(sig.name.as_deref(), &plan);

        let text = report.render();
        assert!(text.contains("convention  thiscall"));
        assert!(text.contains("target      0x1000"));
        assert!(text.contains("24 bytes in 3 float registers, 8 bytes each (scalar invoker)"));
        assert!(text.contains("object"));
        assert!(text.contains("param 1 (pointer)"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["arch"], "aarch64");
        assert_eq!(json["convention"], "thiscall");
        assert_eq!(json["returns"]["mechanism"], "float-aggregate");
        assert_eq!(json["layout"][0]["role"], "object");
        assert_eq!(json["layout"][1]["location"]["array"], "float");
        assert_eq!(json["layout"][2]["location"]["array"], "general");
        assert_eq!(json["layout"][2]["location"]["first"], 1);
    }

    #[test]
    fn test_report_sysv_hidden_pointer() {
        let sig = Signature::from_toml_str(VEC3_METHOD).unwrap();
        let plan = sig.plan(&AbiConfig::x86_64_sysv()).unwrap();
        assert_eq!(
            plan.layout()[0].location,
            Location::General { first: 0, count: 1 }
        );
        let text = PlanReport::new(None, &plan).render();
        assert!(text.contains("24 bytes through hidden pointer (hidden-pointer invoker)"));
        assert!(text.contains("hidden return"));
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VEC3_METHOD.as_bytes()).unwrap();
        let sig = Signature::load(file.path()).unwrap();
        assert_eq!(sig.params.len(), 2);

        let err = Signature::load(Path::new("/nonexistent/sig.toml")).unwrap_err();
        assert!(matches!(err, SignatureError::Io { .. }));
    }
}
