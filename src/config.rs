//! ABI and runtime configuration.
//!
//! Every architecture-specific constant the marshaler needs lives in one
//! [`AbiConfig`]. Adding an architecture means adding a preset here and a
//! trampoline in `ffi::invoke`.

use crate::ffi::{
    ConfigError, MAX_FLOAT_RETURN_REGISTERS, MAX_FLOAT_SLOTS, MAX_GP_SLOTS, MAX_REGISTER_AGGREGATE,
    MAX_STACK_SLOTS,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "aarch64")]
    Aarch64,
    #[serde(rename = "x86-64")]
    X86_64,
}

impl Arch {
    /// Architecture of the running process, if it is one we can call on.
    pub fn host() -> Option<Arch> {
        if cfg!(target_arch = "aarch64") {
            Some(Arch::Aarch64)
        } else if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64",
            Arch::X86_64 => "x86-64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How float-only composites are spread over float registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FloatPacking {
    /// One member per register (AAPCS64 HFA).
    PerMember,
    /// Members packed into 8-byte register lanes (System V eightbytes).
    Eightbyte,
}

/// Where the address for a memory-returned value is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HiddenPointer {
    /// A dedicated indirect result register (x8 on AArch64).
    Register,
    /// The first integer argument register, ahead of the receiver.
    FirstArgument,
}

/// Calling-convention constants for one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbiConfig {
    pub arch: Arch,
    /// Integer/pointer argument registers.
    pub gp_arg_registers: usize,
    /// Floating-point argument registers.
    pub float_arg_registers: usize,
    /// Largest number of 8-byte stack argument slots a call may use.
    pub max_stack_slots: usize,
    /// Float registers available for returning a float-only composite.
    /// Also the member limit for homogeneous aggregates.
    pub float_return_registers: usize,
    pub float_packing: FloatPacking,
    pub hidden_pointer: HiddenPointer,
    /// Largest composite, in bytes, passed or returned in registers.
    pub max_register_aggregate: u32,
    /// A composite that does not fit the remaining registers of its class
    /// closes that class for the rest of the call.
    pub close_class_on_spill: bool,
    /// A 16-byte aligned composite starts at an even-numbered GP register.
    pub even_gp_for_align16: bool,
    /// Composites too large for registers are passed by address instead of
    /// being copied onto the stack.
    pub large_aggregates_by_address: bool,
}

impl AbiConfig {
    /// AAPCS64 (Linux and other ELF platforms).
    pub fn aarch64() -> Self {
        Self {
            arch: Arch::Aarch64,
            gp_arg_registers: 8,
            float_arg_registers: 8,
            max_stack_slots: 64,
            float_return_registers: 4,
            float_packing: FloatPacking::PerMember,
            hidden_pointer: HiddenPointer::Register,
            max_register_aggregate: 16,
            close_class_on_spill: true,
            even_gp_for_align16: true,
            large_aggregates_by_address: true,
        }
    }

    /// x86-64 System V.
    pub fn x86_64_sysv() -> Self {
        Self {
            arch: Arch::X86_64,
            gp_arg_registers: 6,
            float_arg_registers: 8,
            max_stack_slots: 64,
            float_return_registers: 2,
            float_packing: FloatPacking::Eightbyte,
            hidden_pointer: HiddenPointer::FirstArgument,
            max_register_aggregate: 16,
            close_class_on_spill: false,
            even_gp_for_align16: false,
            large_aggregates_by_address: false,
        }
    }

    pub fn for_arch(arch: Arch) -> Self {
        match arch {
            Arch::Aarch64 => Self::aarch64(),
            Arch::X86_64 => Self::x86_64_sysv(),
        }
    }

    /// The preset for the running process.
    pub fn host() -> Result<Self, ConfigError> {
        Arch::host()
            .map(Self::for_arch)
            .ok_or(ConfigError::UnsupportedHost)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: AbiConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the budgets against the fixed capacities of the call frame and
    /// the invoker's result block.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("gp_arg_registers", self.gp_arg_registers, 1, MAX_GP_SLOTS),
            ("float_arg_registers", self.float_arg_registers, 0, MAX_FLOAT_SLOTS),
            ("max_stack_slots", self.max_stack_slots, 0, MAX_STACK_SLOTS),
            (
                "float_return_registers",
                self.float_return_registers,
                1,
                MAX_FLOAT_RETURN_REGISTERS,
            ),
            (
                "max_register_aggregate",
                self.max_register_aggregate as usize,
                8,
                MAX_REGISTER_AGGREGATE,
            ),
        ];
        for (name, value, min, max) in checks {
            if value < min || value > max {
                return Err(ConfigError::Invalid(format!(
                    "{} is {}, expected {}..={}",
                    name, value, min, max
                )));
            }
        }
        Ok(())
    }
}

/// Runtime configuration for the native call layer.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub abi: AbiConfig,
    /// Log every marshaled frame at debug level instead of trace.
    pub trace_calls: bool,
}

impl RuntimeConfig {
    pub fn new(abi: AbiConfig) -> Self {
        Self {
            abi,
            trace_calls: false,
        }
    }

    /// Configuration for the running process.
    pub fn host() -> Result<Self, ConfigError> {
        AbiConfig::host().map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_presets_are_valid() {
        AbiConfig::aarch64().validate().unwrap();
        AbiConfig::x86_64_sysv().validate().unwrap();
        assert_eq!(AbiConfig::for_arch(Arch::X86_64).gp_arg_registers, 6);
    }

    #[test]
    fn test_load_from_file() {
        let text = AbiConfig::aarch64().to_toml_string().unwrap();
        assert!(text.contains("arch = \"aarch64\""));
        assert!(text.contains("float_packing = \"per-member\""));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.replace("max_stack_slots = 64", "max_stack_slots = 16").as_bytes())
            .unwrap();

        let loaded = AbiConfig::load(file.path()).unwrap();
        assert_eq!(loaded.max_stack_slots, 16);
        assert_eq!(loaded.hidden_pointer, HiddenPointer::Register);
    }

    #[test]
    fn test_validate_rejects_oversized_budgets() {
        let mut config = AbiConfig::aarch64();
        config.gp_arg_registers = 9;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid ABI configuration: gp_arg_registers is 9, expected 1..=8"
        );

        let mut config = AbiConfig::x86_64_sysv();
        config.max_stack_slots = 65;
        assert!(config.validate().is_err());

        let mut config = AbiConfig::aarch64();
        config.float_return_registers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = AbiConfig::load(Path::new("/nonexistent/abi.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_parse_error() {
        let err = AbiConfig::from_toml_str("arch = \"sparc\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
