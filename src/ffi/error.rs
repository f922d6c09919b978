//! Error types for the native call path.
//!
//! Descriptor/buffer mismatches are caller bugs and are only checked with
//! debug assertions. Everything here is a configuration problem that the
//! embedding application has to see: the call cannot be expressed on the
//! configured ABI and must not be attempted.

use crate::config::Arch;
use crate::ffi::types::CallConv;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The arguments do not fit into the stack slot array.
    #[error("argument list needs {needed} stack slots but {arch} allows at most {limit}")]
    TooManyArguments {
        arch: Arch,
        needed: usize,
        limit: usize,
    },

    #[error("parameter {index} cannot be passed on {arch}: {reason}")]
    UnsupportedParameter {
        index: usize,
        arch: Arch,
        reason: &'static str,
    },

    #[error("return type cannot be returned on {arch}: {reason}")]
    UnsupportedReturn { arch: Arch, reason: &'static str },

    #[error("{conv} cannot call {target}")]
    TargetMismatch {
        conv: CallConv,
        target: &'static str,
    },

    /// A plan built for one ABI was handed to a caller for another.
    #[error("call plan was built for {planned} but the caller is configured for {configured}")]
    AbiMismatch { planned: Arch, configured: Arch },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ABI configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize ABI configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid ABI configuration: {0}")]
    Invalid(String),

    /// No invoker exists for the requested architecture on this host.
    #[error("no native invoker for {0} on this host")]
    NoInvoker(Arch),

    #[error("host architecture is not supported")]
    UnsupportedHost,
}
