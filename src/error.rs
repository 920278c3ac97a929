//! Error taxonomy shared by every layer of the crate.
//!
//! Configuration and argument errors are the caller's to fix and are never
//! retried. Capability fallbacks are not errors at all: they are logged and
//! the host-evaluated backend is substituted (query [`Gpu::mode`] to see the
//! effective backend).
//!
//! [`Gpu::mode`]: crate::gpu::Gpu::mode

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Every failure the crate reports.
#[derive(Debug, Error)]
pub enum Error {
    /// Unrecognized mode string or otherwise unusable construction config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A kernel, sub-kernel or function definition was rejected at build time.
    #[error("argument error: {0}")]
    Argument(#[from] ArgumentError),

    /// The device could not turn a kernel into a runnable program.
    #[error("compile error in `{kernel}`: {reason}")]
    Compile { kernel: String, reason: String },

    /// Device I/O or dispatch failure.
    #[error("device error: {0}")]
    Device(String),

    /// A strict pre-dispatch check of the validating runner failed.
    #[error("validation failed for `{kernel}`: {reason}")]
    Validation { kernel: String, reason: String },
}

/// Build-time argument failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("no kernel function was supplied")]
    MissingFunction,

    #[error("`{0}` is declared but has no callable body")]
    NotCallable(String),

    #[error("kernel `{kernel}` calls unknown function `{function}`")]
    UnknownFunction { kernel: String, function: String },

    #[error("malformed sub-kernel spec: {0}")]
    MalformedSubKernels(String),

    #[error("invalid dimensions {0:?}: expected 1 to 3 positive lengths")]
    InvalidDimensions(Vec<usize>),

    #[error("`{name}` takes {expected} parameters but {got} types were given")]
    ParamTypeCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("kernel chain needs at least 2 kernels, got {0}")]
    ChainTooShort(usize),

    #[error("final kernel index {index} is out of range for {len} kernels")]
    FinalIndex { index: usize, len: usize },
}

impl Error {
    /// Shorthand for [`Error::Device`].
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Shorthand for [`Error::Compile`].
    pub fn compile(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compile {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }
}
