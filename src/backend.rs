//! Backend selection module.
//!
//! A caller asks for a [`Mode`]; the mode selector ([`select`]) resolves it
//! against the [`Capabilities`] probe into one concrete [`Backend`].
//!
//! # Resolution
//!
//! | requested         | no surface | surface + shader | surface, no shader |
//! |-------------------|------------|------------------|--------------------|
//! | `cpu`             | `Cpu`      | `Cpu`            | `Cpu`              |
//! | `gpu`             | `Compute`  | `Shader`         | `Cpu` (warned)     |
//! | `opencl`          | `Compute`  | `Compute`        | `Cpu` (warned)     |
//! | `webgl`           | `Shader`   | `Shader`         | `Cpu` (warned)     |
//! | `webgl-validator` | `Shader`*  | `Shader`*        | `Cpu` (warned)     |
//!
//! `*` kernels are built by the strict pre-dispatch-validating runner.

use core::fmt;
use core::str::FromStr;

use crate::error::Error;
use crate::probe::Capabilities;

/// Enumeration of concrete computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// Kernels are evaluated on the host (default).
    #[default]
    Cpu,
    /// Kernels render into textures on a shader device.
    Shader,
    /// Kernels dispatch on a native compute device into buffers.
    Compute,
}

impl Backend {
    /// The tag reported by [`Gpu::mode`](crate::gpu::Gpu::mode).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Shader => "webgl",
            Self::Compute => "opencl",
        }
    }

    /// True for backends that dispatch on a device.
    pub const fn is_device(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested execution mode, before capability resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Host evaluation.
    Cpu,
    /// Best available device.
    #[default]
    Gpu,
    /// Shader device.
    WebGl,
    /// Native compute device.
    OpenCl,
    /// Shader device with strict pre-dispatch validation.
    WebGlValidator,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "webgl" | "shader" => Ok(Self::WebGl),
            "opencl" | "native" | "compute" => Ok(Self::OpenCl),
            "webgl-validator" | "shader-validator" | "validator" => Ok(Self::WebGlValidator),
            other => Err(Error::Configuration(format!(
                "unknown mode `{other}` (expected cpu, gpu, opencl, webgl or webgl-validator)"
            ))),
        }
    }
}

/// Outcome of mode resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// The backend kernels will run on.
    pub backend: Backend,
    /// Whether kernels are built by the validating shader runner.
    pub validating: bool,
    /// Whether a device request was downgraded to host evaluation.
    pub fallback: bool,
}

/// Resolves `mode` against `caps`.
///
/// A surface that exists but cannot run shaders downgrades every device
/// request to host evaluation; that is logged, not returned as an error.
pub fn select(mode: Mode, caps: &Capabilities) -> Selection {
    let pick = |backend, validating| Selection {
        backend,
        validating,
        fallback: false,
    };

    if mode != Mode::Cpu && caps.surface && !caps.shader {
        log::warn!("a display surface is present without shader support; falling back to cpu");
        return Selection {
            backend: Backend::Cpu,
            validating: false,
            fallback: true,
        };
    }

    let selection = match mode {
        Mode::Cpu => pick(Backend::Cpu, false),
        Mode::Gpu if caps.surface => pick(Backend::Shader, false),
        Mode::Gpu | Mode::OpenCl => pick(Backend::Compute, false),
        Mode::WebGl => pick(Backend::Shader, false),
        Mode::WebGlValidator => pick(Backend::Shader, true),
    };
    log::debug!("mode {mode:?} resolved to {}", selection.backend);
    selection
}
