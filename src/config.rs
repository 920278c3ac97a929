//! Construction-time configuration of a [`Gpu`](crate::gpu::Gpu).

use crate::backend::Mode;
use crate::device::{DeviceContext, Surface};
use crate::error::Result;
use crate::probe::Capabilities;

/// How a [`Gpu`](crate::gpu::Gpu) is set up.
///
/// Everything is optional except the mode, which defaults to `gpu` (best
/// available device). Leaving `capabilities` unset uses the cached host
/// probe; leaving `device` unset binds kernels to the process-wide shared
/// context.
#[derive(Debug, Clone, Default)]
pub struct GpuConfig {
    pub mode: Mode,
    /// Surface to hand to shader kernels.
    pub canvas: Option<Surface>,
    /// Externally supplied device context.
    pub device: Option<DeviceContext>,
    /// Capability override, mostly for tests.
    pub capabilities: Option<Capabilities>,
}

impl GpuConfig {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Parses the mode from its string form (`"cpu"`, `"gpu"`, `"webgl"`, ...).
    pub fn from_mode_str(mode: &str) -> Result<Self> {
        Ok(Self::new(mode.parse()?))
    }

    #[must_use]
    pub fn canvas(mut self, canvas: Surface) -> Self {
        self.canvas = Some(canvas);
        self
    }

    #[must_use]
    pub fn device(mut self, device: DeviceContext) -> Self {
        self.device = Some(device);
        self
    }

    #[must_use]
    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = Some(caps);
        self
    }
}
