//! Runners: the backend-owning kernel factories.
//!
//! One [`Runner`] is active per [`Gpu`](crate::gpu::Gpu). It is a tagged
//! variant, one per backend, over shared state: the function registry every
//! kernel it builds can call into, and the device-context handle and surface
//! those kernels bind to. A runner is never reconfigured in place; when a
//! composition needs a capability the backend lacks, it is replaced
//! wholesale by a host runner (see [`Runner::fall_back_to_cpu`]).

use crate::backend::{Backend, Selection};
use crate::device::{DeviceContext, Surface};
use crate::error::Result;
use crate::function::{KernelFunction, SubKernel};
use crate::kernel::{Kernel, KernelSpec};
use crate::probe::Capabilities;
use crate::registry::FunctionRegistry;
use crate::settings::KernelSettings;

/// State every runner variant carries.
#[derive(Debug, Clone, Default)]
pub struct RunnerCore {
    pub registry: FunctionRegistry,
    pub context: Option<DeviceContext>,
    pub canvas: Option<Surface>,
}

/// A backend's kernel factory.
#[derive(Debug, Clone)]
pub enum Runner {
    Cpu(RunnerCore),
    Shader(RunnerCore),
    Compute(RunnerCore),
    /// Shader runner whose kernels validate every dispatch first.
    ValidatingShader(RunnerCore),
}

impl Runner {
    /// The runner for a resolved mode.
    pub fn new(selection: Selection, context: Option<DeviceContext>, canvas: Option<Surface>) -> Self {
        let core = RunnerCore {
            registry: FunctionRegistry::new(),
            context,
            canvas,
        };
        match (selection.backend, selection.validating) {
            (Backend::Cpu, _) => Self::Cpu(core),
            (Backend::Shader, true) => Self::ValidatingShader(core),
            (Backend::Shader, false) => Self::Shader(core),
            (Backend::Compute, _) => Self::Compute(core),
        }
    }

    /// Replaces this runner with a host runner, carrying over its registry
    /// and surface.
    pub fn fall_back_to_cpu(&mut self) {
        let core = core::mem::take(self.core_mut());
        *self = Self::Cpu(RunnerCore {
            registry: core.registry,
            context: None,
            canvas: core.canvas,
        });
    }

    /// The backend tag of this runner.
    pub fn mode(&self) -> Backend {
        match self {
            Self::Cpu(_) => Backend::Cpu,
            Self::Shader(_) | Self::ValidatingShader(_) => Backend::Shader,
            Self::Compute(_) => Backend::Compute,
        }
    }

    pub fn is_validating(&self) -> bool {
        matches!(self, Self::ValidatingShader(_))
    }

    fn core(&self) -> &RunnerCore {
        match self {
            Self::Cpu(c) | Self::Shader(c) | Self::Compute(c) | Self::ValidatingShader(c) => c,
        }
    }

    fn core_mut(&mut self) -> &mut RunnerCore {
        match self {
            Self::Cpu(c) | Self::Shader(c) | Self::Compute(c) | Self::ValidatingShader(c) => c,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.core().registry
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.core_mut().registry
    }

    pub fn context(&self) -> Option<&DeviceContext> {
        self.core().context.as_ref()
    }

    pub fn canvas(&self) -> Option<&Surface> {
        self.core().canvas.as_ref()
    }

    /// Whether one dispatch can write `targets` device targets.
    ///
    /// The host writes any number of results; native compute always writes
    /// several buffers; a shader backend needs the multi-target capability
    /// and, like compute, stays within its device's target limit.
    pub fn supports_targets(&self, targets: usize, caps: &Capabilities) -> bool {
        let limit = || {
            self.context()
                .map_or(crate::ops::soft::MAX_TARGETS, |c| c.device().max_targets())
        };
        match self.mode() {
            Backend::Cpu => true,
            Backend::Shader => caps.multiple_targets && targets <= limit(),
            Backend::Compute => targets <= limit(),
        }
    }

    /// Builds a kernel for `function`.
    ///
    /// If the runner has no device-context handle yet it adopts the one the
    /// new kernel was bound to.
    pub fn build_kernel(&mut self, function: KernelFunction, settings: KernelSettings) -> Result<Kernel> {
        self.build_with_subs(function, Vec::new(), settings)
    }

    pub(crate) fn build_with_subs(
        &mut self,
        function: KernelFunction,
        subs: Vec<SubKernel>,
        settings: KernelSettings,
    ) -> Result<Kernel> {
        let backend = self.mode();
        let validating = self.is_validating();
        let core = self.core_mut();
        let kernel = Kernel::build(KernelSpec {
            function,
            subs,
            settings,
            backend,
            validating,
            registry: core.registry.clone(),
            context: core.context.clone(),
            canvas: core.canvas.clone(),
        })?;

        if backend.is_device() && core.context.is_none() {
            core.context = kernel.device_context();
        }
        Ok(kernel)
    }
}
