//! The owning facade: mode resolution, one active runner, and the kernel,
//! kernel-map and chain factories.

use crate::backend::{Backend, select};
use crate::chain::{Combined, CombinedFn, KernelChain};
use crate::config::GpuConfig;
use crate::device::{DeviceContext, Surface};
use crate::error::{ArgumentError, Error, Result};
use crate::function::{Function, KernelFunction, SubKernels, ValueType};
use crate::kernel::Kernel;
use crate::map::KernelMap;
use crate::probe::Capabilities;
use crate::runner::Runner;
use crate::settings::KernelSettings;

/// Entry point for building and composing kernels.
///
/// ```
/// use briny_kernels::prelude::*;
///
/// let mut gpu = Gpu::new(GpuConfig::from_mode_str("cpu")?)?;
/// let double = gpu.create_kernel(
///     KernelFunction::new("double", &["a"], |t, args| args[0].get(t.x) * 2.0),
///     Some(KernelSettings::new().dimensions(&[3])),
/// )?;
/// let out = double.run(&[vec![1.0, 2.0, 3.0].into()])?.into_output()?;
/// assert_eq!(out, Output::Flat(vec![2.0, 4.0, 6.0]));
/// # Ok::<(), briny_kernels::Error>(())
/// ```
#[derive(Debug)]
pub struct Gpu {
    runner: Runner,
    caps: Capabilities,
    context: Option<DeviceContext>,
    canvas: Option<Surface>,
}

impl Gpu {
    /// Resolves the configured mode and sets up the matching runner.
    pub fn new(config: GpuConfig) -> Result<Self> {
        let caps = config.capabilities.unwrap_or_else(Capabilities::detect);
        if let Some(device) = &config.device
            && device.device().max_targets() == 0
        {
            return Err(Error::Configuration(format!(
                "device `{}` cannot write any targets",
                device.device().name()
            )));
        }

        let selection = select(config.mode, &caps);
        let runner = Runner::new(selection, config.device.clone(), config.canvas.clone());
        log::debug!("created {} runner for mode {:?}", runner.mode(), config.mode);
        Ok(Self {
            runner,
            caps,
            context: config.device,
            canvas: config.canvas,
        })
    }

    /// Shorthand for a default configuration with `mode`.
    pub fn with_mode(mode: &str) -> Result<Self> {
        Self::new(GpuConfig::from_mode_str(mode)?)
    }

    /// The backend the active runner builds for.
    pub fn mode(&self) -> Backend {
        self.runner.mode()
    }

    /// Whether this host can run shader kernels at all.
    pub fn is_supported() -> bool {
        Capabilities::detect().shader
    }

    /// The capabilities this instance resolved its mode against.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn canvas(&self) -> Option<Surface> {
        self.canvas.clone()
    }

    pub fn device_context(&self) -> Option<DeviceContext> {
        self.context.clone()
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Builds a kernel on the active runner.
    ///
    /// `settings` defaults to a one-axis kernel of [`DEFAULT_LENGTH`]
    /// elements.
    ///
    /// [`DEFAULT_LENGTH`]: crate::settings::DEFAULT_LENGTH
    pub fn create_kernel(
        &mut self,
        function: KernelFunction,
        settings: Option<KernelSettings>,
    ) -> Result<Kernel> {
        let kernel = self
            .runner
            .build_kernel(function, settings.unwrap_or_default())?;
        self.adopt(&kernel);
        Ok(kernel)
    }

    /// Builds a kernel map: `root` plus `subs`, all computed by one dispatch.
    ///
    /// If the active backend cannot write `1 + subs` targets in one dispatch
    /// the runner is replaced by a host runner first (logged, not an error).
    pub fn create_kernel_map(
        &mut self,
        subs: SubKernels,
        settings: Option<KernelSettings>,
        root: KernelFunction,
    ) -> Result<KernelMap> {
        let slots = subs.into_slots()?;
        let targets = 1 + slots.len();
        if !self.runner.supports_targets(targets, &self.caps) {
            log::warn!(
                "{} backend cannot write {targets} targets in one dispatch; \
                 switching to the cpu runner",
                self.runner.mode()
            );
            self.runner.fall_back_to_cpu();
        }

        let keys = slots.iter().map(|s| s.key.clone()).collect();
        let kernel = self
            .runner
            .build_with_subs(root, slots, settings.unwrap_or_default())?;
        self.adopt(&kernel);
        Ok(KernelMap::new(kernel, keys))
    }

    /// Combines kernels into one call.
    ///
    /// On the host backend this is the identity on `combined`. On device
    /// backends every kernel is bound to the first kernel's context and all
    /// but `kernels[final_index]` keep their results on the device; calling
    /// the chain reads only the final kernel's target back.
    pub fn combine_kernels(
        &mut self,
        kernels: Vec<Kernel>,
        final_index: usize,
        combined: CombinedFn,
    ) -> Result<Combined> {
        if kernels.len() < 2 {
            return Err(ArgumentError::ChainTooShort(kernels.len()).into());
        }
        if final_index >= kernels.len() {
            return Err(ArgumentError::FinalIndex {
                index: final_index,
                len: kernels.len(),
            }
            .into());
        }
        if self.mode() == Backend::Cpu {
            return Ok(Combined::Host(combined));
        }

        let first = &kernels[0];
        let context = first
            .device_context()
            .or_else(|| self.context.clone())
            .unwrap_or_else(DeviceContext::shared);
        let canvas = first.canvas().or_else(|| self.canvas.clone());
        if self.context.is_none() {
            self.context = Some(context.clone());
        }
        if self.canvas.is_none() {
            self.canvas.clone_from(&canvas);
        }
        Ok(Combined::Chain(KernelChain::new(
            kernels,
            final_index,
            combined,
            context,
            canvas,
        )))
    }

    /// Registers a helper callable by name from every kernel this runner
    /// builds afterwards.
    pub fn add_function(
        &mut self,
        function: Function,
        param_types: Option<Vec<ValueType>>,
        return_type: Option<ValueType>,
    ) -> Result<&mut Self> {
        self.runner
            .registry_mut()
            .add(function, param_types, return_type)?;
        Ok(self)
    }

    fn adopt(&mut self, kernel: &Kernel) {
        if self.context.is_none() {
            self.context = kernel.device_context();
        }
    }
}
