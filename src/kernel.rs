//! Kernels: compiled, callable units bound to one function.
//!
//! A [`Kernel`] is a cheap, cloneable handle; clones share one compiled
//! program and one set of output targets, so a kernel supports one
//! invocation at a time (concurrent calls on the same handle serialize).
//! Use separate kernels for concurrent work.
//!
//! Host kernels (`cpu` backend) evaluate in place and always return
//! [`Value::Host`]. Device kernels dispatch on their [`DeviceContext`] and
//! either read the result back or, with `output_to_device`, hand out a
//! [`Texture`] that other kernels on the same context take as input without
//! a host round trip.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::Backend;
use crate::device::{
    CompileRequest, DeviceContext, DeviceInput, ProgramId, Surface, TargetDesc, TargetFormat,
    TargetId, read_back, texture_size,
};
use crate::error::{Error, Result};
use crate::function::{Input, KernelFunction, SubKernel};
use crate::ops::cpu::{HostProgram, evaluate};
use crate::output::Output;
use crate::registry::FunctionRegistry;
use crate::settings::KernelSettings;
use crate::tensors::Tensor;
use crate::validate::DispatchCheck;

/// A kernel argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Scalar(f32),
    Array(Tensor),
    /// A device-resident result of another kernel.
    Device(Texture),
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Self::Scalar(v)
    }
}

impl From<Tensor> for Arg {
    fn from(t: Tensor) -> Self {
        Self::Array(t)
    }
}

impl From<Vec<f32>> for Arg {
    fn from(v: Vec<f32>) -> Self {
        Self::Array(Tensor::vector(v))
    }
}

impl From<Texture> for Arg {
    fn from(t: Texture) -> Self {
        Self::Device(t)
    }
}

impl From<Output> for Arg {
    fn from(o: Output) -> Self {
        Self::Array(o.into())
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        match v {
            Value::Host(o) => o.into(),
            Value::Device(t) => t.into(),
        }
    }
}

impl From<Output> for Tensor {
    /// Ragged results, which no kernel produces, become one flat axis.
    fn from(o: Output) -> Self {
        let data = o.flatten();
        let mut shape = o.shape();
        if shape.iter().product::<usize>() != data.len() {
            shape = vec![data.len()];
        }
        Self::new(shape, data)
    }
}

/// A kernel result left on the device.
///
/// The texture views its kernel's target: the next invocation of that
/// kernel overwrites it, and releasing the kernel invalidates it.
#[derive(Debug, Clone)]
pub struct Texture {
    context: DeviceContext,
    target: TargetId,
    desc: TargetDesc,
    dimensions: Vec<usize>,
    shape: Vec<usize>,
    float_output: bool,
}

impl Texture {
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// Backing-surface size in texels.
    pub fn texture_size(&self) -> [usize; 2] {
        self.desc.texture_size
    }

    /// Declared axis lengths of the kernel that produced it.
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Shape as an input array, outermost axis first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Reads the texture back to the host.
    pub fn to_output(&self) -> Result<Output> {
        read_back(&self.context, self.target, self.float_output, &self.dimensions)
    }

    /// Reads the texture back as an input array.
    pub fn to_tensor(&self) -> Result<Tensor> {
        let flat = self.to_output()?.flatten();
        Ok(Tensor::new(self.shape.clone(), flat))
    }
}

/// What a kernel invocation returns.
#[derive(Debug, Clone)]
pub enum Value {
    Host(Output),
    Device(Texture),
}

impl Value {
    pub fn as_host(&self) -> Option<&Output> {
        match self {
            Self::Host(o) => Some(o),
            Self::Device(_) => None,
        }
    }

    pub fn texture(&self) -> Option<&Texture> {
        match self {
            Self::Device(t) => Some(t),
            Self::Host(_) => None,
        }
    }

    /// The host result, reading a device-resident value back if needed.
    pub fn into_output(self) -> Result<Output> {
        match self {
            Self::Host(o) => Ok(o),
            Self::Device(t) => t.to_output(),
        }
    }
}

/// Everything a runner decided about a kernel before building it.
pub(crate) struct KernelSpec {
    pub function: KernelFunction,
    pub subs: Vec<SubKernel>,
    pub settings: KernelSettings,
    pub backend: Backend,
    pub validating: bool,
    pub registry: FunctionRegistry,
    pub context: Option<DeviceContext>,
    pub canvas: Option<Surface>,
}

struct KernelState {
    function: KernelFunction,
    subs: Vec<SubKernel>,
    settings: KernelSettings,
    backend: Backend,
    validating: bool,
    registry: FunctionRegistry,
    host: Option<HostProgram>,
    context: Option<DeviceContext>,
    canvas: Option<Surface>,
    program: Option<ProgramId>,
    targets: Vec<TargetId>,
    hold_readback: bool,
    last: Option<Output>,
    dispatches: u64,
}

/// A compiled kernel.
#[derive(Clone)]
pub struct Kernel {
    state: Arc<Mutex<KernelState>>,
}

impl Kernel {
    /// Builds and compiles a kernel. Device kernels without a context take
    /// the process-wide shared one.
    pub(crate) fn build(spec: KernelSpec) -> Result<Self> {
        spec.settings.check_dimensions()?;
        spec.function.check(&spec.registry, &spec.subs)?;

        let mut state = KernelState {
            host: None,
            context: None,
            program: None,
            targets: Vec::new(),
            hold_readback: false,
            last: None,
            dispatches: 0,
            function: spec.function,
            subs: spec.subs,
            settings: spec.settings,
            backend: spec.backend,
            validating: spec.validating,
            registry: spec.registry,
            canvas: spec.canvas,
        };

        if state.backend.is_device() {
            let context = spec.context.unwrap_or_else(DeviceContext::shared);
            context.publish();
            state.context = Some(context);
            state.ensure_program()?;
        } else {
            state.host = Some(HostProgram::new(
                &state.function,
                &state.subs,
                &state.registry,
                &state.settings.constants,
            )?);
            state.context = spec.context;
        }

        log::debug!(
            "built kernel `{}` for {} over {:?}",
            state.function.name(),
            state.backend,
            state.settings.dimensions
        );
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invokes the kernel and returns the root result.
    pub fn run(&self, args: &[Arg]) -> Result<Value> {
        let mut values = self.run_all(args)?;
        Ok(values.swap_remove(0))
    }

    /// Invokes the kernel and returns the root result followed by every
    /// sub-kernel result, all from one dispatch.
    pub fn run_all(&self, args: &[Arg]) -> Result<Vec<Value>> {
        self.lock().invoke(args)
    }

    pub fn name(&self) -> String {
        self.lock().function.name().to_owned()
    }

    /// The backend the kernel was built for.
    pub fn mode(&self) -> Backend {
        self.lock().backend
    }

    /// A copy of the settings the kernel was built with.
    pub fn settings(&self) -> KernelSettings {
        self.lock().settings.clone()
    }

    /// Declared axis lengths.
    pub fn dimensions(&self) -> Vec<usize> {
        self.lock().settings.dimensions.clone()
    }

    /// Logical element count per axis, `[x, y, z]`.
    pub fn thread_dim(&self) -> [usize; 3] {
        self.lock().settings.thread_dim()
    }

    /// Backing-surface size of the output target in texels.
    pub fn texture_size(&self) -> [usize; 2] {
        self.lock().target_desc().texture_size
    }

    pub fn float_output(&self) -> bool {
        self.lock().settings.float_output
    }

    pub fn output_to_device(&self) -> bool {
        self.lock().settings.output_to_device
    }

    pub fn set_output_to_device(&self, on: bool) -> &Self {
        self.lock().settings.output_to_device = on;
        self
    }

    pub fn device_context(&self) -> Option<DeviceContext> {
        self.lock().context.clone()
    }

    /// Moves the kernel to `context`.
    ///
    /// Resources held on the previous context are released; the program and
    /// targets are rebuilt on the new one at the next invocation.
    pub fn set_device_context(&self, context: DeviceContext) -> &Self {
        let mut state = self.lock();
        if state.context.as_ref().is_some_and(|c| c.same(&context)) {
            return self;
        }
        state.release();
        state.context = Some(context);
        self
    }

    pub fn canvas(&self) -> Option<Surface> {
        self.lock().canvas.clone()
    }

    pub fn set_canvas(&self, canvas: Surface) -> &Self {
        self.lock().canvas = Some(canvas);
        self
    }

    /// Number of sub-kernel results each invocation produces.
    pub fn sub_kernels(&self) -> usize {
        self.lock().subs.len()
    }

    /// Frees the device program and targets. The kernel stays usable and
    /// rebuilds them on its next invocation.
    pub fn release(&self) {
        self.lock().release();
    }

    /// True if both handles are the same kernel.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Number of completed invocations.
    pub(crate) fn dispatches(&self) -> u64 {
        self.lock().dispatches
    }

    /// Keeps results on the device regardless of `output_to_device` until
    /// switched off again.
    pub(crate) fn hold_readback(&self, on: bool) {
        self.lock().hold_readback = on;
    }

    /// Reads the root result of the last invocation back to the host.
    pub(crate) fn read_result(&self) -> Result<Output> {
        let state = self.lock();
        let Some(context) = state.context.as_ref().filter(|_| state.backend.is_device()) else {
            return state
                .last
                .clone()
                .ok_or_else(|| Error::device(format!("`{}` has not run yet", state.function.name())));
        };
        let target = state.targets.first().copied().ok_or_else(|| {
            Error::device(format!("`{}` has not been dispatched", state.function.name()))
        })?;
        read_back(
            context,
            target,
            state.settings.float_output,
            &state.settings.dimensions,
        )
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Kernel")
            .field("name", &state.function.name())
            .field("backend", &state.backend)
            .field("dimensions", &state.settings.dimensions)
            .field("subs", &state.subs.len())
            .finish_non_exhaustive()
    }
}

impl KernelState {
    fn target_desc(&self) -> TargetDesc {
        let square = self.backend == Backend::Shader;
        let format = if self.settings.float_output || self.backend == Backend::Compute {
            TargetFormat::Float32
        } else {
            TargetFormat::Rgba8
        };
        TargetDesc {
            texture_size: texture_size(self.settings.elements(), square),
            format,
        }
    }

    fn ensure_program(&mut self) -> Result<(ProgramId, DeviceContext)> {
        let context = self
            .context
            .clone()
            .ok_or_else(|| Error::device("device kernel has no device context"))?;
        if let Some(program) = self.program {
            return Ok((program, context));
        }
        let program = context.device().compile(&CompileRequest {
            function: &self.function,
            subs: &self.subs,
            registry: &self.registry,
            settings: &self.settings,
        })?;
        self.program = Some(program);
        Ok((program, context))
    }

    fn ensure_targets(&mut self, context: &DeviceContext) -> Result<()> {
        let wanted = 1 + self.subs.len();
        if self.targets.len() == wanted {
            return Ok(());
        }
        let desc = self.target_desc();
        let device = context.device();
        for target in self.targets.drain(..) {
            device.release_target(target);
        }
        for _ in 0..wanted {
            self.targets.push(device.create_target(desc)?);
        }
        Ok(())
    }

    fn invoke(&mut self, args: &[Arg]) -> Result<Vec<Value>> {
        if self.validating {
            DispatchCheck {
                function: &self.function,
                args,
                context: self.context.as_ref(),
            }
            .run()?;
        }
        let values = if self.backend.is_device() {
            self.invoke_device(args)
        } else {
            self.invoke_host(args)
        }?;
        self.dispatches += 1;
        Ok(values)
    }

    fn invoke_host(&mut self, args: &[Arg]) -> Result<Vec<Value>> {
        let program = self
            .host
            .as_ref()
            .ok_or_else(|| Error::compile(self.function.name(), "host kernel was not compiled"))?;

        let read: Vec<Option<Tensor>> = args
            .iter()
            .map(|arg| match arg {
                Arg::Device(t) => t.to_tensor().map(Some),
                _ => Ok(None),
            })
            .collect::<Result<_>>()?;
        let inputs: Vec<Input<'_>> = args
            .iter()
            .zip(&read)
            .map(|(arg, read)| match (arg, read) {
                (_, Some(t)) => Input::from_tensor(t),
                (Arg::Array(t), None) => Input::from_tensor(t),
                (Arg::Scalar(v), None) => Input::Scalar(*v),
                (Arg::Device(_), None) => Input::Scalar(0.0),
            })
            .collect();

        let evaluated = evaluate(program, &inputs, self.settings.thread_dim());
        let dims = &self.settings.dimensions;
        let root = Output::from_flat(evaluated.root, dims);
        self.last = Some(root.clone());

        Ok(core::iter::once(root)
            .chain(evaluated.subs.into_iter().map(|s| Output::from_flat(s, dims)))
            .map(Value::Host)
            .collect())
    }

    fn invoke_device(&mut self, args: &[Arg]) -> Result<Vec<Value>> {
        let (program, context) = self.ensure_program()?;
        self.ensure_targets(&context)?;

        // textures from another context cannot be bound directly
        let foreign: Vec<Option<Tensor>> = args
            .iter()
            .map(|arg| match arg {
                Arg::Device(t) if !t.context().same(&context) => t.to_tensor().map(Some),
                _ => Ok(None),
            })
            .collect::<Result<_>>()?;
        let inputs: Vec<DeviceInput<'_>> = args
            .iter()
            .zip(&foreign)
            .map(|(arg, foreign)| match (arg, foreign) {
                (_, Some(t)) => DeviceInput::Array(t),
                (Arg::Array(t), None) => DeviceInput::Array(t),
                (Arg::Scalar(v), None) => DeviceInput::Scalar(*v),
                (Arg::Device(t), None) => DeviceInput::Target {
                    id: t.target,
                    shape: &t.shape,
                },
            })
            .collect();

        context.device().dispatch(
            program,
            self.settings.thread_dim(),
            &inputs,
            &self.targets,
        )?;

        let desc = self.target_desc();
        let dims = &self.settings.dimensions;
        let float_output = self.settings.float_output;
        if self.settings.output_to_device || self.hold_readback {
            return Ok(self
                .targets
                .iter()
                .map(|&target| {
                    Value::Device(Texture {
                        context: context.clone(),
                        target,
                        desc,
                        dimensions: dims.clone(),
                        shape: self.settings.input_shape(),
                        float_output,
                    })
                })
                .collect());
        }

        self.targets
            .iter()
            .map(|&target| read_back(&context, target, float_output, dims).map(Value::Host))
            .collect()
    }

    fn release(&mut self) {
        let Some(context) = self.context.as_ref() else {
            return;
        };
        let device = context.device();
        for target in self.targets.drain(..) {
            device.release_target(target);
        }
        if let Some(program) = self.program.take() {
            device.release_program(program);
        }
    }
}

impl Drop for KernelState {
    fn drop(&mut self) {
        self.release();
    }
}
