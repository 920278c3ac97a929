//! Kernel chains: several kernels combined into one call with a single
//! readback.
//!
//! The caller supplies the kernels and a combined function that invokes them
//! in whatever order its body implies, passing results along as arguments.
//! Every kernel but the designated final one is switched to device-resident
//! output, so intermediates never leave the device; the final kernel's
//! target is read back exactly once per call, truncated to its logical size
//! and reshaped along its axes.

use core::fmt;
use std::sync::Arc;

use crate::device::{DeviceContext, Surface};
use crate::error::{Error, Result};
use crate::kernel::{Arg, Kernel, Value};
use crate::output::Output;

/// The caller's combined computation.
pub type CombinedFn = Arc<dyn Fn(&[Arg]) -> Result<Value> + Send + Sync>;

/// Wraps a closure as a [`CombinedFn`].
pub fn combined<F>(f: F) -> CombinedFn
where
    F: Fn(&[Arg]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What combining kernels produced.
#[derive(Clone)]
pub enum Combined {
    /// Host mode: the combined function itself, unwrapped.
    Host(CombinedFn),
    /// Device mode: a chain with one terminal readback.
    Chain(KernelChain),
}

impl Combined {
    /// Runs the combination and returns the host result.
    pub fn call(&self, args: &[Arg]) -> Result<Output> {
        match self {
            Self::Host(f) => f(args)?.into_output(),
            Self::Chain(chain) => chain.call(args),
        }
    }

    pub fn as_host(&self) -> Option<&CombinedFn> {
        match self {
            Self::Host(f) => Some(f),
            Self::Chain(_) => None,
        }
    }

    pub fn as_chain(&self) -> Option<&KernelChain> {
        match self {
            Self::Chain(c) => Some(c),
            Self::Host(_) => None,
        }
    }
}

impl fmt::Debug for Combined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(_) => f.write_str("Combined::Host(..)"),
            Self::Chain(c) => f.debug_tuple("Combined::Chain").field(c).finish(),
        }
    }
}

/// Kernels sharing one device context, with a single final readback.
#[derive(Clone)]
pub struct KernelChain {
    kernels: Vec<Kernel>,
    final_index: usize,
    combined: CombinedFn,
    context: DeviceContext,
    canvas: Option<Surface>,
}

impl KernelChain {
    /// Binds every kernel to `context` and keeps all but the final one's
    /// results on the device.
    pub(crate) fn new(
        kernels: Vec<Kernel>,
        final_index: usize,
        combined: CombinedFn,
        context: DeviceContext,
        canvas: Option<Surface>,
    ) -> Self {
        for (i, kernel) in kernels.iter().enumerate() {
            kernel.set_device_context(context.clone());
            if i != final_index {
                kernel.set_output_to_device(true);
            }
        }
        log::debug!(
            "chained {} kernels, final `{}`",
            kernels.len(),
            kernels[final_index].name()
        );
        Self {
            kernels,
            final_index,
            combined,
            context,
            canvas,
        }
    }

    /// Runs the combined function, then reads the final kernel's target.
    ///
    /// Fails if the combined function never invoked the final kernel, since
    /// its target would still hold an earlier call's result.
    pub fn call(&self, args: &[Arg]) -> Result<Output> {
        let last = self.final_kernel();
        let before = last.dispatches();
        let held = ReadbackHold::new(last);
        (self.combined)(args)?;
        drop(held);
        if last.dispatches() == before {
            return Err(Error::device(format!(
                "combined call never ran final kernel `{}`",
                last.name()
            )));
        }
        last.read_result()
    }

    /// The kernel whose output the chain returns.
    pub fn final_kernel(&self) -> &Kernel {
        &self.kernels[self.final_index]
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    pub fn canvas(&self) -> Option<&Surface> {
        self.canvas.as_ref()
    }

    /// Frees the device resources of every chained kernel.
    pub fn release(&self) {
        for kernel in &self.kernels {
            kernel.release();
        }
    }
}

impl fmt::Debug for KernelChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelChain")
            .field("kernels", &self.kernels)
            .field("final_index", &self.final_index)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Keeps a kernel's result on the device while alive.
struct ReadbackHold<'a>(&'a Kernel);

impl<'a> ReadbackHold<'a> {
    fn new(kernel: &'a Kernel) -> Self {
        kernel.hold_readback(true);
        Self(kernel)
    }
}

impl Drop for ReadbackHold<'_> {
    fn drop(&mut self) {
        self.0.hold_readback(false);
    }
}
