//! # `briny_kernels`
//!
//! Numeric compute kernels over a 1 to 3 axis index space, run on
//! interchangeable backends: evaluated on the host, dispatched as shader
//! programs, or dispatched on a native compute device. Backend selection and
//! device plumbing stay behind [`Gpu`].
//!
//! ## Features
//!
//! - **Mode resolution**: a requested [`Mode`] is resolved once against the
//!   host's [`Capabilities`], falling back to the host with a warning
//!   instead of failing.
//! - **Kernel maps**: one dispatch computes a root result plus one result
//!   per bound sub-kernel.
//! - **Kernel chains**: several kernels composed so intermediates stay on
//!   the device and only the final result is read back (once, truncated to
//!   its logical size and reshaped along its axes).
//! - **Helper registry**: functions added with [`Gpu::add_function`] are
//!   callable by name from every kernel built afterwards.
//! - **GPU acceleration**: optional `wgpu` feature; without it a software
//!   device serves the device backends.
//!
//! ## Example
//!
//! ```rust
//! use briny_kernels::prelude::*;
//!
//! let mut gpu = Gpu::new(GpuConfig::new(Mode::Cpu))?;
//! gpu.add_function(Function::new("square", 1, |a| a[0] * a[0]), None, None)?;
//! let k = gpu.create_kernel(
//!     KernelFunction::new("sq", &["a"], |t, args| t.call("square", &[args[0].get(t.x)]))
//!         .uses(&["square"]),
//!     Some(KernelSettings::new().dimensions(&[4])),
//! )?;
//! let out = k.run(&[vec![1.0, 2.0, 3.0, 4.0].into()])?.into_output()?;
//! assert_eq!(out.flatten(), vec![1.0, 4.0, 9.0, 16.0]);
//! # Ok::<(), briny_kernels::Error>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
#![deny(unsafe_code)]
#![forbid(unused_must_use)]

pub mod approx;
pub mod backend;
pub mod chain;
pub mod config;
pub mod device;
pub mod error;
pub mod function;
pub mod gpu;
pub mod kernel;
pub mod map;
pub mod ops;
pub mod output;
pub mod probe;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod tensors;
mod validate;

pub use backend::{Backend, Mode};
pub use chain::{Combined, CombinedFn, KernelChain, combined};
pub use config::GpuConfig;
pub use error::{ArgumentError, Error, Result};
pub use gpu::Gpu;
pub use kernel::{Arg, Kernel, Texture, Value};
pub use map::{KernelMap, MapOutput};
pub use output::Output;
pub use probe::Capabilities;

/// Everything needed to build and run kernels.
pub mod prelude {
    pub use crate::backend::{Backend, Mode};
    pub use crate::chain::{Combined, CombinedFn, combined};
    pub use crate::config::GpuConfig;
    pub use crate::device::{DeviceContext, Surface};
    pub use crate::error::{ArgumentError, Error, Result};
    pub use crate::function::{Function, Input, KernelFunction, SubKernels, Thread, ValueType};
    pub use crate::gpu::Gpu;
    pub use crate::kernel::{Arg, Kernel, Texture, Value};
    pub use crate::map::{KernelMap, MapOutput};
    pub use crate::output::Output;
    pub use crate::probe::Capabilities;
    pub use crate::settings::KernelSettings;
    pub use crate::tensor;
    pub use crate::tensors::Tensor;
}
