//! # Kernel execution
//!
//! - [`cpu`] evaluates kernel bodies on the host, in parallel over output
//!   indices. Host kernels use it directly and the software device runs on
//!   top of it.
//! - [`soft`] is a host-memory [`Device`](crate::device::Device) that
//!   emulates padded shader targets and float buffers.
//! - [`wgpu`] *(feature `wgpu`)* runs kernels as WGSL compute shaders.

pub mod cpu;
pub mod soft;
#[cfg(feature = "wgpu")]
pub mod wgpu;
