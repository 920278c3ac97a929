//! Device-context handles, targets and the readback path.
//!
//! A [`Device`] owns compiled programs and output targets and hands out
//! plain ids for both; a [`DeviceContext`] is the shared, cloneable handle
//! kernels, runners and the [`Gpu`](crate::gpu::Gpu) pass around. Two
//! handles are the same context exactly when they point at the same device.
//!
//! Targets are sized to a backing surface (`texture_size`) that may be
//! larger than the logical element count. Shader-style targets store one
//! element per RGBA8 texel, float targets one `f32` per texel; either way an
//! element is 4 bytes, which is what makes raw byte readback reinterpretable.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::function::{KernelFunction, SubKernel};
use crate::output::{Output, bytes_to_f32};
use crate::registry::FunctionRegistry;
use crate::settings::KernelSettings;
use crate::tensors::Tensor;

/// Id of a compiled program on a device.
pub type ProgramId = u64;

/// Id of an output target on a device.
pub type TargetId = u64;

/// Pixel format of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    /// 8 bits per channel, one element per texel.
    Rgba8,
    /// One 32-bit float per texel.
    Float32,
}

/// Shape and format of a target's backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    /// Backing-surface size in texels, `[width, height]`.
    pub texture_size: [usize; 2],
    pub format: TargetFormat,
}

impl TargetDesc {
    /// Number of texels backing the target.
    pub const fn texels(&self) -> usize {
        self.texture_size[0] * self.texture_size[1]
    }

    /// Size of the backing storage in bytes.
    pub const fn byte_len(&self) -> usize {
        self.texels() * 4
    }
}

/// Everything a device needs to build a program.
pub struct CompileRequest<'a> {
    pub function: &'a KernelFunction,
    pub subs: &'a [SubKernel],
    pub registry: &'a FunctionRegistry,
    pub settings: &'a KernelSettings,
}

/// A kernel argument as a device sees it.
#[derive(Debug, Clone, Copy)]
pub enum DeviceInput<'a> {
    Scalar(f32),
    Array(&'a Tensor),
    /// A device-resident result, with its logical shape (outermost axis first).
    Target { id: TargetId, shape: &'a [usize] },
}

/// A compute device that runs kernel programs.
pub trait Device: Send + Sync + fmt::Debug {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Most targets one dispatch can write.
    fn max_targets(&self) -> usize;

    /// Builds a program for `request`.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<ProgramId>;

    /// Allocates a zeroed target.
    fn create_target(&self, desc: TargetDesc) -> Result<TargetId>;

    /// Runs `program` over `thread_dim`, writing the root result to
    /// `outputs[0]` and sub-kernel results to the following targets.
    ///
    /// Returns once the device confirms completion.
    fn dispatch(
        &self,
        program: ProgramId,
        thread_dim: [usize; 3],
        inputs: &[DeviceInput<'_>],
        outputs: &[TargetId],
    ) -> Result<()>;

    /// Reads a float target natively.
    fn read_floats(&self, target: TargetId) -> Result<Vec<f32>>;

    /// Reads the raw bytes of any target.
    fn read_bytes(&self, target: TargetId) -> Result<Vec<u8>>;

    fn release_target(&self, target: TargetId);

    fn release_program(&self, program: ProgramId);
}

/// Shared handle to a [`Device`].
#[derive(Clone)]
pub struct DeviceContext(Arc<dyn Device>);

lazy_static::lazy_static! {
    static ref SHARED_CONTEXT: Mutex<Option<DeviceContext>> = Mutex::new(None);
}

impl DeviceContext {
    /// Wraps a device in a new context.
    pub fn new(device: impl Device + 'static) -> Self {
        Self(Arc::new(device))
    }

    /// A fresh software device context.
    pub fn software() -> Self {
        Self::new(crate::ops::soft::SoftwareDevice::new())
    }

    /// The best device this build can open: a wgpu adapter when the `wgpu`
    /// feature is on and one is available, otherwise the software device.
    pub fn open_default() -> Self {
        #[cfg(feature = "wgpu")]
        match crate::ops::wgpu::WgpuDevice::new() {
            Ok(device) => return Self::new(device),
            Err(e) => log::warn!("no usable wgpu adapter ({e}); using the software device"),
        }
        Self::software()
    }

    /// The process-wide context established by the first device kernel
    /// built, opening (and publishing) the default device if there is none.
    pub fn shared() -> Self {
        let mut shared = SHARED_CONTEXT
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        shared.get_or_insert_with(Self::open_default).clone()
    }

    /// Publishes `self` as the process-wide context unless one exists.
    pub(crate) fn publish(&self) {
        let mut shared = SHARED_CONTEXT
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if shared.is_none() {
            *shared = Some(self.clone());
        }
    }

    /// The device behind this handle.
    pub fn device(&self) -> &dyn Device {
        &*self.0
    }

    /// True if both handles point at the same device.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for DeviceContext {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceContext").field(&self.0.name()).finish()
    }
}

/// Opaque handle to a display surface (the thing a shader backend draws on).
///
/// Surfaces are acquired elsewhere; kernels and runners only carry them.
#[derive(Debug, Clone)]
pub struct Surface {
    id: u64,
    label: Arc<str>,
}

static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);

impl Surface {
    pub fn new(label: &str) -> Self {
        Self {
            id: NEXT_SURFACE.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Surface {}

/// Backing-surface size for `elements` values.
///
/// Shader targets are laid out as a near-square texture, which pads the
/// element count up; compute targets are exact one-row buffers.
pub fn texture_size(elements: usize, square: bool) -> [usize; 2] {
    let n = elements.max(1);
    if !square {
        return [n, 1];
    }
    let mut width = n.isqrt();
    if width * width < n {
        width += 1;
    }
    [width, n.div_ceil(width)]
}

/// Reads `target` back to the host as a result shaped by `dims`.
///
/// Float targets are read natively; everything else comes back as raw bytes
/// reinterpreted as `f32`s. Padding past the logical element count is
/// dropped before reshaping.
pub fn read_back(
    context: &DeviceContext,
    target: TargetId,
    float_output: bool,
    dims: &[usize],
) -> Result<Output> {
    let device = context.device();
    let flat = if float_output {
        device.read_floats(target)?
    } else {
        bytes_to_f32(&device.read_bytes(target)?)
    };
    log::debug!(
        "read back {} texels from target {target} on {}",
        flat.len(),
        device.name()
    );
    Ok(Output::from_flat(flat, dims))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_textures_pad() {
        assert_eq!(texture_size(4, true), [2, 2]);
        assert_eq!(texture_size(6, true), [3, 2]);
        assert_eq!(texture_size(10, true), [4, 3]);
        assert_eq!(texture_size(6, false), [6, 1]);
    }

    #[test]
    fn contexts_compare_by_identity() {
        let a = DeviceContext::software();
        let b = DeviceContext::software();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
