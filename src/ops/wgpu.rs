//! Hardware device on top of WGPU.
//!
//! Kernels run here as WGSL compute shaders. The body source attached with
//! [`KernelFunction::with_source`](crate::function::KernelFunction::with_source)
//! is spliced into a generated shader:
//!
//! ```wgsl
//! struct Dims { x: u32, y: u32, z: u32, n: u32 }
//! @group(0) @binding(0) var<uniform> dims: Dims;
//! @group(0) @binding(1) var<storage, read> input_0: array<f32>;   // one per parameter
//! @group(0) @binding(k) var<storage, read_write> output_0: array<f32>;
//! var<private> thread: vec3<u32>;
//! var<private> sub_0: f32;                                          // one per sub-kernel
//! // registered helper sources, sub-kernel sources, kernel source
//! ```
//!
//! The kernel source must define `fn kernel() -> f32`; it reads `thread`,
//! `dims` and `input_i`, and assigns `sub_i` whenever it calls sub-kernel
//! `i`. Scalars are bound as one-element arrays. Targets are storage buffers
//! of the padded texel count, 4 bytes per element in both formats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};

use briny::prelude::*;
use wgpu::util::DeviceExt;

use crate::device::{
    CompileRequest, Device, DeviceInput, ProgramId, TargetDesc, TargetFormat, TargetId,
};
use crate::error::{Error, Result};
use crate::output::{bytes_to_f32, f32_to_bytes};

/// Threads per workgroup of every generated shader.
const WORKGROUP: u32 = 64;

/// Most outputs one generated shader writes.
pub const MAX_TARGETS: usize = 8;

/// Failures acquiring the adapter or device.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("adapter request failed: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

impl From<GpuError> for Error {
    fn from(e: GpuError) -> Self {
        Self::device(e.to_string())
    }
}

/// Generated WGSL, checked before it reaches the driver.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 {
            return Err(ValidationError);
        }
        if !src.contains("fn main") || !src.contains("fn kernel") {
            return Err(ValidationError);
        }
        if src.contains("#include") || src.contains("import ") {
            return Err(ValidationError);
        }
        let forbidden = ["asm", "unsafe", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

struct Program {
    pipeline: wgpu::ComputePipeline,
    inputs: usize,
    outputs: usize,
}

struct Target {
    desc: TargetDesc,
    buffer: wgpu::Buffer,
}

/// A WGPU adapter, device and queue with the programs and targets built on
/// them.
pub struct WgpuDevice {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: AtomicU64,
    programs: Mutex<HashMap<ProgramId, Program>>,
    targets: Mutex<HashMap<TargetId, Target>>,
}

impl core::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WgpuDevice {
    /// Opens the default adapter.
    pub fn new() -> core::result::Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("briny_kernels"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;
        let name = adapter.get_info().name;
        log::debug!("opened wgpu adapter `{name}`");

        Ok(Self {
            name,
            device,
            queue,
            next_id: AtomicU64::new(1),
            programs: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn storage(&self, label: &str, data: &[f32]) -> wgpu::Buffer {
        // zero-sized bindings are rejected
        let contents = if data.is_empty() {
            f32_to_bytes(&[0.0])
        } else {
            f32_to_bytes(data)
        };
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
    }

    /// Copies `len` bytes of `source` into a fresh buffer with `usage`.
    fn copy_of(&self, source: &wgpu::Buffer, len: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        let copy = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("target_copy"),
            size: len,
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("copy_encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &copy, 0, len);
        self.queue.submit(Some(encoder.finish()));
        copy
    }

    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| Error::device(format!("device poll failed: {e}")))
    }
}

/// Builds the full shader for `request`.
fn compose(request: &CompileRequest<'_>, body: &str) -> String {
    use core::fmt::Write as _;

    let inputs = request.function.params().len();
    let outputs = 1 + request.subs.len();
    let mut src = String::from(
        "struct Dims { x: u32, y: u32, z: u32, n: u32 }\n\
         @group(0) @binding(0) var<uniform> dims: Dims;\n",
    );
    for i in 0..inputs {
        let _ = writeln!(
            src,
            "@group(0) @binding({}) var<storage, read> input_{i}: array<f32>;",
            1 + i
        );
    }
    for i in 0..outputs {
        let _ = writeln!(
            src,
            "@group(0) @binding({}) var<storage, read_write> output_{i}: array<f32>;",
            1 + inputs + i
        );
    }
    src.push_str("var<private> thread: vec3<u32>;\n");
    for i in 0..request.subs.len() {
        let _ = writeln!(src, "var<private> sub_{i}: f32;");
    }
    for (name, value) in &request.settings.constants {
        let _ = writeln!(src, "const {name}: f32 = {value:?};");
    }
    for source in request.registry.iter().filter_map(|r| r.function.source()) {
        src.push_str(source);
        src.push('\n');
    }
    for source in request.subs.iter().filter_map(|s| s.function.source()) {
        src.push_str(source);
        src.push('\n');
    }
    src.push_str(body);
    src.push('\n');

    let _ = writeln!(
        src,
        "@compute @workgroup_size({WORKGROUP})\n\
         fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
         \x20   let i = gid.x;\n\
         \x20   if (i >= dims.n) {{ return; }}\n\
         \x20   thread = vec3<u32>(i % dims.x, (i / dims.x) % dims.y, i / (dims.x * dims.y));\n\
         \x20   output_0[i] = kernel();"
    );
    for i in 0..request.subs.len() {
        let _ = writeln!(src, "    output_{}[i] = sub_{i};", i + 1);
    }
    src.push_str("}\n");
    src
}

impl Device for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_targets(&self) -> usize {
        MAX_TARGETS
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<ProgramId> {
        let name = request.function.name();
        let body = request
            .function
            .source()
            .ok_or_else(|| Error::compile(name, "no device source attached"))?;
        let outputs = 1 + request.subs.len();
        if outputs > MAX_TARGETS {
            return Err(Error::compile(
                name,
                format!("{outputs} outputs exceed the limit of {MAX_TARGETS}"),
            ));
        }

        let source = compose(request, body);
        WgslSource(&source)
            .validate()
            .map_err(|_| Error::compile(name, "generated shader failed source checks"))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                cache: None,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::compile(name, e.to_string()));
        }

        let id = self.next_id();
        lock(&self.programs).insert(
            id,
            Program {
                pipeline,
                inputs: request.function.params().len(),
                outputs,
            },
        );
        log::debug!("compiled `{name}` as program {id} on {}", self.name);
        Ok(id)
    }

    fn create_target(&self, desc: TargetDesc) -> Result<TargetId> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("target"),
            size: desc.byte_len() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.next_id();
        lock(&self.targets).insert(id, Target { desc, buffer });
        log::trace!("allocated target {id} ({:?})", desc.texture_size);
        Ok(id)
    }

    fn dispatch(
        &self,
        program: ProgramId,
        thread_dim: [usize; 3],
        inputs: &[DeviceInput<'_>],
        outputs: &[TargetId],
    ) -> Result<()> {
        let programs = lock(&self.programs);
        let program = programs
            .get(&program)
            .ok_or_else(|| Error::device(format!("unknown program {program}")))?;
        if inputs.len() != program.inputs || outputs.len() != program.outputs {
            return Err(Error::device(format!(
                "program takes {} inputs and {} outputs, got {} and {}",
                program.inputs,
                program.outputs,
                inputs.len(),
                outputs.len()
            )));
        }

        let [x, y, z] = thread_dim;
        let n = x * y * z;
        let to_u32 = |v: usize| {
            u32::try_from(v).map_err(|_| Error::device(format!("dimension {v} exceeds u32")))
        };
        let dims = [to_u32(x)?, to_u32(y)?, to_u32(z)?, to_u32(n)?];
        let dims_bytes: Vec<u8> = dims.iter().flat_map(|d| d.to_le_bytes()).collect();
        let dims_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("dims"),
                contents: &dims_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let targets = lock(&self.targets);
        let mut input_buffers = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let buffer = match *input {
                DeviceInput::Scalar(v) => self.storage("scalar", &[v]),
                DeviceInput::Array(t) => self.storage("array", &t.data),
                DeviceInput::Target { id, .. } => {
                    let target = targets
                        .get(&id)
                        .ok_or_else(|| Error::device(format!("input {i}: unknown target {id}")))?;
                    // a buffer cannot be bound read-only and read-write at once
                    self.copy_of(
                        &target.buffer,
                        target.desc.byte_len() as u64,
                        wgpu::BufferUsages::STORAGE,
                    )
                }
            };
            input_buffers.push(buffer);
        }

        let mut output_buffers = Vec::with_capacity(outputs.len());
        for id in outputs {
            let target = targets
                .get(id)
                .ok_or_else(|| Error::device(format!("unknown target {id}")))?;
            if target.desc.texels() < n {
                return Err(Error::device(format!(
                    "target {id} holds {} texels, dispatch writes {n}",
                    target.desc.texels()
                )));
            }
            output_buffers.push(&target.buffer);
        }

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: dims_buffer.as_entire_binding(),
        }];
        let bound = input_buffers
            .iter()
            .chain(output_buffers.iter().copied())
            .enumerate();
        for (i, buffer) in bound {
            entries.push(wgpu::BindGroupEntry {
                binding: u32::try_from(i + 1).map_err(|_| Error::device("too many bindings"))?,
                resource: buffer.as_entire_binding(),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel_bind_group"),
            layout: &program.pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kernel_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kernel_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dims[3].div_ceil(WORKGROUP), 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        self.wait()?;
        log::debug!("dispatched {n} threads into {} targets", outputs.len());
        Ok(())
    }

    fn read_floats(&self, target: TargetId) -> Result<Vec<f32>> {
        let format = lock(&self.targets)
            .get(&target)
            .map(|t| t.desc.format)
            .ok_or_else(|| Error::device(format!("unknown target {target}")))?;
        if format != TargetFormat::Float32 {
            return Err(Error::device(format!(
                "target {target} is not a float target"
            )));
        }
        Ok(bytes_to_f32(&self.read_bytes(target)?))
    }

    fn read_bytes(&self, target: TargetId) -> Result<Vec<u8>> {
        let staging = {
            let targets = lock(&self.targets);
            let t = targets
                .get(&target)
                .ok_or_else(|| Error::device(format!("unknown target {target}")))?;
            self.copy_of(
                &t.buffer,
                t.desc.byte_len() as u64,
                wgpu::BufferUsages::MAP_READ,
            )
        };

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait()?;
        rx.recv()
            .map_err(|_| Error::device("staging map was dropped"))?
            .map_err(|e| Error::device(format!("staging map failed: {e}")))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn release_target(&self, target: TargetId) {
        if let Some(t) = lock(&self.targets).remove(&target) {
            t.buffer.destroy();
            log::trace!("released target {target}");
        }
    }

    fn release_program(&self, program: ProgramId) {
        lock(&self.programs).remove(&program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_checks() {
        let ok = "fn kernel() -> f32 { return 1.0; }\n@compute @workgroup_size(64) fn main() {}";
        assert!(WgslSource(ok).validate().is_ok());
        assert!(WgslSource("fn kernel() -> f32 { return 1.0; }").validate().is_err());
        assert!(WgslSource(&format!("{ok}\n#include <x>")).validate().is_err());
    }
}
