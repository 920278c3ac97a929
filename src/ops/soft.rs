//! Software device.
//!
//! Emulates a device in host memory: targets are padded RGBA8 or R32F
//! surfaces stored as bytes, programs are host programs, and a dispatch
//! evaluates the program and writes every output target in one go. It is
//! the device every device backend falls back to when no hardware device is
//! compiled in or available, and it behaves like one as far as the runner is
//! concerned: results stay in targets until read back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::{
    CompileRequest, Device, DeviceInput, ProgramId, TargetDesc, TargetFormat, TargetId,
};
use crate::error::{Error, Result};
use crate::function::Input;
use crate::ops::cpu::{HostProgram, evaluate};
use crate::output::{bytes_to_f32, f32_to_bytes};
use crate::tensors::Tensor;

/// Default number of targets one dispatch may write.
pub const MAX_TARGETS: usize = 8;

struct SoftTarget {
    desc: TargetDesc,
    bytes: Vec<u8>,
}

/// A host-memory device.
pub struct SoftwareDevice {
    name: String,
    max_targets: usize,
    next_id: AtomicU64,
    programs: Mutex<HashMap<ProgramId, HostProgram>>,
    targets: Mutex<HashMap<TargetId, SoftTarget>>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_max_targets(MAX_TARGETS)
    }

    /// A device that can write at most `max_targets` targets per dispatch.
    ///
    /// A limit of 0 yields a device no [`Gpu`](crate::gpu::Gpu) accepts.
    pub fn with_max_targets(max_targets: usize) -> Self {
        Self {
            name: "software".to_owned(),
            max_targets,
            next_id: AtomicU64::new(1),
            programs: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live targets.
    pub fn live_targets(&self) -> usize {
        self.targets().len()
    }

    /// Number of live programs.
    pub fn live_programs(&self) -> usize {
        lock(&self.programs).len()
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn targets(&self) -> MutexGuard<'_, HashMap<TargetId, SoftTarget>> {
        lock(&self.targets)
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("max_targets", &self.max_targets)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unknown_target(id: TargetId) -> Error {
    Error::device(format!("unknown target {id}"))
}

impl Device for SoftwareDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_targets(&self) -> usize {
        self.max_targets
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<ProgramId> {
        let program = HostProgram::new(
            request.function,
            request.subs,
            request.registry,
            &request.settings.constants,
        )?;
        let id = self.next();
        log::debug!("compiled `{}` as program {id}", program.name);
        lock(&self.programs).insert(id, program);
        Ok(id)
    }

    fn create_target(&self, desc: TargetDesc) -> Result<TargetId> {
        let id = self.next();
        log::trace!("allocating target {id}: {desc:?}");
        self.targets().insert(
            id,
            SoftTarget {
                desc,
                bytes: vec![0; desc.byte_len()],
            },
        );
        Ok(id)
    }

    fn dispatch(
        &self,
        program: ProgramId,
        thread_dim: [usize; 3],
        inputs: &[DeviceInput<'_>],
        outputs: &[TargetId],
    ) -> Result<()> {
        let program = lock(&self.programs)
            .get(&program)
            .cloned()
            .ok_or_else(|| Error::device(format!("unknown program {program}")))?;

        if outputs.len() != program.outputs() {
            return Err(Error::device(format!(
                "`{}` writes {} targets but {} were bound",
                program.name,
                program.outputs(),
                outputs.len()
            )));
        }
        if outputs.len() > self.max_targets {
            return Err(Error::device(format!(
                "{} targets exceed the device limit of {}",
                outputs.len(),
                self.max_targets
            )));
        }

        // device-resident inputs are decoded before any output is written,
        // so a program may read the target it overwrites
        let resolved: Vec<Option<Tensor>> = {
            let targets = self.targets();
            inputs
                .iter()
                .map(|input| match input {
                    DeviceInput::Target { id, shape } => {
                        let target = targets.get(id).ok_or_else(|| unknown_target(*id))?;
                        let mut data = bytes_to_f32(&target.bytes);
                        data.resize(shape.iter().product(), 0.0);
                        Ok(Some(Tensor::new(shape.to_vec(), data)))
                    }
                    _ => Ok(None),
                })
                .collect::<Result<_>>()?
        };
        let views: Vec<Input<'_>> = inputs
            .iter()
            .zip(&resolved)
            .map(|(input, decoded)| match (input, decoded) {
                (_, Some(t)) => Input::from_tensor(t),
                (DeviceInput::Array(t), None) => Input::from_tensor(t),
                (DeviceInput::Scalar(v), None) => Input::Scalar(*v),
                (DeviceInput::Target { .. }, None) => Input::Scalar(0.0),
            })
            .collect();

        let evaluated = evaluate(&program, &views, thread_dim);

        let mut targets = self.targets();
        let results = core::iter::once(&evaluated.root).chain(&evaluated.subs);
        for (id, values) in outputs.iter().zip(results) {
            let target = targets.get_mut(id).ok_or_else(|| unknown_target(*id))?;
            let bytes = f32_to_bytes(values);
            if bytes.len() > target.bytes.len() {
                return Err(Error::device(format!(
                    "{} results do not fit target {id} ({:?})",
                    values.len(),
                    target.desc.texture_size
                )));
            }
            target.bytes[..bytes.len()].copy_from_slice(&bytes);
        }
        log::debug!(
            "dispatched `{}` over {thread_dim:?} into {} target(s)",
            program.name,
            outputs.len()
        );
        Ok(())
    }

    fn read_floats(&self, target: TargetId) -> Result<Vec<f32>> {
        let targets = self.targets();
        let target_ref = targets.get(&target).ok_or_else(|| unknown_target(target))?;
        if target_ref.desc.format != TargetFormat::Float32 {
            return Err(Error::device(format!(
                "target {target} is {:?}; only float targets can be read as floats",
                target_ref.desc.format
            )));
        }
        Ok(bytes_to_f32(&target_ref.bytes))
    }

    fn read_bytes(&self, target: TargetId) -> Result<Vec<u8>> {
        self.targets()
            .get(&target)
            .map(|t| t.bytes.clone())
            .ok_or_else(|| unknown_target(target))
    }

    fn release_target(&self, target: TargetId) {
        if self.targets().remove(&target).is_some() {
            log::trace!("released target {target}");
        }
    }

    fn release_program(&self, program: ProgramId) {
        lock(&self.programs).remove(&program);
    }
}
