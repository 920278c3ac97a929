#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use briny_kernels::device::{
    CompileRequest, Device, DeviceContext, DeviceInput, ProgramId, TargetDesc, TargetId,
};
use briny_kernels::ops::soft::SoftwareDevice;

/// Software device that counts readbacks and dispatches.
#[derive(Debug, Clone)]
pub struct Counting {
    pub inner: Arc<SoftwareDevice>,
    reads: Arc<AtomicUsize>,
    dispatches: Arc<AtomicUsize>,
}

impl Counting {
    pub fn new(inner: SoftwareDevice) -> Self {
        Self {
            inner: Arc::new(inner),
            reads: Arc::default(),
            dispatches: Arc::default(),
        }
    }

    /// A context over a fresh counting device, plus a handle to its counters.
    pub fn context() -> (DeviceContext, Self) {
        let device = Self::new(SoftwareDevice::new());
        (DeviceContext::new(device.clone()), device)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }
}

impl Device for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    fn max_targets(&self) -> usize {
        self.inner.max_targets()
    }

    fn compile(&self, request: &CompileRequest<'_>) -> briny_kernels::Result<ProgramId> {
        self.inner.compile(request)
    }

    fn create_target(&self, desc: TargetDesc) -> briny_kernels::Result<TargetId> {
        self.inner.create_target(desc)
    }

    fn dispatch(
        &self,
        program: ProgramId,
        thread_dim: [usize; 3],
        inputs: &[DeviceInput<'_>],
        outputs: &[TargetId],
    ) -> briny_kernels::Result<()> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatch(program, thread_dim, inputs, outputs)
    }

    fn read_floats(&self, target: TargetId) -> briny_kernels::Result<Vec<f32>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_floats(target)
    }

    fn read_bytes(&self, target: TargetId) -> briny_kernels::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_bytes(target)
    }

    fn release_target(&self, target: TargetId) {
        self.inner.release_target(target);
    }

    fn release_program(&self, program: ProgramId) {
        self.inner.release_program(program);
    }
}
