//! Kernels built without an explicit device bind to the process-wide context.
//! Host closures only run on the software device, so these tests are skipped
//! when the hardware device is compiled in.
#![cfg(not(feature = "wgpu"))]

use briny_kernels::prelude::*;

fn headless(mode: Mode) -> Gpu {
    Gpu::new(GpuConfig::new(mode).capabilities(Capabilities::headless())).unwrap()
}

fn ones() -> KernelFunction {
    KernelFunction::new("ones", &[], |_, _| 1.0)
}

#[test]
fn test_kernels_adopt_the_shared_context() {
    let mut gpu = headless(Mode::OpenCl);
    assert!(gpu.device_context().is_none());

    let a = gpu.create_kernel(ones(), None).unwrap();
    let b = gpu.create_kernel(ones(), None).unwrap();
    assert_eq!(gpu.device_context(), a.device_context());
    assert_eq!(a.device_context(), b.device_context());
    assert_eq!(gpu.runner().context(), a.device_context().as_ref());
    assert_eq!(a.device_context(), Some(DeviceContext::shared()));
}

#[test]
fn test_separate_instances_share_one_context() {
    let mut first = headless(Mode::WebGl);
    let mut second = headless(Mode::OpenCl);
    let a = first.create_kernel(ones(), None).unwrap();
    let b = second.create_kernel(ones(), None).unwrap();
    assert_eq!(a.device_context(), b.device_context());
}

#[test]
fn test_host_kernels_have_no_context() {
    let mut gpu = headless(Mode::Cpu);
    let k = gpu.create_kernel(ones(), None).unwrap();
    assert!(k.device_context().is_none());
    assert!(gpu.device_context().is_none());
}

#[test]
fn test_chain_adopts_first_kernel_context() {
    let mut gpu = headless(Mode::WebGl);
    let a = gpu.create_kernel(ones(), None).unwrap();
    let b = gpu.create_kernel(ones(), None).unwrap();
    let moved = DeviceContext::software();
    a.set_device_context(moved.clone());

    let chain = gpu
        .combine_kernels(
            vec![a.clone(), b.clone()],
            1,
            combined(|_| Ok(Value::Host(Output::Flat(Vec::new())))),
        )
        .unwrap();
    let chain = chain.as_chain().unwrap();
    assert_eq!(chain.context(), &moved);
    assert_eq!(b.device_context(), Some(moved));
    assert!(a.output_to_device());
    assert!(!b.output_to_device());
}
