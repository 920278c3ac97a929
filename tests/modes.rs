use briny_kernels::prelude::*;

fn resolve(mode: Mode, caps: Capabilities) -> Backend {
    Gpu::new(GpuConfig::new(mode).capabilities(caps))
        .unwrap()
        .mode()
}

const NO_SURFACE: Capabilities = Capabilities::new(false, true, true);
const SURFACE: Capabilities = Capabilities::new(true, true, true);
const BROKEN_SURFACE: Capabilities = Capabilities::new(true, false, true);

#[test]
fn test_mode_table_without_surface() {
    assert_eq!(resolve(Mode::Cpu, NO_SURFACE), Backend::Cpu);
    assert_eq!(resolve(Mode::Gpu, NO_SURFACE), Backend::Compute);
    assert_eq!(resolve(Mode::OpenCl, NO_SURFACE), Backend::Compute);
    assert_eq!(resolve(Mode::WebGl, NO_SURFACE), Backend::Shader);
    assert_eq!(resolve(Mode::WebGlValidator, NO_SURFACE), Backend::Shader);
}

#[test]
fn test_mode_table_with_surface() {
    assert_eq!(resolve(Mode::Cpu, SURFACE), Backend::Cpu);
    assert_eq!(resolve(Mode::Gpu, SURFACE), Backend::Shader);
    assert_eq!(resolve(Mode::OpenCl, SURFACE), Backend::Compute);
    assert_eq!(resolve(Mode::WebGl, SURFACE), Backend::Shader);
}

#[test]
fn test_surface_without_shader_falls_back_to_cpu() {
    for mode in [Mode::Gpu, Mode::OpenCl, Mode::WebGl, Mode::WebGlValidator] {
        assert_eq!(resolve(mode, BROKEN_SURFACE), Backend::Cpu, "{mode:?}");
    }
    let selection = briny_kernels::backend::select(Mode::WebGl, &BROKEN_SURFACE);
    assert!(selection.fallback);
}

#[test]
fn test_mode_tags() {
    assert_eq!(resolve(Mode::Cpu, SURFACE).as_str(), "cpu");
    assert_eq!(resolve(Mode::WebGl, SURFACE).as_str(), "webgl");
    assert_eq!(resolve(Mode::OpenCl, SURFACE).as_str(), "opencl");
    assert_eq!(resolve(Mode::WebGlValidator, SURFACE).to_string(), "webgl");
}

#[test]
fn test_validator_builds_validating_runner() {
    let gpu = Gpu::new(GpuConfig::new(Mode::WebGlValidator).capabilities(NO_SURFACE)).unwrap();
    assert!(gpu.runner().is_validating());

    let gpu = Gpu::new(GpuConfig::new(Mode::WebGl).capabilities(NO_SURFACE)).unwrap();
    assert!(!gpu.runner().is_validating());
}

#[test]
fn test_mode_strings() {
    assert_eq!(GpuConfig::from_mode_str("GPU").unwrap().mode, Mode::Gpu);
    assert_eq!(GpuConfig::from_mode_str("webgl-validator").unwrap().mode, Mode::WebGlValidator);
    assert_eq!(GpuConfig::from_mode_str("native").unwrap().mode, Mode::OpenCl);
    assert!(matches!(
        Gpu::with_mode("cuda"),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_capability_probe_is_stable() {
    assert_eq!(Capabilities::detect(), Capabilities::detect());
    assert_eq!(Gpu::is_supported(), Capabilities::detect().shader);
}

#[test]
fn test_device_without_targets_is_rejected() {
    use briny_kernels::ops::soft::SoftwareDevice;

    let config = GpuConfig::new(Mode::OpenCl)
        .device(DeviceContext::new(SoftwareDevice::with_max_targets(0)));
    assert!(matches!(Gpu::new(config), Err(Error::Configuration(_))));

    let one = GpuConfig::new(Mode::OpenCl)
        .device(DeviceContext::new(SoftwareDevice::with_max_targets(1)));
    assert!(Gpu::new(one).is_ok());
}

#[test]
fn test_canvas_and_context_are_exposed() {
    let canvas = Surface::new("main");
    let context = DeviceContext::software();
    let gpu = Gpu::new(
        GpuConfig::new(Mode::WebGl)
            .capabilities(SURFACE)
            .canvas(canvas.clone())
            .device(context.clone()),
    )
    .unwrap();
    assert_eq!(gpu.canvas(), Some(canvas));
    assert_eq!(gpu.device_context(), Some(context));
}
