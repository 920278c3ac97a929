mod common;

use briny_kernels::approx::approx_eq;
use briny_kernels::prelude::*;
use common::Counting;
use rand::Rng;

fn device_gpu(mode: Mode) -> (Gpu, Counting) {
    let (context, device) = Counting::context();
    let gpu = Gpu::new(
        GpuConfig::new(mode)
            .capabilities(Capabilities::headless())
            .device(context),
    )
    .unwrap();
    (gpu, device)
}

fn index_kernel() -> KernelFunction {
    KernelFunction::new("index", &[], |t, _| {
        let [w, h, _] = t.output();
        (t.x + w * t.y + w * h * t.z) as f32
    })
}

fn echo_kernel() -> KernelFunction {
    KernelFunction::new("echo", &["a"], |t, args| args[0].get(t.x))
}

#[test]
fn test_rejects_missing_function() {
    let mut gpu = Gpu::new(GpuConfig::new(Mode::Cpu)).unwrap();
    let err = gpu.create_kernel(KernelFunction::default(), None).unwrap_err();
    assert!(matches!(err, Error::Argument(ArgumentError::MissingFunction)));

    let err = gpu
        .create_kernel(KernelFunction::declared("nothing", &["a"]), None)
        .unwrap_err();
    assert!(matches!(err, Error::Argument(ArgumentError::NotCallable(name)) if name == "nothing"));
}

#[test]
fn test_rejects_unknown_helper() {
    let (mut gpu, _) = device_gpu(Mode::OpenCl);
    let err = gpu
        .create_kernel(echo_kernel().uses(&["missing"]), None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Argument(ArgumentError::UnknownFunction { function, .. }) if function == "missing"
    ));
}

#[test]
fn test_rejects_bad_dimensions() {
    let mut gpu = Gpu::new(GpuConfig::new(Mode::Cpu)).unwrap();
    let cases: [&[usize]; 3] = [&[], &[0], &[2, 2, 2, 2]];
    for dims in cases {
        let err = gpu
            .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(dims)))
            .unwrap_err();
        assert!(matches!(err, Error::Argument(ArgumentError::InvalidDimensions(_))));
    }
}

#[test]
fn test_default_dimensions() {
    let mut gpu = Gpu::new(GpuConfig::new(Mode::Cpu)).unwrap();
    let k = gpu.create_kernel(index_kernel(), None).unwrap();
    assert_eq!(k.dimensions(), vec![1024]);
    assert_eq!(k.thread_dim(), [1024, 1, 1]);
    let out = k.run(&[]).unwrap().into_output().unwrap();
    assert_eq!(out.shape(), vec![1024]);
}

#[test]
fn test_two_axis_reshape() {
    for mode in [Mode::Cpu, Mode::WebGl, Mode::OpenCl] {
        let (mut gpu, _) = device_gpu(mode);
        let k = gpu
            .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[2, 3])))
            .unwrap();
        let out = k.run(&[]).unwrap().into_output().unwrap();
        assert_eq!(
            out,
            Output::Rows(vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]]),
            "{mode:?}"
        );
    }
}

#[test]
fn test_three_axis_reshape() {
    let (mut gpu, _) = device_gpu(Mode::WebGl);
    let k = gpu
        .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[2, 2, 2])))
        .unwrap();
    let out = k.run(&[]).unwrap().into_output().unwrap();
    assert_eq!(
        out,
        Output::Slices(vec![
            vec![vec![0.0, 1.0], vec![2.0, 3.0]],
            vec![vec![4.0, 5.0], vec![6.0, 7.0]],
        ])
    );
}

#[test]
fn test_texture_sizes_follow_backend() {
    let (mut gpu, _) = device_gpu(Mode::WebGl);
    let k = gpu
        .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[2, 3])))
        .unwrap();
    assert_eq!(k.texture_size(), [3, 2]);

    let (mut gpu, _) = device_gpu(Mode::OpenCl);
    let k = gpu
        .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[2, 3])))
        .unwrap();
    assert_eq!(k.texture_size(), [6, 1]);
}

#[test]
fn test_byte_and_float_readback_agree() {
    let values = vec![0.0, 1.0, -1.0, 1e30];
    for float_output in [false, true] {
        let (mut gpu, _) = device_gpu(Mode::WebGl);
        let k = gpu
            .create_kernel(
                echo_kernel(),
                Some(
                    KernelSettings::new()
                        .dimensions(&[4])
                        .float_output(float_output),
                ),
            )
            .unwrap();
        assert_eq!(k.float_output(), float_output);
        let out = k.run(&[values.clone().into()]).unwrap().into_output().unwrap();
        assert_eq!(out, Output::Flat(values.clone()));
    }
}

#[test]
fn test_padding_is_dropped() {
    let (mut gpu, _) = device_gpu(Mode::WebGl);
    let k = gpu
        .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[5])))
        .unwrap();
    assert_eq!(k.texture_size(), [3, 2]);
    let out = k.run(&[]).unwrap().into_output().unwrap();
    assert_eq!(out, Output::Flat(vec![0.0, 1.0, 2.0, 3.0, 4.0]));
}

#[test]
fn test_backends_agree_within_tolerance() {
    let mut rng = rand::rng();
    let a: Vec<f32> = (0..64).map(|_| rng.random_range(-10.0..10.0)).collect();
    let b: Vec<f32> = (0..64).map(|_| rng.random_range(-10.0..10.0)).collect();
    let f = || {
        KernelFunction::new("fma", &["a", "b", "c"], |t, args| {
            args[0].get(t.x).mul_add(args[1].get(t.x), args[2].value())
        })
    };
    let args = [a.into(), b.into(), Arg::Scalar(0.5)];

    let mut results = Vec::new();
    for mode in [Mode::Cpu, Mode::WebGl, Mode::OpenCl] {
        let (mut gpu, _) = device_gpu(mode);
        let k = gpu
            .create_kernel(f(), Some(KernelSettings::new().dimensions(&[64])))
            .unwrap();
        results.push(k.run(&args).unwrap().into_output().unwrap());
    }
    assert!(approx_eq(&results[0], &results[1]));
    assert!(approx_eq(&results[0], &results[2]));
}

#[test]
fn test_output_to_device_keeps_texture() {
    let (mut gpu, device) = device_gpu(Mode::OpenCl);
    let k = gpu
        .create_kernel(
            index_kernel(),
            Some(KernelSettings::new().dimensions(&[4]).output_to_device(true)),
        )
        .unwrap();
    assert!(k.output_to_device());

    let value = k.run(&[]).unwrap();
    assert_eq!(device.reads(), 0);
    let texture = value.texture().unwrap().clone();
    assert_eq!(texture.dimensions(), &[4]);
    assert_eq!(texture.context(), &gpu.device_context().unwrap());

    let double = gpu
        .create_kernel(
            KernelFunction::new("double", &["a"], |t, args| args[0].get(t.x) * 2.0),
            Some(KernelSettings::new().dimensions(&[4])),
        )
        .unwrap();
    let out = double.run(&[texture.clone().into()]).unwrap();
    assert_eq!(device.reads(), 1);
    assert_eq!(out.as_host(), Some(&Output::Flat(vec![0.0, 2.0, 4.0, 6.0])));

    assert_eq!(
        texture.to_output().unwrap(),
        Output::Flat(vec![0.0, 1.0, 2.0, 3.0])
    );
}

#[test]
fn test_host_kernel_reads_textures() {
    let (mut shader, _) = device_gpu(Mode::WebGl);
    let k = shader
        .create_kernel(
            index_kernel(),
            Some(KernelSettings::new().dimensions(&[3]).output_to_device(true)),
        )
        .unwrap();
    let texture = k.run(&[]).unwrap();

    let mut host = Gpu::new(GpuConfig::new(Mode::Cpu)).unwrap();
    let echo = host
        .create_kernel(echo_kernel(), Some(KernelSettings::new().dimensions(&[3])))
        .unwrap();
    let out = echo.run(&[texture.into()]).unwrap();
    assert_eq!(out.as_host(), Some(&Output::Flat(vec![0.0, 1.0, 2.0])));
}

#[test]
fn test_validating_runner_checks_arguments() {
    let (mut gpu, device) = device_gpu(Mode::WebGlValidator);
    let k = gpu
        .create_kernel(echo_kernel(), Some(KernelSettings::new().dimensions(&[2])))
        .unwrap();

    let err = k.run(&[]).unwrap_err();
    assert!(matches!(err, Error::Validation { ref kernel, .. } if kernel == "echo"));
    let err = k.run(&[Arg::Scalar(f32::NAN)]).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    let err = k.run(&[Vec::<f32>::new().into()]).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(device.dispatches(), 0);

    let out = k.run(&[vec![3.0, 4.0].into()]).unwrap();
    assert_eq!(out.as_host(), Some(&Output::Flat(vec![3.0, 4.0])));
}

#[test]
fn test_unvalidated_runner_dispatches_anyway() {
    let (mut gpu, _) = device_gpu(Mode::WebGl);
    let k = gpu
        .create_kernel(echo_kernel(), Some(KernelSettings::new().dimensions(&[2])))
        .unwrap();
    let out = k.run(&[vec![1.0].into()]).unwrap().into_output().unwrap();
    assert_eq!(out, Output::Flat(vec![1.0, 0.0]));
}

#[test]
fn test_constants_reach_the_body() {
    let mut gpu = Gpu::new(GpuConfig::new(Mode::Cpu)).unwrap();
    let k = gpu
        .create_kernel(
            KernelFunction::new("scale", &["a"], |t, args| {
                args[0].get(t.x) * t.constant("factor").unwrap_or(1.0)
            }),
            Some(KernelSettings::new().dimensions(&[2]).constant("factor", 3.0)),
        )
        .unwrap();
    let out = k.run(&[vec![1.0, 2.0].into()]).unwrap().into_output().unwrap();
    assert_eq!(out, Output::Flat(vec![3.0, 6.0]));
}

#[test]
fn test_release_frees_targets() {
    let (mut gpu, device) = device_gpu(Mode::OpenCl);
    let k = gpu
        .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[4])))
        .unwrap();
    assert_eq!(device.inner.live_programs(), 1);
    k.run(&[]).unwrap();
    assert_eq!(device.inner.live_targets(), 1);

    k.release();
    assert_eq!(device.inner.live_targets(), 0);
    assert_eq!(device.inner.live_programs(), 0);

    // released kernels rebuild on demand
    let out = k.run(&[]).unwrap().into_output().unwrap();
    assert_eq!(out, Output::Flat(vec![0.0, 1.0, 2.0, 3.0]));

    drop(k);
    assert_eq!(device.inner.live_targets(), 0);
    assert_eq!(device.inner.live_programs(), 0);
}

#[test]
fn test_moving_kernel_between_contexts() {
    let (mut gpu, first) = device_gpu(Mode::OpenCl);
    let k = gpu
        .create_kernel(index_kernel(), Some(KernelSettings::new().dimensions(&[2])))
        .unwrap();
    k.run(&[]).unwrap();

    let (other, second) = Counting::context();
    k.set_device_context(other.clone());
    assert_eq!(first.inner.live_targets(), 0);
    assert_eq!(k.device_context(), Some(other));

    let out = k.run(&[]).unwrap().into_output().unwrap();
    assert_eq!(out, Output::Flat(vec![0.0, 1.0]));
    assert_eq!(second.dispatches(), 1);
}

#[test]
fn test_canvas_travels_with_kernels() {
    let canvas = Surface::new("canvas");
    let mut gpu = Gpu::new(
        GpuConfig::new(Mode::WebGl)
            .capabilities(Capabilities::new(true, true, true))
            .canvas(canvas.clone())
            .device(DeviceContext::software()),
    )
    .unwrap();
    let k = gpu.create_kernel(index_kernel(), None).unwrap();
    assert_eq!(k.canvas(), Some(canvas));

    let other = Surface::new("offscreen");
    k.set_canvas(other.clone());
    assert_eq!(k.canvas(), Some(other));
}
