use briny_kernels::prelude::*;

#[test]
fn test_tensor_creation() {
    let t = Tensor::<f32>::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.at(&[1, 0]), 3.0);
    assert_eq!(t.at(&[2, 0]), 0.0);
}

#[test]
fn test_tensor_shape_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0]);
    });
    assert!(result.is_err());
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape, vec![2, 2]);
    assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_outputs_become_inputs() {
    let rows = Output::from_flat(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
    assert_eq!(rows.shape(), vec![2, 3]);

    assert_eq!(rows.as_rows().map(<[_]>::len), Some(2));
    assert!(rows.as_flat().is_none());
    assert!(rows.as_slices().is_none());

    let t: Tensor = rows.into();
    assert_eq!(t.shape, vec![2, 3]);
    assert_eq!(t.at(&[1, 2]), 6.0);
}

#[test]
fn test_ragged_output_becomes_flat_tensor() {
    let ragged = Output::Rows(vec![vec![1.0], vec![1.0, 2.0]]);
    let t: Tensor = ragged.into();
    assert_eq!(t.shape, vec![3]);
    assert_eq!(t.data, vec![1.0, 1.0, 2.0]);

    let arg: Arg = Output::Slices(vec![vec![vec![1.0, 2.0]], vec![]]).into();
    assert!(matches!(arg, Arg::Array(t) if t.shape == vec![2]));
}

#[test]
fn test_tensor_inputs_index_outermost_first() {
    let mut gpu = Gpu::new(GpuConfig::new(Mode::Cpu)).unwrap();
    let transpose = gpu
        .create_kernel(
            KernelFunction::new("transpose", &["m"], |t, args| args[0].at(&[t.x, t.y])),
            Some(KernelSettings::new().dimensions(&[2, 3])),
        )
        .unwrap();
    let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let out = transpose.run(&[m.into()]).unwrap().into_output().unwrap();
    assert_eq!(
        out,
        Output::Rows(vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]])
    );
}
