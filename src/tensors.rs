//! Host-side array inputs for kernels.
//!
//! A [`Tensor`] is the array argument kernels read from: a shape plus flat
//! row-major data. Kernels index it with the innermost axis last, the same
//! order the `tensor!` literal nests in.
//!
//! ```rust
//! use briny_kernels::tensor;
//! let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//! assert_eq!(t.shape, vec![2, 3]);
//! assert_eq!(t.at(&[1, 0]), 4.0);
//! ```

/// Represents an N-dimensional tensor with a shape and flat row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T = f32> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Tensor<f32> {
    /// A one-axis tensor over `data`.
    pub fn vector(data: Vec<f32>) -> Self {
        Self::new(vec![data.len()], data)
    }

    /// Reads the element at `index` (outermost axis first).
    ///
    /// Out-of-range reads return `0.0`, matching how a device samples past
    /// the edge of an input.
    pub fn at(&self, index: &[usize]) -> f32 {
        flat_index(&self.shape, index)
            .and_then(|i| self.data.get(i).copied())
            .unwrap_or(0.0)
    }
}

impl From<Vec<f32>> for Tensor<f32> {
    fn from(data: Vec<f32>) -> Self {
        Self::vector(data)
    }
}

/// Row-major flat offset of `index` within `shape`, if in range.
///
/// A shorter `index` than `shape` addresses the trailing axes, so a scalar
/// position into a 1-axis view of a multi-axis tensor still resolves.
pub(crate) fn flat_index(shape: &[usize], index: &[usize]) -> Option<usize> {
    if index.len() > shape.len() {
        return None;
    }
    let dims = &shape[shape.len() - index.len()..];
    let mut offset = 0;
    for (&i, &d) in index.iter().zip(dims) {
        if i >= d {
            return None;
        }
        offset = offset * d + i;
    }
    Some(offset)
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_kernels::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::<f32>::new(Vec::<usize>::new(), vec![$lit as f32])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::<f32>::new(shape, data)
    }};
}
