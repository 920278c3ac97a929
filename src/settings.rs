//! Per-kernel build settings.

use std::collections::BTreeMap;

use crate::error::{ArgumentError, Result};

/// Axis-0 length used when no dimensions are given.
pub const DEFAULT_LENGTH: usize = 1024;

/// Options a kernel is built with.
///
/// `dimensions`, `output_to_device`, `float_output` and `constants` are
/// interpreted; anything in `extra` is carried through to the device
/// untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSettings {
    /// Output length per axis, axis 0 first (1 to 3 positive lengths).
    pub dimensions: Vec<usize>,
    /// Leave results on the device instead of reading them back.
    pub output_to_device: bool,
    /// Store results in float targets and read them back natively.
    pub float_output: bool,
    pub constants: BTreeMap<String, f32>,
    pub extra: BTreeMap<String, String>,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            dimensions: vec![DEFAULT_LENGTH],
            output_to_device: false,
            float_output: false,
            constants: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl KernelSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dimensions(mut self, dims: &[usize]) -> Self {
        self.dimensions = dims.to_vec();
        self
    }

    #[must_use]
    pub fn output_to_device(mut self, on: bool) -> Self {
        self.output_to_device = on;
        self
    }

    #[must_use]
    pub fn float_output(mut self, on: bool) -> Self {
        self.float_output = on;
        self
    }

    #[must_use]
    pub fn constant(mut self, name: &str, value: f32) -> Self {
        self.constants.insert(name.to_owned(), value);
        self
    }

    #[must_use]
    pub fn extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Rejects anything but 1 to 3 positive lengths.
    pub fn check_dimensions(&self) -> Result<()> {
        let dims = &self.dimensions;
        if dims.is_empty() || dims.len() > 3 || dims.contains(&0) {
            return Err(ArgumentError::InvalidDimensions(dims.clone()).into());
        }
        Ok(())
    }

    /// Logical element count per axis, `[x, y, z]`, unused axes 1.
    pub fn thread_dim(&self) -> [usize; 3] {
        let d = |i: usize| self.dimensions.get(i).copied().unwrap_or(1);
        [d(0), d(1), d(2)]
    }

    /// Total number of output elements.
    pub fn elements(&self) -> usize {
        self.thread_dim().iter().product()
    }

    /// Shape of a result as an input array, outermost axis first.
    pub fn input_shape(&self) -> Vec<usize> {
        self.dimensions.iter().rev().copied().collect()
    }
}
