//! Kernel maps: one root kernel plus sub-kernels sharing one dispatch.
//!
//! The root body calls its sub-kernels like helpers (`t.call("add", ..)`);
//! every call is recorded, so a single invocation yields the root result
//! and one result per sub-kernel, each shaped like the root. Sub results are
//! retrieved by position, or by name for maps built from named specs.

use crate::error::{Error, Result};
use crate::kernel::{Arg, Kernel, Value};

/// A root kernel with bound sub-kernels.
#[derive(Debug, Clone)]
pub struct KernelMap {
    kernel: Kernel,
    keys: Vec<Option<String>>,
}

impl KernelMap {
    pub(crate) fn new(kernel: Kernel, keys: Vec<Option<String>>) -> Self {
        Self { kernel, keys }
    }

    /// The root kernel. Invoking it directly runs the same single dispatch.
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Slot names in insertion order (`None` for positional slots).
    pub fn keys(&self) -> &[Option<String>] {
        &self.keys
    }

    /// Runs the map once.
    pub fn run(&self, args: &[Arg]) -> Result<MapOutput> {
        let mut values = self.kernel.run_all(args)?.into_iter();
        let result = values
            .next()
            .ok_or_else(|| Error::device("dispatch returned no root result"))?;
        Ok(MapOutput {
            result,
            subs: self.keys.iter().cloned().zip(values).collect(),
        })
    }

    /// Frees the map's device program and targets.
    pub fn release(&self) {
        self.kernel.release();
    }
}

/// Results of one kernel map invocation.
#[derive(Debug, Clone)]
pub struct MapOutput {
    result: Value,
    subs: Vec<(Option<String>, Value)>,
}

impl MapOutput {
    /// The root kernel's result.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Sub-kernel result by position.
    pub fn sub(&self, index: usize) -> Option<&Value> {
        self.subs.get(index).map(|(_, v)| v)
    }

    /// Sub-kernel result by slot name.
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.subs
            .iter()
            .find(|(key, _)| key.as_deref() == Some(name))
            .map(|(_, v)| v)
    }

    /// Number of sub-kernel results.
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}
