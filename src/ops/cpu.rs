//! Parallel host evaluation of kernel programs.
//!
//! This is what the `cpu` backend runs, and what the software device runs
//! inside a dispatch. Every output index is independent, so the index space
//! is split across the `rayon` pool; each index gets its own [`Thread`],
//! which is also where sub-kernel results for that index are recorded.
//!
//! ## Layout
//!
//! Flat index `i` maps to `x = i % w`, `y = (i / w) % h`, `z = i / (w * h)`
//! for thread dimension `[w, h, d]`: axis 0 is fastest, results are
//! row-major in that order.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::function::{Input, KernelBody, KernelFunction, SubKernel, Thread};
use crate::registry::FunctionRegistry;

/// A kernel ready to be evaluated on the host.
#[derive(Clone)]
pub struct HostProgram {
    pub(crate) name: String,
    body: Arc<KernelBody>,
    subs: Arc<[SubKernel]>,
    registry: Arc<FunctionRegistry>,
    constants: Arc<BTreeMap<String, f32>>,
}

impl HostProgram {
    /// Snapshots `function`, its sub-kernels, the registry and constants.
    pub fn new(
        function: &KernelFunction,
        subs: &[SubKernel],
        registry: &FunctionRegistry,
        constants: &BTreeMap<String, f32>,
    ) -> Result<Self> {
        let body = function
            .body()
            .cloned()
            .ok_or_else(|| Error::compile(function.name(), "no host body to evaluate"))?;
        Ok(Self {
            name: function.name().to_owned(),
            body,
            subs: subs.into(),
            registry: Arc::new(registry.clone()),
            constants: Arc::new(constants.clone()),
        })
    }

    /// Number of results one evaluation produces (root + sub-kernels).
    pub fn outputs(&self) -> usize {
        1 + self.subs.len()
    }
}

/// Flat results of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub root: Vec<f32>,
    /// One buffer per sub-kernel, in slot order.
    pub subs: Vec<Vec<f32>>,
}

/// Evaluates `program` at every index of `thread_dim`.
pub fn evaluate(program: &HostProgram, inputs: &[Input<'_>], thread_dim: [usize; 3]) -> Evaluated {
    let n: usize = thread_dim.iter().product();
    let subs = program.subs.len();

    if subs == 0 {
        let mut root = vec![0.0; n];
        root.par_chunks_mut(thread_dim[0])
            .enumerate()
            .for_each(|(row, out)| {
                for (x, slot) in out.iter_mut().enumerate() {
                    let thread = thread_at(program, row * thread_dim[0] + x, thread_dim);
                    *slot = (program.body)(&thread, inputs);
                }
            });
        return Evaluated {
            root,
            subs: Vec::new(),
        };
    }

    let per_index: Vec<(f32, Vec<f32>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let thread = thread_at(program, i, thread_dim);
            let value = (program.body)(&thread, inputs);
            (value, thread.into_recorded())
        })
        .collect();

    let mut root = Vec::with_capacity(n);
    let mut sub_out = vec![Vec::with_capacity(n); subs];
    for (value, recorded) in per_index {
        root.push(value);
        for (buf, v) in sub_out.iter_mut().zip(recorded) {
            buf.push(v);
        }
    }
    Evaluated {
        root,
        subs: sub_out,
    }
}

fn thread_at(program: &HostProgram, index: usize, thread_dim: [usize; 3]) -> Thread<'_> {
    Thread::new(
        index,
        thread_dim,
        &program.constants,
        &program.registry,
        &program.subs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;

    #[test]
    fn indices_run_axis_zero_fastest() {
        let f = KernelFunction::new("coords", &[], |t, _| (t.x + 10 * t.y + 100 * t.z) as f32);
        let program = HostProgram::new(&f, &[], &FunctionRegistry::new(), &BTreeMap::new()).unwrap();
        let out = evaluate(&program, &[], [2, 2, 2]);
        assert_eq!(
            out.root,
            vec![0.0, 1.0, 10.0, 11.0, 100.0, 101.0, 110.0, 111.0]
        );
    }

    #[test]
    fn sub_kernel_calls_are_recorded() {
        let subs = [SubKernel {
            key: None,
            function: Function::new("double", 1, |a| a[0] * 2.0),
        }];
        let f = KernelFunction::new("root", &["a"], |t, inputs| {
            t.call("double", &[inputs[0].get(t.x)]) + 1.0
        });
        let program = HostProgram::new(&f, &subs, &FunctionRegistry::new(), &BTreeMap::new()).unwrap();
        let data = [1.0, 2.0, 3.0];
        let shape = [3];
        let input = Input::Array {
            shape: &shape,
            data: &data,
        };
        let out = evaluate(&program, &[input], [3, 1, 1]);
        assert_eq!(out.root, vec![3.0, 5.0, 7.0]);
        assert_eq!(out.subs, vec![vec![2.0, 4.0, 6.0]]);
    }
}
