//! Kernel and helper function definitions, and what a kernel body sees.
//!
//! A [`KernelFunction`] is evaluated once per output index. Its body reads a
//! [`Thread`] (which index, the output size, constants, callable helpers)
//! and its [`Input`]s, and returns that index's value.
//!
//! Helpers are plain [`Function`]s: either registered on a runner (see
//! [`Gpu::add_function`](crate::gpu::Gpu::add_function)) or bound into a
//! kernel map as sub-kernels, in which case every call the body makes is
//! also recorded as that sub-kernel's result for the index.
//!
//! Device backends that cannot run host closures execute device source
//! attached with [`KernelFunction::with_source`] / [`Function::with_source`];
//! producing that source is the translator's job, not this crate's.

use core::cell::RefCell;
use core::fmt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ArgumentError, Result};
use crate::registry::FunctionRegistry;
use crate::tensors::{Tensor, flat_index};

/// Body of a kernel: one call per output index.
pub type KernelBody = dyn Fn(&Thread<'_>, &[Input<'_>]) -> f32 + Send + Sync;

/// Body of a helper function.
pub type FunctionBody = dyn Fn(&[f32]) -> f32 + Send + Sync;

/// Declared type of a helper parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Number,
    Integer,
    Boolean,
}

/// A named helper with a fixed arity.
#[derive(Clone)]
pub struct Function {
    name: String,
    arity: usize,
    body: Arc<FunctionBody>,
    source: Option<Arc<str>>,
}

impl Function {
    pub fn new<F>(name: &str, arity: usize, body: F) -> Self
    where
        F: Fn(&[f32]) -> f32 + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            arity,
            body: Arc::new(body),
            source: None,
        }
    }

    /// Attaches translated device source for this helper.
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Calls the helper on the host.
    pub fn call(&self, args: &[f32]) -> f32 {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

/// The function a kernel is built from.
///
/// `KernelFunction::default()` is the absent function; a function made with
/// [`KernelFunction::declared`] has a signature but nothing to call. Both
/// are rejected when a kernel is built.
#[derive(Clone, Default)]
pub struct KernelFunction {
    name: String,
    params: Vec<String>,
    body: Option<Arc<KernelBody>>,
    uses: Vec<String>,
    source: Option<Arc<str>>,
}

impl KernelFunction {
    pub fn new<F>(name: &str, params: &[&str], body: F) -> Self
    where
        F: Fn(&Thread<'_>, &[Input<'_>]) -> f32 + Send + Sync + 'static,
    {
        Self {
            body: Some(Arc::new(body)),
            ..Self::declared(name, params)
        }
    }

    /// A signature without a body.
    pub fn declared(name: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            ..Self::default()
        }
    }

    /// Declares the helpers the body calls, so unknown names fail the build
    /// instead of the dispatch.
    #[must_use]
    pub fn uses(mut self, names: &[&str]) -> Self {
        self.uses.extend(names.iter().map(|n| (*n).to_owned()));
        self
    }

    /// Attaches translated device source.
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn called(&self) -> &[String] {
        &self.uses
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub(crate) fn body(&self) -> Option<&Arc<KernelBody>> {
        self.body.as_ref()
    }

    /// True for `KernelFunction::default()`.
    pub fn is_absent(&self) -> bool {
        self.name.is_empty() && self.body.is_none() && self.source.is_none()
    }

    /// True when there is a body to call.
    pub fn is_callable(&self) -> bool {
        self.body.is_some()
    }

    /// Build-time checks: present, callable, and every declared helper
    /// resolvable from `registry` or `subs`.
    pub(crate) fn check(&self, registry: &FunctionRegistry, subs: &[SubKernel]) -> Result<()> {
        if self.is_absent() {
            return Err(ArgumentError::MissingFunction.into());
        }
        if !self.is_callable() {
            return Err(ArgumentError::NotCallable(self.name.clone()).into());
        }
        for called in &self.uses {
            let known = registry.contains(called) || subs.iter().any(|s| s.answers_to(called));
            if !known {
                return Err(ArgumentError::UnknownFunction {
                    kernel: self.name.clone(),
                    function: called.clone(),
                }
                .into());
            }
        }
        Ok(())
    }
}

impl fmt::Debug for KernelFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("callable", &self.body.is_some())
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}

/// A helper bound into one kernel map.
#[derive(Debug, Clone)]
pub struct SubKernel {
    /// Slot name for named access; `None` for positional maps.
    pub key: Option<String>,
    pub function: Function,
}

impl SubKernel {
    /// True if a body call by `name` reaches this sub-kernel.
    pub fn answers_to(&self, name: &str) -> bool {
        self.function.name() == name || self.key.as_deref() == Some(name)
    }
}

/// Sub-kernel spec of a kernel map.
#[derive(Debug, Clone)]
pub enum SubKernels {
    /// Results retrieved by position.
    Positional(Vec<Function>),
    /// Results retrieved by name, in insertion order.
    Named(Vec<(String, Function)>),
}

impl SubKernels {
    /// Checks the spec and flattens it into ordered slots.
    ///
    /// An empty spec is malformed: a kernel map always has sub-kernels.
    pub fn into_slots(self) -> Result<Vec<SubKernel>> {
        let slots: Vec<SubKernel> = match self {
            Self::Positional(functions) => functions
                .into_iter()
                .map(|function| SubKernel {
                    key: None,
                    function,
                })
                .collect(),
            Self::Named(entries) => entries
                .into_iter()
                .map(|(key, function)| SubKernel {
                    key: Some(key),
                    function,
                })
                .collect(),
        };

        if slots.is_empty() {
            return Err(malformed("no sub-kernels were given"));
        }

        let mut seen = BTreeSet::new();
        for slot in &slots {
            if slot.function.name().is_empty() {
                return Err(malformed("sub-kernel functions must be named"));
            }
            if let Some(key) = &slot.key {
                if !seen.insert(key.as_str()) {
                    return Err(malformed(&format!("duplicate name `{key}`")));
                }
            }
        }
        let mut names = BTreeSet::new();
        if let Some(dup) = slots
            .iter()
            .map(|s| s.function.name())
            .find(|n| !names.insert(*n))
        {
            return Err(malformed(&format!("function `{dup}` is bound twice")));
        }

        Ok(slots)
    }
}

fn malformed(msg: &str) -> crate::error::Error {
    ArgumentError::MalformedSubKernels(msg.to_owned()).into()
}

/// A kernel input as the body reads it.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    Scalar(f32),
    /// Row-major data, shape outermost axis first.
    Array { shape: &'a [usize], data: &'a [f32] },
}

impl<'a> Input<'a> {
    pub(crate) fn from_tensor(t: &'a Tensor) -> Self {
        Self::Array {
            shape: &t.shape,
            data: &t.data,
        }
    }

    /// The scalar value, or the first element of an array.
    pub fn value(&self) -> f32 {
        match self {
            Self::Scalar(v) => *v,
            Self::Array { data, .. } => data.first().copied().unwrap_or(0.0),
        }
    }

    /// Element at `index` (outermost axis first); `0.0` when out of range.
    ///
    /// For a two-axis input built from kernel dimensions `[x, y]` that is
    /// `at(&[y, x])`.
    pub fn at(&self, index: &[usize]) -> f32 {
        match self {
            Self::Scalar(v) => *v,
            Self::Array { shape, data } => flat_index(shape, index)
                .and_then(|i| data.get(i).copied())
                .unwrap_or(0.0),
        }
    }

    /// Element at flat offset `i`; `0.0` when out of range.
    pub fn get(&self, i: usize) -> f32 {
        match self {
            Self::Scalar(v) => *v,
            Self::Array { data, .. } => data.get(i).copied().unwrap_or(0.0),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Array { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a kernel body knows about the index it is computing.
pub struct Thread<'a> {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    output: [usize; 3],
    constants: &'a BTreeMap<String, f32>,
    registry: &'a FunctionRegistry,
    subs: &'a [SubKernel],
    recorded: RefCell<Vec<f32>>,
}

impl<'a> Thread<'a> {
    pub(crate) fn new(
        index: usize,
        output: [usize; 3],
        constants: &'a BTreeMap<String, f32>,
        registry: &'a FunctionRegistry,
        subs: &'a [SubKernel],
    ) -> Self {
        let [w, h, _] = output;
        Self {
            x: index % w,
            y: (index / w) % h,
            z: index / (w * h),
            output,
            constants,
            registry,
            subs,
            recorded: RefCell::new(vec![0.0; subs.len()]),
        }
    }

    /// Output size per axis, `[x, y, z]`; unused axes are 1.
    pub fn output(&self) -> [usize; 3] {
        self.output
    }

    /// A constant from the kernel settings.
    pub fn constant(&self, name: &str) -> Option<f32> {
        self.constants.get(name).copied()
    }

    /// Calls a sub-kernel or a registered helper by name.
    ///
    /// Calling a sub-kernel records the returned value as its result for
    /// this index. Unknown names evaluate to `NaN`; declare helpers with
    /// [`KernelFunction::uses`] to catch them at build time.
    pub fn call(&self, name: &str, args: &[f32]) -> f32 {
        if let Some(i) = self.subs.iter().position(|s| s.answers_to(name)) {
            let value = self.subs[i].function.call(args);
            self.recorded.borrow_mut()[i] = value;
            return value;
        }
        match self.registry.get(name) {
            Some(entry) => entry.function.call(args),
            None => {
                log::error!("kernel body called unknown function `{name}`");
                f32::NAN
            }
        }
    }

    pub(crate) fn into_recorded(self) -> Vec<f32> {
        self.recorded.into_inner()
    }
}
