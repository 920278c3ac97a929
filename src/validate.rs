//! Strict pre-dispatch checks used by the validating shader runner.
//!
//! The regular runners trust their arguments and let the device sample past
//! edges or propagate non-finite values. The validating runner refuses to
//! dispatch instead.

use briny::prelude::*;

use crate::device::DeviceContext;
use crate::error::Error;
use crate::function::KernelFunction;
use crate::kernel::Arg;

/// One dispatch's arguments, checked against the kernel they are bound to.
pub struct DispatchCheck<'a> {
    pub function: &'a KernelFunction,
    pub args: &'a [Arg],
    pub context: Option<&'a DeviceContext>,
}

impl DispatchCheck<'_> {
    /// The first problem found, if any.
    pub fn problem(&self) -> Option<String> {
        let expected = self.function.params().len();
        if self.args.len() != expected {
            return Some(format!(
                "expected {expected} arguments, got {}",
                self.args.len()
            ));
        }

        for (i, arg) in self.args.iter().enumerate() {
            match arg {
                Arg::Scalar(v) if !v.is_finite() => {
                    return Some(format!("argument {i} is not finite ({v})"));
                }
                Arg::Array(t) if t.is_empty() => {
                    return Some(format!("argument {i} is an empty array"));
                }
                Arg::Array(t) => {
                    if let Some(at) = t.data.iter().position(|v| !v.is_finite()) {
                        return Some(format!("argument {i} has a non-finite value at {at}"));
                    }
                }
                Arg::Device(texture) => {
                    if self.context.is_some_and(|c| !c.same(texture.context())) {
                        return Some(format!(
                            "argument {i} lives on another device context"
                        ));
                    }
                }
                Arg::Scalar(_) => {}
            }
        }
        None
    }

    /// Runs the checks, naming the kernel and the problem on failure.
    pub fn run(&self) -> core::result::Result<(), Error> {
        self.validate().map_err(|_| Error::Validation {
            kernel: self.function.name().to_owned(),
            reason: self.problem().unwrap_or_default(),
        })
    }
}

impl Validate for DispatchCheck<'_> {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        match self.problem() {
            Some(_) => Err(ValidationError),
            None => Ok(()),
        }
    }
}
