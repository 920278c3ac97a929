//! Utilities to approximate equality of kernel outputs across backends.
//!
//! Results are only promised to agree within a floating-point tolerance, not
//! bit for bit, so comparisons between a device result and a host reference
//! go through here.

use crate::output::Output;

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The tolerance two backends are expected to agree within.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,
    /// Within the cross-backend tolerance.
    Partial = 1,
    /// Acceptable epsilon.
    Relative = 2,
    /// No relative equality (or mismatched shapes).
    Scarce = 3,
}

/// Checks the absolute distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self` and `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq<Self> for f32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.to_bits() == rhs.to_bits() {
            return ApproxEquality::Precise;
        }

        let dif = (self - rhs).abs();

        if dif < F32_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F32_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F32_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq<Self> for [f32] {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        // worst element decides
        self.iter()
            .zip(rhs)
            .map(|(a, b)| a.approx_eq(b))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

impl RelativeEq<Self> for Output {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.shape() != rhs.shape() {
            return ApproxEquality::Scarce;
        }
        self.flatten()[..].approx_eq(&rhs.flatten()[..])
    }
}

/// True when `a` and `b` agree within [`F32_AVG_ERROR`].
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) <= ApproxEquality::Partial
}
