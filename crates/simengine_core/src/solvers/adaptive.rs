//! Step-size control shared by the embedded-pair methods.

use crate::traits::Scalar;

/// Ratio between the nominal step and either bound.
pub const BOUND_FACTOR: f64 = 1024.0;

/// Safety factor applied to every proposed step.
pub const SAFETY: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepBounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: Scalar> StepBounds<T> {
    pub fn around(nominal: T) -> Self {
        let factor = T::lit(BOUND_FACTOR);
        Self {
            min: nominal / factor,
            max: nominal * factor,
        }
    }

    /// Clamps `h`; NaN maps to the minimum.
    pub fn clamp(&self, h: T) -> T {
        if h.is_nan() || h < self.min {
            self.min
        } else if h > self.max {
            self.max
        } else {
            h
        }
    }
}

/// Root-mean-square of the per-state error ratios
/// `err_i / (reltol * max(|old_i|, |new_i|) + abstol)`. A model without
/// states has norm zero.
pub fn error_norm<T: Scalar>(old: &[T], new: &[T], err: &[T], abstol: T, reltol: T) -> T {
    if err.is_empty() {
        return T::zero();
    }
    let sum = old
        .iter()
        .zip(new)
        .zip(err)
        .fold(T::zero(), |acc, ((&o, &n), &e)| {
            let allowed = reltol * o.abs().max(n.abs()) + abstol;
            let ratio = e / allowed;
            acc + ratio * ratio
        });
    let count = T::from_usize(err.len()).unwrap_or_else(T::one);
    (sum / count).sqrt()
}

/// Proposes the step after one that produced `norm` with step `h`, for a
/// method whose error estimate has order `order`.
pub fn next_step_size<T: Scalar>(h: T, norm: T, order: u32, bounds: &StepBounds<T>) -> T {
    let exponent = T::one() / T::lit(f64::from(order));
    let proposed = T::lit(SAFETY) * h * norm.recip().powf(exponent);
    bounds.clamp(proposed)
}

/// Step size carried after an attempt. `requested` is the size before the
/// stop-time clamp; an accepted clamped attempt keeps it.
pub fn carried_after<T: Scalar>(
    requested: T,
    attempted: T,
    norm: T,
    accepted: bool,
    order: u32,
    bounds: &StepBounds<T>,
) -> T {
    if accepted && attempted < requested {
        bounds.clamp(requested)
    } else {
        next_step_size(attempted, norm, order, bounds)
    }
}

/// Whether a step of size `h` with `norm` is accepted.
pub fn accepts<T: Scalar>(h: T, norm: T, bounds: &StepBounds<T>) -> bool {
    norm <= T::one() || h <= bounds.min
}

/// Carried step size for the next attempt; seeds from the nominal step the
/// first time.
pub fn carried_step<T: Scalar>(slot: &mut Option<&mut T>, nominal: T) -> T {
    match slot {
        Some(h) if **h > T::zero() => **h,
        Some(h) => {
            **h = nominal;
            nominal
        }
        None => nominal,
    }
}
