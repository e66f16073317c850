use crate::error::FlowError;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as simulation quantities.
/// Covers single- and double-precision storage; sample files are always
/// double precision and get converted on read.
pub trait Scalar: Float + FromPrimitive + Debug + Send + Sync + 'static {
    /// Converts a literal coefficient. Out-of-range values become NaN.
    fn lit(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }

    /// Widens to f64, mapping unrepresentable values to NaN.
    fn as_f64(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl<T: Float + FromPrimitive + Debug + Send + Sync + 'static> Scalar for T {}

/// Per-call context handed to the model callback alongside the state.
pub struct ModelIo<'a, T> {
    /// Input values for this model, indexed by input identifier.
    pub inputs: &'a [T],
    /// Output staging buffer for this model.
    pub outputs: &'a mut [T],
    /// True only for the first evaluation of a step; outputs are meant to be
    /// written then.
    pub first_iteration: bool,
    pub model: usize,
}

/// The model evaluation callback: maps (time, state, inputs) to the state
/// derivative of one model instance.
///
/// Implementations must be deterministic for fixed arguments and must not
/// keep per-call mutable state, since models of a batch are evaluated in
/// parallel.
pub trait ModelFlows<T: Scalar>: Sync {
    /// Returns the dimension of the state space.
    fn state_count(&self) -> usize;

    /// Number of output quantities written during the first stage.
    fn output_count(&self) -> usize {
        0
    }

    /// Evaluates dy/dt into `dydt`.
    fn flows(
        &self,
        t: T,
        y: &[T],
        dydt: &mut [T],
        io: &mut ModelIo<'_, T>,
    ) -> Result<(), FlowError>;
}
