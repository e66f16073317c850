use super::adaptive::{accepts, carried_after, carried_step, error_norm, StepBounds};
use super::{stage_state, ModelSlot, Rhs, SolverSettings, Stepper, Workspace};
use crate::error::FlowError;
use crate::layout::split_stages;
use crate::traits::{ModelFlows, Scalar};
use tracing::trace;

/// Dormand-Prince 5(4) with a per-model carried step size.
///
/// Each attempt evaluates six stages plus the derivative at the proposed
/// state, which feeds the embedded error estimate. Rejected attempts retry
/// from the same starting point with a smaller step until one is accepted or
/// the step reaches its lower bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct DormandPrince;

const ERROR_WEIGHTS: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

/// Order of the error estimate's leading term, used by the controller.
const ORDER: u32 = 5;

/// Stage buffers: k1..k7, the working stage state, and the proposed state.
const STAGES: usize = 9;

/// Runs one attempt of size `h` from `(t0, y0)`, given `k[0] = f(t0, y0)`.
/// Leaves the proposed state in `k[8]` and returns the error norm.
pub(crate) fn attempt<T: Scalar, M: ModelFlows<T>>(
    rhs: &mut Rhs<'_, M, T>,
    settings: &SolverSettings<T>,
    t0: T,
    y0: &[T],
    h: T,
    k: &mut [&mut [T]; STAGES],
) -> Result<T, FlowError> {
    let c = T::lit;
    let [k1, k2, k3, k4, k5, k6, k7, temp, next] = k;

    stage_state(temp, y0, h, &[(c(1.0 / 5.0), &k1[..])]);
    rhs.eval(t0 + h * c(1.0 / 5.0), temp, k2)?;

    stage_state(temp, y0, h, &[(c(3.0 / 40.0), &k1[..]), (c(9.0 / 40.0), &k2[..])]);
    rhs.eval(t0 + h * c(3.0 / 10.0), temp, k3)?;

    stage_state(
        temp,
        y0,
        h,
        &[
            (c(44.0 / 45.0), &k1[..]),
            (c(-56.0 / 15.0), &k2[..]),
            (c(32.0 / 9.0), &k3[..]),
        ],
    );
    rhs.eval(t0 + h * c(4.0 / 5.0), temp, k4)?;

    stage_state(
        temp,
        y0,
        h,
        &[
            (c(19372.0 / 6561.0), &k1[..]),
            (c(-25360.0 / 2187.0), &k2[..]),
            (c(64448.0 / 6561.0), &k3[..]),
            (c(-212.0 / 729.0), &k4[..]),
        ],
    );
    rhs.eval(t0 + h * c(8.0 / 9.0), temp, k5)?;

    stage_state(
        temp,
        y0,
        h,
        &[
            (c(9017.0 / 3168.0), &k1[..]),
            (c(-355.0 / 33.0), &k2[..]),
            (c(46732.0 / 5247.0), &k3[..]),
            (c(49.0 / 176.0), &k4[..]),
            (c(-5103.0 / 18656.0), &k5[..]),
        ],
    );
    rhs.eval(t0 + h, temp, k6)?;

    stage_state(
        next,
        y0,
        h,
        &[
            (c(35.0 / 384.0), &k1[..]),
            (c(500.0 / 1113.0), &k3[..]),
            (c(125.0 / 192.0), &k4[..]),
            (c(-2187.0 / 6784.0), &k5[..]),
            (c(11.0 / 84.0), &k6[..]),
        ],
    );
    rhs.eval(t0 + h, next, k7)?;

    let e = ERROR_WEIGHTS.map(c);
    for i in 0..y0.len() {
        temp[i] = h
            * (e[0] * k1[i]
                + e[2] * k3[i]
                + e[3] * k4[i]
                + e[4] * k5[i]
                + e[5] * k6[i]
                + e[6] * k7[i]);
    }

    Ok(error_norm(y0, next, temp, settings.abstol, settings.reltol))
}

impl<T: Scalar> Stepper<T> for DormandPrince {
    const NAME: &'static str = "dormand_prince";
    const STAGES: usize = STAGES;
    const ADAPTIVE: bool = true;

    fn eval<M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError> {
        let bounds = StepBounds::around(settings.timestep);
        let Workspace {
            stages,
            mut step_size,
        } = work;
        let mut k = split_stages::<T, STAGES>(stages, slot.states.len());

        let t0 = *slot.time;
        let y0 = &*slot.states;
        let mut rhs = Rhs::new(flows, &*slot.inputs, &mut *slot.outputs, slot.model);

        // k1 does not depend on the step size, so retries reuse it.
        rhs.eval(t0, y0, k[0])?;

        let mut h = carried_step(&mut step_size, settings.timestep);
        let used = loop {
            let requested = h;
            let attempted = settings.toward_stop(t0, requested);
            let norm = attempt(&mut rhs, settings, t0, y0, attempted, &mut k)?;
            let accepted = accepts(attempted, norm, &bounds);
            h = carried_after(requested, attempted, norm, accepted, ORDER, &bounds);
            trace!(
                model = slot.model,
                t = t0.as_f64(),
                step = attempted.as_f64(),
                norm = norm.as_f64(),
                accepted,
                "dormand_prince attempt"
            );
            if accepted {
                break attempted;
            }
        };

        if let Some(stored) = step_size {
            *stored = h;
        }
        slot.states.copy_from_slice(&k[8][..]);
        *slot.time = t0 + used;
        Ok(())
    }
}
