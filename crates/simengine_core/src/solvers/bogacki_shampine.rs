use super::adaptive::{accepts, carried_after, carried_step, error_norm, StepBounds};
use super::{stage_state, ModelSlot, Rhs, SolverSettings, Stepper, Workspace};
use crate::error::FlowError;
use crate::layout::split_stages;
use crate::traits::{ModelFlows, Scalar};
use tracing::trace;

/// Bogacki-Shampine 3(2), the low-order embedded pair (`ode23`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BogackiShampine;

/// Third-order weights minus the embedded second-order weights.
const ERROR_WEIGHTS: [f64; 4] = [-5.0 / 72.0, 1.0 / 12.0, 1.0 / 9.0, -1.0 / 8.0];

const ORDER: u32 = 3;

impl<T: Scalar> Stepper<T> for BogackiShampine {
    const NAME: &'static str = "bogacki_shampine";
    // k1..k4, stage state, proposed state
    const STAGES: usize = 6;
    const ADAPTIVE: bool = true;

    fn eval<M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError> {
        let c = T::lit;
        let e = ERROR_WEIGHTS.map(c);
        let bounds = StepBounds::around(settings.timestep);
        let Workspace {
            stages,
            mut step_size,
        } = work;
        let [k1, k2, k3, k4, temp, next] = split_stages::<T, 6>(stages, slot.states.len());

        let t0 = *slot.time;
        let y0 = &*slot.states;
        let mut rhs = Rhs::new(flows, &*slot.inputs, &mut *slot.outputs, slot.model);
        rhs.eval(t0, y0, k1)?;

        let mut h = carried_step(&mut step_size, settings.timestep);
        let used = loop {
            let requested = h;
            let attempted = settings.toward_stop(t0, requested);

            stage_state(temp, y0, attempted, &[(c(0.5), &k1[..])]);
            rhs.eval(t0 + attempted * c(0.5), temp, k2)?;

            stage_state(temp, y0, attempted, &[(c(0.75), &k2[..])]);
            rhs.eval(t0 + attempted * c(0.75), temp, k3)?;

            stage_state(
                next,
                y0,
                attempted,
                &[
                    (c(2.0 / 9.0), &k1[..]),
                    (c(1.0 / 3.0), &k2[..]),
                    (c(4.0 / 9.0), &k3[..]),
                ],
            );
            rhs.eval(t0 + attempted, next, k4)?;

            for i in 0..y0.len() {
                temp[i] = attempted * (e[0] * k1[i] + e[1] * k2[i] + e[2] * k3[i] + e[3] * k4[i]);
            }
            let norm = error_norm(y0, next, temp, settings.abstol, settings.reltol);
            let accepted = accepts(attempted, norm, &bounds);
            h = carried_after(requested, attempted, norm, accepted, ORDER, &bounds);
            trace!(
                model = slot.model,
                t = t0.as_f64(),
                step = attempted.as_f64(),
                norm = norm.as_f64(),
                accepted,
                "bogacki_shampine attempt"
            );
            if accepted {
                break attempted;
            }
        };

        if let Some(stored) = step_size {
            *stored = h;
        }
        slot.states.copy_from_slice(next);
        *slot.time = t0 + used;
        Ok(())
    }
}
