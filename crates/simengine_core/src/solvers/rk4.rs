use super::{ModelSlot, Rhs, SolverSettings, Stepper, Workspace};
use crate::error::FlowError;
use crate::layout::split_stages;
use crate::traits::{ModelFlows, Scalar};

/// Classic Runge-Kutta 4th Order Solver
#[derive(Debug, Clone, Copy, Default)]
pub struct Rk4;

impl<T: Scalar> Stepper<T> for Rk4 {
    const NAME: &'static str = "rk4";
    const STAGES: usize = 5;

    fn eval<M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError> {
        let half = T::lit(0.5);
        let sixth = T::lit(1.0 / 6.0);
        let two = T::lit(2.0);

        let [k1, k2, k3, k4, tmp] = split_stages::<T, 5>(work.stages, slot.states.len());
        let t0 = *slot.time;
        let dt = settings.toward_stop(t0, settings.timestep);
        let state = &*slot.states;
        let mut rhs = Rhs::new(flows, &*slot.inputs, &mut *slot.outputs, slot.model);

        // k1 = f(t, y)
        rhs.eval(t0, state, k1)?;

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            tmp[i] = state[i] + dt * k1[i] * half;
        }
        rhs.eval(t0 + dt * half, tmp, k2)?;

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            tmp[i] = state[i] + dt * k2[i] * half;
        }
        rhs.eval(t0 + dt * half, tmp, k3)?;

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            tmp[i] = state[i] + dt * k3[i];
        }
        rhs.eval(t0 + dt, tmp, k4)?;

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for (i, y) in slot.states.iter_mut().enumerate() {
            *y = *y + dt * sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]);
        }

        *slot.time = t0 + dt;
        Ok(())
    }
}
