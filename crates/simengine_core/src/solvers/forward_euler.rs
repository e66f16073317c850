use super::{ModelSlot, Rhs, SolverSettings, Stepper, Workspace};
use crate::error::FlowError;
use crate::traits::{ModelFlows, Scalar};

/// Explicit Euler: one derivative evaluation per step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardEuler;

impl<T: Scalar> Stepper<T> for ForwardEuler {
    const NAME: &'static str = "forward_euler";
    const STAGES: usize = 1;

    fn eval<M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError> {
        let dydt = work.stages;
        let t0 = *slot.time;
        let dt = settings.toward_stop(t0, settings.timestep);

        Rhs::new(flows, &*slot.inputs, &mut *slot.outputs, slot.model)
            .eval(t0, &*slot.states, dydt)?;

        for (y, d) in slot.states.iter_mut().zip(dydt.iter()) {
            *y = *y + dt * *d;
        }
        *slot.time = t0 + dt;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::solvers::test_models::{props, settings, Linear};
    use crate::solvers::{Integrator, Method};

    #[test]
    fn steps_along_the_tangent() {
        let flows = Linear {
            rate: 2.0,
            offset: 1.0,
            dim: 2,
        };
        let mut props = props(settings(0.25, 0.0, 10.0), 1, 2);
        props.model_states.copy_from_slice(&[2.0, 0.0]);
        let mut integrator = Integrator::init(Method::ForwardEuler, &props);
        integrator.eval(&flows, &mut props, 0).unwrap();
        assert_eq!(props.model_states, vec![2.5, -0.5]);
        assert_eq!(props.time[0], 0.25);
    }
}
