use super::{ModelSlot, Rhs, SolverSettings, Stepper, Workspace};
use crate::error::FlowError;
use crate::layout::split_stages;
use crate::traits::{ModelFlows, Scalar};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-9,
        }
    }
}

/// Implicit Euler for stiff models.
///
/// Solves `y1 - y0 - h f(t0 + h, y1) = 0` by damped Newton iteration, starting
/// from the explicit Euler prediction. The iteration matrix `I - h J` uses a
/// forward-difference Jacobian and is factored with LU. The residual
/// tolerance is relative to `max(1, |y0|)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackwardEuler {
    newton: NewtonSettings,
}

impl BackwardEuler {
    pub fn new(newton: NewtonSettings) -> Self {
        Self { newton }
    }
}

fn l2_norm<T: Scalar>(values: &[T]) -> f64 {
    values.iter().map(|v| v.as_f64() * v.as_f64()).sum::<f64>().sqrt()
}

impl<T: Scalar> Stepper<T> for BackwardEuler {
    const NAME: &'static str = "backward_euler";
    // f(t0, y0), f at the iterate, f at a perturbed iterate, perturbed iterate, iterate
    const STAGES: usize = 5;

    fn eval<M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError> {
        let dim = slot.states.len();
        let [f0, fy, fp, pert, next] = split_stages::<T, 5>(work.stages, dim);
        let model = slot.model;
        let t0 = *slot.time;
        let h = settings.toward_stop(t0, settings.timestep);
        let t1 = t0 + h;
        let y0 = &*slot.states;
        let mut rhs = Rhs::new(flows, &*slot.inputs, &mut *slot.outputs, model);

        rhs.eval(t0, y0, f0)?;
        for i in 0..dim {
            next[i] = y0[i] + h * f0[i];
        }

        let tolerance = self.newton.tolerance * l2_norm(y0).max(1.0);
        let damping = T::lit(self.newton.damping);
        let sqrt_eps = T::epsilon().sqrt();
        let mut residual = DVector::<f64>::zeros(dim);
        let mut iterations = 0usize;

        loop {
            rhs.eval(t1, next, fy)?;
            for i in 0..dim {
                residual[i] = (next[i] - y0[i] - h * fy[i]).as_f64();
            }
            let residual_norm = residual.norm();
            if residual_norm <= tolerance {
                break;
            }
            if iterations >= self.newton.max_steps {
                return Err(FlowError::NoConvergence {
                    model,
                    iterations,
                    residual: residual_norm,
                });
            }

            let mut jacobian = DMatrix::<f64>::identity(dim, dim);
            for j in 0..dim {
                let eps = sqrt_eps * next[j].abs().max(T::one());
                pert.copy_from_slice(next);
                pert[j] = pert[j] + eps;
                rhs.eval(t1, pert, fp)?;
                for i in 0..dim {
                    let df = (fp[i] - fy[i]) / eps;
                    jacobian[(i, j)] -= (h * df).as_f64();
                }
            }

            let delta = jacobian
                .lu()
                .solve(&residual)
                .ok_or(FlowError::SingularMatrix { model })?;
            for i in 0..dim {
                next[i] = next[i] - damping * T::lit(delta[i]);
            }
            iterations += 1;
        }

        trace!(model, t = t0.as_f64(), iterations, "backward_euler step");
        slot.states.copy_from_slice(next);
        *slot.time = t1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::solvers::test_models::{props, settings, Linear};
    use crate::solvers::{Integrator, Method};
    use crate::traits::ModelIo;
    use approx::assert_relative_eq;

    struct Cubic;

    impl ModelFlows<f64> for Cubic {
        fn state_count(&self) -> usize {
            1
        }

        fn flows(
            &self,
            _t: f64,
            y: &[f64],
            dydt: &mut [f64],
            _io: &mut ModelIo<'_, f64>,
        ) -> Result<(), FlowError> {
            dydt[0] = -y[0].powi(3);
            Ok(())
        }
    }

    #[test]
    fn stiff_decay_is_stable_at_large_steps() {
        let flows = Linear {
            rate: -1000.0,
            offset: 1.0,
            dim: 1,
        };
        let mut props = props(settings(0.1, 0.0, 1.0), 1, 1);
        let mut integrator = Integrator::init(Method::BackwardEuler, &props);

        integrator.eval(&flows, &mut props, 0).unwrap();
        assert_relative_eq!(props.model_states[0], 100.0 / 101.0, epsilon = 1e-9);

        while props.time[0] < 1.0 {
            integrator.eval(&flows, &mut props, 0).unwrap();
            assert!(props.model_states[0] <= 1.0 + 1e-9);
        }
        assert_relative_eq!(props.model_states[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn nonlinear_step_converges() {
        let mut props = props(settings(0.5, 0.0, 1.0), 1, 1);
        props.model_states[0] = 1.0;
        let mut integrator = Integrator::init(Method::BackwardEuler, &props);
        integrator.eval(&Cubic, &mut props, 0).unwrap();
        let y = props.model_states[0];
        // y + 0.5 y^3 = 1
        assert_relative_eq!(y + 0.5 * y.powi(3), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn exhausted_newton_iterations_are_reported() {
        let mut props = props(settings(1.0, 0.0, 10.0), 1, 1);
        props.model_states[0] = 10.0;
        let mut integrator =
            Integrator::init(Method::BackwardEuler, &props).with_newton(NewtonSettings {
                max_steps: 1,
                ..NewtonSettings::default()
            });
        let err = integrator.eval(&Cubic, &mut props, 0).unwrap_err();
        assert!(matches!(err, FlowError::NoConvergence { model: 0, iterations: 1, .. }));
        assert_eq!(props.model_states[0], 10.0);
        assert_eq!(props.time[0], 0.0);
    }

    #[test]
    fn singular_iteration_matrix_is_reported() {
        // I - h * rate = 0
        let flows = Linear {
            rate: 2.0,
            offset: 1.0,
            dim: 1,
        };
        let mut props = props(settings(0.5, 0.0, 10.0), 1, 1);
        let mut integrator = Integrator::init(Method::BackwardEuler, &props);
        let err = integrator.eval(&flows, &mut props, 0).unwrap_err();
        assert!(matches!(err, FlowError::SingularMatrix { model: 0 }));
    }
}
