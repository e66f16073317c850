//! Integration strategies and the solver properties they share.
//!
//! Every strategy advances one model by one step through the same contract:
//! it receives the model's [`ModelSlot`] (its slice of every per-model array
//! in [`SolverProps`]) and a [`Workspace`] (its slice of the strategy's stage
//! memory), calls the model callback a method-specific number of times, and
//! writes the new state and time back into the slot.

pub mod adaptive;
pub mod backward_euler;
pub mod bogacki_shampine;
pub mod dormand_prince;
pub mod forward_euler;
pub mod rk4;

pub use backward_euler::{BackwardEuler, NewtonSettings};
pub use bogacki_shampine::BogackiShampine;
pub use dormand_prince::DormandPrince;
pub use forward_euler::ForwardEuler;
pub use rk4::Rk4;

use crate::error::{ConfigError, FlowError};
use crate::layout::BatchLayout;
use crate::traits::{ModelFlows, ModelIo, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Scalar solver configuration shared by every model of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings<T> {
    /// Fixed step, or the nominal step adaptive strategies start from.
    pub timestep: T,
    pub abstol: T,
    pub reltol: T,
    pub start_time: T,
    pub stop_time: T,
}

impl<T: Scalar> SolverSettings<T> {
    /// `h`, shortened so a step from `t0` does not pass the stop time.
    pub fn toward_stop(&self, t0: T, h: T) -> T {
        let remaining = self.stop_time - t0;
        if remaining > T::zero() && remaining < h {
            remaining
        } else {
            h
        }
    }
}

/// Solver configuration plus the live per-model arrays of a batch.
#[derive(Debug, Clone)]
pub struct SolverProps<T> {
    pub settings: SolverSettings<T>,
    state_layout: BatchLayout,
    input_layout: BatchLayout,
    output_layout: BatchLayout,
    /// Current simulation time per model.
    pub time: Vec<T>,
    /// Cleared once a model finishes or fails.
    pub running: Vec<bool>,
    pub model_states: Vec<T>,
    pub inputs: Vec<T>,
    pub outputs: Vec<T>,
}

impl<T: Scalar> SolverProps<T> {
    pub fn new(
        settings: SolverSettings<T>,
        num_models: usize,
        state_count: usize,
        input_count: usize,
        output_count: usize,
    ) -> Self {
        let state_layout = BatchLayout::new(state_count, num_models);
        let input_layout = BatchLayout::new(input_count, num_models);
        let output_layout = BatchLayout::new(output_count, num_models);
        Self {
            settings,
            state_layout,
            input_layout,
            output_layout,
            time: vec![settings.start_time; num_models],
            running: vec![true; num_models],
            model_states: state_layout.alloc(T::zero()),
            inputs: input_layout.alloc(T::zero()),
            outputs: output_layout.alloc(T::zero()),
        }
    }

    pub fn num_models(&self) -> usize {
        self.state_layout.num_models()
    }

    pub fn state_count(&self) -> usize {
        self.state_layout.stride()
    }

    pub fn state_layout(&self) -> BatchLayout {
        self.state_layout
    }

    pub fn input_layout(&self) -> BatchLayout {
        self.input_layout
    }

    pub fn output_layout(&self) -> BatchLayout {
        self.output_layout
    }

    pub fn states(&self, model: usize) -> &[T] {
        self.state_layout.model(&self.model_states, model)
    }

    pub fn states_mut(&mut self, model: usize) -> &mut [T] {
        self.state_layout.model_mut(&mut self.model_states, model)
    }

    pub fn inputs_mut(&mut self, model: usize) -> &mut [T] {
        self.input_layout.model_mut(&mut self.inputs, model)
    }

    pub fn outputs(&self, model: usize) -> &[T] {
        self.output_layout.model(&self.outputs, model)
    }

    pub fn slot(&mut self, model: usize) -> ModelSlot<'_, T> {
        ModelSlot {
            model,
            time: &mut self.time[model],
            running: &mut self.running[model],
            states: self.state_layout.model_mut(&mut self.model_states, model),
            inputs: self.input_layout.model_mut(&mut self.inputs, model),
            outputs: self.output_layout.model_mut(&mut self.outputs, model),
        }
    }

    /// One disjoint slot per model.
    pub fn slots(&mut self) -> Vec<ModelSlot<'_, T>> {
        let states = self.state_layout.split_mut(&mut self.model_states);
        let inputs = self.input_layout.split_mut(&mut self.inputs);
        let outputs = self.output_layout.split_mut(&mut self.outputs);
        self.time
            .iter_mut()
            .zip(self.running.iter_mut())
            .zip(states)
            .zip(inputs)
            .zip(outputs)
            .enumerate()
            .map(
                |(model, ((((time, running), states), inputs), outputs))| ModelSlot {
                    model,
                    time,
                    running,
                    states,
                    inputs,
                    outputs,
                },
            )
            .collect()
    }
}

/// One model's view of [`SolverProps`].
#[derive(Debug)]
pub struct ModelSlot<'a, T> {
    pub model: usize,
    pub time: &'a mut T,
    pub running: &'a mut bool,
    pub states: &'a mut [T],
    pub inputs: &'a mut [T],
    pub outputs: &'a mut [T],
}

/// One model's share of a strategy's private memory.
#[derive(Debug)]
pub struct Workspace<'a, T> {
    /// `STAGES` consecutive state-sized buffers.
    pub stages: &'a mut [T],
    /// Step size carried between calls by adaptive strategies. Zero means
    /// "not yet seeded".
    pub step_size: Option<&'a mut T>,
}

impl<T> Workspace<'_, T> {
    /// A shorter-lived view of the same memory, for one step of a loop.
    pub fn reborrow(&mut self) -> Workspace<'_, T> {
        Workspace {
            stages: &mut *self.stages,
            step_size: self.step_size.as_deref_mut(),
        }
    }
}

/// A single-step integration method.
pub trait Stepper<T: Scalar> {
    const NAME: &'static str;
    /// State-sized buffers one model needs.
    const STAGES: usize;
    const ADAPTIVE: bool = false;

    /// Advances `slot` by one step. On error the slot's state and time are
    /// left as they were.
    fn eval<M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError>;
}

/// Binds the model callback to one model's inputs and outputs for the
/// duration of a step. Only the first evaluation is flagged as such.
pub(crate) struct Rhs<'s, M, T> {
    flows: &'s M,
    inputs: &'s [T],
    outputs: &'s mut [T],
    model: usize,
    first: bool,
}

impl<'s, M: ModelFlows<T>, T: Scalar> Rhs<'s, M, T> {
    pub(crate) fn new(flows: &'s M, inputs: &'s [T], outputs: &'s mut [T], model: usize) -> Self {
        Self {
            flows,
            inputs,
            outputs,
            model,
            first: true,
        }
    }

    pub(crate) fn eval(&mut self, t: T, y: &[T], dydt: &mut [T]) -> Result<(), FlowError> {
        let first_iteration = std::mem::replace(&mut self.first, false);
        let mut io = ModelIo {
            inputs: self.inputs,
            outputs: &mut *self.outputs,
            first_iteration,
            model: self.model,
        };
        self.flows.flows(t, y, dydt, &mut io)
    }
}

/// `out = y + h * sum(a_j * k_j)`.
pub(crate) fn stage_state<T: Scalar>(out: &mut [T], y: &[T], h: T, terms: &[(T, &[T])]) {
    for (i, value) in out.iter_mut().enumerate() {
        let mut acc = T::zero();
        for (a, k) in terms {
            acc = acc + *a * k[i];
        }
        *value = y[i] + h * acc;
    }
}

/// Integration strategies selectable at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "forwardeuler", alias = "forward_euler")]
    ForwardEuler,
    #[serde(rename = "rk4")]
    Rk4,
    #[serde(rename = "ode23", alias = "bogacki_shampine")]
    BogackiShampine,
    #[serde(rename = "ode45", alias = "dormand_prince")]
    DormandPrince,
    #[serde(rename = "backward_euler", alias = "implicit")]
    BackwardEuler,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::ForwardEuler => <ForwardEuler as Stepper<f64>>::NAME,
            Method::Rk4 => <Rk4 as Stepper<f64>>::NAME,
            Method::BogackiShampine => <BogackiShampine as Stepper<f64>>::NAME,
            Method::DormandPrince => <DormandPrince as Stepper<f64>>::NAME,
            Method::BackwardEuler => <BackwardEuler as Stepper<f64>>::NAME,
        }
    }

    pub fn stages(self) -> usize {
        match self {
            Method::ForwardEuler => <ForwardEuler as Stepper<f64>>::STAGES,
            Method::Rk4 => <Rk4 as Stepper<f64>>::STAGES,
            Method::BogackiShampine => <BogackiShampine as Stepper<f64>>::STAGES,
            Method::DormandPrince => <DormandPrince as Stepper<f64>>::STAGES,
            Method::BackwardEuler => <BackwardEuler as Stepper<f64>>::STAGES,
        }
    }

    pub fn is_adaptive(self) -> bool {
        match self {
            Method::ForwardEuler => <ForwardEuler as Stepper<f64>>::ADAPTIVE,
            Method::Rk4 => <Rk4 as Stepper<f64>>::ADAPTIVE,
            Method::BogackiShampine => <BogackiShampine as Stepper<f64>>::ADAPTIVE,
            Method::DormandPrince => <DormandPrince as Stepper<f64>>::ADAPTIVE,
            Method::BackwardEuler => <BackwardEuler as Stepper<f64>>::ADAPTIVE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forwardeuler" | "forward_euler" => Ok(Method::ForwardEuler),
            "rk4" => Ok(Method::Rk4),
            "ode23" | "bogacki_shampine" => Ok(Method::BogackiShampine),
            "ode45" | "dormand_prince" => Ok(Method::DormandPrince),
            "backward_euler" | "implicit" => Ok(Method::BackwardEuler),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

/// The immutable half of an [`Integrator`]: which method, and its settings.
/// Cheap to copy into parallel tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    method: Method,
    newton: NewtonSettings,
}

impl Kernel {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn step<T: Scalar, M: ModelFlows<T>>(
        &self,
        flows: &M,
        settings: &SolverSettings<T>,
        slot: &mut ModelSlot<'_, T>,
        work: Workspace<'_, T>,
    ) -> Result<(), FlowError> {
        match self.method {
            Method::ForwardEuler => ForwardEuler.eval(flows, settings, slot, work),
            Method::Rk4 => Rk4.eval(flows, settings, slot, work),
            Method::BogackiShampine => BogackiShampine.eval(flows, settings, slot, work),
            Method::DormandPrince => DormandPrince.eval(flows, settings, slot, work),
            Method::BackwardEuler => {
                BackwardEuler::new(self.newton).eval(flows, settings, slot, work)
            }
        }
    }
}

/// A strategy instance: the selected method plus its private stage memory
/// for every model of the batch.
#[derive(Debug, Clone)]
pub struct Integrator<T> {
    kernel: Kernel,
    stage_layout: BatchLayout,
    stages: Vec<T>,
    step_sizes: Vec<T>,
}

impl<T: Scalar> Integrator<T> {
    /// Allocates stage buffers for every model in `props`; adaptive methods
    /// also get a zeroed per-model step size.
    pub fn init(method: Method, props: &SolverProps<T>) -> Self {
        let num_models = props.num_models();
        let stage_layout = BatchLayout::new(method.stages() * props.state_count(), num_models);
        let step_sizes = if method.is_adaptive() {
            vec![T::zero(); num_models]
        } else {
            Vec::new()
        };
        debug!(
            method = method.name(),
            models = num_models,
            states = props.state_count(),
            "initialized integrator"
        );
        Self {
            kernel: Kernel {
                method,
                newton: NewtonSettings::default(),
            },
            stage_layout,
            stages: stage_layout.alloc(T::zero()),
            step_sizes,
        }
    }

    pub fn with_newton(mut self, newton: NewtonSettings) -> Self {
        self.kernel.newton = newton;
        self
    }

    pub fn method(&self) -> Method {
        self.kernel.method
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Carried step size of `model`, for adaptive methods.
    pub fn step_size(&self, model: usize) -> Option<T> {
        self.step_sizes.get(model).copied()
    }

    pub fn workspace(&mut self, model: usize) -> Workspace<'_, T> {
        Workspace {
            stages: self.stage_layout.model_mut(&mut self.stages, model),
            step_size: self.step_sizes.get_mut(model),
        }
    }

    /// One disjoint workspace per model.
    pub fn workspaces(&mut self) -> Vec<Workspace<'_, T>> {
        let mut step_sizes = self.step_sizes.iter_mut();
        self.stage_layout
            .split_mut(&mut self.stages)
            .into_iter()
            .map(|stages| Workspace {
                stages,
                step_size: step_sizes.next(),
            })
            .collect()
    }

    /// Advances `model` by one step.
    pub fn eval<M: ModelFlows<T>>(
        &mut self,
        flows: &M,
        props: &mut SolverProps<T>,
        model: usize,
    ) -> Result<(), FlowError> {
        let kernel = self.kernel;
        let settings = props.settings;
        let mut slot = props.slot(model);
        kernel.step(flows, &settings, &mut slot, self.workspace(model))
    }
}
