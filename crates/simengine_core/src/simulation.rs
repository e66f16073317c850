//! The batch driver: one simulation run over N independent model instances.

use crate::config::SimulationConfig;
use crate::equation_engine::EquationModel;
use crate::error::{FlowError, SimError, SimResult};
use crate::inputs::files::{open_optional, read_samples};
use crate::inputs::{DataDir, InputCatalog, InputTable, ModelInputs};
use crate::solvers::{Integrator, Kernel, ModelSlot, SolverProps, SolverSettings, Workspace};
use crate::traits::{ModelFlows, Scalar};
use rayon::prelude::*;
use std::io;
use tracing::{info, warn};

/// What a single call to [`Simulation::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReport {
    /// The model advanced and has not reached the stop time.
    Advanced,
    /// The model reached the stop time.
    Finished,
    /// A sampled input ran out of data; the model was stopped before stepping.
    InputsExhausted,
    /// The model was no longer running; nothing happened.
    Stopped,
}

/// Final state of one model after [`Simulation::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum ModelStatus {
    Finished,
    InputsExhausted,
    Failed(FlowError),
    /// Already stopped before the run started.
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutcome {
    pub status: ModelStatus,
    pub steps: u64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub models: Vec<ModelOutcome>,
}

impl RunSummary {
    pub fn all_finished(&self) -> bool {
        self.models
            .iter()
            .all(|outcome| outcome.status == ModelStatus::Finished)
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &FlowError)> {
        self.models
            .iter()
            .enumerate()
            .filter_map(|(model, outcome)| match &outcome.status {
                ModelStatus::Failed(err) => Some((model, err)),
                _ => None,
            })
    }

    pub fn total_steps(&self) -> u64 {
        self.models.iter().map(|outcome| outcome.steps).sum()
    }
}

/// A batch of model instances sharing one configuration, one model
/// definition, and one integration method.
#[derive(Debug)]
pub struct Simulation<T, M> {
    config: SimulationConfig,
    model: M,
    props: SolverProps<T>,
    inputs: InputTable<T>,
    integrator: Integrator<T>,
}

impl<T: Scalar> Simulation<T, EquationModel<T>> {
    /// Builds the model from the flows declared in the configuration.
    pub fn from_config(config: SimulationConfig) -> SimResult<Self> {
        let model = EquationModel::from_config(&config)?;
        Self::new(config, model)
    }
}

impl<T: Scalar, M: ModelFlows<T>> Simulation<T, M> {
    pub fn new(config: SimulationConfig, model: M) -> SimResult<Self> {
        config.validate()?;
        if model.state_count() != config.states.len() {
            return Err(SimError::StateCountMismatch {
                model: model.state_count(),
                config: config.states.len(),
            });
        }

        let num_models = config.num_models;
        let data_dir = match &config.data_dir {
            Some(root) => DataDir::new(root).with_model_id_offset(config.model_id_offset),
            None => DataDir::empty(),
        };
        let catalog = InputCatalog::new(config.inputs.clone(), data_dir.clone())
            .with_buffer_size(config.sample_buffer_size)
            .with_diagnostics(config.diagnostics);

        let solver = &config.solver;
        let settings = SolverSettings {
            timestep: T::lit(solver.timestep),
            abstol: T::lit(solver.abstol),
            reltol: T::lit(solver.reltol),
            start_time: T::lit(config.start_time),
            stop_time: T::lit(config.stop_time),
        };
        let mut props = SolverProps::new(
            settings,
            num_models,
            model.state_count(),
            catalog.len(),
            model.output_count(),
        );
        for m in 0..num_models {
            let initial = initial_states(&config, &data_dir, m)?;
            for (state, value) in props.states_mut(m).iter_mut().zip(initial) {
                *state = T::lit(value);
            }
        }

        let inputs = InputTable::initialize(catalog, num_models, settings.start_time)?;
        let integrator = Integrator::init(solver.method, &props).with_newton(solver.newton);

        info!(
            models = num_models,
            states = model.state_count(),
            inputs = config.inputs.len(),
            method = %solver.method,
            start = config.start_time,
            stop = config.stop_time,
            "simulation initialized"
        );
        Ok(Self {
            config,
            model,
            props,
            inputs,
            integrator,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn props(&self) -> &SolverProps<T> {
        &self.props
    }

    pub fn inputs(&self) -> &InputTable<T> {
        &self.inputs
    }

    pub fn integrator(&self) -> &Integrator<T> {
        &self.integrator
    }

    pub fn num_models(&self) -> usize {
        self.props.num_models()
    }

    pub fn time(&self, model: usize) -> T {
        self.props.time[model]
    }

    pub fn states(&self, model: usize) -> &[T] {
        self.props.states(model)
    }

    pub fn outputs(&self, model: usize) -> &[T] {
        self.props.outputs(model)
    }

    pub fn is_running(&self, model: usize) -> bool {
        self.props.running[model]
    }

    /// Advances one model by one step: refreshes its inputs, then integrates.
    ///
    /// A flow error stops the model and is returned; the model keeps its
    /// pre-step state and time.
    pub fn step(&mut self, model: usize) -> SimResult<StepReport> {
        let num_models = self.num_models();
        if model >= num_models {
            return Err(SimError::NoSuchModel { model, num_models });
        }
        let kernel = self.integrator.kernel();
        let settings = self.props.settings;
        let mut slot = self.props.slot(model);
        let mut inputs = self.inputs.model(model);
        let work = self.integrator.workspace(model);
        step_model(kernel, &self.model, &settings, &mut slot, &mut inputs, work)
    }

    /// Runs every running model to the stop time, in parallel.
    ///
    /// Flow errors stop only the affected model and show up in the summary.
    /// Input errors are fatal for the whole run.
    pub fn run(&mut self) -> SimResult<RunSummary> {
        info!(
            models = self.num_models(),
            method = %self.integrator.method(),
            "starting simulation"
        );
        let kernel = self.integrator.kernel();
        let settings = self.props.settings;
        let flows = &self.model;

        let slots = self.props.slots();
        let works = self.integrator.workspaces();
        let inputs = self.inputs.split_mut();
        let outcomes = slots
            .into_par_iter()
            .zip(works)
            .zip(inputs)
            .map(|((mut slot, mut work), mut inputs)| {
                run_model(kernel, flows, &settings, &mut slot, &mut inputs, &mut work)
            })
            .collect::<SimResult<Vec<_>>>()?;

        let summary = RunSummary { models: outcomes };
        info!(
            steps = summary.total_steps(),
            failed = summary.failures().count(),
            "simulation finished"
        );
        Ok(summary)
    }
}

/// Per-model initial state: configured defaults, overridden by the model's
/// `initial-states` file when one exists.
fn initial_states(
    config: &SimulationConfig,
    data_dir: &DataDir,
    model: usize,
) -> SimResult<Vec<f64>> {
    let mut values: Vec<f64> = config.states.iter().map(|state| state.initial).collect();
    let Some(path) = data_dir.initial_states_path(model) else {
        return Ok(values);
    };
    let error = |state: usize, source: io::Error| SimError::InitialStates {
        state: config.states.get(state).map(|s| s.name.clone()).unwrap_or_default(),
        model,
        path: path.clone(),
        source,
    };
    let Some(mut file) = open_optional(&path).map_err(|err| error(0, err))? else {
        return Ok(values);
    };
    let (read, _) = read_samples(&mut file, values.len()).map_err(|err| error(0, err))?;
    if read.len() < values.len() {
        return Err(error(
            read.len(),
            io::Error::new(io::ErrorKind::UnexpectedEof, "initial-states file is too short"),
        ));
    }
    values.copy_from_slice(&read);
    Ok(values)
}

fn step_model<T: Scalar, M: ModelFlows<T>>(
    kernel: Kernel,
    flows: &M,
    settings: &SolverSettings<T>,
    slot: &mut ModelSlot<'_, T>,
    inputs: &mut ModelInputs<'_, T>,
    work: Workspace<'_, T>,
) -> SimResult<StepReport> {
    if !*slot.running {
        return Ok(StepReport::Stopped);
    }
    let t = *slot.time;
    if t >= settings.stop_time {
        *slot.running = false;
        return Ok(StepReport::Finished);
    }
    if !inputs.advance(t)? {
        *slot.running = false;
        return Ok(StepReport::InputsExhausted);
    }
    inputs.load(slot.inputs)?;

    if let Err(err) = kernel.step(flows, settings, slot, work) {
        *slot.running = false;
        warn!(model = slot.model, t = t.as_f64(), error = %err, "model stopped");
        return Err(err.into());
    }
    if *slot.time >= settings.stop_time {
        *slot.running = false;
        return Ok(StepReport::Finished);
    }
    Ok(StepReport::Advanced)
}

fn run_model<T: Scalar, M: ModelFlows<T>>(
    kernel: Kernel,
    flows: &M,
    settings: &SolverSettings<T>,
    slot: &mut ModelSlot<'_, T>,
    inputs: &mut ModelInputs<'_, T>,
    work: &mut Workspace<'_, T>,
) -> SimResult<ModelOutcome> {
    let mut steps = 0u64;
    let status = loop {
        match step_model(kernel, flows, settings, slot, inputs, work.reborrow()) {
            Ok(StepReport::Advanced) => steps += 1,
            Ok(StepReport::Finished) => {
                steps += 1;
                break ModelStatus::Finished;
            }
            Ok(StepReport::InputsExhausted) => break ModelStatus::InputsExhausted,
            Ok(StepReport::Stopped) => break ModelStatus::Stopped,
            Err(SimError::Flow(err)) => break ModelStatus::Failed(err),
            Err(err) => return Err(err),
        }
    };
    Ok(ModelOutcome {
        status,
        steps,
        time: slot.time.as_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputDecl;
    use crate::error::InputError;
    use crate::inputs::files::write_samples;
    use crate::inputs::EofPolicy;
    use crate::solvers::Method;
    use crate::traits::ModelIo;
    use approx::assert_abs_diff_eq;
    use std::path::Path;

    /// dy/dt = drive
    fn integrator_of_drive() -> EquationModel<f64> {
        EquationModel::<f64>::builder()
            .state("y", "drive")
            .inputs(["drive"])
            .build()
            .unwrap()
    }

    fn drive_file(root: &Path, model: usize, values: &[f64]) {
        let path = DataDir::new(root).input_path("drive", model).unwrap();
        write_samples(&path, values).unwrap();
    }

    #[test]
    fn sampled_inputs_drive_each_model() {
        let tmp = tempfile::tempdir().unwrap();
        drive_file(tmp.path(), 0, &[0.0, 1.0, 2.0, 3.0]);
        drive_file(tmp.path(), 1, &[1.0; 8]);
        let config = SimulationConfig::new(Method::ForwardEuler, 0.25, 2.0)
            .with_models(2)
            .with_state("y", 0.0)
            .with_input(InputDecl::sampled("drive", f64::NAN, 0.25, EofPolicy::Hold))
            .with_data_dir(tmp.path());

        let mut sim = Simulation::<f64, _>::new(config, integrator_of_drive()).unwrap();
        let summary = sim.run().unwrap();

        assert!(summary.all_finished());
        assert_eq!(summary.models[0].steps, 8);
        // held at 3 after the file ends
        assert_abs_diff_eq!(sim.states(0)[0], 0.25 * (0.0 + 1.0 + 2.0 + 3.0 * 5.0));
        assert_abs_diff_eq!(sim.states(1)[0], 2.0);
        assert_eq!(sim.time(1), 2.0);
    }

    #[test]
    fn halting_input_stops_its_model() {
        let tmp = tempfile::tempdir().unwrap();
        drive_file(tmp.path(), 0, &[0.0, 1.0, 2.0, 3.0]);
        let config = SimulationConfig::new(Method::ForwardEuler, 0.25, 2.0)
            .with_state("y", 0.0)
            .with_input(InputDecl::sampled("drive", f64::NAN, 0.25, EofPolicy::Halt))
            .with_data_dir(tmp.path());

        let mut sim = Simulation::<f64, _>::new(config, integrator_of_drive()).unwrap();
        let summary = sim.run().unwrap();
        assert_eq!(summary.models[0].status, ModelStatus::InputsExhausted);
        assert_eq!(summary.models[0].steps, 4);
        assert_eq!(sim.time(0), 1.0);
        assert_abs_diff_eq!(sim.states(0)[0], 1.5);
        assert_eq!(sim.step(0).unwrap(), StepReport::Stopped);
    }

    #[test]
    fn non_finite_constant_default_is_fatal() {
        let config = SimulationConfig::new(Method::Rk4, 0.1, 1.0)
            .with_flow("v", 0.0, "-v / resistance")
            .with_input(InputDecl::constant("resistance", f64::NAN));
        let err = Simulation::<f64, _>::from_config(config).unwrap_err();
        assert!(matches!(
            &err,
            SimError::Input(InputError::MissingInputValue { name }) if name == "resistance"
        ));
        assert!(err.to_string().contains("resistance"));
    }

    #[test]
    fn configured_equations_run_end_to_end() {
        let source = r#"
num_models = 3
stop_time = 1.0

[solver]
method = "ode45"
timestep = 0.01
abstol = 1e-6
reltol = 1e-6

[parameters]
k = 1.0

[[states]]
name = "y"
initial = 1.0
flow = "-k * y"

[[outputs]]
name = "half"
value = "y / 2"
"#;
        let config = SimulationConfig::from_toml_str(source).unwrap();
        let mut sim = Simulation::<f64, _>::from_config(config).unwrap();
        let summary = sim.run().unwrap();
        assert!(summary.all_finished());
        assert_eq!(sim.integrator().method(), Method::DormandPrince);
        for m in 0..3 {
            let carried = sim.integrator().step_size(m).unwrap();
            assert!(carried >= 0.01 / 1024.0 && carried <= 0.01 * 1024.0);
            assert_abs_diff_eq!(sim.time(m), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(sim.states(m)[0], (-1.0f64).exp(), epsilon = 1e-5);
            // written at the start of the last step
            assert!(sim.outputs(m)[0] > sim.states(m)[0] / 2.0);
        }
    }

    #[test]
    fn parallel_run_matches_sequential_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let data = DataDir::new(tmp.path());
        for m in 0..4 {
            let path = data.initial_states_path(m).unwrap();
            write_samples(&path, &[m as f64 + 1.0, -(m as f64)]).unwrap();
        }
        let config = SimulationConfig::new(Method::DormandPrince, 0.05, 3.0)
            .with_models(4)
            .with_tolerances(1e-8, 1e-8)
            .with_flow("x", 0.0, "y")
            .with_flow("y", 0.0, "-x - 0.1 * y + sin(t)")
            .with_data_dir(tmp.path());

        let mut parallel = Simulation::<f64, _>::from_config(config.clone()).unwrap();
        parallel.run().unwrap();

        let mut sequential = Simulation::<f64, _>::from_config(config).unwrap();
        for m in 0..4 {
            assert_eq!(sequential.states(m), &[m as f64 + 1.0, -(m as f64)]);
            while sequential.step(m).unwrap() == StepReport::Advanced {}
        }
        for m in 0..4 {
            assert_eq!(parallel.states(m), sequential.states(m));
            assert_eq!(parallel.time(m), sequential.time(m));
        }
    }

    #[test]
    fn short_initial_states_file_names_the_state() {
        let tmp = tempfile::tempdir().unwrap();
        let path = DataDir::new(tmp.path()).initial_states_path(0).unwrap();
        write_samples(&path, &[1.0]).unwrap();
        let config = SimulationConfig::new(Method::Rk4, 0.1, 1.0)
            .with_flow("x", 0.0, "y")
            .with_flow("y", 0.0, "-x")
            .with_data_dir(tmp.path());
        let err = Simulation::<f64, _>::from_config(config).unwrap_err();
        assert!(matches!(err, SimError::InitialStates { ref state, model: 0, .. } if state == "y"));
    }

    struct FailsForModel {
        model: usize,
        after: f64,
    }

    impl ModelFlows<f64> for FailsForModel {
        fn state_count(&self) -> usize {
            1
        }

        fn flows(
            &self,
            t: f64,
            _y: &[f64],
            dydt: &mut [f64],
            io: &mut ModelIo<'_, f64>,
        ) -> Result<(), FlowError> {
            if io.model == self.model && t > self.after {
                return Err(FlowError::status(io.model, 7));
            }
            dydt[0] = 1.0;
            Ok(())
        }
    }

    #[test]
    fn flow_failure_stops_only_that_model() {
        let config = SimulationConfig::new(Method::Rk4, 0.25, 2.0)
            .with_models(2)
            .with_state("y", 0.0);
        let flows = FailsForModel {
            model: 1,
            after: 0.6,
        };
        let mut sim = Simulation::<f64, _>::new(config, flows).unwrap();
        let summary = sim.run().unwrap();

        assert_eq!(summary.models[0].status, ModelStatus::Finished);
        assert_eq!(
            summary.models[1].status,
            ModelStatus::Failed(FlowError::status(1, 7))
        );
        assert_eq!(summary.failures().count(), 1);
        // steps at 0 and 0.25 succeed; the step from 0.5 probes t = 0.625
        assert_eq!(sim.time(1), 0.5);
        assert_abs_diff_eq!(sim.states(1)[0], 0.5);
        assert!(!sim.is_running(1));
        assert_abs_diff_eq!(sim.states(0)[0], 2.0);
    }

    #[test]
    fn unimplemented_inputs_depend_on_diagnostics() {
        let base = SimulationConfig::new(Method::Rk4, 0.5, 1.0)
            .with_flow("y", 0.0, "1")
            .with_input(InputDecl::time_value("schedule"));

        let mut sim = Simulation::<f64, _>::from_config(base.clone()).unwrap();
        let err = sim.run().unwrap_err();
        assert!(err.to_string().contains("schedule"));

        let mut quiet = base;
        quiet.diagnostics = false;
        let mut sim = Simulation::<f64, _>::from_config(quiet).unwrap();
        assert!(sim.run().unwrap().all_finished());
        assert!(sim.props().inputs[0].is_nan());
    }

    #[test]
    fn step_rejects_unknown_model() {
        let config = SimulationConfig::new(Method::Rk4, 0.5, 1.0).with_flow("y", 0.0, "1");
        let mut sim = Simulation::<f64, _>::from_config(config).unwrap();
        assert!(matches!(
            sim.step(5),
            Err(SimError::NoSuchModel { model: 5, num_models: 1 })
        ));
        assert_eq!(sim.step(0).unwrap(), StepReport::Advanced);
        assert_eq!(sim.step(0).unwrap(), StepReport::Finished);
        assert_eq!(sim.step(0).unwrap(), StepReport::Stopped);
    }

    #[test]
    fn single_precision_batch() {
        let config = SimulationConfig::new(Method::Rk4, 0.125, 1.0).with_flow("y", 1.0, "-y");
        let mut sim = Simulation::<f32, _>::from_config(config).unwrap();
        assert!(sim.run().unwrap().all_finished());
        assert!((sim.states(0)[0] - (-1.0f32).exp()).abs() < 1e-4);
    }

    #[test]
    fn state_count_must_match_configuration() {
        let config = SimulationConfig::new(Method::Rk4, 0.5, 1.0);
        let err = Simulation::<f64, _>::new(config, integrator_of_drive()).unwrap_err();
        assert!(matches!(err, SimError::StateCountMismatch { model: 1, config: 0 }));
    }
}
