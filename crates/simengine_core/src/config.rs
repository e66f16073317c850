//! Simulation configuration, read once at initialization.
//!
//! ```toml
//! num_models = 16
//! stop_time = 10.0
//! data_dir = "run/data"
//!
//! [solver]
//! method = "ode45"
//! timestep = 0.01
//! abstol = 1e-6
//! reltol = 1e-6
//!
//! [parameters]
//! tau = 20.0
//!
//! [[states]]
//! name = "v"
//! initial = -65.0
//! flow = "(-65 - v + Iapp) / tau"
//!
//! [[inputs]]
//! name = "Iapp"
//! kind = "sampled"
//! default = 0.0
//! timestep = 0.1
//! eof = "hold"
//! ```

use crate::error::ConfigError;
use crate::inputs::{DataDir, EofPolicy, InputCatalog, InputCategory, DEFAULT_BUFFER_SIZE};
use crate::solvers::{Method, NewtonSettings};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

fn unset() -> f64 {
    f64::NAN
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(default)]
    pub kind: InputCategory,
    /// Value used when no data file is present. NaN (the default) means the
    /// input must be supplied by file.
    #[serde(default = "unset")]
    pub default: f64,
    /// Sample interval; required for sampled inputs.
    #[serde(default)]
    pub timestep: Option<f64>,
    #[serde(default)]
    pub eof: EofPolicy,
}

impl InputDecl {
    pub fn constant(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            kind: InputCategory::Constant,
            default,
            timestep: None,
            eof: EofPolicy::default(),
        }
    }

    pub fn sampled(name: impl Into<String>, default: f64, timestep: f64, eof: EofPolicy) -> Self {
        Self {
            name: name.into(),
            kind: InputCategory::Sampled,
            default,
            timestep: Some(timestep),
            eof,
        }
    }

    pub fn time_value(name: impl Into<String>) -> Self {
        Self {
            kind: InputCategory::TimeValue,
            ..Self::constant(name, f64::NAN)
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self {
            kind: InputCategory::Event,
            ..Self::constant(name, f64::NAN)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDecl {
    pub name: String,
    #[serde(default)]
    pub initial: f64,
    /// Derivative expression, for models built from configuration.
    #[serde(default)]
    pub flow: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub value: String,
}

fn default_abstol() -> f64 {
    1e-6
}

fn default_reltol() -> f64 {
    1e-3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub method: Method,
    /// Fixed step, or the nominal step adaptive methods start from.
    pub timestep: f64,
    #[serde(default = "default_abstol")]
    pub abstol: f64,
    #[serde(default = "default_reltol")]
    pub reltol: f64,
    #[serde(default)]
    pub newton: NewtonSettings,
}

fn one() -> usize {
    1
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "one")]
    pub num_models: usize,
    #[serde(default)]
    pub start_time: f64,
    pub stop_time: f64,
    pub solver: SolverConfig,
    #[serde(default)]
    pub states: Vec<StateDecl>,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// Root of the per-model data directories. Without one, every input uses
    /// its default.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub model_id_offset: u32,
    #[serde(default = "default_buffer_size")]
    pub sample_buffer_size: usize,
    /// Whether fatal input diagnostics are available. Without them,
    /// unimplemented input categories read as NaN.
    #[serde(default = "yes")]
    pub diagnostics: bool,
}

impl SimulationConfig {
    pub fn new(method: Method, timestep: f64, stop_time: f64) -> Self {
        Self {
            num_models: 1,
            start_time: 0.0,
            stop_time,
            solver: SolverConfig {
                method,
                timestep,
                abstol: default_abstol(),
                reltol: default_reltol(),
                newton: NewtonSettings::default(),
            },
            states: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: BTreeMap::new(),
            data_dir: None,
            model_id_offset: 0,
            sample_buffer_size: DEFAULT_BUFFER_SIZE,
            diagnostics: true,
        }
    }

    pub fn with_models(mut self, num_models: usize) -> Self {
        self.num_models = num_models;
        self
    }

    pub fn with_tolerances(mut self, abstol: f64, reltol: f64) -> Self {
        self.solver.abstol = abstol;
        self.solver.reltol = reltol;
        self
    }

    pub fn with_state(mut self, name: impl Into<String>, initial: f64) -> Self {
        self.states.push(StateDecl {
            name: name.into(),
            initial,
            flow: None,
        });
        self
    }

    pub fn with_flow(
        mut self,
        name: impl Into<String>,
        initial: f64,
        flow: impl Into<String>,
    ) -> Self {
        self.states.push(StateDecl {
            name: name.into(),
            initial,
            flow: Some(flow.into()),
        });
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_input(mut self, input: InputDecl) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Input names in input-identifier order: grouped by category, in
    /// declaration order within a category.
    pub fn input_names(&self) -> Vec<String> {
        InputCatalog::new(self.inputs.clone(), DataDir::empty())
            .names()
            .map(String::from)
            .collect()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration '{}'.", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("Invalid configuration '{}'.", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.num_models == 0 {
            return invalid("num_models must be at least 1".into());
        }
        if !self.start_time.is_finite() || !self.stop_time.is_finite() {
            return invalid("start_time and stop_time must be finite".into());
        }
        if self.stop_time <= self.start_time {
            return invalid(format!(
                "stop_time {} must be after start_time {}",
                self.stop_time, self.start_time
            ));
        }
        let solver = &self.solver;
        if !(solver.timestep.is_finite() && solver.timestep > 0.0) {
            return invalid(format!("timestep must be positive, got {}", solver.timestep));
        }
        if !(solver.abstol >= 0.0 && solver.reltol >= 0.0) {
            return invalid("tolerances must be non-negative".into());
        }
        if solver.abstol == 0.0 && solver.reltol == 0.0 && solver.method.is_adaptive() {
            return invalid("adaptive methods need a nonzero tolerance".into());
        }
        if solver.newton.max_steps == 0 {
            return invalid("newton.max_steps must be greater than zero".into());
        }
        if solver.newton.damping <= 0.0 || solver.newton.tolerance <= 0.0 {
            return invalid("newton.damping and newton.tolerance must be positive".into());
        }
        if self.sample_buffer_size == 0 {
            return invalid("sample_buffer_size must be at least 1".into());
        }

        let mut names = HashSet::new();
        for input in &self.inputs {
            if !names.insert(input.name.as_str()) {
                return invalid(format!("input '{}' declared twice", input.name));
            }
            if input.kind == InputCategory::Sampled {
                match input.timestep {
                    Some(dt) if dt.is_finite() && dt > 0.0 => {}
                    _ => {
                        return invalid(format!(
                            "sampled input '{}' needs a positive timestep",
                            input.name
                        ))
                    }
                }
            }
        }
        let mut state_names = HashSet::new();
        for state in &self.states {
            if !state_names.insert(state.name.as_str()) {
                return invalid(format!("state '{}' declared twice", state.name));
            }
        }
        let mut output_names = HashSet::new();
        for output in &self.outputs {
            if !output_names.insert(output.name.as_str()) {
                return invalid(format!("output '{}' declared twice", output.name));
            }
        }
        Ok(())
    }
}
