use crate::inputs::InputCategory;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported while evaluating one integration step of one model.
///
/// A flow error stops the affected model only; other models of the batch
/// keep running.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("model {model}: flow evaluation returned status {status}")]
    Status { model: usize, status: i32 },
    #[error("model {model}: no convergence after {iterations} iterations (residual {residual})")]
    NoConvergence {
        model: usize,
        iterations: usize,
        residual: f64,
    },
    #[error("model {model}: implicit iteration matrix is singular")]
    SingularMatrix { model: usize },
}

impl FlowError {
    pub fn status(model: usize, status: i32) -> Self {
        FlowError::Status { model, status }
    }

    /// Nonzero status code for drivers that want the numeric form.
    pub fn code(&self) -> i32 {
        match self {
            FlowError::Status { status, .. } if *status != 0 => *status,
            FlowError::Status { .. } => 1,
            FlowError::NoConvergence { .. } => 2,
            FlowError::SingularMatrix { .. } => 3,
        }
    }

    pub fn model(&self) -> usize {
        match self {
            FlowError::Status { model, .. }
            | FlowError::NoConvergence { model, .. }
            | FlowError::SingularMatrix { model } => *model,
        }
    }
}

/// Fatal input configuration and data errors. Every variant names the input
/// it concerns.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("no such input id {id} (model declares {total} inputs)")]
    InvalidInputId { id: usize, total: usize },
    #[error("{category} inputs not yet implemented (input '{name}')")]
    NotImplemented { category: InputCategory, name: String },
    #[error("no value set for input '{name}'; value must be set to simulate model")]
    MissingInputValue { name: String },
    #[error("no data file for input '{name}', which halts at end of data; a file must be provided")]
    HaltWithoutFile { name: String },
    #[error("input file '{}' for input '{name}' could not be opened", path.display())]
    InputFileVanished { name: String, path: PathBuf },
    #[error("invalid value '{value}' in position {position} for input '{name}'")]
    NonFiniteSample {
        name: String,
        value: f64,
        position: u64,
    },
    #[error("could not read input '{name}' from '{}': {source}", path.display())]
    Io {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Problems found while parsing or compiling model equations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquationError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown variable or parameter '{0}'")]
    UnknownName(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("name '{0}' is defined more than once")]
    DuplicateName(String),
    #[error("state '{0}' has no flow equation")]
    MissingFlow(String),
    #[error("malformed bytecode: {0}")]
    Malformed(&'static str),
}

/// Invalid simulation configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown integration method '{0}'")]
    UnknownMethod(String),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors surfaced while setting up or driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Equation(#[from] EquationError),
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("model declares {model} states but configuration lists {config}")]
    StateCountMismatch { model: usize, config: usize },
    #[error("could not read state '{state}' for model {model} from '{}'", path.display())]
    InitialStates {
        state: String,
        model: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model index {model} out of range for a batch of {num_models}")]
    NoSuchModel { model: usize, num_models: usize },
}

pub type SimResult<T> = Result<T, SimError>;
