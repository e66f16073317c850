//! The `simengine_core` crate integrates batches of independent ODE model
//! instances. All per-model data lives in flat model-major arrays so every
//! model of a batch can be advanced in parallel, and every quantity is
//! generic over the storage precision (`f32` or `f64`).
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `ModelFlows` (the model evaluation callback).
//! - **Layout**: `BatchLayout`, the stride/offset addressing shared by every per-model array.
//! - **Inputs**: classification of input identifiers into constant, sampled, time/value and
//!   event inputs, and the file-backed read-ahead buffers behind sampled inputs.
//! - **Solvers**: forward Euler, RK4, Bogacki-Shampine 3(2), Dormand-Prince 5(4) and
//!   backward Euler behind one `Stepper` interface, selected at run time by `Method`.
//! - **Equation Engine**: a bytecode VM for models written as expressions.
//! - **Simulation**: the batch driver wiring inputs and integrator together.
//! - **Config**: TOML-backed `SimulationConfig`.

pub mod config;
pub mod equation_engine;
pub mod error;
pub mod inputs;
pub mod layout;
pub mod simulation;
pub mod solvers;
pub mod traits;

pub use config::SimulationConfig;
pub use error::{FlowError, InputError, SimError, SimResult};
pub use simulation::{RunSummary, Simulation, StepReport};
pub use solvers::Method;
pub use traits::{ModelFlows, ModelIo, Scalar};
