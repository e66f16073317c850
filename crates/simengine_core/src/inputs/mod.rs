//! Input classification and dispatch.
//!
//! Input identifiers form one flat range split, in order, into constant,
//! sampled, time/value-pair and event inputs. [`InputPartition`] turns an
//! identifier into its category and category-local index; [`InputTable`]
//! holds the per-model values and answers `get_input(id, model)`.

pub mod files;
pub mod sampled;

pub use files::DataDir;
pub use sampled::{EofPolicy, RefillOutcome, SampleSource, SampledInput, DEFAULT_BUFFER_SIZE};

use crate::config::InputDecl;
use crate::error::InputError;
use crate::layout::BatchLayout;
use crate::traits::Scalar;
use files::{open_optional, read_samples};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::ops::Range;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCategory {
    #[default]
    Constant,
    Sampled,
    TimeValue,
    Event,
}

impl InputCategory {
    /// Categories in identifier order.
    pub const ALL: [InputCategory; 4] = [
        InputCategory::Constant,
        InputCategory::Sampled,
        InputCategory::TimeValue,
        InputCategory::Event,
    ];

    fn index(self) -> usize {
        match self {
            InputCategory::Constant => 0,
            InputCategory::Sampled => 1,
            InputCategory::TimeValue => 2,
            InputCategory::Event => 3,
        }
    }
}

impl fmt::Display for InputCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InputCategory::Constant => "constant",
            InputCategory::Sampled => "sampled",
            InputCategory::TimeValue => "time/value pair",
            InputCategory::Event => "event",
        };
        f.write_str(label)
    }
}

/// Per-category counts with their prefix sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputPartition {
    counts: [usize; 4],
    starts: [usize; 5],
}

impl InputPartition {
    pub fn new(constant: usize, sampled: usize, time_value: usize, event: usize) -> Self {
        let counts = [constant, sampled, time_value, event];
        let mut starts = [0; 5];
        for (i, count) in counts.iter().enumerate() {
            starts[i + 1] = starts[i] + count;
        }
        Self { counts, starts }
    }

    pub fn total(&self) -> usize {
        self.starts[4]
    }

    pub fn count(&self, category: InputCategory) -> usize {
        self.counts[category.index()]
    }

    pub fn start(&self, category: InputCategory) -> usize {
        self.starts[category.index()]
    }

    pub fn range(&self, category: InputCategory) -> Range<usize> {
        let i = category.index();
        self.starts[i]..self.starts[i + 1]
    }

    /// Category and category-local index of `id`, or None if `id` is not a
    /// declared input.
    pub fn classify(&self, id: usize) -> Option<(InputCategory, usize)> {
        InputCategory::ALL
            .into_iter()
            .find(|category| self.range(*category).contains(&id))
            .map(|category| (category, id - self.start(category)))
    }

    pub fn global_id(&self, category: InputCategory, local: usize) -> usize {
        self.start(category) + local
    }
}

/// The static side of the input subsystem: declarations in identifier order
/// plus where their data lives.
#[derive(Debug, Clone)]
pub struct InputCatalog {
    partition: InputPartition,
    inputs: Vec<InputDecl>,
    data_dir: DataDir,
    buffer_size: usize,
    diagnostics: bool,
}

impl InputCatalog {
    /// Orders `decls` by category (stable within a category) and builds the
    /// partition.
    pub fn new(mut decls: Vec<InputDecl>, data_dir: DataDir) -> Self {
        decls.sort_by_key(|decl| decl.kind.index());
        let count = |kind: InputCategory| decls.iter().filter(|d| d.kind == kind).count();
        let partition = InputPartition::new(
            count(InputCategory::Constant),
            count(InputCategory::Sampled),
            count(InputCategory::TimeValue),
            count(InputCategory::Event),
        );
        Self {
            partition,
            inputs: decls,
            data_dir,
            buffer_size: DEFAULT_BUFFER_SIZE,
            diagnostics: true,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Without diagnostics, unimplemented input categories read as NaN
    /// instead of failing.
    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn partition(&self) -> &InputPartition {
        &self.partition
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn decl(&self, id: usize) -> Option<&InputDecl> {
        self.inputs.get(id)
    }

    /// Input names in identifier order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|decl| decl.name.as_str())
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|decl| decl.name == name)
    }

    fn sampled_decl(&self, local: usize) -> &InputDecl {
        &self.inputs[self.partition.global_id(InputCategory::Sampled, local)]
    }

    fn read_constant(&self, id: usize, model: usize) -> Result<f64, InputError> {
        let decl = &self.inputs[id];
        let mut value = decl.default;
        if let Some(path) = self.data_dir.input_path(&decl.name, model) {
            let io_error = |source| InputError::Io {
                name: decl.name.clone(),
                path: path.clone(),
                source,
            };
            if let Some(mut file) = open_optional(&path).map_err(io_error)? {
                let (values, _) = read_samples(&mut file, 1).map_err(io_error)?;
                value = values.first().copied().ok_or_else(|| {
                    io_error(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "input file holds no value",
                    ))
                })?;
            }
        }
        if !value.is_finite() {
            return Err(InputError::MissingInputValue {
                name: decl.name.clone(),
            });
        }
        Ok(value)
    }
}

/// Live input values for every model of a batch.
#[derive(Debug, Clone)]
pub struct InputTable<T> {
    catalog: InputCatalog,
    constant_layout: BatchLayout,
    constants: Vec<T>,
    sampled_layout: BatchLayout,
    sampled: Vec<SampledInput<T>>,
}

impl<T: Scalar> InputTable<T> {
    /// Reads constant inputs and primes every sampled input at `start_time`.
    pub fn initialize(
        catalog: InputCatalog,
        num_models: usize,
        start_time: T,
    ) -> Result<Self, InputError> {
        let partition = *catalog.partition();
        let constant_layout =
            BatchLayout::new(partition.count(InputCategory::Constant), num_models);
        let sampled_layout = BatchLayout::new(partition.count(InputCategory::Sampled), num_models);

        let mut constants = constant_layout.alloc(T::zero());
        for model in 0..num_models {
            for local in 0..constant_layout.stride() {
                let id = partition.global_id(InputCategory::Constant, local);
                constants[constant_layout.offset(model, local)] =
                    T::lit(catalog.read_constant(id, model)?);
            }
        }

        let mut sampled = Vec::with_capacity(sampled_layout.len());
        for _model in 0..num_models {
            for local in 0..sampled_layout.stride() {
                let decl = catalog.sampled_decl(local);
                sampled.push(SampledInput::new(
                    catalog.buffer_size(),
                    T::lit(decl.timestep.unwrap_or(f64::NAN)),
                    decl.eof,
                    start_time,
                ));
            }
        }

        let mut table = Self {
            catalog,
            constant_layout,
            constants,
            sampled_layout,
            sampled,
        };
        for mut inputs in table.split_mut() {
            inputs.prime(start_time)?;
        }
        debug!(
            models = num_models,
            constant = constant_layout.stride(),
            sampled = sampled_layout.stride(),
            "initialized inputs"
        );
        Ok(table)
    }

    pub fn catalog(&self) -> &InputCatalog {
        &self.catalog
    }

    /// Current value of input `id` for `model`.
    pub fn get_input(&self, id: usize, model: usize) -> Result<T, InputError> {
        lookup(
            &self.catalog,
            self.constant_layout.model(&self.constants, model),
            self.sampled_layout.model(&self.sampled, model),
            id,
        )
    }

    pub fn sampled_input(&self, local: usize, model: usize) -> Option<&SampledInput<T>> {
        (local < self.sampled_layout.stride() && model < self.sampled_layout.num_models())
            .then(|| &self.sampled[self.sampled_layout.offset(model, local)])
    }

    pub fn model(&mut self, model: usize) -> ModelInputs<'_, T> {
        ModelInputs {
            catalog: &self.catalog,
            model,
            constants: self.constant_layout.model(&self.constants, model),
            sampled: self.sampled_layout.model_mut(&mut self.sampled, model),
        }
    }

    /// One disjoint view per model, for advancing models in parallel.
    pub fn split_mut(&mut self) -> Vec<ModelInputs<'_, T>> {
        let catalog = &self.catalog;
        let constants = (0..self.constant_layout.num_models())
            .map(|model| self.constant_layout.model(&self.constants, model));
        self.sampled_layout
            .split_mut(&mut self.sampled)
            .into_iter()
            .zip(constants)
            .enumerate()
            .map(|(model, (sampled, constants))| ModelInputs {
                catalog,
                model,
                constants,
                sampled,
            })
            .collect()
    }
}

/// Input state of a single model.
pub struct ModelInputs<'a, T> {
    catalog: &'a InputCatalog,
    model: usize,
    constants: &'a [T],
    sampled: &'a mut [SampledInput<T>],
}

impl<'a, T: Scalar> ModelInputs<'a, T> {
    pub fn model(&self) -> usize {
        self.model
    }

    pub fn get(&self, id: usize) -> Result<T, InputError> {
        lookup(self.catalog, self.constants, self.sampled, id)
    }

    fn prime(&mut self, start_time: T) -> Result<(), InputError> {
        for local in 0..self.sampled.len() {
            let decl = self.catalog.sampled_decl(local);
            let path = self.catalog.data_dir().input_path(&decl.name, self.model);
            let source = SampleSource {
                name: &decl.name,
                path: path.as_deref(),
                default: decl.default,
            };
            if self.sampled[local].refill(start_time, &source)? == RefillOutcome::Defaulted {
                warn!(
                    input = %decl.name,
                    model = self.model,
                    default = decl.default,
                    "no data file for sampled input; using default value"
                );
            }
        }
        Ok(())
    }

    /// Moves every sampled input to time `t`, refilling exhausted windows.
    /// Returns false if some input has no more data.
    pub fn advance(&mut self, t: T) -> Result<bool, InputError> {
        let mut ready = true;
        for (local, input) in self.sampled.iter_mut().enumerate() {
            if input.advance(t) {
                continue;
            }
            let decl = self.catalog.sampled_decl(local);
            let path = self.catalog.data_dir().input_path(&decl.name, self.model);
            let source = SampleSource {
                name: &decl.name,
                path: path.as_deref(),
                default: decl.default,
            };
            if !input.refill(t, &source)?.is_ready() {
                debug!(input = %decl.name, model = self.model, "sampled input exhausted");
                ready = false;
            }
        }
        Ok(ready)
    }

    /// Writes the current value of every input into `out`, indexed by id.
    pub fn load(&self, out: &mut [T]) -> Result<(), InputError> {
        for (id, slot) in out.iter_mut().enumerate() {
            *slot = self.get(id)?;
        }
        Ok(())
    }
}

fn lookup<T: Scalar>(
    catalog: &InputCatalog,
    constants: &[T],
    sampled: &[SampledInput<T>],
    id: usize,
) -> Result<T, InputError> {
    let partition = catalog.partition();
    let Some((category, local)) = partition.classify(id) else {
        return Err(InputError::InvalidInputId {
            id,
            total: partition.total(),
        });
    };
    match category {
        InputCategory::Constant => Ok(constants[local]),
        InputCategory::Sampled => {
            let input = &sampled[local];
            assert!(
                input.cursor() < input.capacity(),
                "sampled input '{}' cursor {} past buffer capacity {}",
                catalog.inputs[id].name,
                input.cursor(),
                input.capacity()
            );
            Ok(input.current())
        }
        InputCategory::TimeValue | InputCategory::Event if !catalog.diagnostics() => Ok(T::nan()),
        InputCategory::TimeValue | InputCategory::Event => Err(InputError::NotImplemented {
            category,
            name: catalog.inputs[id].name.clone(),
        }),
    }
}
