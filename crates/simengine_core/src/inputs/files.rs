//! Per-model data directories and raw sample file access.
//!
//! Model `m` keeps its files under `<root>/<xx>/<yy>/<zz>/`, the three low
//! bytes of `m + model_id_offset` in hex. Input `name` of that model lives at
//! `inputs/<name>`, initial states at `initial-states`. All files are flat
//! sequences of native-endian f64 values.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Width in bytes of one stored sample.
pub const SAMPLE_WIDTH: u64 = std::mem::size_of::<f64>() as u64;

#[derive(Debug, Clone, Default)]
pub struct DataDir {
    root: Option<PathBuf>,
    model_id_offset: u32,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            model_id_offset: 0,
        }
    }

    /// A data directory with no files at all; every input uses its default.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Offsets model indices, for batches that are a slice of a larger run.
    pub fn with_model_id_offset(mut self, offset: u32) -> Self {
        self.model_id_offset = offset;
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn model_dir(&self, model: usize) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let id = (model as u64).wrapping_add(u64::from(self.model_id_offset));
        let mut dir = root.clone();
        for shift in [16u32, 8, 0] {
            dir.push(format!("{:02x}", (id >> shift) & 0xff));
        }
        Some(dir)
    }

    pub fn input_path(&self, name: &str, model: usize) -> Option<PathBuf> {
        Some(self.model_dir(model)?.join("inputs").join(name))
    }

    pub fn initial_states_path(&self, model: usize) -> Option<PathBuf> {
        Some(self.model_dir(model)?.join("initial-states"))
    }
}

/// Opens `path` for reading; a missing file is `Ok(None)`.
pub fn open_optional(path: &Path) -> io::Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Reads up to `max` samples. The flag is true when the reader ran out
/// before `max` samples were read.
pub fn read_samples<R: Read>(reader: &mut R, max: usize) -> io::Result<(Vec<f64>, bool)> {
    let width = SAMPLE_WIDTH as usize;
    let mut bytes = vec![0u8; max * width];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    let count = filled / width;
    let values = bytes[..count * width]
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned::<f64>)
        .collect();
    Ok((values, count < max))
}

/// Writes `values` as a sample file, creating parent directories.
pub fn write_samples(path: &Path, values: &[f64]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(bytemuck::cast_slice(values))?;
    file.flush()
}
