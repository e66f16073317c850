//! Sampled input streaming.
//!
//! Each sampled input of each model is presented as if its whole sample
//! file were in memory, while only a fixed window of `capacity` samples is
//! held. [`SampledInput::advance`] moves the read cursor with simulation time
//! and never touches the file; once the cursor leaves the window the caller
//! runs [`SampledInput::refill`], which seeks and reads the next window and
//! applies the end-of-data policy when the file runs out.

use super::files::{open_optional, read_samples, SAMPLE_WIDTH};
use crate::error::InputError;
use crate::traits::Scalar;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Read-ahead window used when the configuration does not set one.
pub const DEFAULT_BUFFER_SIZE: usize = 64;

/// What a sampled input does once its file is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EofPolicy {
    /// Stop supplying data; the model halts.
    #[default]
    Halt,
    /// Freeze at the last observed value.
    Hold,
    /// Start over from the beginning of the file.
    Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// At least one sample was buffered from the file.
    Filled,
    /// No file exists; the buffer holds the configured default.
    Defaulted,
    /// The file has no more data for this input.
    Exhausted,
}

impl RefillOutcome {
    pub fn is_ready(self) -> bool {
        !matches!(self, RefillOutcome::Exhausted)
    }
}

/// Where a refill gets its data.
#[derive(Debug, Clone, Copy)]
pub struct SampleSource<'a> {
    pub name: &'a str,
    /// Backing file, if the model has a data directory at all.
    pub path: Option<&'a Path>,
    /// Value used when there is no file. Non-finite means "unset".
    pub default: f64,
}

#[derive(Debug, Clone)]
pub struct SampledInput<T> {
    data: Vec<T>,
    cursor: usize,
    buffered: usize,
    // Simulation time of the sample under the cursor.
    time: T,
    file_offset: u64,
    timestep: T,
    policy: EofPolicy,
    has_file: bool,
}

impl<T: Scalar> SampledInput<T> {
    /// An empty entry positioned at `start_time`. Call [`refill`](Self::refill)
    /// before reading.
    pub fn new(capacity: usize, timestep: T, policy: EofPolicy, start_time: T) -> Self {
        Self {
            data: vec![T::zero(); capacity.max(1)],
            cursor: 0,
            buffered: 0,
            time: start_time,
            file_offset: 0,
            timestep,
            policy,
            has_file: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn time(&self) -> T {
        self.time
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn policy(&self) -> EofPolicy {
        self.policy
    }

    pub fn has_file(&self) -> bool {
        self.has_file
    }

    /// Whole samples between the cursor sample and `t`, truncated toward zero.
    fn samples_since(&self, t: T) -> i64 {
        ((t - self.time) / self.timestep).trunc().to_i64().unwrap_or(0)
    }

    /// Buffered sample under the cursor.
    ///
    /// # Panics
    /// If the cursor is outside the buffered window. Callers must refill
    /// whenever [`advance`](Self::advance) returns false.
    pub fn current(&self) -> T {
        assert!(
            self.cursor < self.buffered,
            "sampled input read outside its buffered window (cursor {}, buffered {})",
            self.cursor,
            self.buffered
        );
        self.data[self.cursor]
    }

    /// Moves the cursor to `t` without any I/O. Returns false when the cursor
    /// has left the buffered window and a refill is needed.
    pub fn advance(&mut self, t: T) -> bool {
        let mut skipped = 0;
        if self.has_file {
            skipped = self.samples_since(t);
            self.cursor = self.cursor.saturating_add_signed(skipped as isize);
            if self.policy == EofPolicy::Hold
                && self.buffered < self.capacity()
                && self.cursor >= self.buffered
            {
                self.cursor = self.buffered.saturating_sub(1);
            }
        } else if self.policy == EofPolicy::Halt {
            return false;
        }
        self.time = self.time + T::lit(skipped as f64) * self.timestep;
        self.cursor < self.buffered
    }

    /// Loads the window starting at the sample for time `t`.
    pub fn refill(&mut self, t: T, source: &SampleSource<'_>) -> Result<RefillOutcome, InputError> {
        let Some(path) = source.path else {
            return self.use_default(source);
        };
        let io_error = |err| InputError::Io {
            name: source.name.to_string(),
            path: path.to_path_buf(),
            source: err,
        };
        let Some(mut file) = open_optional(path).map_err(io_error)? else {
            return self.use_default(source);
        };
        self.has_file = true;

        let capacity = self.capacity();
        let elapsed = self.samples_since(t);
        // The cursor sample sits `buffered - cursor` samples before the
        // current file offset.
        let unread = if self.buffered > 0 {
            self.buffered as i64 - self.cursor as i64
        } else {
            0
        };
        let skip = elapsed - unread;
        let held = self.buffered.checked_sub(1).map(|last| self.data[last]);

        let mut target = self.file_offset as i64 + skip * SAMPLE_WIDTH as i64;
        if self.policy == EofPolicy::Cycle && target > 0 {
            let file_len = file.metadata().map_err(io_error)?.len();
            let period = (file_len / SAMPLE_WIDTH * SAMPLE_WIDTH) as i64;
            if period > 0 {
                target %= period;
            }
        }

        let mut read = 0;
        let mut eof = false;
        if target >= 0 && file.seek(SeekFrom::Start(target as u64)).is_ok() {
            let (values, hit_end) = read_samples(&mut file, capacity).map_err(io_error)?;
            self.store(0, &values, target as u64 / SAMPLE_WIDTH, source.name)?;
            read = values.len();
            eof = hit_end;
            self.file_offset = target as u64 + read as u64 * SAMPLE_WIDTH;
        }

        self.buffered = read;
        self.cursor = 0;
        self.time = self.time + T::lit(elapsed as f64) * self.timestep;

        if eof {
            match self.policy {
                EofPolicy::Halt => {}
                EofPolicy::Hold => {
                    if read == 0 {
                        if let Some(value) = held {
                            self.data[0] = value;
                            self.buffered = 1;
                        }
                    }
                }
                EofPolicy::Cycle => self.wrap_around(&mut file, path, source)?,
            }
        }

        debug!(
            input = source.name,
            skip,
            read,
            buffered = self.buffered,
            offset = self.file_offset,
            eof,
            "refilled sampled input"
        );

        Ok(if self.buffered > 0 {
            RefillOutcome::Filled
        } else {
            RefillOutcome::Exhausted
        })
    }

    fn use_default(&mut self, source: &SampleSource<'_>) -> Result<RefillOutcome, InputError> {
        if self.has_file {
            return Err(InputError::InputFileVanished {
                name: source.name.to_string(),
                path: source.path.map(Path::to_path_buf).unwrap_or_default(),
            });
        }
        if !source.default.is_finite() {
            return Err(InputError::MissingInputValue {
                name: source.name.to_string(),
            });
        }
        if self.policy == EofPolicy::Halt {
            return Err(InputError::HaltWithoutFile {
                name: source.name.to_string(),
            });
        }
        self.data[0] = T::lit(source.default);
        self.buffered = 1;
        self.cursor = 0;
        Ok(RefillOutcome::Defaulted)
    }

    /// Fills the rest of the window by rereading the file from its start.
    /// The file offset ends up at the end of the last segment read.
    fn wrap_around(
        &mut self,
        file: &mut File,
        path: &Path,
        source: &SampleSource<'_>,
    ) -> Result<(), InputError> {
        let io_error = |err| InputError::Io {
            name: source.name.to_string(),
            path: path.to_path_buf(),
            source: err,
        };
        self.file_offset = 0;
        while self.buffered < self.capacity() {
            file.seek(SeekFrom::Start(0)).map_err(io_error)?;
            let (values, _) =
                read_samples(file, self.capacity() - self.buffered).map_err(io_error)?;
            if values.is_empty() {
                break;
            }
            self.store(self.buffered, &values, 0, source.name)?;
            self.buffered += values.len();
            self.file_offset = values.len() as u64 * SAMPLE_WIDTH;
        }
        Ok(())
    }

    fn store(
        &mut self,
        at: usize,
        values: &[f64],
        first_position: u64,
        name: &str,
    ) -> Result<(), InputError> {
        for (i, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                return Err(InputError::NonFiniteSample {
                    name: name.to_string(),
                    value,
                    position: first_position + i as u64,
                });
            }
            self.data[at + i] = T::lit(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::files::write_samples;
    use std::path::PathBuf;

    fn source<'a>(name: &'a str, path: &'a Path, default: f64) -> SampleSource<'a> {
        SampleSource {
            name,
            path: Some(path),
            default,
        }
    }

    fn sample_file(dir: &Path, values: &[f64]) -> PathBuf {
        let path = dir.join("samples");
        write_samples(&path, values).unwrap();
        path
    }

    /// Advances to `t`, refilling when the window runs out, and returns the
    /// value seen there (None once exhausted).
    fn sample_at(input: &mut SampledInput<f64>, t: f64, src: &SampleSource<'_>) -> Option<f64> {
        if !input.advance(t) && !input.refill(t, src).unwrap().is_ready() {
            return None;
        }
        Some(input.current())
    }

    #[test]
    fn refill_skips_to_requested_time() {
        let tmp = tempfile::tempdir().unwrap();
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let path = sample_file(tmp.path(), &values);
        let src = source("u", &path, f64::NAN);

        let mut input = SampledInput::<f64>::new(64, 0.1, EofPolicy::Halt, 0.0);
        let outcome = input.refill(6.4, &src).unwrap();

        assert_eq!(outcome, RefillOutcome::Filled);
        // 6.4 / 0.1 = 64 samples skipped, seek to byte 64 * 8, then 64 read.
        assert_eq!(input.current(), 64.0);
        assert_eq!(input.buffered(), 64);
        assert_eq!(input.file_offset(), (64 + 64) * SAMPLE_WIDTH);
        assert!((input.time() - 6.4).abs() < 1e-12);
    }

    #[test]
    fn advance_walks_window_then_requests_refill() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Halt, 0.0);
        input.refill(0.0, &src).unwrap();

        assert_eq!(input.current(), 1.0);
        assert!(input.advance(0.5));
        assert_eq!(input.current(), 2.0);
        assert!(!input.advance(1.0));
        assert_eq!(input.refill(1.0, &src).unwrap(), RefillOutcome::Filled);
        assert_eq!(input.current(), 3.0);
        // Jumping two samples lands on the last one.
        assert_eq!(sample_at(&mut input, 2.0, &src), Some(5.0));
    }

    #[test]
    fn halt_policy_exhausts_after_last_sample() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0, 3.0]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Halt, 0.0);
        input.refill(0.0, &src).unwrap();

        assert_eq!(sample_at(&mut input, 0.5, &src), Some(2.0));
        assert_eq!(sample_at(&mut input, 1.0, &src), Some(3.0));
        assert_eq!(sample_at(&mut input, 1.5, &src), None);
    }

    #[test]
    fn hold_policy_freezes_on_last_value() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0, 3.0]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Hold, 0.0);
        input.refill(0.0, &src).unwrap();

        assert_eq!(sample_at(&mut input, 0.5, &src), Some(2.0));
        assert_eq!(sample_at(&mut input, 1.0, &src), Some(3.0));
        for step in 3..40 {
            assert_eq!(sample_at(&mut input, step as f64 * 0.5, &src), Some(3.0));
        }
    }

    #[test]
    fn hold_policy_keeps_value_when_full_window_ends_exactly_at_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0, 3.0, 4.0]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Hold, 0.0);
        input.refill(0.0, &src).unwrap();

        let seen: Vec<_> = (1..10)
            .map(|step| sample_at(&mut input, step as f64 * 0.5, &src))
            .collect();
        assert_eq!(seen[..3], [Some(2.0), Some(3.0), Some(4.0)]);
        assert!(seen[3..].iter().all(|v| *v == Some(4.0)));
    }

    #[test]
    fn cycle_policy_is_periodic_in_file_length() {
        let tmp = tempfile::tempdir().unwrap();
        let file_values = [1.0, 2.0, 3.0];
        let path = sample_file(tmp.path(), &file_values);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Cycle, 0.0);
        input.refill(0.0, &src).unwrap();

        let mut seen = vec![input.current()];
        for step in 1..20 {
            seen.push(sample_at(&mut input, step as f64 * 0.5, &src).unwrap());
        }
        for (step, value) in seen.iter().enumerate() {
            assert_eq!(*value, file_values[step % 3], "step {step}");
        }
        for step in 0..seen.len() - 3 {
            assert_eq!(seen[step], seen[step + 3]);
        }
    }

    #[test]
    fn cycle_policy_fills_window_longer_than_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(5, 0.25, EofPolicy::Cycle, 0.0);
        input.refill(0.0, &src).unwrap();

        assert_eq!(input.buffered(), 5);
        // Last wraparound segment was a single sample.
        assert_eq!(input.file_offset(), SAMPLE_WIDTH);
        let seen: Vec<_> = (0..12)
            .map(|step| sample_at(&mut input, step as f64 * 0.25, &src).unwrap())
            .collect();
        for (step, value) in seen.iter().enumerate() {
            assert_eq!(*value, if step % 2 == 0 { 1.0 } else { 2.0 });
        }
    }

    #[test]
    fn cycle_policy_keeps_phase_across_large_jumps() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0, 3.0]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Cycle, 0.0);
        input.refill(0.0, &src).unwrap();

        // Nine samples later is a whole number of periods.
        assert_eq!(sample_at(&mut input, 4.5, &src), Some(1.0));
        assert_eq!(sample_at(&mut input, 5.5, &src), Some(3.0));
    }

    #[test]
    fn cycle_policy_with_empty_file_is_exhausted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f64>::new(4, 0.5, EofPolicy::Cycle, 0.0);
        assert_eq!(input.refill(0.0, &src).unwrap(), RefillOutcome::Exhausted);
        assert!(!input.advance(0.5));
    }

    #[test]
    fn missing_file_uses_default_unless_halting() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent");

        let mut hold = SampledInput::<f64>::new(4, 0.5, EofPolicy::Hold, 0.0);
        let outcome = hold.refill(0.0, &source("u", &path, 7.5)).unwrap();
        assert_eq!(outcome, RefillOutcome::Defaulted);
        assert_eq!(hold.current(), 7.5);
        for step in 1..10 {
            assert!(hold.advance(step as f64 * 0.5));
            assert_eq!(hold.current(), 7.5);
        }

        let mut halt = SampledInput::<f64>::new(4, 0.5, EofPolicy::Halt, 0.0);
        let err = halt.refill(0.0, &source("u", &path, 7.5)).unwrap_err();
        assert!(matches!(err, InputError::HaltWithoutFile { ref name } if name == "u"));
    }

    #[test]
    fn missing_file_without_default_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent");
        let mut input = SampledInput::<f64>::new(4, 0.5, EofPolicy::Cycle, 0.0);
        let err = input.refill(0.0, &source("drive", &path, f64::NAN)).unwrap_err();
        assert!(err.to_string().contains("'drive'"));
    }

    #[test]
    fn vanished_file_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0]);
        let src = source("u", &path, 0.0);
        let mut input = SampledInput::<f64>::new(2, 0.5, EofPolicy::Hold, 0.0);
        input.refill(0.0, &src).unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = input.refill(1.0, &src).unwrap_err();
        assert!(matches!(err, InputError::InputFileVanished { .. }));
    }

    #[test]
    fn non_finite_sample_reports_position() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[1.0, 2.0, f64::INFINITY]);
        let src = source("u", &path, 0.0);
        let mut input = SampledInput::<f64>::new(8, 0.5, EofPolicy::Hold, 0.0);
        match input.refill(0.0, &src) {
            Err(InputError::NonFiniteSample { name, position, .. }) => {
                assert_eq!(name, "u");
                assert_eq!(position, 2);
            }
            other => panic!("expected non-finite sample error, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "outside its buffered window")]
    fn reading_exhausted_input_panics() {
        let input = SampledInput::<f64>::new(4, 0.5, EofPolicy::Halt, 0.0);
        input.current();
    }

    #[test]
    fn single_precision_storage_converts_samples() {
        let tmp = tempfile::tempdir().unwrap();
        let path = sample_file(tmp.path(), &[0.5, 1.25]);
        let src = source("u", &path, f64::NAN);
        let mut input = SampledInput::<f32>::new(4, 0.5, EofPolicy::Halt, 0.0);
        input.refill(0.0, &src).unwrap();
        assert_eq!(input.current(), 0.5f32);
        assert!(input.advance(0.5));
        assert_eq!(input.current(), 1.25f32);
    }
}
