//! External sorter facade.

use std::marker::PhantomData;
use std::path::PathBuf;

use log;

use crate::error::{Result, SortError};
use crate::generator::RunGenerator;
use crate::merger::MergeScheduler;
use crate::record::Record;
use crate::store::{RunDescriptor, RunStore};

/// Sorter configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tournament size: records held in the in-memory workspace.
    pub k: usize,
    /// I/O block size in records.
    pub buffer_elems: usize,
    /// Run directory capacity. Must exceed the expected run count, merge
    /// outputs included.
    pub max_runs: usize,
    /// Path of the run container file. Created (truncated) by the sort.
    pub run_file_path: PathBuf,
    /// Path of the unsorted input.
    pub input_path: PathBuf,
}

impl Config {
    /// Checks the numeric options.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(SortError::InvalidConfig("k must be greater than zero"));
        }
        if self.buffer_elems == 0 {
            return Err(SortError::InvalidConfig("buffer_elems must be greater than zero"));
        }
        if self.max_runs == 0 {
            return Err(SortError::InvalidConfig("max_runs must be greater than zero"));
        }
        Ok(())
    }
}

/// Outcome of a completed sort.
pub struct SortOutcome {
    /// The run store, with every intermediate run still on disk.
    pub store: RunStore,
    /// Runs produced by phase 1, in generation order.
    pub generated_runs: Vec<RunDescriptor>,
    /// The single sorted run produced by phase 2.
    pub final_run: RunDescriptor,
}

/// Two-phase external sorter: replacement selection, then optimal merging.
pub struct ExternalSorter<T: Record> {
    config: Config,
    record: PhantomData<T>,
}

impl<T: Record> ExternalSorter<T> {
    /// Creates a sorter from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(ExternalSorter {
            config,
            record: PhantomData,
        })
    }

    /// Runs both phases and returns the store together with the final run.
    pub fn sort(&self) -> Result<SortOutcome> {
        let mut store = RunStore::create(&self.config.run_file_path, self.config.max_runs)?;

        log::info!(
            "phase 1: replacement selection over a {}-record workspace",
            self.config.k
        );
        let generator = RunGenerator::<T>::new(self.config.k, self.config.buffer_elems)?;
        let generated_runs = generator.generate(&self.config.input_path, &mut store)?;

        log::info!("phase 2: merging {} runs", generated_runs.len());
        let scheduler = MergeScheduler::<T>::new(self.config.buffer_elems)?;
        let final_run = scheduler.sort(&generated_runs, &mut store)?;

        log::info!("sorted {} records", final_run.element_count);
        return Ok(SortOutcome {
            store,
            generated_runs,
            final_run,
        });
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::PathBuf;

    use rand::prelude::*;
    use rstest::*;

    use super::{Config, ExternalSorter};
    use crate::buffer::InputBuffer;
    use crate::record::Record;
    use crate::store::{RunDescriptor, RunStore};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write_input(dir: &tempfile::TempDir, values: &[i32]) -> PathBuf {
        let path = dir.path().join("input.dat");
        let mut raw = Vec::with_capacity(values.len() * 4);
        let mut scratch = [0u8; 4];
        for value in values {
            value.to_bytes(&mut scratch);
            raw.extend_from_slice(&scratch);
        }
        fs::write(&path, raw).unwrap();
        path
    }

    fn read_run(store: &RunStore, run: &RunDescriptor, block_elems: usize) -> Vec<i32> {
        let mut input = InputBuffer::<i32>::new(store.stream(), *run, block_elems);
        let mut items = Vec::new();
        while let Some(item) = input.next().unwrap() {
            items.push(item);
        }
        items
    }

    fn config(dir: &tempfile::TempDir, input: PathBuf, k: usize, max_runs: usize) -> Config {
        Config {
            k,
            buffer_elems: 4,
            max_runs,
            run_file_path: dir.path().join("runs.dat"),
            input_path: input,
        }
    }

    #[rstest]
    fn test_sorts_empty_input(tmp_dir: tempfile::TempDir) {
        let input = write_input(&tmp_dir, &[]);
        let sorter = ExternalSorter::<i32>::new(config(&tmp_dir, input, 4, 32)).unwrap();
        let outcome = sorter.sort().unwrap();

        assert!(outcome.generated_runs.is_empty());
        assert_eq!(outcome.final_run.element_count, 0);
        assert!(read_run(&outcome.store, &outcome.final_run, 4).is_empty());
    }

    #[rstest]
    fn test_sorts_small_inputs(tmp_dir: tempfile::TempDir) {
        let values = [3, 1, 4, 1, 5, 9, 2, 6];
        let input = write_input(&tmp_dir, &values);
        let sorter = ExternalSorter::<i32>::new(config(&tmp_dir, input, 4, 32)).unwrap();
        let outcome = sorter.sort().unwrap();

        assert_eq!(
            read_run(&outcome.store, &outcome.final_run, 4),
            vec![1, 1, 2, 3, 4, 5, 6, 9]
        );
    }

    #[rstest]
    fn test_run_file_reopens_cleanly(tmp_dir: tempfile::TempDir) {
        let values: Vec<i32> = (1..=50).rev().collect();
        let input = write_input(&tmp_dir, &values);
        let run_file = tmp_dir.path().join("runs.dat");
        let sorter = ExternalSorter::<i32>::new(config(&tmp_dir, input, 4, 64)).unwrap();
        let outcome = sorter.sort().unwrap();
        let final_run = outcome.final_run;
        outcome.store.close().unwrap();

        let reopened = RunStore::open(&run_file).unwrap();
        let descriptor = reopened.descriptor(final_run.id).unwrap();
        assert_eq!(descriptor, final_run);
        assert_eq!(
            read_run(&reopened, &descriptor, 4),
            (1..=50).collect::<Vec<i32>>()
        );
    }

    #[rstest]
    fn test_sorts_large_random_input(tmp_dir: tempfile::TempDir) {
        let n = 1 << 20;
        let k = 1024;
        let mut rng = StdRng::seed_from_u64(6);
        let values: Vec<i32> = (0..n).map(|_| rng.gen()).collect();
        let input = write_input(&tmp_dir, &values);

        let sorter = ExternalSorter::<i32>::new(Config {
            k,
            buffer_elems: 1024,
            max_runs: 4096,
            run_file_path: tmp_dir.path().join("runs.dat"),
            input_path: input,
        })
        .unwrap();
        let outcome = sorter.sort().unwrap();

        // replacement selection produces runs averaging ~2k records
        let runs = outcome.generated_runs.len();
        assert!(
            runs >= n / (2 * k) && runs <= n / k,
            "got {} runs for n={} k={}",
            runs,
            n,
            k
        );
        assert_eq!(
            outcome
                .generated_runs
                .iter()
                .map(|r| r.element_count)
                .sum::<u64>(),
            n as u64
        );

        let mut expected = values;
        expected.sort();
        assert_eq!(read_run(&outcome.store, &outcome.final_run, 1024), expected);
    }

    #[rstest]
    #[case(0, 4, 32)]
    #[case(4, 0, 32)]
    #[case(4, 4, 0)]
    fn test_rejects_bad_config(
        tmp_dir: tempfile::TempDir,
        #[case] k: usize,
        #[case] buffer_elems: usize,
        #[case] max_runs: usize,
    ) {
        let cfg = Config {
            k,
            buffer_elems,
            max_runs,
            run_file_path: tmp_dir.path().join("runs.dat"),
            input_path: tmp_dir.path().join("input.dat"),
        };
        assert!(ExternalSorter::<i32>::new(cfg).is_err());
    }
}
