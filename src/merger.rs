//! Optimal merge scheduling.
//!
//! Runs come out of phase 1 with unequal lengths, so the order in which they
//! are merged matters: repeatedly merging the two shortest live runs builds
//! the Huffman tree over run lengths and minimises total bytes moved.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

use log;

use crate::buffer::{InputBuffer, OutputBuffer};
use crate::error::{Result, SortError};
use crate::record::Record;
use crate::store::{RunDescriptor, RunStore};

/// Phase-2 merge scheduler.
///
/// Two-way merges are scheduled by a min-heap on `(element_count, run_id)`;
/// the id tie-break keeps equal-length merges deterministic.
pub struct MergeScheduler<T: Record> {
    buffer_elems: usize,
    record: PhantomData<T>,
}

impl<T: Record> MergeScheduler<T> {
    /// Creates a scheduler using `buffer_elems`-record I/O blocks.
    pub fn new(buffer_elems: usize) -> Result<Self> {
        if buffer_elems == 0 {
            return Err(SortError::InvalidConfig("buffer_elems must be greater than zero"));
        }
        Ok(MergeScheduler {
            buffer_elems,
            record: PhantomData,
        })
    }

    /// Merges `runs` down to a single sorted run and returns its descriptor.
    ///
    /// An empty `runs` slice yields an allocated, zero-length run so the
    /// result is always readable.
    pub fn sort(&self, runs: &[RunDescriptor], store: &mut RunStore) -> Result<RunDescriptor> {
        if runs.is_empty() {
            let id = store.allocate()?;
            return store.descriptor(id);
        }

        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = runs
            .iter()
            .map(|run| Reverse((run.element_count, run.id)))
            .collect();

        loop {
            match (heap.pop(), heap.pop()) {
                (Some(Reverse((_, left_id))), Some(Reverse((_, right_id)))) => {
                    let left = store.descriptor(left_id)?;
                    let right = store.descriptor(right_id)?;
                    log::debug!(
                        "merging run {} ({} records) with run {} ({} records)",
                        left.id,
                        left.element_count,
                        right.id,
                        right.element_count
                    );
                    let merged = self.merge_pair(store, &left, &right)?;
                    heap.push(Reverse((merged.element_count, merged.id)));
                }
                (Some(Reverse((_, id))), None) => {
                    log::info!("merge complete: run {} is the sorted output", id);
                    return store.descriptor(id);
                }
                (None, _) => unreachable!("the merge heap is seeded with at least one run"),
            }
        }
    }

    /// Two-way merge of `left` and `right` into a freshly allocated run.
    fn merge_pair(
        &self,
        store: &mut RunStore,
        left: &RunDescriptor,
        right: &RunDescriptor,
    ) -> Result<RunDescriptor> {
        let id = store.allocate()?;
        // the data area ends with the previous run fully written, so this is
        // the merged run's first byte
        let start = store.append_offset()?;

        let element_count = {
            let stream = store.stream();
            let mut left_in = InputBuffer::<T>::new(stream, *left, self.buffer_elems);
            let mut right_in = InputBuffer::<T>::new(stream, *right, self.buffer_elems);
            let mut out = OutputBuffer::<T>::new(stream, start, self.buffer_elems);

            let mut left_head = left_in.next()?;
            let mut right_head = right_in.next()?;
            while let (Some(a), Some(b)) = (left_head, right_head) {
                if b < a {
                    out.push(b)?;
                    right_head = right_in.next()?;
                } else {
                    out.push(a)?;
                    left_head = left_in.next()?;
                }
            }
            while let Some(a) = left_head {
                out.push(a)?;
                left_head = left_in.next()?;
            }
            while let Some(b) = right_head {
                out.push(b)?;
                right_head = right_in.next()?;
            }

            out.flush()?;
            out.element_count()
        };

        store.finalize(id, start, element_count)?;
        store.descriptor(id)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    use rstest::*;

    use super::MergeScheduler;
    use crate::buffer::{InputBuffer, OutputBuffer};
    use crate::store::{RunDescriptor, RunStore};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn append_run(store: &mut RunStore, items: &[i32]) -> RunDescriptor {
        let id = store.allocate().unwrap();
        let start = store.append_offset().unwrap();
        {
            let mut out = OutputBuffer::<i32>::new(store.stream(), start, 4);
            for &item in items {
                out.push(item).unwrap();
            }
            out.flush().unwrap();
        }
        store.finalize(id, start, items.len() as u64).unwrap();
        store.descriptor(id).unwrap()
    }

    fn read_run(store: &RunStore, run: &RunDescriptor) -> Vec<i32> {
        let mut input = InputBuffer::<i32>::new(store.stream(), *run, 4);
        let mut items = Vec::new();
        while let Some(item) = input.next().unwrap() {
            items.push(item);
        }
        items
    }

    /// Internal-node cost of the Huffman tree over `sizes`: the number of
    /// records written (and read) by an optimal merge schedule.
    fn huffman_cost(sizes: &[u64]) -> u64 {
        let mut heap: BinaryHeap<Reverse<u64>> = sizes.iter().map(|&s| Reverse(s)).collect();
        let mut cost = 0;
        while heap.len() > 1 {
            let Reverse(a) = heap.pop().unwrap();
            let Reverse(b) = heap.pop().unwrap();
            cost += a + b;
            heap.push(Reverse(a + b));
        }
        cost
    }

    #[rstest]
    fn test_merges_runs_into_sorted_output(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::create(&tmp_dir.path().join("runs.dat"), 16).unwrap();
        let runs = vec![
            append_run(&mut store, &[1, 3, 5, 7]),
            append_run(&mut store, &[2, 4]),
            append_run(&mut store, &[0, 6, 8]),
        ];

        let scheduler = MergeScheduler::<i32>::new(4).unwrap();
        let final_run = scheduler.sort(&runs, &mut store).unwrap();

        assert_eq!(final_run.element_count, 9);
        assert_eq!(read_run(&store, &final_run), vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[rstest]
    fn test_single_run_passes_through(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::create(&tmp_dir.path().join("runs.dat"), 16).unwrap();
        let run = append_run(&mut store, &[1, 2, 3]);
        let size_before = store.append_offset().unwrap();

        let scheduler = MergeScheduler::<i32>::new(4).unwrap();
        let final_run = scheduler.sort(&[run], &mut store).unwrap();

        assert_eq!(final_run, run);
        assert_eq!(store.append_offset().unwrap(), size_before);
    }

    #[rstest]
    fn test_empty_run_list_yields_empty_run(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::create(&tmp_dir.path().join("runs.dat"), 16).unwrap();

        let scheduler = MergeScheduler::<i32>::new(4).unwrap();
        let final_run = scheduler.sort(&[], &mut store).unwrap();

        assert!(final_run.in_use);
        assert_eq!(final_run.element_count, 0);
        assert!(read_run(&store, &final_run).is_empty());
    }

    #[rstest]
    #[case(vec![1, 2, 3, 4, 5])]
    #[case(vec![2, 2, 2, 2])]
    #[case(vec![1, 10, 100])]
    #[case(vec![7])]
    fn test_data_moved_matches_huffman_cost(tmp_dir: tempfile::TempDir, #[case] sizes: Vec<u64>) {
        let mut store = RunStore::create(&tmp_dir.path().join("runs.dat"), 64).unwrap();
        let mut next = 0;
        let runs: Vec<RunDescriptor> = sizes
            .iter()
            .map(|&size| {
                let items: Vec<i32> = (next..next + size as i32).collect();
                next += size as i32;
                append_run(&mut store, &items)
            })
            .collect();

        let size_before = store.append_offset().unwrap();
        let scheduler = MergeScheduler::<i32>::new(4).unwrap();
        let final_run = scheduler.sort(&runs, &mut store).unwrap();
        let size_after = store.append_offset().unwrap();

        // every merge appends its output, so data-area growth is exactly the
        // schedule's write volume
        assert_eq!(size_after - size_before, huffman_cost(&sizes) * 4);
        assert_eq!(final_run.element_count, sizes.iter().sum::<u64>());

        let merged = read_run(&store, &final_run);
        assert!(merged.windows(2).all(|w| w[0] <= w[1]));
    }

    #[rstest]
    fn test_equal_sizes_merge_in_id_order(tmp_dir: tempfile::TempDir) {
        let mut store = RunStore::create(&tmp_dir.path().join("runs.dat"), 16).unwrap();
        let runs = vec![
            append_run(&mut store, &[5, 5]),
            append_run(&mut store, &[5, 5]),
            append_run(&mut store, &[5, 5]),
        ];

        let scheduler = MergeScheduler::<i32>::new(4).unwrap();
        let final_run = scheduler.sort(&runs, &mut store).unwrap();

        // runs 0 and 1 merge first into run 3; run 2 then merges with it
        assert_eq!(final_run.id, 4);
        assert_eq!(read_run(&store, &final_run), vec![5; 6]);
    }
}
