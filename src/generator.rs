//! Replacement-selection run generation.
//!
//! Three workers cooperate over one mutex: a reader filling the standby
//! input buffer, the tournament thread driving the loser tree, and a writer
//! draining the standby output buffer. Buffer ownership flips by swapping
//! vectors under the mutex; no record is copied on a swap, and no file I/O
//! happens while the mutex is held.
//!
//! Replacement selection keeps the workspace full: each record pulled from
//! the input replaces the record just emitted, tagged for the current run if
//! it can still extend it and for the next run otherwise. On random input
//! the expected run length is about twice the workspace size, and runs come
//! out unequal, which is what makes the optimal merge schedule pay off.

use std::fs::File;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::mem;
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;

use log;

use crate::error::{Result, SortError};
use crate::record::Record;
use crate::store::{RunDescriptor, RunStore};
use crate::tree::{LoserTree, RunId};

/// Phase-1 run generator.
///
/// `k` is the tournament size (records held in memory); `buffer_elems` is
/// the I/O block size in records. One generator can be reused across inputs;
/// each [`generate`] call builds a fresh pipeline.
///
/// [`generate`]: RunGenerator::generate
pub struct RunGenerator<T: Record> {
    k: usize,
    buffer_elems: usize,
    record: PhantomData<T>,
}

impl<T: Record> RunGenerator<T> {
    /// Creates a generator with a `k`-record workspace and `buffer_elems`
    /// I/O blocks.
    pub fn new(k: usize, buffer_elems: usize) -> Result<Self> {
        if k == 0 {
            return Err(SortError::InvalidConfig("k must be greater than zero"));
        }
        if buffer_elems == 0 {
            return Err(SortError::InvalidConfig("buffer_elems must be greater than zero"));
        }
        Ok(RunGenerator {
            k,
            buffer_elems,
            record: PhantomData,
        })
    }

    /// Reads `input_path` and appends sorted runs to `store`.
    ///
    /// Returns the finalized descriptors in generation order. A trailing
    /// partial record in the input is discarded.
    pub fn generate(&self, input_path: &Path, store: &mut RunStore) -> Result<Vec<RunDescriptor>> {
        let input = File::open(input_path)?;
        let writer_file = store.stream().try_clone()?;
        let pipe = Pipe::<T>::new(self.buffer_elems);

        log::info!(
            "generating runs from {}: k={}, buffer={} records",
            input_path.display(),
            self.k,
            self.buffer_elems
        );

        let pipe_ref = &pipe;
        let cap = self.buffer_elems;
        let runs = thread::scope(|scope| {
            let _reader = scope.spawn(move || reader_worker(pipe_ref, input, cap));
            let _writer = scope.spawn(move || writer_worker(pipe_ref, writer_file));
            let outcome = self.tournament(pipe_ref, store);
            pipe_ref.shutdown();
            outcome
        })?;

        log::info!("generated {} runs", runs.len());
        Ok(runs)
    }

    /// The tournament worker: drives the loser tree, emits run boundaries
    /// and finalizes descriptors. Runs on the calling thread.
    fn tournament(&self, pipe: &Pipe<T>, store: &mut RunStore) -> Result<Vec<RunDescriptor>> {
        let mut side = PipelineSide {
            pipe,
            buffer_elems: self.buffer_elems,
            active_in: Vec::new(),
            in_pos: 0,
            active_out: Vec::with_capacity(self.buffer_elems),
        };

        let mut run_id = store.allocate()?;
        let start = store.append_offset()?;
        {
            let mut state = pipe.lock();
            state.run_start = start;
            state.run_written = 0;
        }

        let mut initial = Vec::with_capacity(self.k);
        while initial.len() < self.k {
            match side.pull_next()? {
                Some(item) => initial.push(item),
                None => break,
            }
        }
        let mut tree = LoserTree::new(self.k);
        tree.initialize(&initial);
        let mut tree_run: RunId = 1;
        let mut runs = Vec::new();

        loop {
            let winner = tree.winner();
            if winner.is_sentinel() {
                break;
            }

            if winner.run > tree_run {
                // the workspace holds only future-run records: seal the
                // current run and open the next one
                self.close_run(&mut side, store, run_id, &mut runs)?;
                run_id = store.allocate()?;
                let offset = store.append_offset()?;
                let mut state = pipe.lock();
                state.run_start = offset;
                state.run_written = 0;
                drop(state);
                tree_run = winner.run;
            }

            side.push_out(winner.value)?;

            match side.pull_next()? {
                None => tree.seal_winner(),
                Some(item) => {
                    let run = if item < winner.value { tree_run + 1 } else { tree_run };
                    tree.replace_winner(item, run);
                }
            }
        }

        self.close_run(&mut side, store, run_id, &mut runs)?;
        Ok(runs)
    }

    /// Drains the output pipeline and finalizes the descriptor of the run in
    /// progress. The append offset for the next run must only be captured
    /// after this returns.
    fn close_run(
        &self,
        side: &mut PipelineSide<'_, T>,
        store: &mut RunStore,
        run_id: usize,
        runs: &mut Vec<RunDescriptor>,
    ) -> Result<()> {
        if !side.active_out.is_empty() {
            side.flush_active_out()?;
        }
        let state = side.wait_writer_idle()?;
        let run_start = state.run_start;
        let run_written = state.run_written;
        drop(state);

        if run_written > 0 {
            store.finalize(run_id, run_start, run_written)?;
            runs.push(store.descriptor(run_id)?);
            log::debug!(
                "sealed run {}: {} records at offset {}",
                run_id,
                run_written,
                run_start
            );
        }
        Ok(())
    }
}

/// State shared by the three workers, guarded by one mutex.
struct PipeState<T> {
    standby_in: Vec<T>,
    standby_out: Vec<T>,
    standby_in_ready: bool,
    standby_out_busy: bool,
    input_eof: bool,
    stop: bool,
    /// Start offset of the run in progress.
    run_start: u64,
    /// Records of the run in progress already written by the writer.
    run_written: u64,
    failure: Option<SortError>,
}

struct Pipe<T> {
    state: Mutex<PipeState<T>>,
    /// Signals the reader that the standby input buffer was consumed.
    reader_cv: Condvar,
    /// Signals the writer that the standby output buffer holds a block.
    writer_cv: Condvar,
    /// Signals the tournament thread about input fill or output drain.
    main_cv: Condvar,
}

impl<T: Record> Pipe<T> {
    fn new(buffer_elems: usize) -> Self {
        Pipe {
            state: Mutex::new(PipeState {
                standby_in: Vec::with_capacity(buffer_elems),
                standby_out: Vec::with_capacity(buffer_elems),
                standby_in_ready: false,
                standby_out_busy: false,
                input_eof: false,
                stop: false,
                run_start: 0,
                run_written: 0,
                failure: None,
            }),
            reader_cv: Condvar::new(),
            writer_cv: Condvar::new(),
            main_cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipeState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, cv: &Condvar, guard: MutexGuard<'a, PipeState<T>>) -> MutexGuard<'a, PipeState<T>> {
        cv.wait(guard).unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a worker failure and stops the pipeline.
    fn fail(&self, error: SortError) {
        let mut state = self.lock();
        if state.failure.is_none() {
            state.failure = Some(error);
        }
        state.stop = true;
        drop(state);
        self.reader_cv.notify_all();
        self.writer_cv.notify_all();
        self.main_cv.notify_all();
    }

    /// Stops the pipeline after natural completion.
    fn shutdown(&self) {
        let mut state = self.lock();
        state.stop = true;
        drop(state);
        self.reader_cv.notify_all();
        self.writer_cv.notify_all();
    }

    fn stop_error(state: &mut PipeState<T>) -> SortError {
        state.failure.take().unwrap_or_else(|| {
            SortError::Io(io::Error::new(io::ErrorKind::Interrupted, "sort pipeline stopped"))
        })
    }
}

/// The tournament thread's side of the pipeline: the active halves of both
/// double buffers. The standby halves live inside the mutex.
struct PipelineSide<'p, T: Record> {
    pipe: &'p Pipe<T>,
    buffer_elems: usize,
    active_in: Vec<T>,
    in_pos: usize,
    active_out: Vec<T>,
}

impl<'p, T: Record> PipelineSide<'p, T> {
    /// Pulls the next input record.
    ///
    /// Serves from the active buffer without locking; when it runs dry,
    /// swaps in the standby buffer or waits for the reader to fill it.
    fn pull_next(&mut self) -> Result<Option<T>> {
        loop {
            if self.in_pos < self.active_in.len() {
                let item = self.active_in[self.in_pos];
                self.in_pos += 1;
                return Ok(Some(item));
            }

            let mut state = self.pipe.lock();
            loop {
                if state.stop {
                    return Err(Pipe::stop_error(&mut state));
                }
                if state.standby_in_ready {
                    mem::swap(&mut self.active_in, &mut state.standby_in);
                    self.in_pos = 0;
                    state.standby_in_ready = false;
                    self.pipe.reader_cv.notify_one();
                    if self.active_in.is_empty() {
                        // the reader publishes an empty block only at EOF
                        return Ok(None);
                    }
                    break;
                }
                if state.input_eof {
                    return Ok(None);
                }
                state = self.pipe.wait(&self.pipe.main_cv, state);
            }
        }
    }

    /// Appends a record to the active output buffer, handing a full buffer
    /// over to the writer.
    fn push_out(&mut self, item: T) -> Result<()> {
        self.active_out.push(item);
        if self.active_out.len() >= self.buffer_elems {
            self.flush_active_out()?;
        }
        Ok(())
    }

    /// Swaps the active output buffer into the writer's standby slot.
    fn flush_active_out(&mut self) -> Result<()> {
        let mut state = self.wait_writer_idle()?;
        mem::swap(&mut self.active_out, &mut state.standby_out);
        state.standby_out_busy = true;
        drop(state);
        self.pipe.writer_cv.notify_one();
        self.active_out.clear();
        Ok(())
    }

    /// Waits until the writer has drained the standby output buffer.
    fn wait_writer_idle(&self) -> Result<MutexGuard<'p, PipeState<T>>> {
        let mut state = self.pipe.lock();
        loop {
            if state.stop {
                return Err(Pipe::stop_error(&mut state));
            }
            if !state.standby_out_busy {
                return Ok(state);
            }
            state = self.pipe.wait(&self.pipe.main_cv, state);
        }
    }
}

/// Reader worker: one block-sized `read` per wakeup, with the mutex
/// released across the call.
fn reader_worker<T: Record>(pipe: &Pipe<T>, mut input: File, cap: usize) {
    let mut raw = Vec::new();
    loop {
        let mut state = pipe.lock();
        while state.standby_in_ready && !state.stop {
            state = pipe.wait(&pipe.reader_cv, state);
        }
        if state.stop {
            return;
        }
        let mut block = mem::take(&mut state.standby_in);
        drop(state);

        let outcome = read_block(&mut input, &mut raw, &mut block, cap);

        let mut state = pipe.lock();
        match outcome {
            Ok(()) => {
                if block.len() < cap {
                    state.input_eof = true;
                }
                state.standby_in = block;
                state.standby_in_ready = true;
                pipe.main_cv.notify_one();
            }
            Err(err) => {
                drop(state);
                pipe.fail(SortError::Io(err));
                return;
            }
        }
    }
}

/// Writer worker: one block-sized `write` per wakeup, with the mutex
/// released across the call.
fn writer_worker<T: Record>(pipe: &Pipe<T>, mut file: File) {
    let mut raw = Vec::new();
    loop {
        let mut state = pipe.lock();
        while !state.standby_out_busy && !state.stop {
            state = pipe.wait(&pipe.writer_cv, state);
        }
        if state.stop {
            return;
        }
        let block = mem::take(&mut state.standby_out);
        let offset = state.run_start + state.run_written * T::WIDTH as u64;
        drop(state);

        let outcome = if block.is_empty() {
            Ok(())
        } else {
            write_block(&mut file, &mut raw, &block, offset)
        };

        let mut state = pipe.lock();
        let written = block.len() as u64;
        state.standby_out = block;
        match outcome {
            Ok(()) => {
                state.run_written += written;
                state.standby_out_busy = false;
                pipe.main_cv.notify_one();
            }
            Err(err) => {
                drop(state);
                pipe.fail(err);
                return;
            }
        }
    }
}

/// Reads up to `cap` records into `block`. A trailing partial record is
/// discarded.
fn read_block<T: Record>(
    input: &mut File,
    raw: &mut Vec<u8>,
    block: &mut Vec<T>,
    cap: usize,
) -> io::Result<()> {
    let bytes = cap * T::WIDTH;
    raw.resize(bytes, 0);

    let mut filled = 0;
    while filled < bytes {
        let n = input.read(&mut raw[filled..bytes])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let count = filled / T::WIDTH;
    block.clear();
    for chunk in raw[..count * T::WIDTH].chunks_exact(T::WIDTH) {
        block.push(T::from_bytes(chunk));
    }
    Ok(())
}

/// Writes `block` at `offset` as a single transfer.
fn write_block<T: Record>(
    file: &mut File,
    raw: &mut Vec<u8>,
    block: &[T],
    offset: u64,
) -> Result<()> {
    let bytes = block.len() * T::WIDTH;
    raw.resize(bytes, 0);
    for (chunk, item) in raw.chunks_exact_mut(T::WIDTH).zip(block.iter()) {
        item.to_bytes(chunk);
    }

    file.seek(SeekFrom::Start(offset))?;
    let written = file.write(&raw[..bytes])?;
    if written < bytes {
        return Err(SortError::ShortWrite {
            expected: bytes,
            written,
        });
    }
    Ok(())
}
