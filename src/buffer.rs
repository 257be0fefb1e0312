//! Block-granular run readers and writers.
//!
//! Both buffers own nothing but their own memory and a borrow of the store's
//! stream. They seek explicitly before every block transfer, so interleaved
//! use of the same stream by other components cannot corrupt their position.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use log;

use crate::error::{Result, SortError};
use crate::record::Record;
use crate::store::RunDescriptor;

/// Streaming reader over one run's byte range.
///
/// Yields the run's records in order, refilling from disk one block at a
/// time and stopping at the descriptor's `element_count`.
pub struct InputBuffer<'a, T: Record> {
    stream: &'a File,
    run: RunDescriptor,
    block_elems: usize,
    block: Vec<T>,
    raw: Vec<u8>,
    pos: usize,
    total_read: u64,
}

impl<'a, T: Record> InputBuffer<'a, T> {
    /// Creates a reader over the run described by `run`.
    pub fn new(stream: &'a File, run: RunDescriptor, block_elems: usize) -> Self {
        InputBuffer {
            stream,
            run,
            block_elems,
            block: Vec::with_capacity(block_elems),
            raw: Vec::new(),
            pos: 0,
            total_read: 0,
        }
    }

    /// Returns the next record, or `None` once the run is exhausted.
    pub fn next(&mut self) -> Result<Option<T>> {
        if self.pos >= self.block.len() && !self.refill()? {
            return Ok(None);
        }
        let item = self.block[self.pos];
        self.pos += 1;
        Ok(Some(item))
    }

    fn refill(&mut self) -> Result<bool> {
        if self.total_read >= self.run.element_count {
            return Ok(false);
        }

        let remaining = self.run.element_count - self.total_read;
        let want = remaining.min(self.block_elems as u64) as usize;
        let bytes = want * T::WIDTH;
        let offset = self.run.start_offset + self.total_read * T::WIDTH as u64;

        let mut stream = self.stream;
        stream.seek(SeekFrom::Start(offset))?;

        self.raw.resize(bytes, 0);
        let mut filled = 0;
        while filled < bytes {
            let n = stream.read(&mut self.raw[filled..bytes])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < bytes {
            return Err(SortError::Truncated {
                expected: bytes,
                actual: filled,
            });
        }

        self.block.clear();
        for chunk in self.raw[..bytes].chunks_exact(T::WIDTH) {
            self.block.push(T::from_bytes(chunk));
        }
        self.pos = 0;
        self.total_read += want as u64;
        Ok(true)
    }
}

/// Buffered writer appending one run at `start_offset`.
///
/// Records accumulate in memory and are written out a block at a time. The
/// writer seeks to `start_offset + total_written * WIDTH` before every block
/// write.
pub struct OutputBuffer<'a, T: Record> {
    stream: &'a File,
    start_offset: u64,
    block_elems: usize,
    block: Vec<T>,
    raw: Vec<u8>,
    total_written: u64,
}

impl<'a, T: Record> OutputBuffer<'a, T> {
    /// Creates a writer for a run starting at `start_offset`.
    pub fn new(stream: &'a File, start_offset: u64, block_elems: usize) -> Self {
        OutputBuffer {
            stream,
            start_offset,
            block_elems,
            block: Vec::with_capacity(block_elems),
            raw: Vec::new(),
            total_written: 0,
        }
    }

    /// Appends a record, flushing the block to disk when it fills.
    pub fn push(&mut self, item: T) -> Result<()> {
        self.block.push(item);
        if self.block.len() >= self.block_elems {
            self.write_block()?;
        }
        Ok(())
    }

    /// Writes any buffered records and flushes the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.write_block()?;
        let mut stream = self.stream;
        stream.flush()?;
        Ok(())
    }

    /// Total records handed to this writer, buffered ones included.
    pub fn element_count(&self) -> u64 {
        self.total_written + self.block.len() as u64
    }

    fn write_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }

        let bytes = self.block.len() * T::WIDTH;
        let offset = self.start_offset + self.total_written * T::WIDTH as u64;

        self.raw.resize(bytes, 0);
        for (chunk, item) in self.raw.chunks_exact_mut(T::WIDTH).zip(self.block.iter()) {
            item.to_bytes(chunk);
        }

        let mut stream = self.stream;
        stream.seek(SeekFrom::Start(offset))?;
        let written = stream.write(&self.raw[..bytes])?;
        if written < bytes {
            return Err(SortError::ShortWrite {
                expected: bytes,
                written,
            });
        }

        self.total_written += self.block.len() as u64;
        self.block.clear();
        Ok(())
    }
}

impl<'a, T: Record> Drop for OutputBuffer<'a, T> {
    fn drop(&mut self) {
        if !self.block.is_empty() {
            if let Err(err) = self.flush() {
                log::error!("output buffer dropped with unflushed records: {}", err);
            }
        }
    }
}
