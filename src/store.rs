//! Persistent run container.
//!
//! A run store is a single file holding a fixed-size directory of run
//! descriptors followed by an append-only data area. Runs are written to the
//! data area in whatever order they are produced; the directory records
//! where each one lives.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, NativeEndian};
use log;

use crate::error::{Result, SortError};

/// File identification bytes.
pub const MAGIC: [u8; 4] = *b"RUNS";

/// Encoded header size: magic, `max_runs`, `current`.
pub const HEADER_SIZE: u64 = 12;

/// Encoded directory slot size: `start_offset`, `element_count`, in-use word.
pub const DESCRIPTOR_SIZE: u64 = 24;

/// Directory entry describing one run inside the store.
///
/// A descriptor with `in_use` set and `element_count == 0` is a
/// *reservation*: the slot is claimed but the run's offset is not known yet.
/// Once `element_count > 0` the descriptor is *finalized*. Descriptors are
/// never deleted within one sort session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunDescriptor {
    /// Directory slot this descriptor lives in.
    pub id: usize,
    /// Absolute byte offset of the run's first record.
    pub start_offset: u64,
    /// Number of records in the run.
    pub element_count: u64,
    /// Whether the slot is allocated.
    pub in_use: bool,
}

impl RunDescriptor {
    fn decode(id: usize, raw: &[u8]) -> Self {
        RunDescriptor {
            id,
            start_offset: NativeEndian::read_u64(&raw[0..8]),
            element_count: NativeEndian::read_u64(&raw[8..16]),
            in_use: NativeEndian::read_u64(&raw[16..24]) != 0,
        }
    }

    fn encode(&self, raw: &mut [u8]) {
        NativeEndian::write_u64(&mut raw[0..8], self.start_offset);
        NativeEndian::write_u64(&mut raw[8..16], self.element_count);
        NativeEndian::write_u64(&mut raw[16..24], self.in_use as u64);
    }
}

/// Single-file container for sorted runs.
///
/// The store is single-sorter: the directory is only ever mutated from the
/// thread driving the sort. Concurrent readers and writers of the data area
/// seek explicitly and never share a cursor assumption.
pub struct RunStore {
    file: File,
    path: PathBuf,
    max_runs: usize,
    current: usize,
    directory: Vec<RunDescriptor>,
}

impl RunStore {
    /// Truncate-creates a run store with `max_runs` directory slots.
    pub fn create(path: &Path, max_runs: usize) -> Result<RunStore> {
        if max_runs == 0 || max_runs > i32::MAX as usize {
            return Err(SortError::InvalidConfig("max_runs must fit a signed 32-bit count"));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&MAGIC);
        NativeEndian::write_i32(&mut header[4..8], max_runs as i32);
        NativeEndian::write_i32(&mut header[8..12], 0);
        file.write_all(&header)?;

        let empty = vec![0u8; max_runs * DESCRIPTOR_SIZE as usize];
        file.write_all(&empty)?;
        file.flush()?;

        let directory = (0..max_runs)
            .map(|id| RunDescriptor {
                id,
                ..RunDescriptor::default()
            })
            .collect();

        log::info!(
            "created run store {} with {} directory slots",
            path.display(),
            max_runs
        );

        return Ok(RunStore {
            file,
            path: path.to_path_buf(),
            max_runs,
            current: 0,
            directory,
        });
    }

    /// Opens an existing run store and loads its directory into memory.
    pub fn open(path: &Path) -> Result<RunStore> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        read_full(&mut file, &mut header)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        if magic != MAGIC {
            return Err(SortError::BadMagic(magic));
        }

        let max_runs = NativeEndian::read_i32(&header[4..8]);
        let current = NativeEndian::read_i32(&header[8..12]);
        if max_runs < 0 || current < 0 {
            return Err(SortError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "run file header carries negative counts",
            )));
        }
        let max_runs = max_runs as usize;

        let mut raw = vec![0u8; max_runs * DESCRIPTOR_SIZE as usize];
        read_full(&mut file, &mut raw)?;

        let directory: Vec<RunDescriptor> = raw
            .chunks_exact(DESCRIPTOR_SIZE as usize)
            .enumerate()
            .map(|(id, slot)| RunDescriptor::decode(id, slot))
            .collect();
        debug_assert_eq!(current as usize, directory.iter().filter(|d| d.in_use).count());

        log::debug!(
            "opened run store {}: {} of {} slots in use",
            path.display(),
            current,
            max_runs
        );

        return Ok(RunStore {
            file,
            path: path.to_path_buf(),
            max_runs,
            current: current as usize,
            directory,
        });
    }

    /// Flushes pending writes and releases the file handle.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        log::debug!("closed run store {}", self.path.display());
        Ok(())
    }

    /// Claims the first free directory slot as a reservation.
    ///
    /// The reservation has no offset yet; callers capture [`append_offset`]
    /// just before the run's first byte is written and hand both to
    /// [`finalize`].
    ///
    /// [`append_offset`]: RunStore::append_offset
    /// [`finalize`]: RunStore::finalize
    pub fn allocate(&mut self) -> Result<usize> {
        for id in 0..self.max_runs {
            if !self.directory[id].in_use {
                self.directory[id] = RunDescriptor {
                    id,
                    start_offset: 0,
                    element_count: 0,
                    in_use: true,
                };
                self.persist_slot(id)?;
                self.current += 1;
                self.persist_header()?;
                return Ok(id);
            }
        }
        Err(SortError::DirectoryFull)
    }

    /// Records a run's final position and length, persisting the slot.
    pub fn finalize(&mut self, run_id: usize, start_offset: u64, element_count: u64) -> Result<()> {
        if run_id >= self.max_runs {
            return Err(SortError::InvalidRunId(run_id));
        }
        self.directory[run_id].start_offset = start_offset;
        self.directory[run_id].element_count = element_count;
        self.persist_slot(run_id)
    }

    /// Returns the in-memory descriptor for `run_id`.
    pub fn descriptor(&self, run_id: usize) -> Result<RunDescriptor> {
        if run_id >= self.max_runs {
            return Err(SortError::InvalidRunId(run_id));
        }
        Ok(self.directory[run_id])
    }

    /// Returns the current end of the file, where the next run will land.
    pub fn append_offset(&mut self) -> Result<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    /// Raw read/write handle scoped to this file.
    ///
    /// Readers and writers seek explicitly before every transfer; there is
    /// no shared cursor assumption between them.
    pub fn stream(&self) -> &File {
        &self.file
    }

    /// Directory capacity chosen at creation time.
    pub fn max_runs(&self) -> usize {
        self.max_runs
    }

    /// Number of allocated directory slots.
    pub fn current(&self) -> usize {
        self.current
    }

    fn persist_slot(&mut self, run_id: usize) -> Result<()> {
        let mut raw = [0u8; DESCRIPTOR_SIZE as usize];
        self.directory[run_id].encode(&mut raw);
        let offset = HEADER_SIZE + run_id as u64 * DESCRIPTOR_SIZE;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&raw)?;
        Ok(())
    }

    fn persist_header(&mut self) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&MAGIC);
        NativeEndian::write_i32(&mut header[4..8], self.max_runs as i32);
        NativeEndian::write_i32(&mut header[8..12], self.current as i32);
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        Ok(())
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(SortError::Truncated {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}
