//! `runsort` is an external sort for binary files of fixed-width records.
//!
//! Sorting happens in two passes over a single on-disk run container. During
//! the first pass a loser-tree tournament performs *replacement selection*:
//! the in-memory workspace is continuously refilled, so on random input the
//! sorted runs it writes average about twice the workspace size and come out
//! unequal in length. A reader thread and a writer thread overlap disk I/O
//! with the tournament through double buffers. During the second pass the
//! runs are combined with two-way merges scheduled by an optimal (Huffman)
//! merge tree, which minimises the bytes moved when run lengths differ.
//! For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `runsort` supports the following features:
//!
//! * **Fixed-width records:**
//!   any type implementing [`Record`] can be sorted; integer records are
//!   provided out of the box, stored in host byte order.
//! * **Bounded memory:**
//!   the workspace holds exactly `k` records and the I/O buffers never grow
//!   after construction, whatever the input size.
//! * **Pipelined run generation:**
//!   reading, comparing and writing proceed on three threads, so throughput
//!   is bounded by the slowest stage rather than their sum.
//! * **Optimal merge order:**
//!   the two shortest live runs are always merged first.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use runsort::{Config, ExternalSorter};
//!
//! fn main() {
//!     let sorter: ExternalSorter<i32> = ExternalSorter::new(Config {
//!         k: 1 << 20,
//!         buffer_elems: 1024,
//!         max_runs: 4096,
//!         run_file_path: PathBuf::from("runs.dat"),
//!         input_path: PathBuf::from("input.dat"),
//!     })
//!     .unwrap();
//!
//!     let outcome = sorter.sort().unwrap();
//!     println!("sorted {} records", outcome.final_run.element_count);
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod generator;
pub mod merger;
pub mod record;
pub mod sort;
pub mod store;
pub mod tree;

pub use buffer::{InputBuffer, OutputBuffer};
pub use error::{Result, SortError};
pub use generator::RunGenerator;
pub use merger::MergeScheduler;
pub use record::Record;
pub use sort::{Config, ExternalSorter, SortOutcome};
pub use store::{RunDescriptor, RunStore};
pub use tree::{LoserTree, RunNode};
