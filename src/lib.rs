//! `ext-list-rank` is a rust external memory list ranking implementation.
//!
//! List ranking computes, for every edge of a singly linked list, its distance from the head of
//! the list. When the list is stored as an unordered set of `(from, to)` edges too large for the
//! main memory (RAM), following the links one by one means a random disk access per edge.
//! Instead the ranker works in sequential passes: it randomly bridges over about a quarter of
//! the nodes, ranks the resulting shorter list recursively and splits the bridges back. Lists
//! that fit in memory are ranked directly. The expected I/O cost is that of a constant number
//! of external sorts.
//!
//! # Overview
//!
//! * **Edge streams:**
//!   edges are kept in files of fixed-size records that are read and written sequentially.
//! * **External sorting:**
//!   the passes sort edge streams with a multi-threaded, memory limited external merge sort.
//! * **Memory limit:**
//!   a single memory budget bounds the sort runs, the merge fan-in and the size of the lists
//!   ranked in memory.
//! * **Reproducibility:**
//!   the random number generator is supplied by the caller, a seeded one makes runs repeatable.
//!
//! # Example
//!
//! ```no_run
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! use ext_list_rank::{synthetic, ListRankerBuilder};
//!
//! fn main() {
//!     let mut ranker = ListRankerBuilder::new()
//!         .with_memory_limit(16 * 1024 * 1024)
//!         .build(StdRng::seed_from_u64(17))
//!         .unwrap();
//!
//!     let mut input = ranker.create_stream().unwrap();
//!     for edge in synthetic::generate_list(1_000_000) {
//!         input.append(&edge).unwrap();
//!     }
//!
//!     let mut output = ranker.create_stream().unwrap();
//!     let report = ranker.rank(&mut input, &mut output).unwrap();
//!     println!("ranked in {} levels", report.depth());
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod edge;
pub mod error;
pub mod merger;
pub mod mm_rank;
pub mod rank;
pub mod scan;
pub mod sort;
pub mod steps;
pub mod stream;
pub mod synthetic;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, MemoryLimitedBuffer, MemoryLimitedBufferBuilder};
pub use chunk::{ExternalChunk, RmpExternalChunk};
pub use edge::{by_from, by_to, by_weight, Edge};
pub use error::{Error, Result};
pub use merger::BinaryHeapMerger;
pub use mm_rank::rank_in_memory;
pub use rank::{LevelReport, ListRanker, ListRankerBuilder, RankReport};
pub use scan::{scan, ScanFlow, ScanInput, ScanOperator, ScanOutput};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError};
pub use steps::{PatchActiveCancel, RandomFlag, SeparateActiveFromCancel, StripCancelFromActive};
pub use stream::{Persistence, Record, RecordSink, RecordStream, StreamReader};
