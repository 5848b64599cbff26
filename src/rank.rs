//! External memory list ranker.

use std::cmp::Ordering;
use std::mem;
use std::path::Path;

use log;
use rand::Rng;

use crate::buffer::MemoryLimitedBufferBuilder;
use crate::edge::{by_from, by_to, Edge};
use crate::error::{Error, Result};
use crate::mm_rank::rank_in_memory;
use crate::scan::scan;
use crate::sort::{ExternalSorter, ExternalSorterBuilder};
use crate::steps::{PatchActiveCancel, RandomFlag, SeparateActiveFromCancel, StripCancelFromActive};
use crate::stream::{Record, RecordStream};

const DEFAULT_MEMORY_LIMIT: u64 = 64 * 1024 * 1024;
const DEFAULT_RW_BUF_SIZE: usize = 64 * 1024;

/// Input of a recursion level. The top level borrows the caller's stream, deeper levels own
/// theirs and remove it as soon as it is consumed.
enum LevelInput<'a> {
    Owned(RecordStream<Edge>),
    Borrowed(&'a mut RecordStream<Edge>),
}

impl<'a> LevelInput<'a> {
    fn stream(&mut self) -> &mut RecordStream<Edge> {
        match self {
            LevelInput::Owned(stream) => stream,
            LevelInput::Borrowed(stream) => stream,
        }
    }
}

/// Statistics of one recursion level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelReport {
    /// Recursion depth, 0 for the top level.
    pub level: usize,
    /// Number of edges the level was given.
    pub len: u64,
    /// Number of edges passed to the next level.
    pub active: u64,
    /// Number of edges bridged over at this level.
    pub cancel: u64,
    /// Whether the level was ranked in memory.
    pub in_memory: bool,
}

/// Statistics of a list ranking, one entry per recursion level from the top down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankReport {
    pub levels: Vec<LevelReport>,
}

impl RankReport {
    /// Returns the number of recursion levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// List ranker builder. Provides methods for [`ListRanker`] initialization.
pub struct ListRankerBuilder {
    /// Memory budget in bytes.
    memory_limit: u64,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Number of threads to be used to sort runs in parallel.
    threads_number: Option<usize>,
    /// Stream and chunk read/write buffer size.
    rw_buf_size: usize,
}

impl ListRankerBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ListRankerBuilder::default()
    }

    /// Sets the memory budget in bytes.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> ListRankerBuilder {
        self.memory_limit = memory_limit;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ListRankerBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets number of threads to be used to sort runs in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ListRankerBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets stream and chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ListRankerBuilder {
        self.rw_buf_size = buf_size.max(Edge::SIZE);
        return self;
    }

    /// Builds a [`ListRanker`] flipping its coins with `rng`.
    ///
    /// Half of the memory budget goes to the sorter's runs and half to its merge buffers, so the
    /// budget must cover at least four read/write buffers.
    pub fn build<R: Rng>(self, rng: R) -> Result<ListRanker<R>> {
        let required = 4 * self.rw_buf_size as u64;
        if self.memory_limit < required {
            return Err(Error::InsufficientMemory {
                budget: self.memory_limit,
                required,
            });
        }

        let mut sorter_builder: ExternalSorterBuilder<Edge, Error> = ExternalSorterBuilder::new()
            .with_buffer(MemoryLimitedBufferBuilder::new(self.memory_limit / 2))
            .with_rw_buf_size(self.rw_buf_size)
            .with_merge_memory(self.memory_limit / 2);
        if let Some(threads_number) = self.threads_number {
            sorter_builder = sorter_builder.with_threads_number(threads_number);
        }
        if let Some(tmp_dir) = self.tmp_dir.as_deref() {
            sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
        }

        let tmp_dir = match self.tmp_dir.as_deref() {
            Some(tmp_dir) => tempfile::tempdir_in(tmp_dir),
            None => tempfile::tempdir(),
        }?;
        log::info!(
            "ranking with {} bytes of memory, streams in {}",
            self.memory_limit,
            tmp_dir.path().display()
        );

        return Ok(ListRanker {
            sorter: sorter_builder.build()?,
            tmp_dir,
            memory_limit: self.memory_limit,
            block_len: self.rw_buf_size / Edge::SIZE,
            rng,
        });
    }
}

impl Default for ListRankerBuilder {
    fn default() -> Self {
        ListRankerBuilder {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            tmp_dir: None,
            threads_number: None,
            rw_buf_size: DEFAULT_RW_BUF_SIZE,
        }
    }
}

/// External memory list ranker.
///
/// Ranks a list too large for main memory by randomly bridging over about a quarter of its
/// nodes, ranking the shorter list recursively and patching the bridged edges back in. Lists
/// that fit in half of the memory budget are ranked in memory.
pub struct ListRanker<R: Rng> {
    sorter: ExternalSorter<Edge, Error>,
    /// Directory of the intermediate streams.
    tmp_dir: tempfile::TempDir,
    memory_limit: u64,
    /// Number of records a stream reader fetches at once.
    block_len: usize,
    rng: R,
}

impl<R: Rng> ListRanker<R> {
    /// Returns the directory of the intermediate streams.
    pub fn tmp_dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    /// Creates an empty transient stream in the ranker's temporary directory.
    pub fn create_stream(&self) -> Result<RecordStream<Edge>> {
        RecordStream::create_in(self.tmp_dir.path())
    }

    /// Ranks the edges of `input`, in any order, writing them with their ranks to `output`.
    /// The input stream is left unchanged.
    pub fn rank(&mut self, input: &mut RecordStream<Edge>, output: &mut RecordStream<Edge>) -> Result<RankReport> {
        let mut input_by_to = self.create_stream()?;
        self.sort_stream(input, &mut input_by_to, by_to)?;

        let mut report = RankReport::default();
        self.rank_level(LevelInput::Owned(input_by_to), output, 0, &mut report)?;
        return Ok(report);
    }

    /// Ranks the edges of `input`, which must be sorted by `to`, writing them with their ranks
    /// to `output`. The input stream is left unchanged.
    pub fn rank_sorted(
        &mut self,
        input: &mut RecordStream<Edge>,
        output: &mut RecordStream<Edge>,
    ) -> Result<RankReport> {
        let mut report = RankReport::default();
        self.rank_level(LevelInput::Borrowed(input), output, 0, &mut report)?;
        return Ok(report);
    }

    /// Sorts `input` into `output` using `compare`.
    pub fn sort_stream(
        &self,
        input: &mut RecordStream<Edge>,
        output: &mut RecordStream<Edge>,
        compare: fn(&Edge, &Edge) -> Ordering,
    ) -> Result<()> {
        let block_len = self.block_len(input.len());
        let sorted = self.sorter.sort_by(input.reader(block_len)?, compare)?;

        for edge in sorted {
            let edge = edge.map_err(|err| Error::Codec(Box::new(err)))?;
            output.append(&edge)?;
        }
        return output.flush();
    }

    fn fits_in_memory(&self, len: u64) -> bool {
        len.saturating_mul(mem::size_of::<Edge>() as u64) < self.memory_limit / 2
    }

    /// Streams that fit in memory are read in one go.
    fn block_len(&self, len: u64) -> usize {
        if self.fits_in_memory(len) {
            (len as usize).max(self.block_len)
        } else {
            self.block_len
        }
    }

    fn rank_level(
        &mut self,
        mut input: LevelInput<'_>,
        output: &mut RecordStream<Edge>,
        level: usize,
        report: &mut RankReport,
    ) -> Result<()> {
        let len = input.stream().len();

        if self.fits_in_memory(len) || len <= 1 {
            log::debug!("level {}: ranking {} edges in memory", level, len);

            let mut edges = input.stream().read_all()?;
            drop(input);
            rank_in_memory(&mut edges)?;
            output.write_bulk(&edges)?;
            output.flush()?;

            report.levels.push(LevelReport {
                level,
                len,
                active: 0,
                cancel: 0,
                in_memory: true,
            });
            return Ok(());
        }

        log::debug!("level {}: ranking {} edges externally", level, len);

        let mut edges_rand = self.create_stream()?;
        let block_len = self.block_len(len);
        scan(
            [input.stream().reader(block_len)?],
            &mut RandomFlag::new(&mut self.rng),
            [&mut edges_rand],
        )?;
        drop(input);

        // The input is sorted by destination and flipping coins keeps the order.
        let mut edges_from_s = self.create_stream()?;
        self.sort_stream(&mut edges_rand, &mut edges_from_s, by_from)?;

        let mut active = self.create_stream()?;
        let mut cancel = self.create_stream()?;
        let mut separate = SeparateActiveFromCancel::new();
        scan(
            [edges_from_s.reader(block_len)?, edges_rand.reader(block_len)?],
            &mut separate,
            [&mut active, &mut cancel],
        )?;
        drop(edges_from_s);
        drop(edges_rand);
        log::debug!(
            "level {}: {} bridges, active list of {} edges before stripping",
            level,
            separate.bridges(),
            active.len()
        );

        let mut active_s = self.create_stream()?;
        self.sort_stream(&mut active, &mut active_s, by_to)?;
        drop(active);

        let mut active_2 = self.create_stream()?;
        scan(
            [active_s.reader(block_len)?],
            &mut StripCancelFromActive::new(),
            [&mut active_2],
        )?;
        drop(active_s);

        report.levels.push(LevelReport {
            level,
            len,
            active: active_2.len(),
            cancel: cancel.len(),
            in_memory: false,
        });
        log::debug!(
            "level {}: recursing on {} active edges, {} cancelled",
            level,
            active_2.len(),
            cancel.len()
        );

        let mut ranked_active = self.create_stream()?;
        self.rank_level(LevelInput::Owned(active_2), &mut ranked_active, level + 1, report)?;

        let mut cancel_s = self.create_stream()?;
        self.sort_stream(&mut cancel, &mut cancel_s, by_to)?;
        drop(cancel);

        // The recursion returns edges sorted by source at best.
        let mut ranked_active_s = self.create_stream()?;
        self.sort_stream(&mut ranked_active, &mut ranked_active_s, by_to)?;
        drop(ranked_active);

        scan(
            [ranked_active_s.reader(block_len)?, cancel_s.reader(block_len)?],
            &mut PatchActiveCancel::new(),
            [&mut *output],
        )?;
        output.flush()?;

        log::debug!("level {}: patched list of {} edges", level, output.len());
        return Ok(());
    }
}
