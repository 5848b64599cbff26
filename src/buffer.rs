//! Sort run buffers.
//!
//! A run buffer collects records until it has used up its share of the memory budget, then the
//! sorter sorts it in parallel and writes it out as one run.

use std::mem;

use deepsize;
use rayon;

/// Largest number of records reserved up front for a single run.
const MAX_RESERVED_RECORDS: u64 = 1 << 20;

/// Run buffer builder.
pub trait ChunkBufferBuilder<T: Send>: Default {
    type Buffer: ChunkBuffer<T>;

    /// Creates a new empty buffer.
    fn build(&self) -> Self::Buffer;
}

/// Run buffer interface.
pub trait ChunkBuffer<T: Send>: IntoIterator<Item = T> + rayon::slice::ParallelSliceMut<T> + Send {
    /// Adds a record to the buffer.
    fn push(&mut self, item: T);

    /// Returns the number of buffered records.
    fn len(&self) -> usize;

    /// Checks if the buffer used up its memory.
    fn is_full(&self) -> bool;
}

/// Builds buffers holding at most `buffer_limit` bytes of records.
pub struct MemoryLimitedBufferBuilder {
    buffer_limit: u64,
}

impl MemoryLimitedBufferBuilder {
    pub fn new(buffer_limit: u64) -> Self {
        MemoryLimitedBufferBuilder { buffer_limit }
    }

    /// Returns the memory a single buffer may use.
    pub fn buffer_limit(&self) -> u64 {
        self.buffer_limit
    }
}

impl<T: Send> ChunkBufferBuilder<T> for MemoryLimitedBufferBuilder
where
    T: deepsize::DeepSizeOf,
{
    type Buffer = MemoryLimitedBuffer<T>;

    fn build(&self) -> Self::Buffer {
        let record_size = mem::size_of::<T>().max(1) as u64;
        let reserved = (self.buffer_limit / record_size).min(MAX_RESERVED_RECORDS);
        MemoryLimitedBuffer::with_capacity(self.buffer_limit, reserved as usize)
    }
}

impl Default for MemoryLimitedBufferBuilder {
    fn default() -> Self {
        MemoryLimitedBufferBuilder { buffer_limit: u64::MAX }
    }
}

/// Buffer limited by the memory its records use.
pub struct MemoryLimitedBuffer<T> {
    limit: u64,
    used: u64,
    inner: Vec<T>,
}

impl<T> MemoryLimitedBuffer<T> {
    pub fn new(limit: u64) -> Self {
        MemoryLimitedBuffer::with_capacity(limit, 0)
    }

    /// Creates a buffer with room for `capacity` records allocated up front.
    pub fn with_capacity(limit: u64, capacity: usize) -> Self {
        MemoryLimitedBuffer {
            limit,
            used: 0,
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Returns the memory used by the buffered records in bytes.
    pub fn mem_size(&self) -> u64 {
        self.used
    }
}

impl<T: Send> ChunkBuffer<T> for MemoryLimitedBuffer<T>
where
    T: deepsize::DeepSizeOf,
{
    fn push(&mut self, item: T) {
        self.used += item.deep_size_of() as u64;
        self.inner.push(item);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_full(&self) -> bool {
        self.used >= self.limit
    }
}

impl<T> IntoIterator for MemoryLimitedBuffer<T> {
    type Item = T;
    type IntoIter = <Vec<T> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<T: Send> rayon::slice::ParallelSliceMut<T> for MemoryLimitedBuffer<T> {
    fn as_parallel_slice_mut(&mut self) -> &mut [T] {
        self.inner.as_mut_slice()
    }
}

#[cfg(test)]
mod test {
    use std::mem;

    use rstest::*;

    use super::{ChunkBuffer, ChunkBufferBuilder, MemoryLimitedBuffer, MemoryLimitedBufferBuilder};
    use crate::edge::Edge;

    #[test]
    fn test_memory_limited_buffer() {
        let edge_size = mem::size_of::<Edge>() as u64;
        let builder = MemoryLimitedBufferBuilder::new(2 * edge_size);
        let mut buffer: MemoryLimitedBuffer<Edge> = builder.build();

        buffer.push(Edge::new(0, 1));
        assert_eq!(buffer.mem_size(), edge_size);
        assert_eq!(buffer.is_full(), false);

        buffer.push(Edge::new(1, 2));
        assert_eq!(buffer.mem_size(), 2 * edge_size);
        assert_eq!(buffer.is_full(), true);

        let actual_data = Vec::from_iter(buffer);
        assert_eq!(actual_data, vec![Edge::new(0, 1), Edge::new(1, 2)]);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(100, 3)]
    #[case(u64::MAX, 1 << 20)]
    fn test_builder_reserves_records(#[case] buffer_limit: u64, #[case] expected_capacity: usize) {
        let buffer: MemoryLimitedBuffer<Edge> = MemoryLimitedBufferBuilder::new(buffer_limit).build();
        assert!(buffer.inner.capacity() >= expected_capacity);
        assert_eq!(buffer.len(), 0);
    }
}
