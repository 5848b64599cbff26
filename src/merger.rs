//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;

/// Heap entry ordered by the merge comparator, ties broken by chunk index.
struct OrderedChunkItem<T, F> {
    item: T,
    chunk_idx: usize,
    compare: F,
}

impl<T, F> PartialEq for OrderedChunkItem<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, F> Eq for OrderedChunkItem<T, F> where F: Fn(&T, &T) -> Ordering {}

impl<T, F> PartialOrd for OrderedChunkItem<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, F> Ord for OrderedChunkItem<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    // binary heap is max-heap by default so the order is reversed to pop the smallest item first
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&other.item, &self.item).then(other.chunk_idx.cmp(&self.chunk_idx))
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Items comparing equal are returned in chunk order, so merging consecutive sorted runs is stable.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
pub struct BinaryHeapMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering + Copy,
    C: IntoIterator<Item = Result<T, E>>,
{
    items: BinaryHeap<OrderedChunkItem<T, F>>,
    chunks: Vec<C::IntoIter>,
    compare: F,
    initiated: bool,
}

impl<T, E, F, C> BinaryHeapMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering + Copy,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted by `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    /// * `compare` - Function the chunks are sorted by
    pub fn new<I>(chunks: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            compare,
            initiated: false,
        };
    }

    fn push_next(&mut self, chunk_idx: usize) -> Result<(), E> {
        if let Some(item) = self.chunks[chunk_idx].next() {
            self.items.push(OrderedChunkItem {
                item: item?,
                chunk_idx,
                compare: self.compare,
            });
        }
        return Ok(());
    }
}

impl<T, E, F, C> Iterator for BinaryHeapMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering + Copy,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.push_next(idx) {
                    return Some(Err(err));
                }
            }
            self.initiated = true;
        }

        let result = self.items.pop()?;
        if let Err(err) = self.push_next(result.chunk_idx) {
            return Some(Err(err));
        }

        return Some(Ok(result.item));
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::error::Error;
    use std::io::{self, ErrorKind};

    use super::BinaryHeapMerger;
    use crate::edge::{by_to, Edge};

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] chunks: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = BinaryHeapMerger::new(chunks, |a: &i32, b: &i32| a.cmp(b));
        let actual_result = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_is_stable() {
        let chunks: Vec<Vec<Result<Edge, io::Error>>> = vec![
            vec![Ok(Edge::new(1, 5)), Ok(Edge::new(2, 8))],
            vec![Ok(Edge::new(3, 5)), Ok(Edge::new(4, 6))],
            vec![Ok(Edge::new(5, 5))],
        ];

        let merged: Result<Vec<Edge>, _> = BinaryHeapMerger::new(chunks, by_to).collect();
        let sources = Vec::from_iter(merged.unwrap().iter().map(|edge| edge.from));

        assert_eq!(sources, vec![1, 3, 5, 4, 2]);
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
