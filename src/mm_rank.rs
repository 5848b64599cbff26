//! In-memory list ranking.
//!
//! Used when the recursion bottoms out: the list fits in main memory and is ranked with
//! two sorts and a single walk, without a node id to array index map.

use crate::edge::{by_from, by_to, Edge};
use crate::error::{Error, Result};

/// Ranks a list held in memory.
///
/// On return every edge's `weight` is the sum of the input weights of all edges from the
/// head of the list up to and including that edge. With unit weights that is the 1-based
/// position of the edge in the list. Edges are left sorted by `from`.
///
/// Fails with [`Error::MalformedList`] if the edges do not form exactly one simple list.
pub fn rank_in_memory(edges: &mut [Edge]) -> Result<()> {
    let count = edges.len();
    if count == 0 {
        return Ok(());
    }

    let mut edges_by_to = edges.to_vec();
    edges.sort_unstable_by(by_from);
    edges_by_to.sort_unstable_by(by_to);

    let ends = find_ends(edges, &edges_by_to)?;
    let successors = successor_indices(&edges_by_to, &ends);
    drop(edges_by_to);

    // Every edge is visited once, so `count - 1` successor links are followed.
    let mut idx = ends.head_index;
    let mut total_weight = 0u64;
    for step in 0..count {
        edges[idx].weight += total_weight;
        total_weight = edges[idx].weight;

        if step + 1 == count {
            break;
        }
        idx = match successors[idx] {
            Some(next) if next < count && next != ends.head_index => next,
            Some(_) => {
                return Err(Error::MalformedList(format!(
                    "walk left the list after {} edges",
                    step + 1
                )))
            }
            None => {
                return Err(Error::MalformedList(format!(
                    "walk reached the tail after {} of {} edges",
                    step + 1,
                    count
                )))
            }
        };
    }

    if edges[idx].to != ends.tail_node {
        return Err(Error::MalformedList(format!(
            "walk ended at node {} instead of the tail {}",
            edges[idx].to, ends.tail_node
        )));
    }

    return Ok(());
}

/// Positions of the list ends in the two sorted copies.
struct ListEnds {
    /// Index of the head edge among edges sorted by `from`.
    head_index: usize,
    /// Index of the tail edge among edges sorted by `to`.
    tail_index: usize,
    head_node: u64,
    tail_node: u64,
}

/// Merges the sources and the destinations to find the only source that is not a destination
/// (the head) and the only destination that is not a source (the tail).
fn find_ends(by_from: &[Edge], by_to: &[Edge]) -> Result<ListEnds> {
    let count = by_from.len();
    if let Some(pair) = by_from.windows(2).find(|pair| pair[0].from == pair[1].from) {
        return Err(Error::MalformedList(format!(
            "node {} is the source of more than one edge",
            pair[0].from
        )));
    }
    if let Some(pair) = by_to.windows(2).find(|pair| pair[0].to == pair[1].to) {
        return Err(Error::MalformedList(format!(
            "node {} is the destination of more than one edge",
            pair[0].to
        )));
    }

    let mut head_index = None;
    let mut tail_index = None;

    let (mut i, mut k) = (0, 0);
    while i < count || k < count {
        let source = by_from.get(i).map(|edge| edge.from);
        let destination = by_to.get(k).map(|edge| edge.to);

        let head_found = match (source, destination) {
            (Some(source), Some(destination)) if source == destination => {
                i += 1;
                k += 1;
                continue;
            }
            (Some(source), Some(destination)) => source < destination,
            (Some(_), None) => true,
            (None, _) => false,
        };

        let (found, idx, end) = if head_found {
            i += 1;
            (&mut head_index, i - 1, "head")
        } else {
            k += 1;
            (&mut tail_index, k - 1, "tail")
        };
        if found.replace(idx).is_some() {
            return Err(Error::MalformedList(format!("more than one {} in the list", end)));
        }
    }

    match (head_index, tail_index) {
        (Some(head_index), Some(tail_index)) => Ok(ListEnds {
            head_index,
            tail_index,
            head_node: by_from[head_index].from,
            tail_node: by_to[tail_index].to,
        }),
        _ => Err(Error::MalformedList("list has no head or no tail".to_string())),
    }
}

/// Maps every edge, by its position in `from` order, to the position of its successor.
///
/// The k-th smallest destination `t` is a source too, unless it is the tail, and its rank
/// among the sources differs from k by the two list ends: the head is a source but not a
/// destination (+1 when `t` is past it), the tail is a destination but not a source (-1 when
/// `t` is past it).
fn successor_indices(by_to: &[Edge], ends: &ListEnds) -> Vec<Option<usize>> {
    let mut successors = Vec::from_iter(by_to.iter().enumerate().map(|(k, edge)| {
        let successor = if k == ends.tail_index {
            None
        } else {
            Some(k + (edge.to > ends.head_node) as usize - (edge.to > ends.tail_node) as usize)
        };
        (edge.from, successor)
    }));

    successors.sort_unstable_by_key(|&(from, _)| from);
    return Vec::from_iter(successors.into_iter().map(|(_, successor)| successor));
}
