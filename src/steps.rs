//! Scan operators of one recursion level of the list ranking.
//!
//! A level flips a coin for every edge ([`RandomFlag`]), bridges over nodes whose incoming edge
//! came up heads and outgoing edge came up tails ([`SeparateActiveFromCancel`]), drops the
//! edges that were bridged over from the active list ([`StripCancelFromActive`]) and, once the
//! shorter active list is ranked, splits every bridge back into its two edges
//! ([`PatchActiveCancel`]).

use rand::Rng;

use crate::edge::Edge;
use crate::error::{Error, Result};
use crate::scan::{ScanFlow, ScanInput, ScanOperator, ScanOutput};

/// Sets every edge's flag to a fair coin flip.
pub struct RandomFlag<'r, R: Rng> {
    rng: &'r mut R,
}

impl<'r, R: Rng> RandomFlag<'r, R> {
    pub fn new(rng: &'r mut R) -> Self {
        RandomFlag { rng }
    }
}

impl<'r, R: Rng> ScanOperator<Edge, 1, 1> for RandomFlag<'r, R> {
    fn operate(&mut self, input: &mut ScanInput<Edge, 1>, output: &mut ScanOutput<Edge, 1>) -> Result<ScanFlow> {
        let mut edge = match input.get(0) {
            Some(edge) => *edge,
            None => return Ok(ScanFlow::Done),
        };

        edge.flag = self.rng.gen();
        output.emit(0, edge);
        return Ok(ScanFlow::Continue);
    }
}

/// Splits a list into active edges and cancelled ones.
///
/// Input 0 is the list sorted by `from`, input 1 the same list sorted by `to`. Let `e2 = (x, y)`
/// and `e1 = (y, z)` be consecutive edges. Every edge reaches output 0 (active) through input 1.
/// If `e2` is flagged and `e1` is not, `e2` is written as the bridge `(x, z)` carrying both
/// weights and `e1` goes to output 1 (cancel). Since the outgoing edge of a bridged node is
/// unflagged it never starts a bridge itself, so no two bridges overlap and about a quarter of
/// the nodes are bridged.
///
/// `e1` is also written to the active list when it shows up on input 1, with the same `to` as
/// the bridge; [`StripCancelFromActive`] removes that copy.
pub struct SeparateActiveFromCancel {
    bridges: u64,
}

impl SeparateActiveFromCancel {
    pub const ACTIVE: usize = 0;
    pub const CANCEL: usize = 1;

    pub fn new() -> Self {
        SeparateActiveFromCancel { bridges: 0 }
    }

    /// Returns the number of bridges built by the last scan.
    pub fn bridges(&self) -> u64 {
        self.bridges
    }
}

impl Default for SeparateActiveFromCancel {
    fn default() -> Self {
        SeparateActiveFromCancel::new()
    }
}

impl ScanOperator<Edge, 2, 2> for SeparateActiveFromCancel {
    fn initialize(&mut self) {
        self.bridges = 0;
    }

    fn operate(&mut self, input: &mut ScanInput<Edge, 2>, output: &mut ScanOutput<Edge, 2>) -> Result<ScanFlow> {
        match (input.get(0).copied(), input.get(1).copied()) {
            (Some(e1), Some(e2)) if e2.to == e1.from => {
                let mut active = e2;
                if e2.flag && !e1.flag {
                    active.to = e1.to;
                    active.weight += e1.weight;
                    output.emit(Self::CANCEL, e1);
                    self.bridges += 1;
                }
                output.emit(Self::ACTIVE, active);
            }
            (Some(e1), Some(e2)) if e2.to > e1.from => {
                // e1 leaves the head, nothing arrives at its source
                input.keep(1);
            }
            (Some(_), Some(e2)) => {
                // e2 arrives at the tail, nothing leaves its destination
                input.keep(0);
                output.emit(Self::ACTIVE, e2);
            }
            // the head edge when the head has the largest node id, it is active through input 1
            (Some(_), None) => {}
            (None, Some(e2)) => output.emit(Self::ACTIVE, e2),
            (None, None) => return Ok(ScanFlow::Done),
        }

        return Ok(ScanFlow::Continue);
    }
}

/// Removes the cancelled edges from an active list sorted by `to`.
///
/// A cancelled edge and the bridge over it share their destination and the bridge has the
/// larger weight, so of two consecutive edges with the same `to` the lighter one is dropped.
pub struct StripCancelFromActive {
    held: Option<Edge>,
}

impl StripCancelFromActive {
    pub fn new() -> Self {
        StripCancelFromActive { held: None }
    }
}

impl Default for StripCancelFromActive {
    fn default() -> Self {
        StripCancelFromActive::new()
    }
}

impl ScanOperator<Edge, 1, 1> for StripCancelFromActive {
    fn initialize(&mut self) {
        self.held = None;
    }

    fn operate(&mut self, input: &mut ScanInput<Edge, 1>, output: &mut ScanOutput<Edge, 1>) -> Result<ScanFlow> {
        let active = match input.get(0) {
            Some(active) => *active,
            None => {
                return match self.held.take() {
                    Some(held) => {
                        output.emit(0, held);
                        Ok(ScanFlow::Continue)
                    }
                    None => Ok(ScanFlow::Done),
                }
            }
        };

        let held = match self.held.replace(active) {
            Some(held) => held,
            None => return Ok(ScanFlow::Continue),
        };

        if active.to < held.to {
            return Err(Error::LogicInvariant(format!(
                "active list is not sorted by destination ({} after {})",
                active.to, held.to
            )));
        }

        if active.to == held.to {
            if active.from == held.from || active.weight == held.weight {
                return Err(Error::LogicInvariant(format!(
                    "edges {} and {} cannot be told apart",
                    held, active
                )));
            }

            output.emit(0, if active.weight > held.weight { active } else { held });
            self.held = None;
        } else {
            output.emit(0, held);
        }

        return Ok(ScanFlow::Continue);
    }
}

/// Merges a ranked active list with its cancel list, both sorted by `to`.
///
/// A ranked bridge `(x, z)` of rank `r` and the cancelled edge `(y, z)` of weight `w` it was
/// built over become `(x, y)` of rank `r - w` and `(y, z)` of rank `r`. Output flags are cleared.
pub struct PatchActiveCancel {
    held: Option<Edge>,
}

impl PatchActiveCancel {
    pub const ACTIVE: usize = 0;
    pub const CANCEL: usize = 1;

    pub fn new() -> Self {
        PatchActiveCancel { held: None }
    }
}

impl Default for PatchActiveCancel {
    fn default() -> Self {
        PatchActiveCancel::new()
    }
}

impl ScanOperator<Edge, 2, 1> for PatchActiveCancel {
    fn initialize(&mut self) {
        self.held = None;
    }

    fn operate(&mut self, input: &mut ScanInput<Edge, 2>, output: &mut ScanOutput<Edge, 1>) -> Result<ScanFlow> {
        if let Some(held) = self.held.take() {
            input.keep(Self::ACTIVE);
            input.keep(Self::CANCEL);
            output.emit(0, held);
            return Ok(ScanFlow::Continue);
        }

        match (input.get(Self::ACTIVE).copied(), input.get(Self::CANCEL).copied()) {
            (None, None) => return Ok(ScanFlow::Done),
            (None, Some(cancel)) => {
                return Err(Error::LogicInvariant(format!(
                    "cancelled edge {} has no bridge in the active list",
                    cancel
                )))
            }
            (Some(active), None) => output.emit(0, Edge { flag: false, ..active }),
            (Some(active), Some(cancel)) if active.to == cancel.to => {
                let weight = active.weight.checked_sub(cancel.weight).ok_or_else(|| {
                    Error::LogicInvariant(format!("bridge {} is lighter than cancelled edge {}", active, cancel))
                })?;

                output.emit(0, Edge::with_weight(active.from, cancel.from, weight));
                self.held = Some(Edge::with_weight(cancel.from, active.to, active.weight));
            }
            (Some(active), Some(cancel)) if active.to < cancel.to => {
                input.keep(Self::CANCEL);
                output.emit(0, Edge { flag: false, ..active });
            }
            (Some(active), Some(cancel)) => {
                return Err(Error::LogicInvariant(format!(
                    "active edge {} passed cancelled edge {}, inputs out of sync",
                    active, cancel
                )))
            }
        }

        return Ok(ScanFlow::Continue);
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::*;

    use super::{PatchActiveCancel, RandomFlag, SeparateActiveFromCancel, StripCancelFromActive};
    use crate::edge::{by_from, by_to, Edge};
    use crate::error::{Error, Result};
    use crate::scan::scan;
    use crate::synthetic::generate_list;

    fn ok(edges: &[Edge]) -> Vec<Result<Edge>> {
        edges.iter().copied().map(Ok).collect()
    }

    fn flagged(from: u64, to: u64, flag: bool) -> Edge {
        Edge { flag, ..Edge::new(from, to) }
    }

    fn sorted(edges: &[Edge], compare: fn(&Edge, &Edge) -> std::cmp::Ordering) -> Vec<Edge> {
        let mut edges = edges.to_vec();
        edges.sort_by(compare);
        edges
    }

    /// Runs the separation and the stripping over a flagged list.
    fn shrink(edges: &[Edge]) -> (Vec<Edge>, Vec<Edge>) {
        let mut active = Vec::new();
        let mut cancel = Vec::new();
        scan(
            [ok(&sorted(edges, by_from)), ok(&sorted(edges, by_to))],
            &mut SeparateActiveFromCancel::new(),
            [&mut active, &mut cancel],
        )
        .unwrap();

        let mut stripped = Vec::new();
        scan([ok(&sorted(&active, by_to))], &mut StripCancelFromActive::new(), [&mut stripped]).unwrap();
        (stripped, cancel)
    }

    #[test]
    fn test_random_flag_keeps_edges() {
        let edges = Vec::from_iter(generate_list(1000));
        let mut flagged_edges = Vec::new();

        scan(
            [ok(&edges)],
            &mut RandomFlag::new(&mut StdRng::seed_from_u64(7)),
            [&mut flagged_edges],
        )
        .unwrap();

        assert_eq!(flagged_edges.len(), edges.len());
        for (edge, flagged_edge) in edges.iter().zip(&flagged_edges) {
            assert_eq!(Edge { flag: false, ..*flagged_edge }, *edge);
        }
        let heads = flagged_edges.iter().filter(|edge| edge.flag).count();
        assert!(heads > 400 && heads < 600, "{} heads", heads);
    }

    #[test]
    fn test_single_bridge_and_patch() {
        // A -> B -> C -> D with only the node B bridged over
        let (a, b, c, d) = (10, 20, 30, 40);
        let edges = vec![flagged(a, b, true), flagged(b, c, false), flagged(c, d, true)];

        let (active, cancel) = shrink(&edges);
        assert_eq!(cancel, vec![flagged(b, c, false)]);
        assert_eq!(
            Vec::from_iter(active.iter().map(|edge| (edge.from, edge.to, edge.weight))),
            vec![(a, c, 2), (c, d, 1)]
        );

        // ranking the two edge list gives the bridge its own weight
        let ranked = vec![Edge::with_weight(a, c, 2), Edge::with_weight(c, d, 3)];
        let mut patched = Vec::new();
        scan([ok(&ranked), ok(&cancel)], &mut PatchActiveCancel::new(), [&mut patched]).unwrap();

        assert_eq!(
            patched,
            vec![
                Edge::with_weight(a, b, 1),
                Edge::with_weight(b, c, 2),
                Edge::with_weight(c, d, 3),
            ]
        );
    }

    #[rstest]
    #[case::unflagged_predecessor(false, false)]
    #[case::flagged_successor(false, true)]
    #[case::both_flagged(true, true)]
    fn test_no_bridge_without_asymmetric_flags(#[case] first: bool, #[case] second: bool) {
        let edges = vec![flagged(1, 2, first), flagged(2, 3, second)];

        let (active, cancel) = shrink(&edges);
        assert!(cancel.is_empty());
        assert_eq!(active, sorted(&edges, by_to));
    }

    #[test]
    fn test_head_with_largest_node_id() {
        let edges = vec![flagged(9, 1, true), flagged(1, 2, false), flagged(2, 3, false)];

        let (active, cancel) = shrink(&edges);
        assert_eq!(cancel, vec![flagged(1, 2, false)]);
        assert_eq!(
            Vec::from_iter(active.iter().map(|edge| (edge.from, edge.to, edge.weight))),
            vec![(9, 2, 2), (2, 3, 1)]
        );
    }

    #[test]
    fn test_active_list_shrinks_by_a_quarter() {
        let len = 10_000;
        let mut rng = StdRng::seed_from_u64(2024);

        for _ in 0..5 {
            let mut edges = Vec::new();
            scan(
                [ok(&Vec::from_iter(generate_list(len)))],
                &mut RandomFlag::new(&mut rng),
                [&mut edges],
            )
            .unwrap();

            let (active, cancel) = shrink(&edges);
            assert_eq!(active.len() + cancel.len(), len as usize);
            assert!(
                active.len() >= 7_000 && active.len() <= 8_000,
                "active list of {} edges",
                active.len()
            );
        }
    }

    #[test]
    fn test_strip_rejects_unsorted_input() {
        let edges = vec![Edge::new(1, 5), Edge::new(2, 3)];
        let mut out = Vec::new();

        let result = scan([ok(&edges)], &mut StripCancelFromActive::new(), [&mut out]);
        assert!(matches!(result, Err(Error::LogicInvariant(_))));
    }

    #[test]
    fn test_strip_rejects_equal_weights() {
        let edges = vec![Edge::with_weight(1, 5, 2), Edge::with_weight(2, 5, 2)];
        let mut out = Vec::new();

        let result = scan([ok(&edges)], &mut StripCancelFromActive::new(), [&mut out]);
        assert!(matches!(result, Err(Error::LogicInvariant(_))));
    }

    #[rstest]
    #[case::cancel_without_bridge(vec![Edge::with_weight(1, 2, 1)], vec![Edge::with_weight(7, 9, 1)])]
    #[case::cancel_behind(vec![Edge::with_weight(1, 5, 3)], vec![Edge::with_weight(7, 4, 1)])]
    #[case::lighter_bridge(vec![Edge::with_weight(1, 5, 1)], vec![Edge::with_weight(7, 5, 2)])]
    fn test_patch_rejects_out_of_sync_inputs(#[case] active: Vec<Edge>, #[case] cancel: Vec<Edge>) {
        let mut out = Vec::new();
        let result = scan([ok(&active), ok(&cancel)], &mut PatchActiveCancel::new(), [&mut out]);
        assert!(matches!(result, Err(Error::LogicInvariant(_))));
    }
}
