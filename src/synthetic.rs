//! Synthetic lists to rank, and checks of ranked ones.

use std::io::Write;
use std::path::Path;

use log;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::edge::Edge;
use crate::error::{Error, Result};
use crate::stream::{Record, RecordStream};

/// Odd multiplier spreading list positions over the node id space.
pub const NODE_ID_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// Returns the id of the node at `position` in a generated list.
/// Multiplying by an odd number is a bijection on `u64`, so ids are unique.
pub fn node_id(position: u64) -> u64 {
    position.wrapping_add(1).wrapping_mul(NODE_ID_MULTIPLIER)
}

/// Generates the edges of a list of `len` unit-weight edges in list order.
/// Node ids are scattered so that their order has nothing to do with the list order.
pub fn generate_list(len: u64) -> impl Iterator<Item = Edge> + Clone {
    (0..len).map(|position| Edge::new(node_id(position), node_id(position + 1)))
}

/// Writes a random permutation of `input` to `output`.
///
/// The input is cut into runs of `run_len` records which are shuffled in memory. The runs are
/// then merged, each record being taken from a run with probability proportional to the number
/// of records the run has left, which makes every permutation equally likely.
///
/// # Arguments
/// * `input` - Records to be shuffled
/// * `output` - Stream the permutation is appended to
/// * `dir` - Directory of the temporary run stream
/// * `run_len` - Number of records shuffled in memory at once
/// * `rng` - Random number generator
pub fn shuffle<T, R>(
    input: &mut RecordStream<T>,
    output: &mut RecordStream<T>,
    dir: &Path,
    run_len: usize,
    rng: &mut R,
) -> Result<()>
where
    T: Record,
    R: Rng,
{
    let run_len = run_len.max(1);
    let mut runs = RecordStream::create_in(dir)?;
    let mut bounds = Vec::new();
    let mut buf = Vec::with_capacity(run_len);

    input.seek(0)?;
    while input.read_bulk(&mut buf, run_len)? > 0 {
        buf.shuffle(rng);
        let start = runs.len();
        runs.write_bulk(&buf)?;
        bounds.push((start, runs.len()));
        buf.clear();
    }

    if bounds.is_empty() {
        return output.flush();
    }
    log::debug!("merging {} shuffled runs of {} records", bounds.len(), run_len);

    let mut views = bounds
        .iter()
        .map(|&(start, end)| runs.substream(start, end))
        .collect::<Result<Vec<_>>>()?;
    let block_len = (run_len / views.len()).max(1);
    let mut readers = views
        .iter_mut()
        .map(|view| view.reader(block_len))
        .collect::<Result<Vec<_>>>()?;

    let mut remaining = Vec::from_iter(bounds.iter().map(|&(start, end)| end - start));
    let mut total: u64 = remaining.iter().sum();

    while total > 0 {
        let mut pick = rng.gen_range(0..total);
        let mut idx = 0;
        while pick >= remaining[idx] {
            pick -= remaining[idx];
            idx += 1;
        }

        let item = match readers[idx].next() {
            Some(item) => item?,
            None => {
                return Err(Error::LogicInvariant(format!(
                    "run {} ended with {} records left",
                    idx, remaining[idx]
                )))
            }
        };
        output.append(&item)?;
        remaining[idx] -= 1;
        total -= 1;
    }

    return output.flush();
}

/// Checks that `edges`, sorted by weight, are a ranked list: the weights are exactly `1..=n`
/// and every edge starts where the previous one ends. Returns the number of edges.
pub fn check_ranked<I>(edges: I) -> Result<u64>
where
    I: IntoIterator<Item = Result<Edge>>,
{
    let mut count = 0;
    let mut previous: Option<Edge> = None;

    for edge in edges {
        let edge = edge?;
        count += 1;

        if edge.weight != count {
            return Err(Error::Verification(format!(
                "edge ({}) is ranked {} at position {}",
                edge, edge.weight, count
            )));
        }
        if let Some(previous) = previous {
            if previous.to != edge.from {
                return Err(Error::Verification(format!(
                    "edge ({}) does not continue edge ({})",
                    edge, previous
                )));
            }
        }
        previous = Some(edge);
    }

    return Ok(count);
}

/// Writes `edges` to `writer`, one `from to weight flag` line per edge.
pub fn write_text<I, W>(edges: I, writer: &mut W) -> Result<()>
where
    I: IntoIterator<Item = Result<Edge>>,
    W: Write,
{
    for edge in edges {
        writeln!(writer, "{}", edge?)?;
    }
    writer.flush()?;
    return Ok(());
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::*;

    use super::{check_ranked, generate_list, node_id, shuffle, write_text};
    use crate::edge::{by_from, Edge};
    use crate::error::Error;
    use crate::stream::RecordStream;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_generated_list_is_linked() {
        let edges = Vec::from_iter(generate_list(1000));

        assert_eq!(edges.len(), 1000);
        for (edge, next) in edges.iter().zip(edges.iter().skip(1)) {
            assert_eq!(edge.to, next.from);
            assert_eq!(edge.weight, 1);
        }

        let nodes: HashSet<u64> = edges.iter().flat_map(|edge| [edge.from, edge.to]).collect();
        assert_eq!(nodes.len(), 1001);
        assert_ne!(edges.iter().map(|edge| edge.from).min(), Some(node_id(0)));
    }

    #[rstest]
    #[case(0, 16)]
    #[case(1, 16)]
    #[case(100, 7)]
    #[case(5000, 256)]
    #[case(300, 1000)]
    fn test_shuffle_is_permutation(tmp_dir: tempfile::TempDir, #[case] len: u64, #[case] run_len: usize) {
        let list = Vec::from_iter(generate_list(len));

        let mut input = RecordStream::create_in(tmp_dir.path()).unwrap();
        input.write_bulk(&list).unwrap();
        let mut output = RecordStream::create_in(tmp_dir.path()).unwrap();
        shuffle(&mut input, &mut output, tmp_dir.path(), run_len, &mut StdRng::seed_from_u64(len)).unwrap();

        let shuffled = output.read_all().unwrap();
        if len >= 100 {
            assert_ne!(shuffled, list);
        }

        let mut restored = shuffled.clone();
        let mut expected = list.clone();
        restored.sort_by(by_from);
        expected.sort_by(by_from);
        assert_eq!(restored, expected);
    }

    #[rstest]
    fn test_shuffle_spreads_runs(tmp_dir: tempfile::TempDir) {
        let mut input = RecordStream::create_in(tmp_dir.path()).unwrap();
        input.write_bulk(&Vec::from_iter((0..4000).map(|i| Edge::new(i, i + 1)))).unwrap();
        let mut output = RecordStream::create_in(tmp_dir.path()).unwrap();
        shuffle(&mut input, &mut output, tmp_dir.path(), 1000, &mut StdRng::seed_from_u64(3)).unwrap();

        // the first quarter of the output draws from every run
        let head = output.read_all().unwrap()[..1000].to_vec();
        let runs: HashSet<u64> = head.iter().map(|edge| edge.from / 1000).collect();
        assert_eq!(runs.len(), 4);
    }

    #[test]
    fn test_check_ranked() {
        let ranked = Vec::from_iter(
            generate_list(50)
                .enumerate()
                .map(|(i, edge)| Ok(Edge::with_weight(edge.from, edge.to, i as u64 + 1))),
        );
        assert_eq!(check_ranked(ranked).unwrap(), 50);
        assert_eq!(check_ranked(Vec::new()).unwrap(), 0);
    }

    #[rstest]
    #[case::skipped_rank(vec![Edge::with_weight(1, 2, 1), Edge::with_weight(2, 3, 3)])]
    #[case::zero_rank(vec![Edge::with_weight(1, 2, 0)])]
    #[case::broken_link(vec![Edge::with_weight(1, 2, 1), Edge::with_weight(3, 4, 2)])]
    fn test_check_ranked_rejects(#[case] edges: Vec<Edge>) {
        let result = check_ranked(edges.into_iter().map(Ok));
        assert!(matches!(result, Err(Error::Verification(_))), "{:?}", result);
    }

    #[test]
    fn test_write_text() {
        let mut edges = vec![Edge::with_weight(5, 9, 2), Edge::new(9, 1)];
        edges[1].flag = true;

        let mut text = Vec::new();
        write_text(edges.into_iter().map(Ok), &mut text).unwrap();
        assert_eq!(String::from_utf8(text).unwrap(), "5 9 2 0\n9 1 1 1\n");
    }
}
