//! List edge record and its orderings.

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Display;

use deepsize;
use serde;

use crate::stream::Record;

/// One link `from -> to` of the list being ranked.
///
/// `weight` starts at 1 and accumulates to the rank of the edge, `flag` is scratch
/// space for the coin flip of a single recursion level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, deepsize::DeepSizeOf)]
pub struct Edge {
    pub from: u64,
    pub to: u64,
    pub weight: u64,
    pub flag: bool,
}

impl Edge {
    /// Creates an unranked edge of weight 1.
    pub fn new(from: u64, to: u64) -> Self {
        Edge::with_weight(from, to, 1)
    }

    pub fn with_weight(from: u64, to: u64, weight: u64) -> Self {
        Edge {
            from,
            to,
            weight,
            flag: false,
        }
    }
}

/// Orders edges by their source node.
pub fn by_from(a: &Edge, b: &Edge) -> Ordering {
    a.from.cmp(&b.from)
}

/// Orders edges by their destination node.
pub fn by_to(a: &Edge, b: &Edge) -> Ordering {
    a.to.cmp(&b.to)
}

/// Orders edges by weight, which is the list order once ranked.
pub fn by_weight(a: &Edge, b: &Edge) -> Ordering {
    a.weight.cmp(&b.weight)
}

impl Record for Edge {
    const SIZE: usize = 8 + 8 + 8 + 1;

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.from.to_le_bytes());
        buf[8..16].copy_from_slice(&self.to.to_le_bytes());
        buf[16..24].copy_from_slice(&self.weight.to_le_bytes());
        buf[24] = self.flag as u8;
    }

    fn read_from(buf: &[u8]) -> Self {
        let mut word = [0; 8];
        let mut next_u64 = |at: usize| {
            word.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(word)
        };

        Edge {
            from: next_u64(0),
            to: next_u64(8),
            weight: next_u64(16),
            flag: buf[24] != 0,
        }
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.from, self.to, self.weight, self.flag as u8)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rstest::*;

    use super::{by_from, by_to, by_weight, Edge};
    use crate::stream::Record;

    #[rstest]
    #[case(Edge::with_weight(1, 9, 5), Edge::with_weight(2, 3, 4), Ordering::Less, Ordering::Greater, Ordering::Greater)]
    #[case(Edge::with_weight(7, 3, 1), Edge::with_weight(7, 3, 1), Ordering::Equal, Ordering::Equal, Ordering::Equal)]
    fn test_comparators(
        #[case] a: Edge,
        #[case] b: Edge,
        #[case] from: Ordering,
        #[case] to: Ordering,
        #[case] weight: Ordering,
    ) {
        assert_eq!(by_from(&a, &b), from);
        assert_eq!(by_to(&a, &b), to);
        assert_eq!(by_weight(&a, &b), weight);
    }

    #[test]
    fn test_record_layout() {
        let edge = Edge {
            from: 0x0102,
            to: u64::MAX,
            weight: 3,
            flag: true,
        };

        let mut buf = [0; Edge::SIZE];
        edge.write_to(&mut buf);
        assert_eq!(&buf[0..3], &[0x02, 0x01, 0x00]);
        assert_eq!(buf[24], 1);
        assert_eq!(Edge::read_from(&buf), edge);
    }

    #[test]
    fn test_display() {
        assert_eq!(Edge::with_weight(4, 8, 2).to_string(), "4 8 2 0");
    }
}
