// strand.rs — Partitioning a stream's element space into strands
//
// Two partitions are supported. `Interleave` deals out fixed-size runs of
// `interleave` consecutive elements to strands round-robin. `ByElem` hands
// each strand one contiguous range, with the remainder going to the
// lowest-indexed strands.
//
// Postconditions: `map_strand_to_stream(map_stream_to_strand(i)) == i` for
//   every stream element index `i`.
// Side effects: none.

use std::fmt;

/// Element index expressed in strand-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrandElemIdx {
    pub strand_idx: u32,
    pub elem_idx: u64,
}

impl StrandElemIdx {
    pub fn new(strand_idx: u32, elem_idx: u64) -> Self {
        Self {
            strand_idx,
            elem_idx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrandSplit {
    Interleave { interleave: u64, total_strands: u32 },
    /// `bounds[s]..bounds[s + 1]` is strand `s`'s range; `bounds.len()` is
    /// `total_strands + 1`.
    ByElem { bounds: Vec<u64> },
}

impl StrandSplit {
    pub fn interleave(interleave: u64, total_strands: u32) -> Self {
        assert!(interleave > 0, "zero strand interleave");
        assert!(total_strands > 0, "zero strands");
        StrandSplit::Interleave {
            interleave,
            total_strands,
        }
    }

    /// Contiguous partition of `trip` elements over `strands` strands.
    pub fn by_elem(trip: u64, strands: u32) -> Self {
        assert!(strands > 0, "zero strands");
        let n = strands as u64;
        let base = trip / n;
        let rem = trip % n;
        let mut bounds = Vec::with_capacity(strands as usize + 1);
        let mut acc = 0;
        bounds.push(acc);
        for s in 0..n {
            acc += base + u64::from(s < rem);
            bounds.push(acc);
        }
        StrandSplit::ByElem { bounds }
    }

    pub fn total_strands(&self) -> u32 {
        match self {
            StrandSplit::Interleave { total_strands, .. } => *total_strands,
            StrandSplit::ByElem { bounds } => (bounds.len() - 1) as u32,
        }
    }

    pub fn map_stream_to_strand(&self, idx: u64) -> StrandElemIdx {
        match self {
            StrandSplit::Interleave {
                interleave,
                total_strands,
            } => {
                let total = *total_strands as u64;
                let strand = (idx / interleave) % total;
                let elem = (idx / (interleave * total)) * interleave + idx % interleave;
                StrandElemIdx::new(strand as u32, elem)
            }
            StrandSplit::ByElem { bounds } => {
                // Last strand whose lower bound is <= idx. Indices past the
                // end stay with the final strand.
                let upper = bounds.partition_point(|&b| b <= idx);
                let strand = upper.saturating_sub(1).min(bounds.len() - 2);
                StrandElemIdx::new(strand as u32, idx - bounds[strand])
            }
        }
    }

    pub fn map_strand_to_stream(&self, split: StrandElemIdx) -> u64 {
        match self {
            StrandSplit::Interleave {
                interleave,
                total_strands,
            } => {
                let total = *total_strands as u64;
                let e = split.elem_idx;
                (e / interleave) * (interleave * total)
                    + split.strand_idx as u64 * interleave
                    + e % interleave
            }
            StrandSplit::ByElem { bounds } => bounds[split.strand_idx as usize] + split.elem_idx,
        }
    }

    /// Number of stream elements strand `strand_idx` owns out of `stream_trip`.
    pub fn strand_trip_count(&self, stream_trip: u64, strand_idx: u32) -> u64 {
        match self {
            StrandSplit::Interleave {
                interleave,
                total_strands,
            } => {
                let unit = interleave * *total_strands as u64;
                let full = (stream_trip / unit) * interleave;
                let rem = stream_trip % unit;
                let strand_off = strand_idx as u64 * interleave;
                full + rem.saturating_sub(strand_off).min(*interleave)
            }
            StrandSplit::ByElem { bounds } => {
                let s = strand_idx as usize;
                bounds[s + 1] - bounds[s]
            }
        }
    }
}

impl fmt::Display for StrandSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrandSplit::Interleave {
                interleave,
                total_strands,
            } => write!(f, "Intrlv[{}x{}]", interleave, total_strands),
            StrandSplit::ByElem { bounds } => {
                write!(f, "ByElem[")?;
                for (i, b) in bounds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", b)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_mapping() {
        let split = StrandSplit::interleave(2, 3);
        // 0 1 | 2 3 | 4 5 | 6 7 ...
        // s0    s1    s2    s0
        assert_eq!(split.map_stream_to_strand(0), StrandElemIdx::new(0, 0));
        assert_eq!(split.map_stream_to_strand(3), StrandElemIdx::new(1, 1));
        assert_eq!(split.map_stream_to_strand(6), StrandElemIdx::new(0, 2));
        assert_eq!(split.map_stream_to_strand(11), StrandElemIdx::new(2, 3));
        for i in 0..100 {
            assert_eq!(split.map_strand_to_stream(split.map_stream_to_strand(i)), i);
        }
    }

    #[test]
    fn interleave_trip_counts_sum_to_total() {
        let split = StrandSplit::interleave(4, 3);
        for trip in [0u64, 1, 5, 12, 13, 30] {
            let sum: u64 = (0..3).map(|s| split.strand_trip_count(trip, s)).sum();
            assert_eq!(sum, trip, "trip {}", trip);
        }
        // 13 = 12 + 1: strand 0 gets the leftover element.
        assert_eq!(split.strand_trip_count(13, 0), 5);
        assert_eq!(split.strand_trip_count(13, 1), 4);
    }

    #[test]
    fn by_elem_remainder_to_low_strands() {
        let split = StrandSplit::by_elem(10, 4);
        let trips: Vec<u64> = (0..4).map(|s| split.strand_trip_count(10, s)).collect();
        assert_eq!(trips, vec![3, 3, 2, 2]);
        assert_eq!(split.map_stream_to_strand(5), StrandElemIdx::new(1, 2));
        assert_eq!(split.map_stream_to_strand(9), StrandElemIdx::new(3, 1));
        for i in 0..10 {
            assert_eq!(split.map_strand_to_stream(split.map_stream_to_strand(i)), i);
        }
    }

    #[test]
    fn by_elem_with_empty_strands() {
        let split = StrandSplit::by_elem(2, 4);
        assert_eq!(split.total_strands(), 4);
        assert_eq!(split.strand_trip_count(2, 3), 0);
        assert_eq!(split.map_stream_to_strand(1), StrandElemIdx::new(1, 0));
    }

    #[test]
    fn display() {
        assert_eq!(StrandSplit::interleave(16, 64).to_string(), "Intrlv[16x64]");
        assert_eq!(StrandSplit::by_elem(5, 2).to_string(), "ByElem[0,3,5]");
    }
}
