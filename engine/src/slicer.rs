// slicer.rs — Cut a stream into cache-line slices
//
// Elements are allocated lazily in index order; each one covers the cache
// lines spanned by `[vaddr, vaddr + elem_size)`. With coalescing, elements
// sharing a line extend the open slice for that line instead of opening a
// new one. A slice is handed out only once the allocation frontier has moved
// past its end, so it cannot grow any more.
//
// Preconditions: the address pattern is fully invariant (no base streams).
// Failure modes: a hole inside a coalesced slice and a decreasing element
//   overlapping earlier slices are fatal.
// Side effects: none.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::addr_gen::{gen_addr, AddrGen};
use crate::dep_graph::StreamConfig;
use crate::fatal;
use crate::id::DynStrandId;
use crate::options::EngineOptions;
use crate::value::{unreachable_resolver, FormalParam};

/// Half-open element range `[lhs, rhs)` touching one cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slice {
    pub strand: DynStrandId,
    pub lhs: u64,
    pub rhs: u64,
    pub vaddr: u64,
    pub size: u64,
}

impl Slice {
    pub fn num_elements(&self) -> u64 {
        self.rhs - self.lhs
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}) {:#x}+{}", self.strand, self.lhs, self.rhs, self.vaddr, self.size)
    }
}

#[derive(Debug)]
pub struct ElementSlicer {
    strand: DynStrandId,
    formal: Vec<FormalParam>,
    addr_gen: Rc<dyn AddrGen>,
    elem_size: u64,
    total_trip: Option<u64>,
    line_size: u64,
    coalesce: bool,
    tail: u64,
    slice_head: u64,
    slices: VecDeque<Slice>,
}

impl ElementSlicer {
    pub fn new(
        strand: DynStrandId,
        formal: Vec<FormalParam>,
        addr_gen: Rc<dyn AddrGen>,
        elem_size: u64,
        total_trip: Option<u64>,
        line_size: u64,
        coalesce: bool,
    ) -> Self {
        Self {
            strand,
            formal,
            addr_gen,
            elem_size,
            total_trip,
            line_size,
            coalesce,
            tail: 0,
            slice_head: 0,
            slices: VecDeque::new(),
        }
    }

    pub fn from_config(config: &StreamConfig, options: &EngineOptions) -> Self {
        Self::new(
            config.strand_id(),
            config.formal.clone(),
            Rc::clone(&config.addr_gen),
            config.elem_size,
            config.total_trip,
            options.line_size,
            options.coalesce_continuous,
        )
    }

    pub fn strand(&self) -> DynStrandId {
        self.strand
    }

    pub fn total_trip(&self) -> Option<u64> {
        self.total_trip
    }

    pub fn elem_size(&self) -> u64 {
        self.elem_size
    }

    pub fn element_vaddr(&self, idx: u64) -> u64 {
        gen_addr(self.addr_gen.as_ref(), idx, &self.formal, unreachable_resolver).front()
    }

    fn line_of(&self, addr: u64) -> u64 {
        addr & !(self.line_size - 1)
    }

    fn fill_front(&mut self) {
        while self.slices.front().map_or(true, |s| s.rhs == self.tail) {
            self.allocate_one_element();
        }
    }

    pub fn next_slice(&mut self) -> Slice {
        self.fill_front();
        match self.slices.pop_front() {
            Some(slice) => slice,
            None => fatal!("{}: no slice after allocation", self.strand),
        }
    }

    pub fn peek_next_slice(&mut self) -> &Slice {
        self.fill_front();
        match self.slices.front() {
            Some(slice) => slice,
            None => fatal!("{}: no slice after allocation", self.strand),
        }
    }

    /// The next slice only covers the one element tolerated past the end.
    /// A zero-trip stream never overflows.
    pub fn has_overflowed(&mut self) -> bool {
        match self.total_trip {
            Some(total) if total > 0 => self.peek_next_slice().lhs >= total + 1,
            _ => false,
        }
    }

    fn element_past_end(&self, idx: u64) -> bool {
        self.total_trip.map_or(false, |total| idx >= total)
    }

    fn allocate_one_element(&mut self) {
        let lhs = self.element_vaddr(self.tail);
        let rhs = lhs.wrapping_add(self.elem_size);
        let lhs_block = self.line_of(lhs);
        let rhs_block = self.line_of(rhs.wrapping_sub(1));
        trace!(
            strand = %self.strand,
            idx = self.tail,
            "allocate element, lines [{:#x}, {:#x}]",
            lhs_block,
            rhs_block
        );

        let mut cur_block = lhs_block;
        if self.coalesce && !self.element_past_end(self.tail) {
            let decreasing = self.slices.back().map_or(false, |s| lhs_block < s.vaddr);
            if decreasing {
                if let Some(s) = self.slices.iter().find(|s| rhs_block >= s.vaddr) {
                    fatal!(
                        "{}[{}]: decreasing element at {:#x} overlaps slice {}",
                        self.strand,
                        self.tail,
                        lhs,
                        s
                    );
                }
                self.slice_head = self.tail;
            } else {
                for slice in self.slices.iter_mut() {
                    if slice.lhs < self.slice_head {
                        continue;
                    }
                    if slice.vaddr == cur_block {
                        if slice.rhs != self.tail {
                            fatal!(
                                "{}[{}]: hole in coalesced slice {}",
                                self.strand,
                                self.tail,
                                slice
                            );
                        }
                        slice.rhs += 1;
                        cur_block = cur_block.wrapping_add(self.line_size);
                        if cur_block > rhs_block {
                            break;
                        }
                    }
                }
            }
        } else {
            self.slice_head = self.tail;
        }

        while cur_block <= rhs_block {
            self.slices.push_back(Slice {
                strand: self.strand,
                lhs: self.tail,
                rhs: self.tail + 1,
                vaddr: cur_block,
                size: self.line_size,
            });
            cur_block += self.line_size;
        }
        self.tail += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr_gen::LinearAddrGen;
    use crate::id::DynStreamId;
    use crate::value::invariant_params;

    fn slicer(params: &[u64], elem: u64, total: Option<u64>, coalesce: bool) -> ElementSlicer {
        ElementSlicer::new(
            DynStreamId::new(0, 3, 1).into(),
            invariant_params(params),
            Rc::new(LinearAddrGen),
            elem,
            total,
            64,
            coalesce,
        )
    }

    #[test]
    fn one_line_coalesces_into_one_slice() {
        let mut s = slicer(&[8, 4, 0x1000], 8, Some(4), true);
        let addrs: Vec<u64> = (0..4).map(|i| s.element_vaddr(i)).collect();
        assert_eq!(addrs, vec![0x1000, 0x1008, 0x1010, 0x1018]);
        let first = s.next_slice();
        assert_eq!((first.lhs, first.rhs, first.vaddr, first.size), (0, 4, 0x1000, 64));
        // Only the tolerated extra element remains.
        assert_eq!(s.peek_next_slice().lhs, 4);
        assert!(!s.has_overflowed());
        s.next_slice();
        assert!(s.has_overflowed());
    }

    #[test]
    fn without_coalescing_every_element_is_a_slice() {
        let mut s = slicer(&[8, 4, 0x1000], 8, Some(4), false);
        for i in 0..4 {
            let slice = s.next_slice();
            assert_eq!((slice.lhs, slice.rhs, slice.vaddr), (i, i + 1, 0x1000));
        }
    }

    #[test]
    fn element_spanning_two_lines() {
        let mut s = slicer(&[16, 0x1038], 16, None, true);
        let a = s.next_slice();
        assert_eq!((a.lhs, a.rhs, a.vaddr), (0, 1, 0x1000));
        let b = s.next_slice();
        assert_eq!((b.lhs, b.rhs, b.vaddr), (0, 5, 0x1040));
        let c = s.next_slice();
        assert_eq!((c.lhs, c.vaddr), (4, 0x1080));
    }

    #[test]
    fn decreasing_addresses_start_fresh_slices() {
        let mut s = slicer(&[(-64i64) as u64, 0x2000], 8, None, true);
        let a = s.next_slice();
        let b = s.next_slice();
        assert_eq!((a.lhs, a.rhs, a.vaddr), (0, 1, 0x2000));
        assert_eq!((b.lhs, b.rhs, b.vaddr), (1, 2, 0x1fc0));
    }

    #[test]
    #[should_panic(expected = "overlaps slice")]
    fn decreasing_overlap_is_fatal() {
        // Element 0 straddles 0x1000 and 0x1040; element 1 drops back into
        // the still open line at 0x1000.
        let mut s = slicer(&[(-0x30i64) as u64, 0x1038], 16, None, true);
        s.next_slice();
    }

    #[test]
    fn zero_trip_never_overflows() {
        let mut s = slicer(&[8, 0x1000], 8, Some(0), true);
        for _ in 0..3 {
            s.next_slice();
        }
        assert!(!s.has_overflowed());
    }

    #[test]
    fn unknown_trip_never_overflows() {
        let mut s = slicer(&[64, 0], 8, None, true);
        for _ in 0..8 {
            s.next_slice();
        }
        assert!(!s.has_overflowed());
    }
}
