// element.rs — Per-element block tracking and value buffer
//
// An element's byte range is broken into the cache lines it touches. Each
// block advances on its own (requests can complete out of order) and the
// element becomes value ready once every block is Ready or Faulted. The value
// buffer is indexed from the first block's line address, so an element may
// hold a few bytes beyond its own range in its last line.
//
// Preconditions: `line_size` is a power of two; value accessors require the
//   address to be ready.
// Failure modes: double value ready, out-of-range value access and clearing
//   blocks still attached to an access are fatal. Block overflow goes through
//   the configured `OverflowPolicy`.
// Side effects: none.

use std::fmt;

use tracing::{debug, trace};

use crate::error::CapacityError;
use crate::fatal;
use crate::id::{AccessId, ConfigId, DynStreamId, ElementId};
use crate::options::OverflowPolicy;
use crate::value::{StreamValue, STREAM_VALUE_BYTES};

pub const MAX_CACHE_BLOCKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBlockState {
    #[default]
    None,
    Initialized,
    /// Poisoned by a bad translation; propagated to every user.
    Faulted,
    Issued,
    /// Filled by copying from the previous element of the stream.
    PrevElement,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheBlock {
    pub line_vaddr: u64,
    pub vaddr: u64,
    pub size: u64,
    pub access: Option<AccessId>,
    pub state: CacheBlockState,
}

/// Fixed-capacity block list.
#[derive(Debug, Clone, Default)]
pub struct BlockArray {
    blocks: [CacheBlock; MAX_CACHE_BLOCKS],
    len: usize,
}

impl BlockArray {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == MAX_CACHE_BLOCKS
    }

    /// Returns the block back when the array is full.
    pub fn push(&mut self, block: CacheBlock) -> Result<(), CacheBlock> {
        if self.is_full() {
            return Err(block);
        }
        self.blocks[self.len] = block;
        self.len += 1;
        Ok(())
    }

    pub fn as_slice(&self) -> &[CacheBlock] {
        &self.blocks[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [CacheBlock] {
        &mut self.blocks[..self.len]
    }

    pub fn clear(&mut self) {
        for b in self.as_mut_slice() {
            *b = CacheBlock::default();
        }
        self.len = 0;
    }
}

/// A base element as seen by its user. The arena slot may be recycled, so
/// the stream and index are kept to detect a stale reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRef {
    pub element: ElementId,
    pub stream: DynStreamId,
    pub idx: u64,
}

impl BaseRef {
    pub fn matches(&self, e: &Element) -> bool {
        e.stream == self.stream && e.idx == self.idx
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub stream: DynStreamId,
    pub config: ConfigId,
    pub idx: u64,
    pub addr: u64,
    pub size: u64,
    /// Memory streams track real lines; others keep a synthetic block at 0.
    pub is_mem: bool,
    line_size: u64,
    blocks: BlockArray,
    value: Vec<u8>,
    pub addr_base: Vec<BaseRef>,
    pub value_base: Vec<BaseRef>,
    pub next: Option<ElementId>,
    pub addr_ready: bool,
    pub value_ready: bool,
    pub req_issued: bool,
    pub stepped: bool,
    pub flushed: bool,
    pub aliased: bool,
    pub compute_scheduled: bool,
    pub load_compute_value: Option<StreamValue>,
}

impl Element {
    pub fn new(stream: DynStreamId, config: ConfigId, idx: u64, size: u64, is_mem: bool, line_size: u64) -> Self {
        Self {
            stream,
            config,
            idx,
            addr: 0,
            size,
            is_mem,
            line_size,
            blocks: BlockArray::default(),
            value: Vec::new(),
            addr_base: Vec::new(),
            value_base: Vec::new(),
            next: None,
            addr_ready: false,
            value_ready: false,
            req_issued: false,
            stepped: false,
            flushed: false,
            aliased: false,
            compute_scheduled: false,
            load_compute_value: None,
        }
    }

    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    pub fn blocks(&self) -> &[CacheBlock] {
        self.blocks.as_slice()
    }

    pub fn blocks_mut(&mut self) -> &mut [CacheBlock] {
        self.blocks.as_mut_slice()
    }

    pub fn block_of_line(&self, line_vaddr: u64) -> Option<usize> {
        self.blocks().iter().position(|b| b.line_vaddr == line_vaddr)
    }

    /// Fix the address and break the element into cache blocks. Nothing is
    /// committed when the blocks do not fit.
    pub fn mark_addr_ready(&mut self, addr: u64, policy: OverflowPolicy) -> Result<(), CapacityError> {
        if self.addr_ready {
            fatal!("{}: address is already ready", self);
        }
        let addr = if self.is_mem { addr } else { 0 };
        let blocks = self.split_into_cache_blocks(addr, policy)?;
        let bytes = blocks.len() * self.line_size as usize;
        if self.value.len() < bytes {
            self.value.resize(bytes, 0);
        }
        self.blocks = blocks;
        self.addr = addr;
        self.addr_ready = true;
        debug!(stream = %self.stream, idx = self.idx, "addr ready {:#x} size {}", self.addr, self.size);
        Ok(())
    }

    /// The blocks covering `[addr, addr + size)`.
    pub fn split_into_cache_blocks(&self, addr: u64, policy: OverflowPolicy) -> Result<BlockArray, CapacityError> {
        let line = self.line_size;
        let mut blocks = BlockArray::default();
        let mut done = 0;
        while done < self.size {
            let cur = addr.wrapping_add(done);
            let mut size = self.size - done;
            if cur % line + size > line {
                size = line - cur % line;
            }
            let block = CacheBlock {
                line_vaddr: cur & !(line - 1),
                vaddr: cur,
                size,
                access: None,
                state: CacheBlockState::Initialized,
            };
            if blocks.push(block).is_err() {
                return policy.overflow(CapacityError::CacheBlocks {
                    stream: self.stream,
                    idx: self.idx,
                    addr,
                    size: self.size,
                    capacity: MAX_CACHE_BLOCKS,
                });
            }
            done += size;
        }
        Ok(blocks)
    }

    pub fn map_vaddr_to_value_offset(&self, vaddr: u64, size: u64) -> usize {
        let first = match self.blocks().first() {
            Some(b) => b.line_vaddr,
            None => fatal!("{}: no cache blocks, addr ready {}", self, self.addr_ready),
        };
        if vaddr < first {
            fatal!("{}: vaddr {:#x} below [{:#x}, +{})", self, vaddr, self.addr, self.size);
        }
        let offset = (vaddr - first) as usize;
        if offset + size as usize > self.value.len() {
            fatal!("{}: [{:#x}, +{}) overflows the value buffer", self, vaddr, size);
        }
        offset
    }

    pub fn map_vaddr_to_block(&self, vaddr: u64, size: u64) -> usize {
        self.map_vaddr_to_value_offset(vaddr, size) / self.line_size as usize
    }

    /// Write `bytes` at `vaddr` and promote every overlapped block to Ready.
    /// Returns whether this write made the element value ready.
    pub fn set_value(&mut self, vaddr: u64, bytes: &[u8]) -> bool {
        let size = bytes.len() as u64;
        let offset = self.map_vaddr_to_value_offset(vaddr, size);
        self.value[offset..offset + bytes.len()].copy_from_slice(bytes);
        trace!(stream = %self.stream, idx = self.idx, "set value [{:#x}, +{})", vaddr, size);

        // Synthetic elements match exactly; skip the overlap arithmetic so a
        // negative induction value cannot wrap.
        if !self.is_mem && vaddr == self.addr && size == self.size {
            for b in self.blocks_mut() {
                b.state = CacheBlockState::Ready;
            }
            return self.try_mark_value_ready();
        }
        let rhs = match vaddr.checked_add(size) {
            Some(rhs) => rhs,
            None => fatal!("{}: value range [{:#x}, +{}) wraps", self, vaddr, size),
        };
        let line = self.line_size;
        for b in self.blocks_mut() {
            let block_rhs = b.line_vaddr.wrapping_add(line);
            if vaddr >= block_rhs || rhs <= b.line_vaddr {
                continue;
            }
            b.state = CacheBlockState::Ready;
        }
        self.try_mark_value_ready()
    }

    /// Fill the PrevElement blocks by copying the same lines from `prev`,
    /// propagating faults. Returns whether this made the element ready.
    pub fn copy_from_prev(&mut self, prev: &Element) -> bool {
        let mut became_ready = false;
        for i in 0..self.blocks.len() {
            let block = self.blocks()[i];
            if block.state != CacheBlockState::PrevElement {
                continue;
            }
            let prev_block = prev.map_vaddr_to_block(block.line_vaddr, self.line_size);
            if prev.blocks()[prev_block].state == CacheBlockState::Faulted {
                self.blocks_mut()[i].state = CacheBlockState::Faulted;
                became_ready |= self.try_mark_value_ready();
                continue;
            }
            let bytes = prev.get_value(block.line_vaddr, self.line_size).to_vec();
            became_ready |= self.set_value(block.line_vaddr, &bytes);
        }
        became_ready
    }

    pub fn get_value(&self, vaddr: u64, size: u64) -> &[u8] {
        let offset = self.map_vaddr_to_value_offset(vaddr, size);
        &self.value[offset..offset + size as usize]
    }

    /// The element's own bytes, zero extended.
    pub fn element_value(&self) -> StreamValue {
        if self.size as usize > STREAM_VALUE_BYTES {
            fatal!("{}: element of {} bytes does not fit a stream value", self, self.size);
        }
        StreamValue::from_bytes(self.get_value(self.addr, self.size))
    }

    pub fn is_value_faulted(&self, vaddr: u64, size: u64) -> bool {
        if vaddr.checked_add(size).is_none() {
            return true;
        }
        let first = self.map_vaddr_to_block(vaddr, size);
        let last = self.map_vaddr_to_block(vaddr + size.max(1) - 1, 1);
        self.blocks()[first..=last]
            .iter()
            .any(|b| b.state == CacheBlockState::Faulted)
    }

    pub fn is_faulted(&self) -> bool {
        self.blocks().iter().any(|b| b.state == CacheBlockState::Faulted)
    }

    pub fn fault_block(&mut self, block: usize) -> bool {
        self.blocks_mut()[block].state = CacheBlockState::Faulted;
        self.try_mark_value_ready()
    }

    pub fn try_mark_value_ready(&mut self) -> bool {
        let done = self
            .blocks()
            .iter()
            .all(|b| matches!(b.state, CacheBlockState::Ready | CacheBlockState::Faulted));
        if !done {
            return false;
        }
        self.mark_value_ready();
        true
    }

    pub fn mark_value_ready(&mut self) {
        if self.value_ready {
            fatal!("{}: already value ready", self);
        }
        self.value_ready = true;
        if self.is_faulted() {
            debug!(stream = %self.stream, idx = self.idx, "value ready: faulted");
        } else {
            debug!(stream = %self.stream, idx = self.idx, "value ready");
        }
    }

    /// Detach every in-flight access and return them for deregistration.
    pub fn take_accesses(&mut self) -> Vec<AccessId> {
        self.blocks_mut().iter_mut().filter_map(|b| b.access.take()).collect()
    }

    pub fn clear_blocks(&mut self) {
        if let Some(b) = self.blocks().iter().find(|b| b.access.is_some()) {
            fatal!("{}: block {:#x} still attached to an access", self, b.line_vaddr);
        }
        self.blocks.clear();
    }

    /// Rewind to the allocated state after a misspeculation. The caller
    /// deregisters the returned accesses.
    pub fn flush_state(&mut self, aliased: bool) -> Vec<AccessId> {
        self.addr_ready = false;
        self.req_issued = false;
        self.value_ready = false;
        self.load_compute_value = None;
        self.compute_scheduled = false;
        self.flushed = true;
        if aliased {
            self.aliased = true;
        }
        self.addr = 0;
        let accesses = self.take_accesses();
        self.clear_blocks();
        self.value.fill(0);
        accesses
    }

    /// Reset for reuse by the allocator.
    pub fn clear(&mut self) {
        self.clear_blocks();
        self.value.fill(0);
        self.addr_base.clear();
        self.value_base.clear();
        self.next = None;
        self.addr = 0;
        self.addr_ready = false;
        self.value_ready = false;
        self.req_issued = false;
        self.stepped = false;
        self.flushed = false;
        self.aliased = false;
        self.compute_scheduled = false;
        self.load_compute_value = None;
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.stream, self.idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_element(size: u64) -> Element {
        Element::new(DynStreamId::new(0, 7, 1), ConfigId(0), 3, size, true, 64)
    }

    #[test]
    fn splits_across_lines() {
        let mut e = mem_element(16);
        e.mark_addr_ready(0x1038, OverflowPolicy::Report).unwrap();
        let blocks: Vec<(u64, u64, u64)> = e.blocks().iter().map(|b| (b.line_vaddr, b.vaddr, b.size)).collect();
        assert_eq!(blocks, vec![(0x1000, 0x1038, 8), (0x1040, 0x1040, 8)]);
        assert!(e.blocks().iter().all(|b| b.state == CacheBlockState::Initialized));
        assert_eq!(e.map_vaddr_to_value_offset(0x1038, 16), 0x38);
        assert_eq!(e.map_vaddr_to_block(0x1040, 8), 1);
    }

    #[test]
    fn block_overflow_is_reported() {
        let mut e = mem_element(11 * 64);
        let err = e.mark_addr_ready(0x1000, OverflowPolicy::Report).unwrap_err();
        assert!(matches!(err, CapacityError::CacheBlocks { capacity: MAX_CACHE_BLOCKS, .. }));
        assert!(!e.addr_ready);
        assert!(e.blocks().is_empty());

        // A smaller element fits after the failed attempt.
        e.size = 2 * 64;
        e.mark_addr_ready(0x1000, OverflowPolicy::Report).unwrap();
        assert_eq!(e.blocks().len(), 2);
    }

    #[test]
    fn ready_once_all_blocks_arrive() {
        let mut e = mem_element(16);
        e.mark_addr_ready(0x1038, OverflowPolicy::Report).unwrap();
        assert!(!e.set_value(0x1000, &[0xaa; 64]));
        assert!(!e.value_ready);
        assert!(e.set_value(0x1040, &[0xbb; 64]));
        assert!(e.value_ready);
        let mut expect = vec![0xaa; 8];
        expect.extend([0xbb; 8]);
        assert_eq!(e.get_value(0x1038, 16), expect.as_slice());
    }

    #[test]
    #[should_panic(expected = "already value ready")]
    fn second_full_write_is_fatal() {
        let mut e = mem_element(8);
        e.mark_addr_ready(0x2000, OverflowPolicy::Report).unwrap();
        assert!(e.set_value(0x2000, &[1; 8]));
        e.set_value(0x2000, &[2; 8]);
    }

    #[test]
    fn synthetic_element_fast_path() {
        let mut e = Element::new(DynStreamId::new(0, 1, 1), ConfigId(0), 0, 8, false, 64);
        e.mark_addr_ready(0xdead, OverflowPolicy::Report).unwrap();
        assert_eq!(e.addr, 0);
        assert!(e.set_value(0, &(-5i64).to_le_bytes()));
        assert_eq!(e.element_value().int64(), -5);
    }

    #[test]
    fn copy_from_prev_propagates_fault() {
        let mut prev = mem_element(16);
        prev.mark_addr_ready(0x1038, OverflowPolicy::Report).unwrap();
        prev.set_value(0x1000, &[1; 64]);
        prev.fault_block(1);
        assert!(prev.value_ready);

        let mut cur = mem_element(16);
        cur.mark_addr_ready(0x1048, OverflowPolicy::Report).unwrap();
        cur.blocks_mut()[0].state = CacheBlockState::PrevElement;
        assert!(cur.copy_from_prev(&prev));
        assert!(cur.is_faulted());
        assert!(cur.is_value_faulted(0x1048, 16));

        let mut clean = mem_element(8);
        clean.mark_addr_ready(0x1010, OverflowPolicy::Report).unwrap();
        clean.blocks_mut()[0].state = CacheBlockState::PrevElement;
        assert!(clean.copy_from_prev(&prev));
        assert_eq!(clean.get_value(0x1010, 8), &[1; 8]);
        assert!(!clean.is_value_faulted(0x1010, 8));
    }

    #[test]
    fn flush_detaches_accesses() {
        let mut e = mem_element(8);
        e.mark_addr_ready(0x3000, OverflowPolicy::Report).unwrap();
        e.blocks_mut()[0].access = Some(AccessId(4));
        e.blocks_mut()[0].state = CacheBlockState::Issued;
        let accesses = e.flush_state(true);
        assert_eq!(accesses, vec![AccessId(4)]);
        assert!(e.flushed && e.aliased && !e.addr_ready);
        assert!(e.blocks().is_empty());
        // Re-arm with a new address.
        e.mark_addr_ready(0x3040, OverflowPolicy::Report).unwrap();
        assert_eq!(e.blocks()[0].line_vaddr, 0x3040);
    }

    #[test]
    #[should_panic(expected = "still attached")]
    fn clearing_attached_blocks_is_fatal() {
        let mut e = mem_element(8);
        e.mark_addr_ready(0x3000, OverflowPolicy::Report).unwrap();
        e.blocks_mut()[0].access = Some(AccessId(1));
        e.clear_blocks();
    }
}
