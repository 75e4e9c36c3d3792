// mem_access.rs — In-flight line requests shared by several elements
//
// A `MemAccess` brings in one cache line for its leading element. Coalesced
// elements touching the same line register as receivers instead of issuing
// their own request. A flushed element deregisters and may register again
// when it is reissued; a response notifies each receiver still registered
// exactly once, then the access is freed.
//
// Failure modes: duplicate live registration, deregistering an unknown or
//   already deregistered element, and touching a freed access are fatal.
//   Receiver overflow goes through the configured `OverflowPolicy`.
// Side effects: none.

use tracing::trace;

use crate::error::CapacityError;
use crate::fatal;
use crate::id::{AccessId, DynStreamId, ElementId};
use crate::options::OverflowPolicy;
use crate::slicer::Slice;

pub const MAX_NUM_RECEIVERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receiver {
    pub element: ElementId,
    pub live: bool,
}

/// Bounded receiver list. Entries are never removed, only invalidated, so
/// a reissued element reuses its old slot.
#[derive(Debug, Clone)]
pub struct ReceiverList {
    receivers: Vec<Receiver>,
}

impl Default for ReceiverList {
    fn default() -> Self {
        Self {
            receivers: Vec::with_capacity(MAX_NUM_RECEIVERS),
        }
    }
}

impl ReceiverList {
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.receivers.iter().filter(|r| r.live).count()
    }

    pub fn is_registered(&self, element: ElementId) -> bool {
        self.receivers.iter().any(|r| r.element == element && r.live)
    }

    /// Returns false when a new slot is needed and the list is full.
    pub fn register(&mut self, element: ElementId) -> bool {
        if let Some(r) = self.receivers.iter_mut().find(|r| r.element == element) {
            if r.live {
                fatal!("duplicate receiver {:?}, still registered", element);
            }
            r.live = true;
            return true;
        }
        if self.receivers.len() == MAX_NUM_RECEIVERS {
            return false;
        }
        self.receivers.push(Receiver { element, live: true });
        true
    }

    /// Whether `register(element)` would succeed.
    pub fn has_room_for(&self, element: ElementId) -> bool {
        self.receivers.len() < MAX_NUM_RECEIVERS || self.receivers.iter().any(|r| r.element == element)
    }

    pub fn deregister(&mut self, element: ElementId) {
        match self.receivers.iter_mut().find(|r| r.element == element) {
            Some(r) if r.live => r.live = false,
            Some(_) => fatal!("receiver {:?} has already been deregistered", element),
            None => fatal!("receiver {:?} is not registered", element),
        }
    }

    /// Live receivers in registration order; each is invalidated as it is
    /// returned.
    pub fn drain_live(&mut self) -> Vec<ElementId> {
        self.receivers
            .iter_mut()
            .filter(|r| r.live)
            .map(|r| {
                r.live = false;
                r.element
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MemAccess {
    pub stream: DynStreamId,
    pub leader: ElementId,
    pub leader_idx: u64,
    pub line_vaddr: u64,
    pub vaddr: u64,
    pub size: u64,
    /// The leading element had been flushed when this was issued.
    pub is_reissue: bool,
    /// Cycles to hold the response before delivering it.
    pub additional_delay: u64,
    receivers: ReceiverList,
}

impl MemAccess {
    pub fn new(stream: DynStreamId, leader: ElementId, leader_idx: u64, line_vaddr: u64, vaddr: u64, size: u64) -> Self {
        Self {
            stream,
            leader,
            leader_idx,
            line_vaddr,
            vaddr,
            size,
            is_reissue: false,
            additional_delay: 0,
            receivers: ReceiverList::default(),
        }
    }

    /// The request as seen by the cache: the leader's element and line.
    pub fn slice(&self, line_size: u64) -> Slice {
        Slice {
            strand: self.stream.into(),
            lhs: self.leader_idx,
            rhs: self.leader_idx + 1,
            vaddr: self.line_vaddr,
            size: line_size,
        }
    }

    pub fn receivers(&self) -> &ReceiverList {
        &self.receivers
    }

    pub fn register_receiver(&mut self, element: ElementId, policy: OverflowPolicy) -> Result<(), CapacityError> {
        if self.receivers.register(element) {
            trace!(stream = %self.stream, line = format_args!("{:#x}", self.line_vaddr), ?element, "register receiver");
            return Ok(());
        }
        policy.overflow(self.receiver_overflow())
    }

    /// Fails the same way `register_receiver` would, without registering.
    pub fn check_receiver_room(&self, element: ElementId, policy: OverflowPolicy) -> Result<(), CapacityError> {
        if self.receivers.has_room_for(element) {
            return Ok(());
        }
        policy.overflow(self.receiver_overflow())
    }

    fn receiver_overflow(&self) -> CapacityError {
        CapacityError::Receivers {
            stream: self.stream,
            idx: self.leader_idx,
            line: self.line_vaddr,
            capacity: MAX_NUM_RECEIVERS,
        }
    }

    pub fn deregister_receiver(&mut self, element: ElementId) {
        self.receivers.deregister(element);
    }
}

/// Slab of in-flight accesses keyed by `AccessId`.
#[derive(Debug, Default)]
pub struct AccessPool {
    slots: Vec<Option<MemAccess>>,
    free: Vec<u32>,
}

impl AccessPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, access: MemAccess) -> AccessId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(access);
                AccessId(slot)
            }
            None => {
                self.slots.push(Some(access));
                AccessId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn get(&self, id: AccessId) -> &MemAccess {
        match self.slots.get(id.0 as usize).and_then(|s| s.as_ref()) {
            Some(a) => a,
            None => fatal!("access {:?} is not in flight", id),
        }
    }

    pub fn get_mut(&mut self, id: AccessId) -> &mut MemAccess {
        match self.slots.get_mut(id.0 as usize).and_then(|s| s.as_mut()) {
            Some(a) => a,
            None => fatal!("access {:?} is not in flight", id),
        }
    }

    pub fn contains(&self, id: AccessId) -> bool {
        matches!(self.slots.get(id.0 as usize), Some(Some(_)))
    }

    pub fn free(&mut self, id: AccessId) -> MemAccess {
        match self.slots.get_mut(id.0 as usize).and_then(|s| s.take()) {
            Some(a) => {
                self.free.push(id.0);
                a
            }
            None => fatal!("access {:?} freed twice", id),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Notify-once response delivery: returns the receivers to notify and
    /// frees the access.
    pub fn respond(&mut self, id: AccessId) -> (MemAccess, Vec<ElementId>) {
        let receivers = self.get_mut(id).receivers.drain_live();
        (self.free(id), receivers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> MemAccess {
        MemAccess::new(DynStreamId::new(0, 2, 1), ElementId(0), 5, 0x1000, 0x1008, 8)
    }

    #[test]
    fn reregister_after_deregister() {
        let mut list = ReceiverList::default();
        assert!(list.register(ElementId(1)));
        assert!(list.register(ElementId(2)));
        list.deregister(ElementId(1));
        assert_eq!(list.live_count(), 1);
        assert!(list.register(ElementId(1)));
        assert_eq!(list.len(), 2);
        assert_eq!(list.drain_live(), vec![ElementId(1), ElementId(2)]);
        assert!(list.drain_live().is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate receiver")]
    fn duplicate_live_registration_is_fatal() {
        let mut list = ReceiverList::default();
        list.register(ElementId(1));
        list.register(ElementId(1));
    }

    #[test]
    #[should_panic(expected = "already been deregistered")]
    fn double_deregister_is_fatal() {
        let mut list = ReceiverList::default();
        list.register(ElementId(1));
        list.deregister(ElementId(1));
        list.deregister(ElementId(1));
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unknown_deregister_is_fatal() {
        ReceiverList::default().deregister(ElementId(9));
    }

    #[test]
    fn overflow_is_reported() {
        let mut a = access();
        for i in 0..MAX_NUM_RECEIVERS as u32 {
            a.register_receiver(ElementId(i), OverflowPolicy::Report).unwrap();
        }
        let err = a.register_receiver(ElementId(999), OverflowPolicy::Report).unwrap_err();
        assert_eq!(
            err.to_string(),
            "too many receivers (64) on access to line 0x1000 led by C0-S2-I1[5]"
        );
        assert!(a.check_receiver_room(ElementId(999), OverflowPolicy::Report).is_err());
        // A deregistered slot is reused without growing, but only by its owner.
        a.deregister_receiver(ElementId(3));
        assert!(a.receivers().has_room_for(ElementId(3)));
        assert!(!a.receivers().has_room_for(ElementId(999)));
        a.register_receiver(ElementId(3), OverflowPolicy::Report).unwrap();
    }

    #[test]
    fn pool_respond_frees_once() {
        let mut pool = AccessPool::new();
        let id = pool.alloc(access());
        pool.get_mut(id).register_receiver(ElementId(0), OverflowPolicy::Report).unwrap();
        pool.get_mut(id).register_receiver(ElementId(1), OverflowPolicy::Report).unwrap();
        pool.get_mut(id).deregister_receiver(ElementId(0));
        let (a, notify) = pool.respond(id);
        assert_eq!(notify, vec![ElementId(1)]);
        assert_eq!(a.slice(64).vaddr, 0x1000);
        assert!(!pool.contains(id));
        assert_eq!(pool.alloc(access()), id);
    }
}
