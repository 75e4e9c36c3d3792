// id.rs — Stream, strand and arena identifiers
//
// `DynStreamId` identifies one dynamic instance of a static stream across the
// whole system; `DynStrandId` narrows it to one strand of a split stream.
// Arena keys (`ConfigId`, `ElementId`, `AccessId`) replace the pointer web of
// configs, elements and in-flight accesses with plain integer references.

use std::fmt;

/// Compiler-assigned identity of a static stream.
pub type StaticId = u64;

/// Uniquely identifies a dynamic stream in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DynStreamId {
    pub core_id: i32,
    pub static_id: StaticId,
    pub instance: u64,
}

impl DynStreamId {
    pub fn new(core_id: i32, static_id: StaticId, instance: u64) -> Self {
        Self {
            core_id,
            static_id,
            instance,
        }
    }

    pub fn is_same_static_stream(&self, other: &DynStreamId) -> bool {
        self.core_id == other.core_id && self.static_id == other.static_id
    }
}

impl fmt::Display for DynStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}-S{}-I{}", self.core_id, self.static_id, self.instance)
    }
}

/// A dynamic stream, optionally partitioned into strands.
///
/// `total_strands == 1` means the stream is not split and `strand_idx` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DynStrandId {
    pub stream: DynStreamId,
    pub strand_idx: u32,
    pub total_strands: u32,
}

impl DynStrandId {
    pub fn new(stream: DynStreamId, strand_idx: u32, total_strands: u32) -> Self {
        assert!(
            strand_idx < total_strands,
            "strand {} out of {} strands for {}",
            strand_idx,
            total_strands,
            stream
        );
        Self {
            stream,
            strand_idx,
            total_strands,
        }
    }

    pub fn is_split(&self) -> bool {
        self.total_strands > 1
    }
}

impl From<DynStreamId> for DynStrandId {
    fn from(stream: DynStreamId) -> Self {
        Self {
            stream,
            strand_idx: 0,
            total_strands: 1,
        }
    }
}

impl fmt::Display for DynStrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_split() {
            write!(
                f,
                "{}-T{}/{}",
                self.stream, self.strand_idx, self.total_strands
            )
        } else {
            write!(f, "{}", self.stream)
        }
    }
}

/// Arena key of a `StreamConfig` inside the dependence graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigId(pub u32);

/// Arena key of an `Element` inside the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u32);

/// Pool key of an in-flight `MemAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessId(pub u32);

/// Allocator for dynamic stream instances. Instances of the same static
/// stream are numbered from 1 in configure order, so 0 never names a live
/// instance.
#[derive(Debug, Default)]
pub struct InstanceAllocator {
    next_instance: std::collections::HashMap<(i32, StaticId), u64>,
}

impl InstanceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, core_id: i32, static_id: StaticId) -> DynStreamId {
        let next = self.next_instance.entry((core_id, static_id)).or_insert(1);
        let id = DynStreamId::new(core_id, static_id, *next);
        *next += 1;
        id
    }
}
