// value.rs — Stream values and formal parameters
//
// A `StreamValue` is the 64-byte register every stream element carries.
// Addresses and scalar induction values live in lane 0. Formal parameters are
// either invariant values fixed at configure time or references to a base
// stream whose current value must be fetched through a resolver.
//
// Preconditions: resolvers are only invoked for `FormalParam::Base` entries.
// Failure modes: `unreachable_resolver` panics when a pattern that should be
//   fully invariant turns out to reference a base stream.
// Side effects: none.

use std::fmt;

use crate::id::StaticId;

pub const STREAM_VALUE_LANES: usize = 8;
pub const STREAM_VALUE_BYTES: usize = STREAM_VALUE_LANES * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamValue {
    lanes: [u64; STREAM_VALUE_LANES],
}

impl StreamValue {
    pub fn from_u64(v: u64) -> Self {
        let mut value = Self::default();
        value.lanes[0] = v;
        value
    }

    pub fn front(&self) -> u64 {
        self.lanes[0]
    }

    pub fn set_front(&mut self, v: u64) {
        self.lanes[0] = v;
    }

    pub fn lane(&self, i: usize) -> u64 {
        self.lanes[i]
    }

    pub fn int64(&self) -> i64 {
        self.lanes[0] as i64
    }

    /// Little-endian byte view, lane 0 first.
    pub fn as_bytes(&self) -> [u8; STREAM_VALUE_BYTES] {
        let mut out = [0u8; STREAM_VALUE_BYTES];
        for (i, lane) in self.lanes.iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&lane.to_le_bytes());
        }
        out
    }

    /// Build a value from up to 64 little-endian bytes; missing bytes are zero.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; STREAM_VALUE_BYTES];
        let n = bytes.len().min(STREAM_VALUE_BYTES);
        buf[..n].copy_from_slice(&bytes[..n]);
        let mut value = Self::default();
        for (i, lane) in value.lanes.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&buf[i * 8..(i + 1) * 8]);
            *lane = u64::from_le_bytes(word);
        }
        value
    }
}

impl fmt::Display for StreamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.lanes[0])
    }
}

// ── Formal parameters ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormalParam {
    Invariant(StreamValue),
    Base(StaticId),
}

impl FormalParam {
    pub fn invariant(v: u64) -> Self {
        FormalParam::Invariant(StreamValue::from_u64(v))
    }

    pub fn base(id: StaticId) -> Self {
        FormalParam::Base(id)
    }

    pub fn is_invariant(&self) -> bool {
        matches!(self, FormalParam::Invariant(_))
    }

    pub fn invariant_value(&self) -> Option<u64> {
        match self {
            FormalParam::Invariant(v) => Some(v.front()),
            FormalParam::Base(_) => None,
        }
    }
}

impl fmt::Display for FormalParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormalParam::Invariant(v) => write!(f, "Const-{} ", v),
            FormalParam::Base(id) => write!(f, "Strm-{} ", id),
        }
    }
}

/// Render a formal parameter list the way trace logs show it.
pub fn format_params(params: &[FormalParam]) -> String {
    params.iter().map(|p| p.to_string()).collect()
}

/// Helper to build an all-invariant parameter list.
pub fn invariant_params(values: &[u64]) -> Vec<FormalParam> {
    values.iter().map(|&v| FormalParam::invariant(v)).collect()
}

/// Resolve formal parameters into concrete values. The resolver is called
/// once per `Base` entry, in order, and never for invariants.
pub fn resolve_params<F>(formal: &[FormalParam], mut resolver: F) -> Vec<StreamValue>
where
    F: FnMut(StaticId) -> StreamValue,
{
    formal
        .iter()
        .map(|p| match p {
            FormalParam::Invariant(v) => *v,
            FormalParam::Base(id) => resolver(*id),
        })
        .collect()
}

/// Resolver for patterns known to be invariant.
pub fn unreachable_resolver(id: StaticId) -> StreamValue {
    crate::fatal!("resolver invoked for base stream {} on an invariant pattern", id)
}
