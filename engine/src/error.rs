// error.rs — Typed error enums for every recoverable failure class
//
// Protocol invariant violations are not represented here: they abort through
// `fatal!` because they indicate an engine modeling defect. What remains are
// unsupported patterns (caller falls back to a non-offloaded path), fixed
// capacity overflow under `OverflowPolicy::Report`, and configuration input.

use thiserror::Error;

use crate::diag::{codes, Coded, DiagCode};
use crate::id::DynStreamId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("affine pattern needs 2N+1 parameters, got {count}: {params}")]
    ParamCount { count: usize, params: String },

    #[error("[InvalidAffinePattern] non-monotonic trip in {pattern}")]
    NonMonotonicTrip { pattern: String },

    #[error("variant parameter at position {position} in {params}")]
    VariantParam { position: usize, params: String },

    #[error("cannot split {pattern}: {reason}")]
    UnsupportedSplit { pattern: String, reason: String },
}

impl Coded for PatternError {
    fn code(&self) -> DiagCode {
        match self {
            PatternError::ParamCount { .. } => codes::E0101_PARAM_COUNT,
            PatternError::NonMonotonicTrip { .. } => codes::E0102_NON_MONOTONIC_TRIP,
            PatternError::VariantParam { .. } => codes::E0103_VARIANT_PARAM,
            PatternError::UnsupportedSplit { .. } => codes::E0104_UNSUPPORTED_SPLIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("no stream config for {0}")]
    UnknownStream(DynStreamId),
}

impl Coded for GraphError {
    fn code(&self) -> DiagCode {
        codes::E0202_UNKNOWN_CONFIG
    }
}

/// Overflow of one of the fixed-capacity arrays.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error(
        "more than {capacity} cache blocks for element {stream}[{idx}], addr {addr:#x} size {size}"
    )]
    CacheBlocks {
        stream: DynStreamId,
        idx: u64,
        addr: u64,
        size: u64,
        capacity: usize,
    },

    #[error("too many receivers ({capacity}) on access to line {line:#x} led by {stream}[{idx}]")]
    Receivers {
        stream: DynStreamId,
        idx: u64,
        line: u64,
        capacity: usize,
    },
}

impl Coded for CapacityError {
    fn code(&self) -> DiagCode {
        match self {
            CapacityError::CacheBlocks { .. } => codes::E0301_BLOCK_OVERFLOW,
            CapacityError::Receivers { .. } => codes::E0302_RECEIVER_OVERFLOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("no dynamic stream {0} is configured")]
    UnknownStream(DynStreamId),
}

impl Coded for EngineError {
    fn code(&self) -> DiagCode {
        match self {
            EngineError::Capacity(e) => e.code(),
            EngineError::Pattern(e) => e.code(),
            EngineError::UnknownStream(_) => codes::E0303_UNKNOWN_STREAM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PumError {
    #[error("{role} pattern {pattern} is not a canonical sub-region of {array}")]
    NotSubRegion {
        role: &'static str,
        pattern: String,
        array: String,
    },

    #[error("trip mismatch between source {src} and destination {dst}")]
    TripMismatch { src: String, dst: String },

    #[error("stride {stride} in dim {dim} cannot become a mask over tile size {tile}")]
    StrideNotMaskable { dim: usize, stride: i64, tile: i64 },

    #[error("invalid tiling: {0}")]
    BadTiling(String),

    #[error("pattern has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl Coded for PumError {
    fn code(&self) -> DiagCode {
        match self {
            PumError::NotSubRegion { .. } => codes::E0401_NOT_SUB_REGION,
            PumError::TripMismatch { .. } => codes::E0402_TRIP_MISMATCH,
            PumError::StrideNotMaskable { .. } => codes::E0403_STRIDE_NOT_MASKABLE,
            PumError::BadTiling(_) => codes::E0404_BAD_TILING,
            PumError::DimensionMismatch { .. } => codes::E0405_DIMENSION_MISMATCH,
        }
    }
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to parse options: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read options: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize for fingerprint: {0}")]
    Serialize(serde_json::Error),

    #[error("invalid options: {0}")]
    Invalid(String),
}

impl Coded for OptionsError {
    fn code(&self) -> DiagCode {
        match self {
            OptionsError::Parse(_) | OptionsError::Io(_) => codes::E0501_OPTIONS_PARSE,
            OptionsError::Invalid(_) => codes::E0502_OPTIONS_INVALID,
            OptionsError::Serialize(_) => codes::E0503_OPTIONS_SERIALIZE,
        }
    }
}

/// Abort on a violated engine invariant.
///
/// Emits an `error!` event first so the offending identities reach the log
/// even when the panic message is swallowed by a harness.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!(target: "sfe::fatal", "{}", msg);
        panic!("{}", msg)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_forwards_codes() {
        let e: EngineError = CapacityError::Receivers {
            stream: DynStreamId::new(0, 1, 1),
            idx: 3,
            line: 0x40,
            capacity: 64,
        }
        .into();
        assert_eq!(e.code(), codes::E0302_RECEIVER_OVERFLOW);
        assert!(e.to_string().contains("C0-S1-I1[3]"));
    }

    #[test]
    fn diagnostic_from_pattern_error() {
        let e = PatternError::NonMonotonicTrip {
            pattern: "1000:8:4:64:2".to_string(),
        };
        let d = e.to_diagnostic();
        assert_eq!(
            d.to_string(),
            "error[E0102]: [InvalidAffinePattern] non-monotonic trip in 1000:8:4:64:2"
        );
    }

    #[test]
    #[should_panic(expected = "double ready on C0-S1-I1")]
    fn fatal_panics_with_message() {
        let id = DynStreamId::new(0, 1, 1);
        fatal!("double ready on {}", id);
    }
}
