// options.rs — Engine configuration
//
// `EngineOptions` carries the constants the engine consumes from the
// surrounding simulator: cache line size, coalescing, compute latency
// parameters and the overflow policy for fixed-capacity arrays. Options load
// from JSON and expose a SHA-256 fingerprint of their compact canonical form
// so a run can be keyed by the configuration that produced it.
//
// Preconditions: `line_size` is a non-zero power of two (checked by `validate`).
// Failure modes: `OptionsError` on unreadable, malformed or invalid input.
// Side effects: `load` reads one file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CapacityError, OptionsError};
use crate::fatal;

/// What to do when a fixed-capacity array (cache blocks per element,
/// receivers per access) would overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Return a `CapacityError` to the caller.
    Report,
    /// Abort with a fatal invariant violation.
    Abort,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        if cfg!(test) {
            OverflowPolicy::Report
        } else {
            OverflowPolicy::Abort
        }
    }
}

impl OverflowPolicy {
    pub fn overflow<T>(self, err: CapacityError) -> Result<T, CapacityError> {
        match self {
            OverflowPolicy::Report => Err(err),
            OverflowPolicy::Abort => fatal!("{}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Cache line size in bytes.
    pub line_size: u64,
    /// Merge contiguous elements into one slice when they share a line.
    pub coalesce_continuous: bool,
    /// Extra cycles charged to vectorized compute functions.
    pub simd_delay: u64,
    /// Compute functions run on a scalar ALU and skip `simd_delay`.
    pub scalar_alu: bool,
    pub overflow_policy: OverflowPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            line_size: 64,
            coalesce_continuous: true,
            simd_delay: 2,
            scalar_alu: false,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_json(text: &str) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.line_size == 0 || !self.line_size.is_power_of_two() {
            return Err(OptionsError::Invalid(format!(
                "line_size must be a non-zero power of two, got {}",
                self.line_size
            )));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Result<[u8; 32], OptionsError> {
        fingerprint(self)
    }
}

/// SHA-256 over the compact JSON rendering of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<[u8; 32], OptionsError> {
    let canonical = serde_json::to_string(value).map_err(OptionsError::Serialize)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    Ok(hash)
}

/// First 8 bytes of a fingerprint as 16 hex chars.
pub fn short_hex(hash: &[u8; 32]) -> String {
    hash.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}
