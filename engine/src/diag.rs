// diag.rs — Unified diagnostics model
//
// Stable diagnostic codes shared by every error enum in the crate, and the
// `Diagnostic` record the CLI renders. Errors keep their own typed payloads
// (see `error.rs`); this module only gives them a stable external identity.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`).
///
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning. Codes are grouped by hundreds per concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E01xx: address patterns and strands
    pub const E0101_PARAM_COUNT: DiagCode = DiagCode("E0101");
    pub const E0102_NON_MONOTONIC_TRIP: DiagCode = DiagCode("E0102");
    pub const E0103_VARIANT_PARAM: DiagCode = DiagCode("E0103");
    pub const E0104_UNSUPPORTED_SPLIT: DiagCode = DiagCode("E0104");

    // E02xx: dependence graph
    pub const E0201_ILLEGAL_EDGE: DiagCode = DiagCode("E0201");
    pub const E0202_UNKNOWN_CONFIG: DiagCode = DiagCode("E0202");

    // E03xx: element lifecycle
    pub const E0301_BLOCK_OVERFLOW: DiagCode = DiagCode("E0301");
    pub const E0302_RECEIVER_OVERFLOW: DiagCode = DiagCode("E0302");
    pub const E0303_UNKNOWN_STREAM: DiagCode = DiagCode("E0303");

    // E04xx: PUM data-move compiler
    pub const E0401_NOT_SUB_REGION: DiagCode = DiagCode("E0401");
    pub const E0402_TRIP_MISMATCH: DiagCode = DiagCode("E0402");
    pub const E0403_STRIDE_NOT_MASKABLE: DiagCode = DiagCode("E0403");
    pub const E0404_BAD_TILING: DiagCode = DiagCode("E0404");
    pub const E0405_DIMENSION_MISMATCH: DiagCode = DiagCode("E0405");

    // E05xx: configuration
    pub const E0501_OPTIONS_PARSE: DiagCode = DiagCode("E0501");
    pub const E0502_OPTIONS_INVALID: DiagCode = DiagCode("E0502");
    pub const E0503_OPTIONS_SERIALIZE: DiagCode = DiagCode("E0503");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A rendered diagnostic, produced from a typed error at the CLI boundary.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Anything that can be reported with a stable code.
pub trait Coded: fmt::Display {
    fn code(&self) -> DiagCode;

    fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(DiagLevel::Error, self.to_string()).with_code(self.code())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
