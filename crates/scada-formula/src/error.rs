//! Formula compiler/evaluator errors (spec §7: `FormulaRuntimeError`, and the
//! fatal compile-time `ConfigError` path described in spec §4.3).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    /// Startup compile failure — fatal, names the offending source position
    /// so the caller can report "channel N, formula: <reason> at col C" (§4.3).
    #[error("formula parse error at position {pos}: {reason}")]
    Parse { pos: usize, reason: String },

    /// Per-call runtime failure — caught by `calc`, converted to `stat = formula_error`.
    #[error("formula runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, FormulaError>;
