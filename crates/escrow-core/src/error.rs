//! # Error Types
//!
//! Validation errors for the primitives defined in this crate. Transition,
//! ledger and service errors live in their own crates and wrap these where
//! needed.

use thiserror::Error;

/// Error raised when a core primitive is constructed from invalid input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was empty or malformed.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A timestamp could not be parsed or is outside the supported range.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An amount or ratio was outside its permitted range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
