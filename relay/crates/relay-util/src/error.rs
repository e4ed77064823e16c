//! Core error types for relay-util crate
//!
//! This module defines error types used throughout the util crate.

use thiserror::Error;

/// Error type for handle arena operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    /// The handle's slot was freed (and possibly reused) since it was issued
    #[error("Stale handle: index {index}, generation {generation}")]
    Stale { index: u32, generation: u32 },

    /// Arena reached the maximum number of addressable slots
    #[error("Handle arena exhausted: {slots} slots in use")]
    Exhausted { slots: usize },
}

/// Error type for payload construction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload length does not fit the record's 4-byte length field
    #[error("Payload too long: {len} code units (max {max})")]
    TooLong { len: usize, max: usize },
}

/// Result type alias for handle operations
pub type HandleResult<T> = std::result::Result<T, HandleError>;

/// Result type alias for payload operations
pub type PayloadResult<T> = std::result::Result<T, PayloadError>;
