//! relay-util - Foundation Types for the Isolate Command Relay
//!
//! ============================================================================
//! MODULE OVERVIEW
//! ============================================================================
//!
//! Small, dependency-light building blocks shared by the relay crates:
//!
//! - [`handle`]: generation-checked handles ([`NativeHandle`]) and the
//!   [`HandleArena`] that hands them out. A handle packs into the same 8-byte
//!   slot a raw native pointer would occupy in a command record.
//! - [`native_string`]: owned UTF-16 payloads ([`NativeString`]) whose
//!   ownership travels through a command record to the consumer.
//! - [`interner`]: the per-runtime [`StringTable`] used for built-in names.
//! - [`error`]: error types for the above.
//!
//! DESIGN PRINCIPLES:
//! ------------------
//! 1. NO AMBIENT STATE
//!    Nothing in this crate is global. Tables and arenas are owned by whoever
//!    created them and passed down explicitly.
//!
//! 2. FIXED-WIDTH INTEROP
//!    Anything that crosses the host boundary has a stable bit layout.

pub mod error;
pub mod handle;
pub mod interner;
pub mod native_string;

pub use error::{HandleError, PayloadError};
pub use handle::{HandleArena, NativeHandle};
pub use interner::{Atom, StringTable};
pub use native_string::NativeString;

pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
