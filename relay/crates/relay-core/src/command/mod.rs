//! Command Module - Records, Kinds and Buffers
//!
//! The unit of handoff between an isolate and the host:
//! - [`IsolateCommand`] codes and [`CommandKind`] categories
//! - [`CommandRecord`], the fixed 32-byte wire record
//! - [`CommandBuffer`], the growable record array every pipeline stage uses

pub mod buffer;
pub mod kind;
pub mod record;

pub use buffer::{CommandBuffer, DEFAULT_COMMAND_CAPACITY};
pub use kind::{CommandKind, IsolateCommand};
pub use record::CommandRecord;
