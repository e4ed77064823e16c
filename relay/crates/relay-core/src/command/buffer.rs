//! CommandBuffer - growable flat array of command records.
//!
//! Append-only between clears, insertion order is replay order. Capacity
//! doubles when exceeded and never shrinks, so a buffer that has been through
//! one large burst keeps that room for the next one.
//!
//! No synchronization of its own: the pipeline decides who may touch which
//! buffer.

use super::kind::CommandKind;
use super::record::CommandRecord;

/// Starting capacity of every buffer, in records
pub const DEFAULT_COMMAND_CAPACITY: usize = 2048;

/// Ordered command records plus the OR of their categories
#[derive(Debug)]
pub struct CommandBuffer {
    records: Vec<CommandRecord>,
    kind_mask: CommandKind,
}

impl CommandBuffer {
    /// Create a buffer with [`DEFAULT_COMMAND_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_COMMAND_CAPACITY)
    }

    /// Create a buffer with room for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            kind_mask: CommandKind::empty(),
        }
    }

    /// Append one record
    #[inline]
    pub fn append(&mut self, record: CommandRecord) {
        self.grow_for(1);
        self.kind_mask |= record.category();
        self.records.push(record);
    }

    /// Append records in order
    pub fn append_batch(&mut self, records: &[CommandRecord]) {
        if records.is_empty() {
            return;
        }
        self.grow_for(records.len());
        for record in records {
            self.kind_mask |= record.category();
        }
        self.records.extend_from_slice(records);
    }

    /// Move every record of `source` to the end of this buffer, leaving
    /// `source` cleared
    pub fn append_from(&mut self, source: &mut CommandBuffer) {
        self.append_batch(&source.records);
        source.clear();
    }

    /// Records in insertion order
    #[inline]
    pub fn data(&self) -> &[CommandRecord] {
        &self.records
    }

    /// Address of the backing storage
    #[inline]
    pub fn as_ptr(&self) -> *const CommandRecord {
        self.records.as_ptr()
    }

    /// Number of records
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the buffer holds no records
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current capacity in records
    #[inline]
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Categories present in the buffer
    #[inline]
    pub fn kind_mask(&self) -> CommandKind {
        self.kind_mask
    }

    /// Drop all records and reset the mask, keeping capacity
    ///
    /// Payloads referenced by the records are not released.
    #[inline]
    pub fn clear(&mut self) {
        self.records.clear();
        self.kind_mask = CommandKind::empty();
    }

    /// Grow capacity geometrically until `additional` more records fit
    fn grow_for(&mut self, additional: usize) {
        let needed = self.records.len() + additional;
        let capacity = self.records.capacity();
        if needed <= capacity {
            return;
        }

        let mut target = capacity.max(1);
        while target < needed {
            target *= 2;
        }
        log::trace!("CommandBuffer grows {} -> {} records", capacity, target);
        self.records.reserve_exact(target - self.records.len());
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}
