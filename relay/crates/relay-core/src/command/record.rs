//! Fixed-width command record.
//!
//! ```text
//! offset  size  field
//!   0      4    kind          (i32, IsolateCommand code)
//!   4      4    payload_len   (i32, UTF-16 code units)
//!   8      8    payload_ref   (pointer to UTF-16 data, 0 if absent)
//!  16      8    native_ptr_1  (packed NativeHandle, 0 if absent)
//!  24      8    native_ptr_2  (packed NativeHandle, 0 if absent)
//! ```
//!
//! The host reads these records straight out of the active buffer, so the
//! layout must not change.

use relay_util::{NativeHandle, NativeString};

use super::kind::{CommandKind, IsolateCommand};

/// One command as seen on both sides of the handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CommandRecord {
    pub kind: i32,
    pub payload_len: i32,
    pub payload_ref: i64,
    pub native_ptr_1: i64,
    pub native_ptr_2: i64,
}

static_assertions::const_assert_eq!(std::mem::size_of::<CommandRecord>(), 32);
static_assertions::const_assert_eq!(std::mem::align_of::<CommandRecord>(), 8);
static_assertions::assert_impl_all!(CommandRecord: Send, Sync, Copy);

impl CommandRecord {
    /// Build a record, moving the payload's ownership into it
    ///
    /// The payload is only reclaimed by [`take_payload`](Self::take_payload)
    /// (or the host's release entry point). Dropping the record leaks it.
    pub fn new(
        command: IsolateCommand,
        payload: Option<NativeString>,
        handle1: Option<NativeHandle>,
        handle2: Option<NativeHandle>,
    ) -> Self {
        let (payload_ref, payload_len) = match payload {
            Some(payload) => {
                let (ptr, len) = payload.into_raw_parts();
                // NativeString caps its length at i32::MAX.
                (ptr as i64, len as i32)
            },
            None => (0, 0),
        };

        Self {
            kind: command.code(),
            payload_len,
            payload_ref,
            native_ptr_1: NativeHandle::to_slot(handle1),
            native_ptr_2: NativeHandle::to_slot(handle2),
        }
    }

    /// Decoded command, `None` for unknown codes
    pub fn command(&self) -> Option<IsolateCommand> {
        IsolateCommand::from_code(self.kind)
    }

    /// Category bit of this record
    pub fn category(&self) -> CommandKind {
        CommandKind::of_code(self.kind)
    }

    /// First object handle
    pub fn handle1(&self) -> Option<NativeHandle> {
        NativeHandle::from_raw(self.native_ptr_1 as u64)
    }

    /// Second object handle
    pub fn handle2(&self) -> Option<NativeHandle> {
        NativeHandle::from_raw(self.native_ptr_2 as u64)
    }

    /// Whether a payload is attached
    pub fn has_payload(&self) -> bool {
        self.payload_ref != 0
    }

    /// Borrow the payload's code units
    ///
    /// # Safety
    ///
    /// The payload must not have been reclaimed yet, by this copy of the
    /// record or any other.
    pub unsafe fn payload(&self) -> Option<&[u16]> {
        if self.payload_ref == 0 {
            return None;
        }
        Some(std::slice::from_raw_parts(
            self.payload_ref as *const u16,
            self.payload_len as usize,
        ))
    }

    /// Reclaim ownership of the payload
    ///
    /// # Safety
    ///
    /// Must be called at most once across all copies of this record, and
    /// only by the party that owns the payload (the consumer once it has
    /// read the record, or the producer if the record was never published).
    pub unsafe fn take_payload(&self) -> Option<NativeString> {
        if self.payload_ref == 0 {
            return None;
        }
        Some(NativeString::from_raw_parts(
            self.payload_ref as *mut u16,
            self.payload_len as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_util::HandleArena;

    #[test]
    fn test_record_without_payload() {
        let record = CommandRecord::new(IsolateCommand::FinishRecording, None, None, None);
        assert_eq!(record.command(), Some(IsolateCommand::FinishRecording));
        assert!(!record.has_payload());
        assert_eq!(record.native_ptr_1, 0);
        assert!(record.handle1().is_none());
    }

    #[test]
    fn test_record_carries_handles() {
        let mut arena = HandleArena::new();
        let target = arena.insert(());
        let other = arena.insert(());
        let record =
            CommandRecord::new(IsolateCommand::AddEvent, None, Some(target), Some(other));

        assert_eq!(record.handle1(), Some(target));
        assert_eq!(record.handle2(), Some(other));
        assert_eq!(record.category(), CommandKind::EVENT);
    }

    #[test]
    fn test_payload_ownership_moves_through_record() {
        let payload = NativeString::new("click").unwrap();
        let record = CommandRecord::new(IsolateCommand::AddEvent, Some(payload), None, None);
        assert!(record.has_payload());
        assert_eq!(record.payload_len, 5);

        let units = unsafe { record.payload() }.unwrap().to_vec();
        assert_eq!(String::from_utf16(&units).unwrap(), "click");

        let owned = unsafe { record.take_payload() }.unwrap();
        assert_eq!(owned.to_string(), "click");
    }

    #[test]
    fn test_field_offsets() {
        let record = CommandRecord::default();
        let base = &record as *const CommandRecord as usize;
        assert_eq!(&record.kind as *const i32 as usize - base, 0);
        assert_eq!(&record.payload_len as *const i32 as usize - base, 4);
        assert_eq!(&record.payload_ref as *const i64 as usize - base, 8);
        assert_eq!(&record.native_ptr_1 as *const i64 as usize - base, 16);
        assert_eq!(&record.native_ptr_2 as *const i64 as usize - base, 24);
    }
}
