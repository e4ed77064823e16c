//! Owned UTF-16 payloads.
//!
//! Command records carry an optional string payload as a raw pointer plus a
//! code-unit count. [`NativeString`] is the owning side of that pair: turning
//! it into raw parts hands ownership to whoever ends up holding the record,
//! and [`NativeString::from_raw_parts`] takes it back exactly once.

use crate::error::{PayloadError, PayloadResult};

/// Largest payload that fits the record's signed 4-byte length field
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

/// Heap-allocated UTF-16 string with a stable address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeString {
    data: Box<[u16]>,
}

impl NativeString {
    /// Encode a Rust string as UTF-16
    pub fn new(value: &str) -> PayloadResult<Self> {
        Self::from_utf16(value.encode_utf16().collect())
    }

    /// Wrap already-encoded UTF-16 code units
    pub fn from_utf16(units: Vec<u16>) -> PayloadResult<Self> {
        if units.len() > MAX_PAYLOAD_LEN {
            return Err(PayloadError::TooLong {
                len: units.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            data: units.into_boxed_slice(),
        })
    }

    /// Length in UTF-16 code units
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the code units
    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }

    /// Decode, replacing unpaired surrogates
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.data)
    }

    /// Give up ownership, returning the buffer address and length
    ///
    /// The caller becomes responsible for passing both values back to
    /// [`from_raw_parts`](Self::from_raw_parts) exactly once.
    pub fn into_raw_parts(self) -> (*mut u16, usize) {
        let len = self.data.len();
        let ptr = Box::into_raw(self.data) as *mut u16;
        (ptr, len)
    }

    /// Reclaim a buffer produced by [`into_raw_parts`](Self::into_raw_parts)
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must come from a single `into_raw_parts` call and must
    /// not have been reclaimed before.
    pub unsafe fn from_raw_parts(ptr: *mut u16, len: usize) -> Self {
        let slice = std::ptr::slice_from_raw_parts_mut(ptr, len);
        Self {
            data: Box::from_raw(slice),
        }
    }
}

impl std::fmt::Display for NativeString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}
